//! The observe → decide → act → learn state machine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use action_exec::{ExecCtx, RetryExecutor};
use deskpilot_core_types::{
    Action, ActionKind, ErrorKind, Observation, SessionResult, SessionStatus, StateKey,
    TrailEntry,
};
use fingerprint::{state_key, Fingerprint, FingerprintConfig};
use policy_engine::{
    compute_reward, PolicyEngine, RewardContext, REWARD_DONE_FAIL, REWARD_DONE_SUCCESS,
    REWARD_PARSE_FAIL, REWARD_VERIFY_FAIL,
};
use skill_cache::{RecordedStep, SkillCache, SkillGuard};

use crate::boundary::{Decider, DecisionHints, Grounder, StepRecord, TaskSpec, Verifier};
use crate::drift::DriftMonitor;

/// Session-level tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Hard step budget per task.
    /// Default: 25
    pub max_steps: u32,

    /// Deadline per action, retries included, in milliseconds.
    /// Default: 15000
    pub step_timeout_ms: u64,

    pub fingerprint: FingerprintConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            step_timeout_ms: 15_000,
            fingerprint: FingerprintConfig::default(),
        }
    }
}

/// Where the action being acted on came from.
enum Origin {
    Live,
    Replay {
        cache_key: String,
        expected_after: Option<Fingerprint>,
        threshold: f64,
        remaining: usize,
    },
}

/// The session loop: drives one task from `Idle` to `Done` or `Failed`.
///
/// Owns the policy engine and the skill cache exclusively; all learning
/// mutations happen on this loop's thread of control, and both stores are
/// flushed from consistent in-memory state at every terminal transition.
pub struct SessionLoop {
    grounder: Arc<dyn Grounder>,
    decider: Arc<dyn Decider>,
    verifier: Option<Arc<dyn Verifier>>,
    executor: RetryExecutor,
    policy: PolicyEngine,
    cache: SkillCache,
    config: SessionConfig,
}

impl SessionLoop {
    pub fn new(
        grounder: Arc<dyn Grounder>,
        decider: Arc<dyn Decider>,
        verifier: Option<Arc<dyn Verifier>>,
        executor: RetryExecutor,
        policy: PolicyEngine,
        cache: SkillCache,
        config: SessionConfig,
    ) -> Self {
        Self {
            grounder,
            decider,
            verifier,
            executor,
            policy,
            cache,
            config,
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn cache(&self) -> &SkillCache {
        &self.cache
    }

    /// Replay a finished session's trail with an amplified human score.
    pub fn apply_human_feedback(&mut self, trail: &[TrailEntry], score: f64) {
        self.policy.apply_human_feedback(trail, score);
        self.policy.flush();
    }

    /// Run one task to a terminal state.
    pub async fn run(&mut self, task: &TaskSpec, cancel: CancellationToken) -> SessionResult {
        let started = Instant::now();
        let mut trail: Vec<TrailEntry> = Vec::new();
        let mut history: Vec<StepRecord> = Vec::new();
        let mut hints = DecisionHints::default();
        let mut monitor = DriftMonitor::new(self.config.fingerprint.clone());
        let mut steps = 0u32;

        // Successful non-terminal actions, kept for the post-session record.
        let mut recorded: Vec<RecordedStep> = Vec::new();
        let mut used_live_decider = false;

        // Per-skill exclusive access. A busy skill skips the cache on both
        // ends and runs purely live.
        let guard: Option<SkillGuard> = match self.cache.acquire(&task.skill_id) {
            Ok(guard) => Some(guard),
            Err(err) => {
                warn!(skill = %task.skill_id, "running without cache: {}", err);
                None
            }
        };
        let mut cache_consulted = guard.is_none();
        let mut replay_queue: VecDeque<RecordedStep> = VecDeque::new();
        let mut replay_key: Option<String> = None;
        let mut replay_threshold = 0.0;

        info!(task = %task.task_id.0, skill = %task.skill_id, "session starting");

        // Idle → Observing.
        let mut observation = match self.grounder.capture().await {
            Ok(obs) => obs,
            Err(err) => {
                return self.terminal(
                    SessionStatus::Failed,
                    Some(ErrorKind::CaptureUnavailable),
                    err.to_string(),
                    steps,
                    started,
                    trail,
                    None,
                );
            }
        };
        let initial_fp = Fingerprint::of(&observation, &self.config.fingerprint);

        loop {
            // Cancellation is observed at every state boundary: recorded
            // results are flushed, no new actions are performed.
            if cancel.is_cancelled() {
                info!(task = %task.task_id.0, "session cancelled");
                return self.terminal(
                    SessionStatus::Failed,
                    None,
                    "cancelled",
                    steps,
                    started,
                    trail,
                    Some(observation),
                );
            }
            if steps >= self.config.max_steps {
                return self.terminal(
                    SessionStatus::Failed,
                    Some(ErrorKind::StepBudgetExceeded),
                    format!("step budget of {} exhausted", self.config.max_steps),
                    steps,
                    started,
                    trail,
                    Some(observation),
                );
            }

            let state = state_key(&observation, &self.config.fingerprint);

            // Deciding: cache first, live decider on a miss.
            if !cache_consulted {
                cache_consulted = true;
                let live_fp = Fingerprint::of(&observation, &self.config.fingerprint);
                if let Some(plan) = self.cache.lookup(&task.skill_id, &task.params, &live_fp) {
                    info!(
                        task = %task.task_id.0,
                        key = %plan.cache_key,
                        steps = plan.steps.len(),
                        "replaying cached skill"
                    );
                    replay_threshold = plan.staleness_threshold;
                    replay_key = Some(plan.cache_key);
                    replay_queue = plan.steps.into();
                }
            }

            let (action, origin) = if let Some(key) = replay_key.clone() {
                match replay_queue.pop_front() {
                    Some(step) => {
                        let remaining = replay_queue.len();
                        (
                            step.action,
                            Origin::Replay {
                                cache_key: key,
                                expected_after: step.expected_after,
                                threshold: replay_threshold,
                                remaining,
                            },
                        )
                    }
                    None => {
                        // Replay ran out without a completion transition;
                        // treat as exhausted and go live.
                        replay_key = None;
                        continue;
                    }
                }
            } else {
                hints.loop_count = monitor.loop_count();
                let decided = match self
                    .decider
                    .decide(task, &observation, &history, &hints)
                    .await
                {
                    Ok(action) => action,
                    Err(err) => {
                        return self.terminal(
                            SessionStatus::Failed,
                            Some(ErrorKind::DeciderUnreachable),
                            err.to_string(),
                            steps,
                            started,
                            trail,
                            Some(observation),
                        );
                    }
                };
                used_live_decider = true;
                (decided, Origin::Live)
            };

            let kind = action.kind();

            // Schema validation before anything touches the OS. A malformed
            // decision is a small penalty and another spin of the loop.
            if let Err(err) = action.validate() {
                warn!(task = %task.task_id.0, %kind, "invalid decision: {}", err);
                steps += 1;
                self.policy
                    .update(&state, kind, REWARD_PARSE_FAIL, &state);
                trail.push(trail_entry(steps, &state, kind, false, REWARD_PARSE_FAIL, false));
                hints.last_error = Some(err.to_string());
                hints.policy_warning = self.policy.warning(&state, kind);
                continue;
            }

            // Terminal markers are handled here, never executed.
            if kind.is_terminal_marker() {
                match action {
                    Action::MarkDone { message } => {
                        if self.verify_done(task, &observation).await {
                            steps += 1;
                            self.policy
                                .update(&state, kind, REWARD_DONE_SUCCESS, &state);
                            trail.push(trail_entry(
                                steps,
                                &state,
                                kind,
                                true,
                                REWARD_DONE_SUCCESS,
                                false,
                            ));
                            self.record_skill(task, &guard, used_live_decider, &initial_fp, &recorded, &observation);
                            return self.terminal(
                                SessionStatus::Done,
                                None,
                                message,
                                steps,
                                started,
                                trail,
                                Some(observation),
                            );
                        }
                        // Rejected done-claim: negative regular step.
                        steps += 1;
                        self.policy
                            .update(&state, kind, REWARD_VERIFY_FAIL, &state);
                        trail.push(trail_entry(
                            steps,
                            &state,
                            kind,
                            false,
                            REWARD_VERIFY_FAIL,
                            false,
                        ));
                        hints.last_error =
                            Some("done claim rejected by external verification".to_string());
                        continue;
                    }
                    Action::MarkFailed { reason } => {
                        steps += 1;
                        self.policy.update(&state, kind, REWARD_DONE_FAIL, &state);
                        trail.push(trail_entry(steps, &state, kind, false, REWARD_DONE_FAIL, false));
                        return self.terminal(
                            SessionStatus::Failed,
                            None,
                            reason,
                            steps,
                            started,
                            trail,
                            Some(observation),
                        );
                    }
                    _ => unreachable!("is_terminal_marker covers exactly these variants"),
                }
            }

            // Acting.
            let deadline = Instant::now() + Duration::from_millis(self.config.step_timeout_ms);
            let ctx = ExecCtx::new(observation.clone(), deadline, cancel.clone());
            let mut result = self.executor.execute(&action, &ctx).await;

            // Observing the consequence.
            let post = match self.grounder.capture().await {
                Ok(obs) => obs,
                Err(err) => {
                    return self.terminal(
                        SessionStatus::Failed,
                        Some(ErrorKind::CaptureUnavailable),
                        err.to_string(),
                        steps,
                        started,
                        trail,
                        Some(observation),
                    );
                }
            };

            // Learning.
            let assessment = monitor.assess(&observation, &post, kind);
            result.drift = result.drift || assessment.drift_detected;
            result.post_observation = Some(post.clone());

            let next_state = state_key(&post, &self.config.fingerprint);
            let reward = compute_reward(
                kind,
                &RewardContext {
                    exec_success: result.success,
                    state_changed: assessment.state_changed,
                    drift_detected: assessment.drift_detected,
                    recovery_invoked: result.recovery_invoked,
                },
            );
            self.policy.update(&state, kind, reward, &next_state);

            steps += 1;
            debug!(
                task = %task.task_id.0,
                step = steps,
                %kind,
                success = result.success,
                reward,
                drift = result.drift,
                "step finished"
            );
            trail.push(trail_entry(steps, &state, kind, result.success, reward, result.drift));
            history.push(StepRecord {
                step: steps,
                action: action.clone(),
                success: result.success,
                reward,
            });

            hints.last_error = result.error_detail.clone();
            hints.policy_warning = self.policy.warning(&next_state, kind);

            if result.success {
                let post_fp = Fingerprint::of(&post, &self.config.fingerprint);
                recorded.push(RecordedStep::with_expected(action, post_fp));
            }

            // Replay bookkeeping: divergence or failure aborts the replay,
            // invalidates the entry, and falls back to the live path from
            // this point. Executed actions are not undone.
            if let Origin::Replay {
                cache_key,
                expected_after,
                threshold,
                remaining,
            } = origin
            {
                let live_fp = Fingerprint::of(&post, &self.config.fingerprint);
                let diverged = !result.success
                    || expected_after
                        .as_ref()
                        .map(|expected| !expected.matches(&live_fp, threshold))
                        .unwrap_or(false);

                if diverged {
                    warn!(
                        task = %task.task_id.0,
                        key = %cache_key,
                        error_kind = %ErrorKind::CacheStale,
                        "replay diverged, falling back to live decisions"
                    );
                    self.cache.invalidate(&cache_key);
                    replay_key = None;
                    replay_queue.clear();
                    hints.last_error = Some("cached replay diverged from live screen".to_string());
                } else if remaining == 0 {
                    // Replay complete. Accept as done if verification
                    // agrees; otherwise drop the entry and keep working.
                    if self.verify_done(task, &post).await {
                        info!(task = %task.task_id.0, key = %cache_key, "replay completed task");
                        return self.terminal(
                            SessionStatus::Done,
                            None,
                            "completed via cached replay",
                            steps,
                            started,
                            trail,
                            Some(post),
                        );
                    }
                    warn!(task = %task.task_id.0, key = %cache_key, "replayed skill failed verification");
                    self.cache.invalidate(&cache_key);
                    replay_key = None;
                    hints.last_error =
                        Some("cached replay finished but verification failed".to_string());
                }
            }

            observation = post;
        }
    }

    /// A done-claim stands when there is no verifier or the verifier
    /// confirms. A verifier error counts as an unconfirmed claim.
    async fn verify_done(&self, task: &TaskSpec, observation: &Observation) -> bool {
        match &self.verifier {
            None => true,
            Some(verifier) => match verifier.verify(task, observation).await {
                Ok(confirmed) => confirmed,
                Err(err) => {
                    warn!(task = %task.task_id.0, "verifier error: {}", err);
                    false
                }
            },
        }
    }

    /// Record the executed sequence for future replay. Only full live
    /// executions are recorded; a pure replay already refreshed its entry
    /// at lookup time.
    fn record_skill(
        &self,
        task: &TaskSpec,
        guard: &Option<SkillGuard>,
        used_live_decider: bool,
        initial_fp: &Fingerprint,
        recorded: &[RecordedStep],
        last_observation: &Observation,
    ) {
        if guard.is_none() || !used_live_decider || recorded.is_empty() {
            return;
        }
        let post_fp = Fingerprint::of(last_observation, &self.config.fingerprint);
        match self.cache.record(
            &task.skill_id,
            &task.params,
            initial_fp.clone(),
            recorded.to_vec(),
            Some(post_fp),
        ) {
            Ok(key) => debug!(task = %task.task_id.0, key = %key, "skill recorded"),
            Err(err) => debug!(task = %task.task_id.0, "skill not recorded: {}", err),
        }
    }

    /// Terminal transition: flush both stores from consistent in-memory
    /// state, then hand the result to the caller.
    #[allow(clippy::too_many_arguments)]
    fn terminal(
        &mut self,
        status: SessionStatus,
        error: Option<ErrorKind>,
        message: impl Into<String>,
        steps: u32,
        started: Instant,
        trail: Vec<TrailEntry>,
        last_observation: Option<Observation>,
    ) -> SessionResult {
        let episode_reward: f64 = trail.iter().map(|t| t.reward).sum();
        self.policy.end_session(episode_reward);
        self.cache.flush();
        self.executor.reset_recovery();

        let message = message.into();
        info!(
            status = ?status,
            steps,
            episode_reward,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session finished: {}",
            message
        );
        SessionResult {
            status,
            steps,
            elapsed_ms: started.elapsed().as_millis() as u64,
            trail,
            error,
            message,
            last_observation,
        }
    }
}

fn trail_entry(
    step: u32,
    state: &StateKey,
    kind: ActionKind,
    success: bool,
    reward: f64,
    drift: bool,
) -> TrailEntry {
    TrailEntry {
        step,
        state: state.clone(),
        kind,
        success,
        reward,
        drift,
        at: Utc::now(),
    }
}
