//! End-to-end scenarios driving the session loop with scripted
//! collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use action_exec::{AuditTrail, ExecError, OsActions, RecoveryTable, RetryConfig, RetryExecutor};
use deskpilot_core_types::{
    Action, ErrorKind, Observation, Rect, SessionStatus, Target, UiElement,
};
use fingerprint::{Fingerprint, FingerprintConfig};
use policy_engine::{PolicyConfig, PolicyEngine};
use skill_cache::{RecordedStep, SkillCache, SkillCacheConfig};
use session_loop::{
    CaptureError, DecideError, Decider, DecisionHints, Grounder, SessionConfig, SessionLoop,
    StepRecord, TaskSpec, Verifier, VerifyError,
};

fn obs(title: &str, labels: &[&str]) -> Observation {
    Observation::new(
        title,
        labels
            .iter()
            .map(|l| UiElement::new(*l, "button", Rect::new(10, 10, 40, 20)))
            .collect(),
    )
}

fn fp(observation: &Observation) -> Fingerprint {
    Fingerprint::of(observation, &FingerprintConfig::default())
}

/// Pops scripted frames; repeats the last frame once the script runs out.
struct ScriptedGrounder {
    frames: Mutex<Vec<Observation>>,
    last: Mutex<Option<Observation>>,
}

impl ScriptedGrounder {
    fn new(frames: Vec<Observation>) -> Self {
        Self {
            frames: Mutex::new(frames),
            last: Mutex::new(None),
        }
    }

    fn push_frames(&self, frames: Vec<Observation>) {
        let mut guard = self.frames.lock();
        *guard = frames;
        *self.last.lock() = None;
    }
}

#[async_trait]
impl Grounder for ScriptedGrounder {
    async fn capture(&self) -> Result<Observation, CaptureError> {
        let mut frames = self.frames.lock();
        if frames.is_empty() {
            return self
                .last
                .lock()
                .clone()
                .ok_or_else(|| CaptureError::Unavailable("no frames scripted".to_string()));
        }
        let frame = frames.remove(0);
        *self.last.lock() = Some(frame.clone());
        Ok(frame)
    }
}

/// Pops scripted decisions, counting calls; falls back to `default`.
struct ScriptedDecider {
    script: Mutex<Vec<Action>>,
    default: Option<Action>,
    calls: AtomicUsize,
}

impl ScriptedDecider {
    fn new(script: Vec<Action>) -> Self {
        Self {
            script: Mutex::new(script),
            default: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn repeating(action: Action) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            default: Some(action),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decider for ScriptedDecider {
    async fn decide(
        &self,
        _task: &TaskSpec,
        _observation: &Observation,
        _history: &[StepRecord],
        _hints: &DecisionHints,
    ) -> Result<Action, DecideError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        if script.is_empty() {
            return self
                .default
                .clone()
                .ok_or_else(|| DecideError::Unreachable("script exhausted".to_string()));
        }
        Ok(script.remove(0))
    }
}

/// Verifier answering from a scripted list; `true` once the list is empty.
struct ScriptedVerifier {
    answers: Mutex<Vec<bool>>,
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, _task: &TaskSpec, _obs: &Observation) -> Result<bool, VerifyError> {
        let mut answers = self.answers.lock();
        if answers.is_empty() {
            Ok(true)
        } else {
            Ok(answers.remove(0))
        }
    }
}

/// OS boundary that always succeeds and logs each call by kind.
#[derive(Default)]
struct OkOs {
    log: Mutex<Vec<String>>,
}

impl OkOs {
    fn count(&self, name: &str) -> usize {
        self.log.lock().iter().filter(|l| *l == name).count()
    }

    fn ok(&self, name: &str) -> Result<(), ExecError> {
        self.log.lock().push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl OsActions for OkOs {
    async fn click(&self, _: i32, _: i32, _: Duration) -> Result<(), ExecError> {
        self.ok("click")
    }
    async fn double_click(&self, _: i32, _: i32, _: Duration) -> Result<(), ExecError> {
        self.ok("double_click")
    }
    async fn right_click(&self, _: i32, _: i32, _: Duration) -> Result<(), ExecError> {
        self.ok("right_click")
    }
    async fn drag(&self, _: (i32, i32), _: (i32, i32), _: Duration) -> Result<(), ExecError> {
        self.ok("drag")
    }
    async fn type_text(&self, _: &str, _: Duration) -> Result<(), ExecError> {
        self.ok("type_text")
    }
    async fn press_key(&self, _: &str, _: Duration) -> Result<(), ExecError> {
        self.ok("press_key")
    }
    async fn press_hotkey(&self, _: &[String], _: Duration) -> Result<(), ExecError> {
        self.ok("press_hotkey")
    }
    async fn scroll(&self, _: i32, _: i32, _: i32, _: Duration) -> Result<(), ExecError> {
        self.ok("scroll")
    }
    async fn move_mouse(&self, _: i32, _: i32, _: Duration) -> Result<(), ExecError> {
        self.ok("move_mouse")
    }
    async fn run_shell(&self, _: &str, _: Duration) -> Result<String, ExecError> {
        self.ok("run_shell").map(|_| String::new())
    }
    async fn set_slider(&self, _: i32, _: i32, _: f64, _: Duration) -> Result<(), ExecError> {
        self.ok("set_slider")
    }
    async fn open_app(&self, _: &str, _: Duration) -> Result<(), ExecError> {
        self.ok("open_app")
    }
    async fn switch_window(&self, _: &str, _: Duration) -> Result<(), ExecError> {
        self.ok("switch_window")
    }
    async fn screenshot(&self, _: Duration) -> Result<(), ExecError> {
        self.ok("screenshot")
    }
    async fn custom(
        &self,
        _: &str,
        _: &serde_json::Value,
        _: Duration,
    ) -> Result<(), ExecError> {
        self.ok("custom")
    }
}

fn make_loop(
    grounder: Arc<ScriptedGrounder>,
    decider: Arc<ScriptedDecider>,
    verifier: Option<Arc<ScriptedVerifier>>,
    os: Arc<OkOs>,
    cache: SkillCache,
    config: SessionConfig,
) -> SessionLoop {
    let executor = RetryExecutor::new(
        os,
        RecoveryTable::empty(),
        AuditTrail::new(),
        RetryConfig::immediate(),
    );
    let policy = PolicyEngine::new(PolicyConfig::greedy());
    let verifier = verifier.map(|v| v as Arc<dyn Verifier>);
    SessionLoop::new(grounder, decider, verifier, executor, policy, cache, config)
}

fn slider_action() -> Action {
    Action::SetSlider {
        target: Target::Coords { x: 300, y: 200 },
        value: 100.0,
    }
}

fn mark_done() -> Action {
    Action::MarkDone {
        message: "slider set".to_string(),
    }
}

#[tokio::test]
async fn test_slider_task_then_cached_rerun_with_zero_decider_calls() {
    let settings = obs("Settings", &["Brightness", "Volume"]);
    let after_slider = obs("Settings", &["Brightness", "Volume", "Value: 100"]);

    let grounder = Arc::new(ScriptedGrounder::new(vec![
        settings.clone(),
        after_slider.clone(),
    ]));
    let decider = Arc::new(ScriptedDecider::new(vec![slider_action(), mark_done()]));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder.clone(),
        decider.clone(),
        None,
        os.clone(),
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new(
        "set_slider",
        serde_json::json!({"name": "Brightness", "value": 100}),
        "set brightness to 100",
    );

    // First run: live decisions, one-action entry recorded.
    let result = session.run(&task, CancellationToken::new()).await;
    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(result.steps, 2);
    assert_eq!(decider.calls(), 2);
    assert_eq!(os.count("set_slider"), 1);
    assert_eq!(session.cache().len(), 1);

    // Slider step earned the state-change reward; done earned +2.0.
    assert!(!result.trail[0].drift);
    assert!((result.trail[0].reward - 0.3).abs() < 1e-9);
    assert!((result.trail[1].reward - 2.0).abs() < 1e-9);

    // Second identical run: pure cached replay, zero decider calls.
    grounder.push_frames(vec![settings, after_slider]);
    let result = session.run(&task, CancellationToken::new()).await;
    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(decider.calls(), 2, "no new decider calls on replay");
    assert_eq!(os.count("set_slider"), 2, "replay executed the slider once");
    assert_eq!(session.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_step_budget_exhaustion_with_full_reward_trail() {
    let screen = obs("Stubborn App", &["Button"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen])); // never changes
    let decider = Arc::new(ScriptedDecider::repeating(Action::click(50, 50)));
    let os = Arc::new(OkOs::default());

    let config = SessionConfig {
        max_steps: 5,
        ..SessionConfig::default()
    };
    let mut session = make_loop(
        grounder,
        decider.clone(),
        None,
        os.clone(),
        SkillCache::new(SkillCacheConfig::default()),
        config,
    );

    let task = TaskSpec::new("stuck_task", serde_json::json!({}), "click forever");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.error, Some(ErrorKind::StepBudgetExceeded));
    assert_eq!(result.steps, 5);
    assert_eq!(result.trail.len(), 5);
    assert_eq!(os.count("click"), 5);

    // Every click on an unchanging screen was scored as drift.
    for entry in &result.trail {
        assert!(entry.drift);
        assert!((entry.reward + 0.7).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_replay_divergence_invalidates_and_falls_back() {
    let settings = obs("Settings", &["Brightness", "Volume"]);
    let expected_mid = obs("Settings", &["Brightness", "Volume", "Step1"]);
    let divergent = obs("Notepad", &["File", "Edit"]);

    // Seed a 3-step entry whose first expected mid-sequence screen will not
    // match what the live run produces.
    let cache = SkillCache::new(SkillCacheConfig::default());
    let params = serde_json::json!({"value": 100});
    cache
        .record(
            "multi_step",
            &params,
            fp(&settings),
            vec![
                RecordedStep::with_expected(Action::click(10, 10), fp(&expected_mid)),
                RecordedStep::with_expected(Action::click(20, 20), fp(&expected_mid)),
                RecordedStep::with_expected(Action::click(30, 30), fp(&expected_mid)),
            ],
            None,
        )
        .unwrap();

    let grounder = Arc::new(ScriptedGrounder::new(vec![settings, divergent]));
    let decider = Arc::new(ScriptedDecider::new(vec![Action::MarkFailed {
        reason: "wrong screen".to_string(),
    }]));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider.clone(),
        None,
        os.clone(),
        cache,
        SessionConfig::default(),
    );

    let task = TaskSpec::new("multi_step", params, "do three clicks");
    let result = session.run(&task, CancellationToken::new()).await;

    // Replayed action 1 ran exactly once, actions 2 and 3 never ran, the
    // entry is gone, and the live decider took over from the divergence.
    assert_eq!(os.count("click"), 1);
    assert_eq!(decider.calls(), 1);
    assert_eq!(session.cache().len(), 0);
    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.message, "wrong screen");
}

#[tokio::test]
async fn test_rejected_done_claim_is_negative_step_and_loop_continues() {
    let screen = obs("Settings", &["Brightness"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen]));
    let decider = Arc::new(ScriptedDecider::new(vec![mark_done(), mark_done()]));
    let verifier = Arc::new(ScriptedVerifier {
        answers: Mutex::new(vec![false, true]),
    });
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider.clone(),
        Some(verifier),
        os,
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new("verify_task", serde_json::json!({}), "finish properly");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(result.steps, 2);
    assert!((result.trail[0].reward + 1.2).abs() < 1e-9);
    assert!(!result.trail[0].success);
    assert!((result.trail[1].reward - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_invalid_decision_penalized_and_skipped() {
    let screen = obs("Notepad", &["File"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen]));
    let invalid = Action::TypeText {
        text: String::new(),
    };
    let decider = Arc::new(ScriptedDecider::new(vec![invalid, mark_done()]));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider,
        None,
        os.clone(),
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new("typing", serde_json::json!({}), "type something");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(os.count("type_text"), 0, "invalid action never reaches OS");
    assert!((result.trail[0].reward + 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_mark_failed_terminates_with_penalty() {
    let screen = obs("Settings", &["Brightness"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen]));
    let decider = Arc::new(ScriptedDecider::new(vec![Action::MarkFailed {
        reason: "control not present".to_string(),
    }]));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider,
        None,
        os,
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new("doomed", serde_json::json!({}), "find missing control");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.message, "control not present");
    assert_eq!(result.steps, 1);
    assert!((result.trail[0].reward + 1.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancellation_performs_no_actions() {
    let screen = obs("Settings", &["Brightness"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen]));
    let decider = Arc::new(ScriptedDecider::repeating(Action::click(10, 10)));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider.clone(),
        None,
        os.clone(),
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let task = TaskSpec::new("cancelled", serde_json::json!({}), "never mind");
    let result = session.run(&task, cancel).await;

    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.message, "cancelled");
    assert_eq!(result.steps, 0);
    assert_eq!(decider.calls(), 0);
    assert!(os.log.lock().is_empty());
}

#[tokio::test]
async fn test_capture_failure_is_task_fatal() {
    let grounder = Arc::new(ScriptedGrounder::new(vec![]));
    let decider = Arc::new(ScriptedDecider::repeating(Action::click(10, 10)));
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider,
        None,
        os,
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new("blind", serde_json::json!({}), "anything");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.error, Some(ErrorKind::CaptureUnavailable));
}

#[tokio::test]
async fn test_decider_unreachable_is_task_fatal() {
    let screen = obs("Settings", &["Brightness"]);
    let grounder = Arc::new(ScriptedGrounder::new(vec![screen]));
    let decider = Arc::new(ScriptedDecider::new(vec![])); // no script, no default
    let os = Arc::new(OkOs::default());
    let mut session = make_loop(
        grounder,
        decider,
        None,
        os,
        SkillCache::new(SkillCacheConfig::default()),
        SessionConfig::default(),
    );

    let task = TaskSpec::new("offline", serde_json::json!({}), "anything");
    let result = session.run(&task, CancellationToken::new()).await;

    assert_eq!(result.status, SessionStatus::Failed);
    assert_eq!(result.error, Some(ErrorKind::DeciderUnreachable));
}
