//! The retry/recovery executor.
//!
//! Executes one validated action against the OS boundary, retrying
//! transient failures with an increasing settle delay, and escalating to
//! the per-application recovery table once retries are exhausted. Attempts
//! are strictly sequential; an action is applied at most once per attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use deskpilot_core_types::{Action, ActionResult, ErrorKind};

use crate::audit::{AuditOutcome, AuditTrail};
use crate::errors::ExecError;
use crate::os::{dispatch, ExecCtx, OsActions};
use crate::recovery::RecoveryTable;

/// Retry policy knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per action, recovery re-attempt excluded.
    /// Default: 3
    pub max_attempts: u32,

    /// Base settle delay between attempts in milliseconds; the actual
    /// delay grows linearly with the attempt index to let the UI settle.
    /// Default: 250
    pub settle_delay_ms: u64,

    /// Whether recovery escalation is enabled at all.
    /// Default: true
    pub recovery_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay_ms: 250,
            recovery_enabled: true,
        }
    }
}

impl RetryConfig {
    /// Config for fast tests: no settle delays.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            settle_delay_ms: 0,
            recovery_enabled: true,
        }
    }
}

/// Executes actions with bounded retry and per-application recovery.
pub struct RetryExecutor {
    os: Arc<dyn OsActions>,
    recovery: Mutex<RecoveryTable>,
    audit: AuditTrail,
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(
        os: Arc<dyn OsActions>,
        recovery: RecoveryTable,
        audit: AuditTrail,
        config: RetryConfig,
    ) -> Self {
        Self {
            os,
            recovery: Mutex::new(recovery),
            audit,
            config,
        }
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Reset per-task recovery budgets.
    pub fn reset_recovery(&self) {
        self.recovery.lock().reset();
    }

    /// Execute one action.
    ///
    /// Precondition: the action has passed schema validation. It is checked
    /// again here so that nothing malformed can ever reach the OS boundary,
    /// whatever the caller did.
    pub async fn execute(&self, action: &Action, ctx: &ExecCtx) -> ActionResult {
        let started = Instant::now();
        let kind = action.kind();

        if let Err(err) = action.validate() {
            warn!(action_id = %ctx.action_id.0, %kind, "rejected invalid action: {}", err);
            return ActionResult::failure(ErrorKind::ValidationError, err.to_string(), 0, 0);
        }
        if kind.is_terminal_marker() {
            return ActionResult::failure(
                ErrorKind::ValidationError,
                "terminal markers are not executable",
                0,
                0,
            );
        }

        let mut last_error: Option<ExecError> = None;

        for attempt in 1..=self.config.max_attempts {
            if ctx.is_cancelled() {
                return self.interrupted(ctx, kind, attempt, started, "cancelled");
            }
            if ctx.is_timeout() {
                return self.interrupted(ctx, kind, attempt, started, "deadline exceeded");
            }

            debug!(action_id = %ctx.action_id.0, %kind, attempt, "executing action");

            match dispatch(self.os.as_ref(), action, ctx).await {
                Ok(()) => {
                    self.audit
                        .record(&ctx.action_id, kind, attempt, AuditOutcome::Success, None);
                    info!(
                        action_id = %ctx.action_id.0,
                        %kind,
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "action succeeded"
                    );
                    return ActionResult::success(attempt, elapsed_ms(started));
                }
                Err(err) if err.is_transient() => {
                    self.audit.record(
                        &ctx.action_id,
                        kind,
                        attempt,
                        AuditOutcome::TransientError,
                        Some(err.to_string()),
                    );
                    warn!(action_id = %ctx.action_id.0, %kind, attempt, "transient failure: {}", err);
                    last_error = Some(err);

                    if attempt < self.config.max_attempts {
                        let delay = self.config.settle_delay_ms * attempt as u64;
                        if delay > 0 {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
                Err(err) => {
                    // Non-transient: surface immediately, no retry.
                    self.audit.record(
                        &ctx.action_id,
                        kind,
                        attempt,
                        AuditOutcome::Failure,
                        Some(err.to_string()),
                    );
                    warn!(action_id = %ctx.action_id.0, %kind, attempt, "action failed: {}", err);
                    return ActionResult::failure(
                        ErrorKind::ExecutionFailed,
                        err.to_string(),
                        attempt,
                        elapsed_ms(started),
                    );
                }
            }
        }

        let last_error = match last_error {
            Some(err) => err,
            // Unreachable with max_attempts >= 1; treat a zero-attempt
            // config as a plain failure.
            None => ExecError::Failed("no attempts configured".to_string()),
        };

        // Retries exhausted on a transient error: escalate to recovery.
        // Idempotent-unsafe kinds are excluded because the post-recovery
        // re-attempt would exceed their configured attempt bound.
        if self.config.recovery_enabled && !kind.is_idempotent_unsafe() {
            if let Some(result) = self.try_recover(action, ctx, &last_error, started).await {
                return result;
            }
        }

        ActionResult::failure(
            ErrorKind::ExecutionFailed,
            last_error.to_string(),
            self.config.max_attempts,
            elapsed_ms(started),
        )
    }

    /// Run the matching corrective sequence once, then re-attempt the
    /// original action exactly once more. Returns `None` when no applicable
    /// strategy exists.
    async fn try_recover(
        &self,
        action: &Action,
        ctx: &ExecCtx,
        error: &ExecError,
        started: Instant,
    ) -> Option<ActionResult> {
        let kind = action.kind();
        let (rule_key, plan) = {
            let table = self.recovery.lock();
            table.corrective_plan(&ctx.observation, error)?
        };

        info!(
            action_id = %ctx.action_id.0,
            %kind,
            rule = %rule_key,
            steps = plan.len(),
            "invoking recovery strategy"
        );
        self.recovery.lock().record_attempt(&rule_key);
        self.audit.record(
            &ctx.action_id,
            kind,
            self.config.max_attempts,
            AuditOutcome::RecoveryStarted,
            Some(rule_key.clone()),
        );

        // Corrective actions run once each, without retry.
        for corrective in &plan {
            if ctx.is_cancelled() || ctx.is_timeout() {
                return Some(
                    self.interrupted(ctx, kind, self.config.max_attempts, started, "interrupted")
                        .with_recovery(),
                );
            }
            let outcome = dispatch(self.os.as_ref(), corrective, ctx).await;
            self.audit.record(
                &ctx.action_id,
                corrective.kind(),
                1,
                AuditOutcome::RecoveryAction,
                outcome.as_ref().err().map(|e| e.to_string()),
            );
            if let Err(err) = outcome {
                warn!(action_id = %ctx.action_id.0, "recovery action failed: {}", err);
                return Some(
                    ActionResult::failure(
                        ErrorKind::ExecutionFailed,
                        format!("recovery failed: {}", err),
                        self.config.max_attempts,
                        elapsed_ms(started),
                    )
                    .with_recovery()
                    .with_drift(true),
                );
            }
        }

        // One re-attempt of the original action after recovery.
        let attempt = self.config.max_attempts + 1;
        match dispatch(self.os.as_ref(), action, ctx).await {
            Ok(()) => {
                self.audit.record(
                    &ctx.action_id,
                    kind,
                    attempt,
                    AuditOutcome::RecoveryFinished,
                    None,
                );
                info!(action_id = %ctx.action_id.0, %kind, "action succeeded after recovery");
                Some(
                    ActionResult::success(attempt, elapsed_ms(started))
                        .with_recovery()
                        .with_drift(true),
                )
            }
            Err(err) => {
                self.audit.record(
                    &ctx.action_id,
                    kind,
                    attempt,
                    AuditOutcome::Failure,
                    Some(err.to_string()),
                );
                Some(
                    ActionResult::failure(
                        ErrorKind::ExecutionFailed,
                        err.to_string(),
                        attempt,
                        elapsed_ms(started),
                    )
                    .with_recovery()
                    .with_drift(true),
                )
            }
        }
    }

    fn interrupted(
        &self,
        ctx: &ExecCtx,
        kind: deskpilot_core_types::ActionKind,
        attempt: u32,
        started: Instant,
        reason: &str,
    ) -> ActionResult {
        self.audit.record(
            &ctx.action_id,
            kind,
            attempt,
            AuditOutcome::Failure,
            Some(reason.to_string()),
        );
        ActionResult::failure(ErrorKind::ExecutionFailed, reason, attempt, elapsed_ms(started))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
