//! The OS action boundary and the execution context.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use deskpilot_core_types::{Action, ActionId, Observation, Target};

use crate::errors::ExecError;

/// Execution context for one action.
///
/// Carries the pre-action observation (for element-target resolution and
/// recovery suppression checks), the deadline, and the cancellation token
/// the session loop owns.
#[derive(Clone)]
pub struct ExecCtx {
    /// Screen state the decision was made against.
    pub observation: Observation,

    /// Hard deadline for this action including retries.
    pub deadline: Instant,

    /// Cancellation token for cooperative cancellation.
    pub cancel_token: CancellationToken,

    /// Unique identifier for audit correlation.
    pub action_id: ActionId,
}

impl ExecCtx {
    pub fn new(observation: Observation, deadline: Instant, cancel_token: CancellationToken) -> Self {
        Self {
            observation,
            deadline,
            cancel_token,
            action_id: ActionId::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The OS action boundary: one blocking, timeout-bounded call per action
/// kind. Implemented outside this core by the platform layer; implemented
/// in tests by scripted fakes.
#[async_trait]
pub trait OsActions: Send + Sync {
    async fn click(&self, x: i32, y: i32, timeout: Duration) -> Result<(), ExecError>;

    async fn double_click(&self, x: i32, y: i32, timeout: Duration) -> Result<(), ExecError>;

    async fn right_click(&self, x: i32, y: i32, timeout: Duration) -> Result<(), ExecError>;

    async fn drag(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        timeout: Duration,
    ) -> Result<(), ExecError>;

    async fn type_text(&self, text: &str, timeout: Duration) -> Result<(), ExecError>;

    async fn press_key(&self, key: &str, timeout: Duration) -> Result<(), ExecError>;

    async fn press_hotkey(&self, keys: &[String], timeout: Duration) -> Result<(), ExecError>;

    async fn scroll(&self, x: i32, y: i32, clicks: i32, timeout: Duration)
        -> Result<(), ExecError>;

    async fn move_mouse(&self, x: i32, y: i32, timeout: Duration) -> Result<(), ExecError>;

    async fn run_shell(&self, command: &str, timeout: Duration) -> Result<String, ExecError>;

    async fn set_slider(
        &self,
        x: i32,
        y: i32,
        value: f64,
        timeout: Duration,
    ) -> Result<(), ExecError>;

    async fn open_app(&self, name: &str, timeout: Duration) -> Result<(), ExecError>;

    async fn switch_window(&self, title: &str, timeout: Duration) -> Result<(), ExecError>;

    async fn screenshot(&self, timeout: Duration) -> Result<(), ExecError>;

    async fn custom(
        &self,
        kind: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), ExecError>;
}

/// Resolve an action target to screen coordinates against the pre-action
/// observation. A missing element index is a stale reference: the screen
/// the decider saw no longer has that element.
pub(crate) fn resolve_target(target: &Target, observation: &Observation) -> Result<(i32, i32), ExecError> {
    match target {
        Target::Coords { x, y } => Ok((*x, *y)),
        Target::Element { index } => observation
            .element(*index)
            .map(|e| e.bounds.center())
            .ok_or_else(|| {
                ExecError::StaleElement(format!(
                    "element index {} out of range ({} elements)",
                    index,
                    observation.elements.len()
                ))
            }),
    }
}

/// Dispatch one validated action to the boundary.
///
/// `Wait` is handled in-process; terminal markers never reach this function.
pub(crate) async fn dispatch(
    os: &dyn OsActions,
    action: &Action,
    ctx: &ExecCtx,
) -> Result<(), ExecError> {
    let timeout = ctx.remaining_time();
    let obs = &ctx.observation;

    match action {
        Action::Click { target } => {
            let (x, y) = resolve_target(target, obs)?;
            os.click(x, y, timeout).await
        }
        Action::DoubleClick { target } => {
            let (x, y) = resolve_target(target, obs)?;
            os.double_click(x, y, timeout).await
        }
        Action::RightClick { target } => {
            let (x, y) = resolve_target(target, obs)?;
            os.right_click(x, y, timeout).await
        }
        Action::Drag { from, to } => {
            let from = resolve_target(from, obs)?;
            let to = resolve_target(to, obs)?;
            os.drag(from, to, timeout).await
        }
        Action::TypeText { text } => os.type_text(text, timeout).await,
        Action::PressKey { key } => os.press_key(key, timeout).await,
        Action::PressHotkey { keys } => os.press_hotkey(keys, timeout).await,
        Action::Scroll { x, y, clicks } => os.scroll(*x, *y, *clicks, timeout).await,
        Action::MoveMouse { x, y } => os.move_mouse(*x, *y, timeout).await,
        Action::Wait { millis } => {
            tokio::time::sleep(Duration::from_millis(*millis)).await;
            Ok(())
        }
        Action::RunShell { command } => os.run_shell(command, timeout).await.map(|_| ()),
        Action::SetSlider { target, value } => {
            let (x, y) = resolve_target(target, obs)?;
            os.set_slider(x, y, *value, timeout).await
        }
        Action::OpenApp { name } => os.open_app(name, timeout).await,
        Action::SwitchWindow { title } => os.switch_window(title, timeout).await,
        Action::Screenshot => os.screenshot(timeout).await,
        Action::Custom { kind, params } => os.custom(kind, params, timeout).await,
        Action::MarkDone { .. } | Action::MarkFailed { .. } => Err(ExecError::Unsupported(
            "terminal markers are handled by the session loop".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_core_types::{Rect, UiElement};

    #[test]
    fn test_resolve_coords_target() {
        let obs = Observation::new("w", vec![]);
        let target = Target::Coords { x: 3, y: 4 };
        assert_eq!(resolve_target(&target, &obs).unwrap(), (3, 4));
    }

    #[test]
    fn test_resolve_element_target_center() {
        let obs = Observation::new(
            "w",
            vec![UiElement::new("OK", "button", Rect::new(100, 200, 40, 20))],
        );
        let target = Target::Element { index: 0 };
        assert_eq!(resolve_target(&target, &obs).unwrap(), (120, 210));
    }

    #[test]
    fn test_resolve_missing_element_is_stale() {
        let obs = Observation::new("w", vec![]);
        let target = Target::Element { index: 2 };
        let err = resolve_target(&target, &obs).unwrap_err();
        assert!(matches!(err, ExecError::StaleElement(_)));
        assert!(err.is_transient());
    }
}
