//! The closed typed action set and its validation rules.
//!
//! Every action the agent can take is a variant here with kind-specific
//! required parameters. An action must pass [`Action::validate`] before the
//! executor is allowed to touch the OS boundary.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Where a pointer action lands: explicit coordinates or a grounded element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Absolute screen coordinates.
    Coords { x: i32, y: i32 },

    /// Index into the current observation's element list.
    Element { index: usize },
}

/// Discriminant of [`Action`], used as the learnable action identity in the
/// Q-table and for audit/log labels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    Drag,
    TypeText,
    PressKey,
    PressHotkey,
    Scroll,
    MoveMouse,
    Wait,
    RunShell,
    SetSlider,
    OpenApp,
    SwitchWindow,
    Screenshot,
    MarkDone,
    MarkFailed,
    Custom,
}

impl ActionKind {
    /// Kinds that must never be silently re-applied beyond the configured
    /// attempt bound (typing duplicates text, shell commands have side
    /// effects that cannot be fenced).
    pub fn is_idempotent_unsafe(&self) -> bool {
        matches!(self, ActionKind::TypeText | ActionKind::RunShell)
    }

    /// Kinds that should produce a visible state change when they work.
    /// Used by the reward function: no change after one of these is a
    /// negative signal, while a wait or key press may legitimately be
    /// invisible.
    pub fn expects_state_change(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::TypeText | ActionKind::Drag | ActionKind::OpenApp
        )
    }

    /// Terminal marker kinds handled by the session loop, never executed
    /// against the OS.
    pub fn is_terminal_marker(&self) -> bool {
        matches!(self, ActionKind::MarkDone | ActionKind::MarkFailed)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::RightClick => "right_click",
            ActionKind::Drag => "drag",
            ActionKind::TypeText => "type_text",
            ActionKind::PressKey => "press_key",
            ActionKind::PressHotkey => "press_hotkey",
            ActionKind::Scroll => "scroll",
            ActionKind::MoveMouse => "move_mouse",
            ActionKind::Wait => "wait",
            ActionKind::RunShell => "run_shell",
            ActionKind::SetSlider => "set_slider",
            ActionKind::OpenApp => "open_app",
            ActionKind::SwitchWindow => "switch_window",
            ActionKind::Screenshot => "screenshot",
            ActionKind::MarkDone => "mark_done",
            ActionKind::MarkFailed => "mark_failed",
            ActionKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A single atomic OS action with kind-specific parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { target: Target },
    DoubleClick { target: Target },
    RightClick { target: Target },
    Drag { from: Target, to: Target },
    TypeText { text: String },
    PressKey { key: String },
    PressHotkey { keys: Vec<String> },
    Scroll { x: i32, y: i32, clicks: i32 },
    MoveMouse { x: i32, y: i32 },
    Wait { millis: u64 },
    RunShell { command: String },
    SetSlider { target: Target, value: f64 },
    OpenApp { name: String },
    SwitchWindow { title: String },
    Screenshot,
    MarkDone { message: String },
    MarkFailed { reason: String },
    Custom { kind: String, params: serde_json::Value },
}

impl Action {
    /// Convenience constructor for a coordinate click.
    pub fn click(x: i32, y: i32) -> Self {
        Action::Click {
            target: Target::Coords { x, y },
        }
    }

    /// Convenience constructor for a hotkey combo.
    pub fn hotkey<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Action::PressHotkey {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience constructor for a key press.
    pub fn press_key(key: impl Into<String>) -> Self {
        Action::PressKey { key: key.into() }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::DoubleClick { .. } => ActionKind::DoubleClick,
            Action::RightClick { .. } => ActionKind::RightClick,
            Action::Drag { .. } => ActionKind::Drag,
            Action::TypeText { .. } => ActionKind::TypeText,
            Action::PressKey { .. } => ActionKind::PressKey,
            Action::PressHotkey { .. } => ActionKind::PressHotkey,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::MoveMouse { .. } => ActionKind::MoveMouse,
            Action::Wait { .. } => ActionKind::Wait,
            Action::RunShell { .. } => ActionKind::RunShell,
            Action::SetSlider { .. } => ActionKind::SetSlider,
            Action::OpenApp { .. } => ActionKind::OpenApp,
            Action::SwitchWindow { .. } => ActionKind::SwitchWindow,
            Action::Screenshot => ActionKind::Screenshot,
            Action::MarkDone { .. } => ActionKind::MarkDone,
            Action::MarkFailed { .. } => ActionKind::MarkFailed,
            Action::Custom { .. } => ActionKind::Custom,
        }
    }

    /// Validate kind-specific required parameters.
    ///
    /// An invalid action is rejected here and never reaches the OS boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Action::TypeText { text } => {
                if text.is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "text",
                    });
                }
            }
            Action::PressKey { key } => {
                if key.is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "key",
                    });
                }
            }
            Action::PressHotkey { keys } => {
                if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "keys",
                    });
                }
            }
            Action::RunShell { command } => {
                if command.trim().is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "command",
                    });
                }
            }
            Action::SetSlider { value, .. } => {
                if !value.is_finite() {
                    return Err(ValidationError::InvalidParam {
                        kind: self.kind(),
                        param: "value",
                        reason: "must be a finite number".to_string(),
                    });
                }
            }
            Action::OpenApp { name } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "name",
                    });
                }
            }
            Action::SwitchWindow { title } => {
                if title.trim().is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: self.kind(),
                        param: "title",
                    });
                }
            }
            Action::Wait { millis } => {
                if *millis == 0 {
                    return Err(ValidationError::InvalidParam {
                        kind: self.kind(),
                        param: "millis",
                        reason: "must be greater than 0".to_string(),
                    });
                }
            }
            Action::Custom { kind, .. } => {
                if kind.trim().is_empty() {
                    return Err(ValidationError::MissingParam {
                        kind: ActionKind::Custom,
                        param: "kind",
                    });
                }
            }
            Action::Click { .. }
            | Action::DoubleClick { .. }
            | Action::RightClick { .. }
            | Action::Drag { .. }
            | Action::Scroll { .. }
            | Action::MoveMouse { .. }
            | Action::SetSlider { .. }
            | Action::Screenshot
            | Action::MarkDone { .. }
            | Action::MarkFailed { .. } => {}
        }
        Ok(())
    }
}
