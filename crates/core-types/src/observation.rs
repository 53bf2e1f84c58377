//! Screen observations produced by the external grounding collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box of a UI element in screen coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point, used when an action targets an element by index.
    pub fn center(&self) -> (i32, i32) {
        (
            self.x + self.width as i32 / 2,
            self.y + self.height as i32 / 2,
        )
    }
}

/// One detected UI element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UiElement {
    /// Accessible name / visible label.
    pub label: String,

    /// Role or control kind (button, edit, slider, ...).
    pub role: String,

    /// Bounding box in screen coordinates.
    pub bounds: Rect,

    /// Current value, if the element carries one (edit text, slider level).
    pub value: Option<String>,
}

impl UiElement {
    pub fn new(label: impl Into<String>, role: impl Into<String>, bounds: Rect) -> Self {
        Self {
            label: label.into(),
            role: role.into(),
            bounds,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Immutable snapshot of the screen at one point in time.
///
/// Produced by the external grounding collaborator; the core never mutates
/// an observation after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    /// Foreground window title.
    pub window_title: String,

    /// Detected elements in document order.
    pub elements: Vec<UiElement>,

    /// Capture timestamp.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub captured_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(window_title: impl Into<String>, elements: Vec<UiElement>) -> Self {
        Self {
            window_title: window_title.into(),
            elements,
            captured_at: Utc::now(),
        }
    }

    /// Non-empty element labels in document order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.elements
            .iter()
            .map(|e| e.label.as_str())
            .filter(|l| !l.is_empty())
    }

    /// Look up an element by index, as referenced from an action target.
    pub fn element(&self, index: usize) -> Option<&UiElement> {
        self.elements.get(index)
    }

    /// Whether any element label contains the given needle (case-insensitive).
    pub fn has_label_containing(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.elements
            .iter()
            .any(|e| e.label.to_lowercase().contains(&needle))
    }

    /// One-line summary for logs and trail entries.
    pub fn summary(&self) -> String {
        let top: Vec<&str> = self.labels().take(5).collect();
        format!(
            "window='{}' elements={} top=[{}]",
            self.window_title,
            self.elements.len(),
            top.join(", ")
        )
    }
}
