//! The closed agent loop: observe → decide → act → learn.
//!
//! Ties the other crates together into one cooperative, single-threaded
//! task driver. Each step blocks on exactly one of capture, decision, or
//! execution; the skill cache is consulted before the decider; every
//! result feeds the policy engine; and both stores are flushed at every
//! terminal transition so no task failure can leave them inconsistent.

mod boundary;
mod drift;
mod session;

pub use boundary::{
    CaptureError, DecideError, Decider, DecisionHints, Grounder, StepRecord, TaskSpec,
    Verifier, VerifyError,
};
pub use drift::{DriftAssessment, DriftMonitor};
pub use session::{SessionConfig, SessionLoop};
