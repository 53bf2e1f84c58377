//! Action execution with retry, recovery, and auditing.
//!
//! This crate owns the path between a decided [`Action`] and the OS: target
//! resolution against the pre-action observation, bounded retry on
//! transient failures, per-application corrective recovery, and an
//! append-only audit trail of every attempt. The actual OS calls live
//! behind the [`OsActions`] trait so the core stays platform-free.
//!
//! [`Action`]: deskpilot_core_types::Action

mod audit;
mod errors;
mod os;
mod recovery;
mod retry;

pub use audit::{AuditOutcome, AuditRecord, AuditTrail};
pub use errors::ExecError;
pub use os::{ExecCtx, OsActions};
pub use recovery::{FailureSignature, RecoveryRule, RecoveryTable, SuppressWhen};
pub use retry::{RetryConfig, RetryExecutor};
