//! Audit trail of execution attempts.
//!
//! Every attempt, success or failure, is appended with its timestamp,
//! attempt index, and outcome. The executor never interprets the trail; it
//! exists for external debugging. File writes happen on a background task
//! so they stay off the critical path.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

use deskpilot_core_types::{ActionId, ActionKind};

/// Outcome tag of one audited attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    TransientError,
    Failure,
    RecoveryStarted,
    RecoveryAction,
    RecoveryFinished,
}

/// One audited execution attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action_id: ActionId,
    pub kind: ActionKind,
    pub attempt: u32,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

/// Append-only audit trail with an optional JSONL write-behind.
#[derive(Clone)]
pub struct AuditTrail {
    records: Arc<RwLock<Vec<AuditRecord>>>,
    tx: Option<mpsc::UnboundedSender<AuditRecord>>,
}

impl AuditTrail {
    /// In-memory trail only.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            tx: None,
        }
    }

    /// Trail with a background JSONL writer. Write failures are logged and
    /// never propagate into execution.
    pub fn with_writer(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(f) => f,
                Err(err) => {
                    warn!(path = %path.display(), "failed to open audit file: {}", err);
                    return;
                }
            };
            while let Some(record) = rx.recv().await {
                match serde_json::to_string(&record) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(err) = file.write_all(line.as_bytes()).await {
                            warn!("audit write failed: {}", err);
                        }
                    }
                    Err(err) => warn!("audit serialize failed: {}", err),
                }
            }
        });

        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            tx: Some(tx),
        }
    }

    /// Append one record. Non-blocking.
    pub fn record(
        &self,
        action_id: &ActionId,
        kind: ActionKind,
        attempt: u32,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let record = AuditRecord {
            action_id: action_id.clone(),
            kind,
            attempt,
            outcome,
            detail,
            at: Utc::now(),
        };
        self.records.write().push(record.clone());
        if let Some(tx) = &self.tx {
            let _ = tx.send(record);
        }
    }

    /// Copy of the in-memory trail.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let trail = AuditTrail::new();
        let id = ActionId::new();
        trail.record(&id, ActionKind::Click, 1, AuditOutcome::TransientError, None);
        trail.record(&id, ActionKind::Click, 2, AuditOutcome::Success, None);

        let records = trail.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[0].outcome, AuditOutcome::TransientError);
        assert_eq!(records[1].outcome, AuditOutcome::Success);
        assert_eq!(records[0].action_id, records[1].action_id);
    }

    #[tokio::test]
    async fn test_writer_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let trail = AuditTrail::with_writer(path.clone());

        let id = ActionId::new();
        trail.record(&id, ActionKind::TypeText, 1, AuditOutcome::Success, None);

        // Give the background writer a moment to flush.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let line = contents.lines().next().unwrap();
        let record: AuditRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.kind, ActionKind::TypeText);
    }
}
