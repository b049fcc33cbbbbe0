//! Telemetry records and the local fallback log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::AgentResult;
use crate::evaluation::{BoundaryEvaluation, Evaluation};

/// One evaluated action, as shipped to the authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub session_id: String,
    pub action_id: String,
    pub timestamp: DateTime<Utc>,
    pub allowed: bool,
    pub violations: Vec<String>,
    pub boundary_evaluations: Vec<BoundaryEvaluation>,
    pub execution_time_us: u64,
    pub system_state: Map<String, Value>,
}

impl TelemetryRecord {
    pub fn from_evaluation(
        session_id: &str,
        evaluation: &Evaluation,
        system_state: Map<String, Value>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            action_id: evaluation.action_id.clone(),
            timestamp: evaluation.timestamp,
            allowed: evaluation.allowed,
            violations: evaluation.violations.clone(),
            boundary_evaluations: evaluation.boundary_evaluations.clone(),
            execution_time_us: evaluation.execution_time_us,
            system_state,
        }
    }
}

/// Delivery counters shared by the agent and the shipper task.
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) shipped: AtomicU64,
    pub(crate) recovered: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

/// Snapshot of [`TelemetryCounters`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub enqueued: u64,
    pub shipped: u64,
    /// Written to the fallback log instead of the authority
    pub recovered: u64,
    pub dropped: u64,
}

impl TelemetryCounters {
    pub fn snapshot(&self) -> TelemetryStats {
        TelemetryStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            shipped: self.shipped.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Count every enqueued record with no recorded outcome as dropped.
    /// Only meaningful once the shipper has exited.
    pub(crate) fn settle_unaccounted(&self) -> u64 {
        let settled = self.shipped.load(Ordering::Acquire)
            + self.recovered.load(Ordering::Acquire)
            + self.dropped.load(Ordering::Acquire);
        let lost = self.enqueued.load(Ordering::Acquire).saturating_sub(settled);
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::AcqRel);
        }
        lost
    }
}

/// Append-only JSONL file for telemetry the authority did not accept.
///
/// One record per line. Appends are serialized so concurrent batches never
/// interleave.
#[derive(Debug)]
pub struct FallbackLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FallbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch; returns the number of records written.
    pub async fn append(&self, records: &[TelemetryRecord]) -> AgentResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(records.len())
    }

    /// Read every recoverable record, skipping blank lines.
    pub async fn read_all(&self) -> AgentResult<Vec<TelemetryRecord>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelo_boundary::BoundaryKind;
    use serde_json::json;

    fn record(seq: u32, allowed: bool) -> TelemetryRecord {
        let evaluation = Evaluation {
            action_id: format!("ses-test-{:08}", seq),
            timestamp: Utc::now(),
            allowed,
            violations: if allowed {
                vec![]
            } else {
                vec!["speed=31 above maximum".into()]
            },
            boundary_evaluations: vec![BoundaryEvaluation {
                boundary: "speed_limit".into(),
                parameter: "speed".into(),
                kind: BoundaryKind::Numeric,
                passed: allowed,
                skipped: false,
                message: None,
                value: Some(json!(31)),
            }],
            execution_time_us: 12,
        };
        let mut state = Map::new();
        state.insert("mode".into(), json!("auto"));
        TelemetryRecord::from_evaluation("ses-test", &evaluation, state)
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = FallbackLog::new(dir.path().join("nested").join("fallback.jsonl"));

        assert!(log.read_all().await.unwrap().is_empty());
        assert_eq!(log.append(&[record(1, true), record(2, false)]).await.unwrap(), 2);
        assert_eq!(log.append(&[record(3, true)]).await.unwrap(), 1);
        assert_eq!(log.append(&[]).await.unwrap(), 0);

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].action_id, "ses-test-00000002");
        assert!(!records[1].allowed);
        assert_eq!(records[0].system_state["mode"], json!("auto"));
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(FallbackLog::new(dir.path().join("fallback.jsonl")));
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<_> = (0..25).map(|j| record(i * 100 + j, true)).collect();
                log.append(&batch).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(log.read_all().await.unwrap().len(), 200);
    }

    #[test]
    fn unaccounted_records_settle_as_dropped() {
        let counters = TelemetryCounters::default();
        counters.enqueued.store(7, Ordering::Relaxed);
        counters.shipped.store(2, Ordering::Relaxed);
        counters.recovered.store(1, Ordering::Relaxed);

        assert_eq!(counters.settle_unaccounted(), 4);
        let stats = counters.snapshot();
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.shipped + stats.recovered + stats.dropped, stats.enqueued);
        assert_eq!(counters.settle_unaccounted(), 0);
    }
}
