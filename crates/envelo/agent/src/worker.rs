//! Background workers: telemetry shipping and heartbeats.
//!
//! Both run as tokio tasks and stop when the shared `watch` flag flips.
//! Neither ever touches the evaluation path. Every authority call the
//! shipper makes is bounded, so a hung authority delays telemetry into the
//! fallback log instead of stranding it in memory.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::authority::{AuthorityClient, Heartbeat, TelemetryBatch};
use crate::telemetry::{FallbackLog, TelemetryCounters, TelemetryRecord};

/// Consecutive heartbeat failures before the agent reports itself disconnected.
pub const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

/// Delivery bound when no authority config supplies a request timeout.
pub(crate) const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pass/block counters shared with the heartbeat.
#[derive(Debug, Default)]
pub(crate) struct VerdictCounters {
    pub pass: AtomicU64,
    pub block: AtomicU64,
}

/// Where a telemetry batch goes.
pub(crate) struct TelemetrySink {
    pub session_id: String,
    pub client: Option<Arc<dyn AuthorityClient>>,
    pub fallback: Option<Arc<FallbackLog>>,
    pub counters: Arc<TelemetryCounters>,
    /// Upper bound on one authority delivery
    pub delivery_timeout: Duration,
}

impl TelemetrySink {
    /// Ship to the authority, falling back to the local log.
    pub(crate) async fn flush(&self, batch: Vec<TelemetryRecord>) {
        self.flush_within(batch, self.delivery_timeout).await
    }

    /// As [`flush`](Self::flush), giving the authority at most `limit`.
    pub(crate) async fn flush_within(&self, batch: Vec<TelemetryRecord>, limit: Duration) {
        if batch.is_empty() {
            return;
        }
        let len = batch.len() as u64;
        let batch = TelemetryBatch {
            session_id: self.session_id.clone(),
            records: batch,
        };

        if let Some(client) = &self.client {
            match tokio::time::timeout(limit, client.send_telemetry(&batch)).await {
                Ok(Ok(())) => {
                    self.counters.shipped.fetch_add(len, Ordering::Relaxed);
                    debug!(records = len, "telemetry shipped");
                    return;
                }
                Ok(Err(e)) => warn!(records = len, error = %e, "telemetry delivery failed"),
                Err(_) => warn!(
                    records = len,
                    timeout_ms = limit.as_millis() as u64,
                    "telemetry delivery timed out"
                ),
            }
        }

        match &self.fallback {
            Some(log) => match log.append(&batch.records).await {
                Ok(_) => {
                    self.counters.recovered.fetch_add(len, Ordering::Relaxed);
                    debug!(records = len, path = %log.path().display(), "telemetry written to fallback log");
                }
                Err(e) => {
                    self.counters.dropped.fetch_add(len, Ordering::Relaxed);
                    error!(records = len, error = %e, "fallback log write failed, telemetry lost");
                }
            },
            None => {
                self.counters.dropped.fetch_add(len, Ordering::Relaxed);
                error!(records = len, "no fallback log configured, telemetry lost");
            }
        }
    }
}

/// Batch records and flush on size or interval; drain on shutdown, giving
/// the authority at most `drain_timeout` before the fallback log.
pub(crate) async fn run_telemetry_shipper(
    sink: TelemetrySink,
    mut rx: mpsc::UnboundedReceiver<TelemetryRecord>,
    interval: Duration,
    batch_size: usize,
    drain_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut batch = Vec::with_capacity(batch_size);
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        sink.flush(std::mem::take(&mut batch)).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                sink.flush(std::mem::take(&mut batch)).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    rx.close();
    while let Ok(record) = rx.try_recv() {
        batch.push(record);
    }
    let remaining = batch.len();
    sink.flush_within(batch, drain_timeout.min(sink.delivery_timeout)).await;
    info!(flushed = remaining, "telemetry shipper stopped");
}

/// Send heartbeats and track connectivity.
pub(crate) async fn run_heartbeat(
    client: Arc<dyn AuthorityClient>,
    session_id: String,
    interval: Duration,
    connected: Arc<AtomicBool>,
    verdicts: Arc<VerdictCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beat = Heartbeat {
                    session_id: session_id.clone(),
                    timestamp: Utc::now(),
                    pass_count: verdicts.pass.load(Ordering::Relaxed),
                    block_count: verdicts.block.load(Ordering::Relaxed),
                };
                match client.heartbeat(&beat).await {
                    Ok(()) => {
                        failures = 0;
                        if !connected.swap(true, Ordering::AcqRel) {
                            info!(session_id = %session_id, "connectivity restored");
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(failures, error = %e, "heartbeat failed");
                        if failures >= HEARTBEAT_FAILURE_THRESHOLD
                            && connected.swap(false, Ordering::AcqRel)
                        {
                            error!(
                                session_id = %session_id,
                                failures,
                                "connectivity lost"
                            );
                        }
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{SessionAck, SessionRegistration, SessionSummary};
    use crate::error::{AgentError, AgentResult};
    use async_trait::async_trait;
    use envelo_boundary::BoundaryDocument;
    use parking_lot::Mutex;
    use serde_json::Map;

    /// Fails heartbeats while `down` is set; records telemetry batch sizes.
    #[derive(Default)]
    struct FlakyAuthority {
        down: AtomicBool,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AuthorityClient for FlakyAuthority {
        async fn register_session(&self, _: &SessionRegistration) -> AgentResult<SessionAck> {
            Ok(SessionAck::default())
        }

        async fn heartbeat(&self, _: &Heartbeat) -> AgentResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(AgentError::Authority {
                    status: 503,
                    message: "down".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn send_telemetry(&self, batch: &TelemetryBatch) -> AgentResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AgentError::Authority {
                    status: 503,
                    message: "down".into(),
                });
            }
            self.batches.lock().push(batch.records.len());
            Ok(())
        }

        async fn end_session(&self, _: &str, _: &SessionSummary) -> AgentResult<()> {
            Ok(())
        }

        async fn fetch_boundaries(&self, _: &str) -> AgentResult<BoundaryDocument> {
            Ok(BoundaryDocument::default())
        }
    }

    /// Accepts the connection, then never answers a telemetry batch.
    struct HungAuthority;

    #[async_trait]
    impl AuthorityClient for HungAuthority {
        async fn register_session(&self, _: &SessionRegistration) -> AgentResult<SessionAck> {
            Ok(SessionAck::default())
        }

        async fn heartbeat(&self, _: &Heartbeat) -> AgentResult<()> {
            Ok(())
        }

        async fn send_telemetry(&self, _: &TelemetryBatch) -> AgentResult<()> {
            std::future::pending().await
        }

        async fn end_session(&self, _: &str, _: &SessionSummary) -> AgentResult<()> {
            Ok(())
        }

        async fn fetch_boundaries(&self, _: &str) -> AgentResult<BoundaryDocument> {
            Ok(BoundaryDocument::default())
        }
    }

    fn sink(
        client: Option<Arc<dyn AuthorityClient>>,
        fallback: Option<Arc<FallbackLog>>,
        counters: &Arc<TelemetryCounters>,
    ) -> TelemetrySink {
        TelemetrySink {
            session_id: "s".into(),
            client,
            fallback,
            counters: counters.clone(),
            delivery_timeout: Duration::from_secs(10),
        }
    }

    fn record(n: u32) -> TelemetryRecord {
        TelemetryRecord {
            session_id: "s".into(),
            action_id: format!("s-{:08}", n),
            timestamp: Utc::now(),
            allowed: true,
            violations: vec![],
            boundary_evaluations: vec![],
            execution_time_us: 1,
            system_state: Map::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_flips_connectivity() {
        let authority = Arc::new(FlakyAuthority::default());
        authority.down.store(true, Ordering::SeqCst);
        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_heartbeat(
            authority.clone(),
            "s".into(),
            Duration::from_secs(1),
            connected.clone(),
            Arc::new(VerdictCounters::default()),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(connected.load(Ordering::SeqCst), "two failures keep the link up");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!connected.load(Ordering::SeqCst));

        authority.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(connected.load(Ordering::SeqCst));

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shipper_batches_by_size_and_drains_on_shutdown() {
        let authority = Arc::new(FlakyAuthority::default());
        let counters = Arc::new(TelemetryCounters::default());
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_telemetry_shipper(
            sink(Some(authority.clone()), None, &counters),
            record_rx,
            Duration::from_secs(3600),
            4,
            Duration::from_secs(1),
            stop_rx,
        ));

        for n in 0..10 {
            record_tx.send(record(n)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(*authority.batches.lock(), vec![4, 4, 2]);
        assert_eq!(counters.snapshot().shipped, 10);
    }

    #[tokio::test]
    async fn failed_delivery_goes_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(FlakyAuthority::default());
        authority.down.store(true, Ordering::SeqCst);
        let log = Arc::new(FallbackLog::new(dir.path().join("fallback.jsonl")));
        let counters = Arc::new(TelemetryCounters::default());
        let sink = sink(Some(authority), Some(log.clone()), &counters);

        sink.flush(vec![record(1), record(2)]).await;
        assert_eq!(log.read_all().await.unwrap().len(), 2);
        let stats = counters.snapshot();
        assert_eq!(stats.recovered, 2);
        assert_eq!(stats.shipped, 0);
    }

    #[tokio::test]
    async fn no_fallback_counts_dropped() {
        let counters = Arc::new(TelemetryCounters::default());
        sink(None, None, &counters).flush(vec![record(1)]).await;
        assert_eq!(counters.snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn hung_authority_drains_to_fallback_within_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FallbackLog::new(dir.path().join("fallback.jsonl")));
        let counters = Arc::new(TelemetryCounters::default());
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_telemetry_shipper(
            sink(Some(Arc::new(HungAuthority)), Some(log.clone()), &counters),
            record_rx,
            Duration::from_secs(3600),
            100,
            Duration::from_millis(100),
            stop_rx,
        ));

        for n in 0..5 {
            record_tx.send(record(n)).unwrap();
        }
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("shipper must finish inside the drain deadline")
            .unwrap();

        let stats = counters.snapshot();
        assert_eq!(stats.recovered, 5);
        assert_eq!(stats.shipped, 0);
        assert_eq!(log.read_all().await.unwrap().len(), 5);
        assert!(record_tx.send(record(6)).is_err(), "receiver closed after drain");
    }

    #[tokio::test(start_paused = true)]
    async fn hung_authority_during_batch_flush_times_out() {
        let counters = Arc::new(TelemetryCounters::default());
        let sink = TelemetrySink {
            delivery_timeout: Duration::from_millis(250),
            ..sink(Some(Arc::new(HungAuthority)), None, &counters)
        };
        sink.flush(vec![record(1), record(2)]).await;
        assert_eq!(counters.snapshot().dropped, 2);
    }
}
