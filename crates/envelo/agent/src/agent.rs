//! The enforcement agent.
//!
//! Holds the active boundary set, evaluates proposed actions against it and
//! reports every verdict as telemetry. Evaluation is synchronous and never
//! waits on I/O; the authority only ever sees results after the fact.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use envelo_boundary::{Boundary, BoundaryDocument, BoundaryStatus, EvalTime};
use envelo_discovery::{DiscoveryEngine, DiscoveryState};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::authority::{
    AuthorityClient, HttpAuthorityClient, SessionAck, SessionRegistration, SessionSummary,
};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::evaluation::{resolve_parameter, BoundaryEvaluation, Evaluation};
use crate::telemetry::{FallbackLog, TelemetryCounters, TelemetryRecord, TelemetryStats};
use crate::worker::{
    run_heartbeat, run_telemetry_shipper, TelemetrySink, VerdictCounters, DEFAULT_DELIVERY_TIMEOUT,
};

/// Invoked after a blocked action to move the system to a safe state.
///
/// Errors are logged and never reach the caller of `evaluate`.
pub type SafeStateCallback = Arc<dyn Fn(&Evaluation) -> anyhow::Result<()> + Send + Sync>;

/// Immutable snapshot of the active boundaries.
pub type BoundarySet = Arc<Vec<Arc<Boundary>>>;

/// Point-in-time agent statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub session_id: String,
    pub system_id: String,
    pub running: bool,
    pub connected: bool,
    pub standalone: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub pass_count: u64,
    pub block_count: u64,
    pub total_evaluations: u64,
    pub boundary_count: usize,
    pub telemetry: TelemetryStats,
}

/// Evaluates actions against the active envelope.
pub struct Agent {
    config: AgentConfig,
    session_id: String,
    started_at: DateTime<Utc>,
    client: Option<Arc<dyn AuthorityClient>>,
    boundaries: RwLock<BoundarySet>,
    system_state: RwLock<Map<String, Value>>,
    safe_state: RwLock<Option<SafeStateCallback>>,
    sequence: AtomicU64,
    verdicts: Arc<VerdictCounters>,
    connected: Arc<AtomicBool>,
    running: AtomicBool,
    telemetry_tx: mpsc::UnboundedSender<TelemetryRecord>,
    telemetry: Arc<TelemetryCounters>,
    fallback: Option<Arc<FallbackLog>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Opaque per-process session identifier.
fn derive_session_id(system_id: &str, started_at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(system_id.as_bytes());
    hasher.update(&started_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("ses-{}", &hex.as_str()[..16])
}

fn ensure_unique(boundaries: &[Arc<Boundary>]) -> AgentResult<()> {
    let mut names = HashSet::with_capacity(boundaries.len());
    for b in boundaries {
        if !names.insert(b.name()) {
            return Err(AgentError::DuplicateBoundary(b.name().to_string()));
        }
    }
    Ok(())
}

impl Agent {
    /// Start an agent, talking to the configured authority if any.
    ///
    /// Must be called inside a tokio runtime. With `fail_closed` an
    /// unreachable authority is a startup error.
    pub async fn start(config: AgentConfig) -> AgentResult<Self> {
        let client: Option<Arc<dyn AuthorityClient>> = match &config.authority {
            Some(authority) => Some(Arc::new(HttpAuthorityClient::new(authority)?)),
            None => None,
        };
        Self::start_with_client(config, client).await
    }

    /// Start with an explicit authority client; `None` runs standalone.
    #[instrument(skip_all, fields(system_id = %config.system_id))]
    pub async fn start_with_client(
        config: AgentConfig,
        client: Option<Arc<dyn AuthorityClient>>,
    ) -> AgentResult<Self> {
        config.validate()?;
        let started_at = Utc::now();
        let session_id = derive_session_id(&config.system_id, started_at);

        let mut initial = None;
        let connected = match &client {
            Some(client) => {
                let registration = SessionRegistration {
                    session_id: session_id.clone(),
                    system_id: config.system_id.clone(),
                    agent_version: env!("CARGO_PKG_VERSION").to_string(),
                    started_at,
                    boundary_count: 0,
                };
                match Self::register(client.as_ref(), &registration, &config).await {
                    Ok(ack) => {
                        initial = ack.boundaries;
                        true
                    }
                    Err(reason) if config.fail_closed => {
                        error!(attempts = config.reconnect_attempts, %reason, "refusing to start unprotected");
                        return Err(AgentError::ConnectivityLost {
                            attempts: config.reconnect_attempts,
                            reason,
                        });
                    }
                    Err(reason) => {
                        warn!(%reason, "authority unreachable, continuing disconnected");
                        false
                    }
                }
            }
            None => {
                info!("no authority configured, running standalone");
                false
            }
        };

        let boundaries: BoundarySet = match initial {
            Some(doc) => Arc::new(doc.build()?),
            None => Arc::new(Vec::new()),
        };

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fallback = config
            .fallback_path
            .as_ref()
            .map(|p| Arc::new(FallbackLog::new(p.clone())));
        let telemetry = Arc::new(TelemetryCounters::default());
        let verdicts = Arc::new(VerdictCounters::default());
        let connected = Arc::new(AtomicBool::new(connected));

        let mut workers = Vec::with_capacity(2);
        workers.push(tokio::spawn(run_telemetry_shipper(
            TelemetrySink {
                session_id: session_id.clone(),
                client: client.clone(),
                fallback: fallback.clone(),
                counters: telemetry.clone(),
                delivery_timeout: config
                    .authority
                    .as_ref()
                    .map_or(DEFAULT_DELIVERY_TIMEOUT, |a| a.request_timeout()),
            },
            telemetry_rx,
            config.telemetry_interval(),
            config.telemetry_batch_size,
            config.shutdown_timeout() / 2,
            shutdown_rx.clone(),
        )));
        if let Some(client) = &client {
            workers.push(tokio::spawn(run_heartbeat(
                client.clone(),
                session_id.clone(),
                config.heartbeat_interval(),
                connected.clone(),
                verdicts.clone(),
                shutdown_rx,
            )));
        }

        info!(
            session_id = %session_id,
            connected = connected.load(Ordering::Relaxed),
            boundaries = boundaries.len(),
            "agent started"
        );

        Ok(Self {
            config,
            session_id,
            started_at,
            client,
            boundaries: RwLock::new(boundaries),
            system_state: RwLock::new(Map::new()),
            safe_state: RwLock::new(None),
            sequence: AtomicU64::new(0),
            verdicts,
            connected,
            running: AtomicBool::new(true),
            telemetry_tx,
            telemetry,
            fallback,
            shutdown_tx,
            workers: Mutex::new(workers),
        })
    }

    /// Register with linear backoff; returns the last error text on failure.
    async fn register(
        client: &dyn AuthorityClient,
        registration: &SessionRegistration,
        config: &AgentConfig,
    ) -> Result<SessionAck, String> {
        let mut last_error = String::new();
        for attempt in 1..=config.reconnect_attempts {
            match client.register_session(registration).await {
                Ok(ack) => {
                    info!(attempt, session_id = %registration.session_id, "session registered");
                    return Ok(ack);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "session registration failed");
                    last_error = e.to_string();
                    if attempt < config.reconnect_attempts {
                        tokio::time::sleep(config.reconnect_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_standalone(&self) -> bool {
        self.client.is_none()
    }

    pub fn fallback_log(&self) -> Option<&FallbackLog> {
        self.fallback.as_deref()
    }

    pub fn set_safe_state_callback(&self, callback: SafeStateCallback) {
        *self.safe_state.write() = Some(callback);
    }

    /// Evaluate a proposed action.
    ///
    /// Every enabled boundary is checked; one failing never stops the rest.
    /// A boundary whose parameter is absent passes and is marked skipped.
    pub fn evaluate(&self, params: &Map<String, Value>) -> Evaluation {
        let started = Instant::now();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let action_id = format!("{}-{:08}", self.session_id, seq);
        let boundaries = self.boundaries();
        let now = EvalTime::now();

        let mut violations = Vec::new();
        let mut results = Vec::with_capacity(boundaries.len());
        for boundary in boundaries.iter() {
            let mut result = BoundaryEvaluation {
                boundary: boundary.name().to_string(),
                parameter: boundary.parameter().to_string(),
                kind: boundary.kind(),
                passed: true,
                skipped: true,
                message: None,
                value: None,
            };
            if !boundary.is_enabled() {
                result.message = Some("disabled".into());
                results.push(result);
                continue;
            }
            let Some(value) = resolve_parameter(params, boundary) else {
                results.push(result);
                continue;
            };

            let check = boundary.check_at(&value, &now);
            result.skipped = false;
            result.passed = check.passed();
            result.message = check.message().map(str::to_string);
            if !value.is_null() {
                result.value = Some(value.into_owned());
            }
            if let Some(msg) = &result.message {
                violations.push(format!("{}: {}", boundary.name(), msg));
            }
            results.push(result);
        }

        let allowed = violations.is_empty();
        if allowed {
            self.verdicts.pass.fetch_add(1, Ordering::Relaxed);
        } else {
            self.verdicts.block.fetch_add(1, Ordering::Relaxed);
        }

        let evaluation = Evaluation {
            action_id,
            timestamp: now.wall,
            allowed,
            violations,
            boundary_evaluations: results,
            execution_time_us: started.elapsed().as_micros() as u64,
        };

        let record = TelemetryRecord::from_evaluation(
            &self.session_id,
            &evaluation,
            self.system_state.read().clone(),
        );
        if self.is_running() && self.telemetry_tx.send(record).is_ok() {
            self.telemetry.enqueued.fetch_add(1, Ordering::Release);
        } else {
            self.telemetry.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                action_id = %evaluation.action_id,
                "agent stopped, telemetry record dropped"
            );
        }

        if !allowed {
            debug!(action_id = %evaluation.action_id, violations = ?evaluation.violations, "action blocked");
            self.run_safe_state(&evaluation);
        }
        evaluation
    }

    fn run_safe_state(&self, evaluation: &Evaluation) {
        let Some(callback) = self.safe_state.read().clone() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| callback(evaluation))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(action_id = %evaluation.action_id, error = %e, "safe-state callback failed"),
            Err(_) => error!(action_id = %evaluation.action_id, "safe-state callback panicked"),
        }
    }

    /// Run `action` only if the parameters are inside the envelope.
    pub fn enforce<T, F>(&self, params: &Map<String, Value>, action: F) -> AgentResult<T>
    where
        F: FnOnce() -> T,
    {
        let evaluation = self.evaluate(params);
        if evaluation.allowed {
            Ok(action())
        } else {
            Err(AgentError::Blocked {
                action_id: evaluation.action_id,
                violations: evaluation.violations,
            })
        }
    }

    /// Current boundary set; later replacements do not affect the snapshot.
    pub fn boundaries(&self) -> BoundarySet {
        self.boundaries.read().clone()
    }

    pub fn boundary_statuses(&self) -> Vec<BoundaryStatus> {
        self.boundaries().iter().map(|b| b.status()).collect()
    }

    pub fn add_boundary(&self, boundary: Boundary) -> AgentResult<()> {
        let mut current = self.boundaries.write();
        if current.iter().any(|b| b.name() == boundary.name()) {
            return Err(AgentError::DuplicateBoundary(boundary.name().to_string()));
        }
        let mut next: Vec<Arc<Boundary>> = current.as_ref().clone();
        info!(boundary = %boundary.name(), kind = %boundary.kind(), "boundary added");
        next.push(Arc::new(boundary));
        *current = Arc::new(next);
        Ok(())
    }

    pub fn remove_boundary(&self, name: &str) -> bool {
        let mut current = self.boundaries.write();
        if !current.iter().any(|b| b.name() == name) {
            return false;
        }
        let next: Vec<Arc<Boundary>> = current.iter().filter(|b| b.name() != name).cloned().collect();
        *current = Arc::new(next);
        info!(boundary = %name, "boundary removed");
        true
    }

    /// Swap in a whole new set. Readers see the old set or the new one.
    pub fn replace_boundaries(&self, boundaries: Vec<Arc<Boundary>>) -> AgentResult<()> {
        ensure_unique(&boundaries)?;
        let count = boundaries.len();
        *self.boundaries.write() = Arc::new(boundaries);
        info!(boundaries = count, "boundary set replaced");
        Ok(())
    }

    pub fn load_document(&self, document: &BoundaryDocument) -> AgentResult<usize> {
        let boundaries = document.build()?;
        let count = boundaries.len();
        self.replace_boundaries(boundaries)?;
        Ok(count)
    }

    /// Fetch this session's boundary document from the authority.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn resync(&self) -> AgentResult<usize> {
        let client = self.client.as_ref().ok_or(AgentError::Standalone)?;
        let document = client.fetch_boundaries(&self.session_id).await?;
        self.load_document(&document)
    }

    /// Install what a finished discovery run generated, with fresh counters.
    pub fn adopt_discovery(&self, engine: &DiscoveryEngine) -> AgentResult<usize> {
        let state = engine.state();
        if state != DiscoveryState::Enforcing {
            return Err(AgentError::DiscoveryIncomplete(state));
        }
        self.load_document(&engine.boundary_document())
    }

    /// Merge into the system state attached to every telemetry record.
    pub fn update_state(&self, updates: Map<String, Value>) {
        let mut state = self.system_state.write();
        for (k, v) in updates {
            state.insert(k, v);
        }
    }

    pub fn system_state(&self) -> Map<String, Value> {
        self.system_state.read().clone()
    }

    pub fn stats(&self) -> AgentStats {
        let pass_count = self.verdicts.pass.load(Ordering::Relaxed);
        let block_count = self.verdicts.block.load(Ordering::Relaxed);
        AgentStats {
            session_id: self.session_id.clone(),
            system_id: self.config.system_id.clone(),
            running: self.is_running(),
            connected: self.is_connected(),
            standalone: self.is_standalone(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            pass_count,
            block_count,
            total_evaluations: pass_count + block_count,
            boundary_count: self.boundaries.read().len(),
            telemetry: self.telemetry.snapshot(),
        }
    }

    /// Stop background work: flush telemetry within the shutdown timeout,
    /// then tell the authority the session ended. Idempotent.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let mut workers: Vec<Option<JoinHandle<()>>> = std::mem::take(&mut *self.workers.lock())
            .into_iter()
            .map(Some)
            .collect();
        let timeout = self.config.shutdown_timeout();
        let joined = tokio::time::timeout(timeout, async {
            for slot in workers.iter_mut() {
                if let Some(handle) = slot.as_mut() {
                    let outcome = handle.await;
                    *slot = None;
                    if let Err(e) = outcome {
                        warn!(error = %e, "worker ended abnormally");
                    }
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "workers did not stop in time, aborting");
            for handle in workers.into_iter().flatten() {
                handle.abort();
                let _ = handle.await;
            }
        }
        let lost = self.telemetry.settle_unaccounted();
        if lost > 0 {
            error!(records = lost, "telemetry lost during shutdown");
        }

        if let Some(client) = &self.client {
            let summary = SessionSummary {
                ended_at: Utc::now(),
                pass_count: self.verdicts.pass.load(Ordering::Relaxed),
                block_count: self.verdicts.block.load(Ordering::Relaxed),
            };
            match tokio::time::timeout(timeout, client.end_session(&self.session_id, &summary)).await {
                Ok(Ok(())) => debug!("session end acknowledged"),
                Ok(Err(e)) => debug!(error = %e, "session end not delivered"),
                Err(_) => debug!("session end timed out"),
            }
        }
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
