//! Discovery engine: learns an operating envelope from observed parameters.
//!
//! The engine moves through `Discovery -> Calibrating -> Enforcing` exactly
//! once per run. Observation is concurrent with itself but never with
//! synthesis: `observe` holds the read side of a gate and calibration takes
//! the write side only long enough to clone the accumulators, and again to
//! publish. Every `reset` bumps an epoch under the same gate, so a
//! calibration that straddles a reset is discarded instead of published.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use envelo_boundary::{hour_and_weekday, Boundary, BoundaryDef, BoundaryDocument, GeoPoint};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::classify::{classify, Sample, PAIRED_POSITION_PARAMETER};
use crate::config::DiscoveryConfig;
use crate::envelope::{DiscoveryStats, EnvelopeDefinition};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::observation::{
    GeoObservation, NumericObservation, RateObservation, StateObservation, TimeObservation,
};
use crate::synthesis::{synthesize, ObservationSnapshot};

/// Lifecycle of a discovery run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DiscoveryState {
    Discovery = 0,
    Calibrating = 1,
    Enforcing = 2,
}

impl DiscoveryState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DiscoveryState::Discovery,
            1 => DiscoveryState::Calibrating,
            _ => DiscoveryState::Enforcing,
        }
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryState::Discovery => "discovery",
            DiscoveryState::Calibrating => "calibrating",
            DiscoveryState::Enforcing => "enforcing",
        };
        f.write_str(s)
    }
}

/// A lat or lon scalar waiting for its partner.
#[derive(Debug, Default)]
struct PendingCoordinate {
    lat: Option<(f64, u64)>,
    lon: Option<(f64, u64)>,
}

impl PendingCoordinate {
    /// Pair this call's components with ones left by the same or the
    /// previous call.
    fn pair(&mut self, lat: Option<f64>, lon: Option<f64>, call: u64) -> Option<GeoPoint> {
        let fresh = |slot: Option<(f64, u64)>| {
            slot.filter(|(_, seen)| *seen + 1 >= call).map(|(v, _)| v)
        };
        match (lat, lon) {
            (Some(lat), Some(lon)) => {
                self.lat = None;
                self.lon = None;
                Some(GeoPoint::new(lat, lon))
            }
            (Some(lat), None) => match fresh(self.lon.take()) {
                Some(lon) => Some(GeoPoint::new(lat, lon)),
                None => {
                    self.lat = Some((lat, call));
                    None
                }
            },
            (None, Some(lon)) => match fresh(self.lat.take()) {
                Some(lat) => Some(GeoPoint::new(lat, lon)),
                None => {
                    self.lon = Some((lon, call));
                    None
                }
            },
            (None, None) => None,
        }
    }
}

/// Output of one calibration.
#[derive(Debug)]
struct Generated {
    boundaries: Vec<Arc<Boundary>>,
    envelope: EnvelopeDefinition,
}

/// Everything a calibration captured when it claimed the `Calibrating` state.
struct Claim {
    epoch: u64,
    snapshot: ObservationSnapshot,
    started_at: DateTime<Utc>,
    total_observations: u64,
}

/// Learns boundaries from live traffic, then hands them to enforcement.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    state: AtomicU8,
    gate: RwLock<()>,
    epoch: AtomicU64,
    calibrations: AtomicU64,
    started_at: RwLock<DateTime<Utc>>,
    total_observations: AtomicU64,
    skipped_samples: AtomicU64,
    calls: AtomicU64,
    numeric: DashMap<String, NumericObservation>,
    geo: DashMap<String, GeoObservation>,
    rate: DashMap<String, RateObservation>,
    states: DashMap<String, StateObservation>,
    time: Mutex<TimeObservation>,
    pending: Mutex<PendingCoordinate>,
    generated: RwLock<Option<Arc<Generated>>>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> DiscoveryResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Self {
        Self::build(DiscoveryConfig::default())
    }

    fn build(config: DiscoveryConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(DiscoveryState::Discovery as u8),
            gate: RwLock::new(()),
            epoch: AtomicU64::new(0),
            calibrations: AtomicU64::new(0),
            started_at: RwLock::new(Utc::now()),
            total_observations: AtomicU64::new(0),
            skipped_samples: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            numeric: DashMap::new(),
            geo: DashMap::new(),
            rate: DashMap::new(),
            states: DashMap::new(),
            time: Mutex::new(TimeObservation::new()),
            pending: Mutex::new(PendingCoordinate::default()),
            generated: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn state(&self) -> DiscoveryState {
        DiscoveryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn total_observations(&self) -> u64 {
        self.total_observations.load(Ordering::Relaxed)
    }

    /// Restart the discovery clock. Ignored once calibration has begun.
    #[instrument(skip(self))]
    pub fn start(&self) {
        self.start_at(Utc::now());
    }

    pub fn start_at(&self, at: DateTime<Utc>) {
        if self.state() != DiscoveryState::Discovery {
            warn!(state = %self.state(), "start ignored, call reset() first");
            return;
        }
        *self.started_at.write() = at;
        info!(started_at = %at, "discovery started");
    }

    /// Record one parameter map. Returns false when not in discovery.
    pub fn observe(&self, params: &Map<String, Value>) -> bool {
        self.observe_at(params, Utc::now())
    }

    pub fn observe_at(&self, params: &Map<String, Value>, at: DateTime<Utc>) -> bool {
        {
            let _gate = self.gate.read();
            if self.state() != DiscoveryState::Discovery {
                return false;
            }
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            self.record(params, at, call);
            self.total_observations.fetch_add(1, Ordering::Relaxed);
        }

        if self.config.auto_transition && self.ready_at(at) {
            match self.calibrate(at, false) {
                Ok(count) => info!(boundaries = count, "auto-calibrated envelope"),
                Err(DiscoveryError::CalibrationInProgress)
                | Err(DiscoveryError::InvalidTransition(_))
                | Err(DiscoveryError::Superseded) => {}
                Err(e) => warn!(error = %e, "auto-calibration failed"),
            }
        }
        true
    }

    fn record(&self, params: &Map<String, Value>, at: DateTime<Utc>, call: u64) {
        let capacity = self.config.max_samples_per_parameter;
        let (mut lat, mut lon) = (None, None);

        for sample in classify(params) {
            match sample {
                Sample::Numeric(key, v) => self
                    .numeric
                    .entry(key)
                    .or_insert_with(|| NumericObservation::new(capacity))
                    .record(v),
                Sample::State(key, v) => self.states.entry(key).or_default().record(&v),
                Sample::Geo(key, point) => self
                    .geo
                    .entry(key)
                    .or_insert_with(|| GeoObservation::new(capacity))
                    .record(point),
                Sample::RateEvent(key) => self
                    .rate
                    .entry(key)
                    .or_insert_with(|| RateObservation::new(capacity))
                    .record(at),
                Sample::Latitude(v) => lat = Some(v),
                Sample::Longitude(v) => lon = Some(v),
                Sample::Skipped(key) => {
                    debug!(parameter = %key, "skipped unusable sample");
                    self.skipped_samples.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Some(point) = self.pending.lock().pair(lat, lon, call) {
            if point.is_valid() {
                self.geo
                    .entry(PAIRED_POSITION_PARAMETER.to_string())
                    .or_insert_with(|| GeoObservation::new(capacity))
                    .record(point);
            } else {
                self.skipped_samples.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some((hour, weekday)) = hour_and_weekday(at, self.config.utc_offset_minutes) {
            self.time.lock().record(hour, weekday);
        }
    }

    fn ready_at(&self, now: DateTime<Utc>) -> bool {
        if self.total_observations() < self.config.min_samples {
            return false;
        }
        let elapsed = now - *self.started_at.read();
        if elapsed.num_milliseconds() < (self.config.discovery_duration_secs as i64) * 1000 {
            return false;
        }
        !(self.numeric.is_empty() && self.geo.is_empty() && self.states.is_empty())
    }

    /// Regenerate boundaries now, regardless of thresholds.
    ///
    /// Allowed from `Discovery` and from `Enforcing` (re-calibration over the
    /// same observations). Returns the number of boundaries generated.
    #[instrument(skip(self))]
    pub fn force_calibrate(&self) -> DiscoveryResult<usize> {
        self.calibrate(Utc::now(), true)
    }

    fn calibrate(&self, now: DateTime<Utc>, forced: bool) -> DiscoveryResult<usize> {
        let claim = self.claim(forced)?;
        let generated = self.assemble(&claim, now);
        self.publish(claim.epoch, generated, forced)
    }

    /// Move into `Calibrating` and capture the accumulators, atomically with
    /// respect to `reset`.
    fn claim(&self, forced: bool) -> DiscoveryResult<Claim> {
        let _gate = self.gate.write();
        let calibrating = DiscoveryState::Calibrating as u8;
        let from_discovery = self.state.compare_exchange(
            DiscoveryState::Discovery as u8,
            calibrating,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(current) = from_discovery {
            let current = DiscoveryState::from_u8(current);
            match current {
                DiscoveryState::Calibrating => return Err(DiscoveryError::CalibrationInProgress),
                DiscoveryState::Enforcing if forced => {
                    if self
                        .state
                        .compare_exchange(
                            DiscoveryState::Enforcing as u8,
                            calibrating,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        return Err(DiscoveryError::CalibrationInProgress);
                    }
                }
                other => return Err(DiscoveryError::InvalidTransition(other)),
            }
        }

        Ok(Claim {
            epoch: self.epoch.load(Ordering::Acquire),
            snapshot: self.snapshot(),
            started_at: *self.started_at.read(),
            total_observations: self.total_observations(),
        })
    }

    fn assemble(&self, claim: &Claim, now: DateTime<Utc>) -> Generated {
        let mut boundaries = Vec::new();
        let mut document = BoundaryDocument::default();
        for def in synthesize(&claim.snapshot, &self.config) {
            match Boundary::new(def.clone()) {
                Ok(boundary) => {
                    boundaries.push(Arc::new(boundary));
                    document.push(def);
                }
                Err(e) => warn!(boundary = %def.name, error = %e, "discarding synthesized boundary"),
            }
        }

        let envelope = EnvelopeDefinition {
            generated_at: now,
            discovery_started_at: claim.started_at,
            discovery_duration_secs: (now - claim.started_at).num_milliseconds() as f64 / 1000.0,
            total_observations: claim.total_observations,
            confidence_percentile: self.config.confidence_percentile,
            safety_margin: self.config.safety_margin,
            boundaries: document,
        };
        Generated {
            boundaries,
            envelope,
        }
    }

    /// Install the generated envelope and enter `Enforcing`, unless a reset
    /// ran since the claim.
    fn publish(&self, epoch: u64, generated: Generated, forced: bool) -> DiscoveryResult<usize> {
        let _gate = self.gate.write();
        if self.epoch.load(Ordering::Acquire) != epoch
            || self
                .state
                .compare_exchange(
                    DiscoveryState::Calibrating as u8,
                    DiscoveryState::Enforcing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
        {
            debug!(state = %self.state(), "calibration discarded after reset");
            return Err(DiscoveryError::Superseded);
        }

        let count = generated.boundaries.len();
        *self.generated.write() = Some(Arc::new(generated));
        self.calibrations.fetch_add(1, Ordering::Relaxed);

        info!(
            boundaries = count,
            observations = self.total_observations(),
            forced,
            "envelope calibrated"
        );
        Ok(count)
    }

    fn snapshot(&self) -> ObservationSnapshot {
        fn sorted<T: Clone>(map: &DashMap<String, T>) -> Vec<(String, T)> {
            let mut items: Vec<(String, T)> = map
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            items
        }
        ObservationSnapshot {
            numeric: sorted(&self.numeric),
            geo: sorted(&self.geo),
            rate: sorted(&self.rate),
            state: sorted(&self.states),
            time: self.time.lock().clone(),
        }
    }

    /// Generated boundaries; empty until calibration completes.
    pub fn boundaries(&self) -> Vec<Arc<Boundary>> {
        self.generated
            .read()
            .as_ref()
            .map(|g| g.boundaries.clone())
            .unwrap_or_default()
    }

    /// Generated definitions, detached from the live boundaries' counters.
    pub fn boundary_defs(&self) -> Vec<BoundaryDef> {
        self.boundaries().iter().map(|b| b.def().clone()).collect()
    }

    pub fn boundary_document(&self) -> BoundaryDocument {
        self.generated
            .read()
            .as_ref()
            .map(|g| g.envelope.boundaries.clone())
            .unwrap_or_default()
    }

    /// The exportable envelope; `None` until calibration completes.
    pub fn envelope_definition(&self) -> Option<EnvelopeDefinition> {
        self.generated.read().as_ref().map(|g| g.envelope.clone())
    }

    pub fn stats(&self) -> DiscoveryStats {
        let started_at = *self.started_at.read();
        DiscoveryStats {
            state: self.state(),
            started_at,
            elapsed_secs: (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0,
            total_observations: self.total_observations(),
            skipped_samples: self.skipped_samples.load(Ordering::Relaxed),
            numeric_parameters: self.numeric.len(),
            geo_parameters: self.geo.len(),
            rate_parameters: self.rate.len(),
            state_parameters: self.states.len(),
            time_samples: self.time.lock().samples(),
            calibrations: self.calibrations.load(Ordering::Relaxed),
            boundaries_generated: self
                .generated
                .read()
                .as_ref()
                .map_or(0, |g| g.boundaries.len()),
        }
    }

    /// Drop every observation and generated boundary and return to discovery.
    #[instrument(skip(self))]
    pub fn reset(&self) {
        let _gate = self.gate.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.numeric.clear();
        self.geo.clear();
        self.rate.clear();
        self.states.clear();
        *self.time.lock() = TimeObservation::new();
        *self.pending.lock() = PendingCoordinate::default();
        *self.generated.write() = None;
        self.total_observations.store(0, Ordering::Relaxed);
        self.skipped_samples.store(0, Ordering::Relaxed);
        self.calls.store(0, Ordering::Relaxed);
        self.calibrations.store(0, Ordering::Relaxed);
        *self.started_at.write() = Utc::now();
        self.state
            .store(DiscoveryState::Discovery as u8, Ordering::Release);
        info!("discovery reset");
    }
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
