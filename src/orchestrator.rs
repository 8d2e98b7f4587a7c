//! Change-detection cycle.
//!
//! One cycle walks every configured window: read its checkpoint, fetch the
//! bundles updated since, run each through cache → detector → dedup gate →
//! emitter, then advance all checkpoints. Item failures are logged and
//! counted; fetch failures abort the cycle before any checkpoint moves.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio::task;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::CorridorStateCache;
use crate::config::Config;
use crate::dedup::DedupGate;
use crate::detector::TransitionDetector;
use crate::emitter::SignalEmitter;
use crate::error::{Error, Result};
use crate::models::{Bundle, Signal, SignalType, Window};
use crate::refresh;
use crate::store::{BundleStore, CheckpointStore, SignalStore, SqliteStore};

pub const JOB_KEY_PREFIX: &str = "corridor_signals";

pub fn job_key(window: Window) -> String {
    format!("{JOB_KEY_PREFIX}:{window}")
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub windows: Vec<Window>,
    pub batch_limit: usize,
    pub call_timeout: Duration,
}

impl From<&Config> for CycleSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            windows: cfg.windows.clone(),
            batch_limit: cfg.batch_limit,
            call_timeout: cfg.store_timeout(),
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub bundles_processed: usize,
    pub signals_generated: usize,
    pub duplicates_suppressed: usize,
    pub errors: usize,
    pub by_type: BTreeMap<SignalType, usize>,
}

#[derive(Debug)]
enum Outcome {
    Quiet,
    Suppressed(SignalType),
    Emitted(Signal),
    // insert timed out but the row is in the store
    Landed(SignalType),
}

pub struct CycleOrchestrator {
    bundles: Arc<dyn BundleStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    gate: DedupGate,
    emitter: SignalEmitter,
    detector: TransitionDetector,
    // Held for the whole cycle; doubles as the no-overlap guard.
    cache: tokio::sync::Mutex<CorridorStateCache>,
    settings: CycleSettings,
    clock: Clock,
}

impl CycleOrchestrator {
    pub fn new(
        bundles: Arc<dyn BundleStore>,
        signals: Arc<dyn SignalStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        cache: CorridorStateCache,
        settings: CycleSettings,
    ) -> Self {
        Self {
            bundles,
            checkpoints,
            gate: DedupGate::new(Arc::clone(&signals)),
            emitter: SignalEmitter::new(signals),
            detector: TransitionDetector::new(),
            cache: tokio::sync::Mutex::new(cache),
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Wire all collaborators to one SQLite store
    pub fn sqlite(store: SqliteStore, settings: CycleSettings) -> Self {
        let store = Arc::new(store);
        Self::new(
            store.clone(),
            store.clone(),
            store,
            CorridorStateCache::new(),
            settings,
        )
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn cached_corridors(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout {
                operation,
                secs: self.settings.call_timeout.as_secs(),
            }),
        }
    }

    /// Run one full cycle. Returns `CycleInProgress` instead of overlapping a
    /// cycle that is still running.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let mut cache = self.cache.try_lock().map_err(|_| Error::CycleInProgress)?;
        let started_at = (self.clock)();
        let limit = self.settings.batch_limit;

        let mut summary = CycleSummary::default();
        let mut advances = Vec::with_capacity(self.settings.windows.len());

        for &window in &self.settings.windows {
            let key = job_key(window);
            let since = self
                .bounded("checkpoint read", self.checkpoints.get_last_processed_at(&key))
                .await?
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            let batch = self
                .bounded(
                    "bundle fetch",
                    self.bundles.find_updated_since(window, since, limit),
                )
                .await?;

            debug!("Window {}: {} bundles since {}", window, batch.len(), since);

            let mut window_signals = 0usize;
            for bundle in &batch {
                summary.bundles_processed += 1;
                match self.process_bundle(&mut cache, bundle).await {
                    Ok(Outcome::Quiet) => {}
                    Ok(Outcome::Suppressed(signal_type)) => {
                        debug!(
                            "Suppressed duplicate {} for {}",
                            signal_type,
                            bundle.corridor_key()
                        );
                        summary.duplicates_suppressed += 1;
                    }
                    Ok(Outcome::Emitted(Signal { signal_type, .. }))
                    | Ok(Outcome::Landed(signal_type)) => {
                        summary.signals_generated += 1;
                        *summary.by_type.entry(signal_type).or_insert(0) += 1;
                        window_signals += 1;
                    }
                    Err(e) => {
                        error!("Processing {} failed: {:?}", bundle.corridor_key(), e);
                        summary.errors += 1;
                    }
                }
            }

            // A full batch may have more behind it; resume from the last one seen.
            let advance_to = match batch.last() {
                Some(last) if batch.len() >= limit => last.updated_at,
                _ => started_at,
            };
            let metadata = serde_json::json!({
                "processed": batch.len(),
                "signals": window_signals,
                "batch_full": batch.len() >= limit,
            });
            advances.push((key, advance_to, metadata));
        }

        for (key, at, metadata) in advances {
            self.bounded(
                "checkpoint write",
                self.checkpoints.set_last_processed_at(&key, at, metadata),
            )
            .await
            .map_err(|e| Error::Checkpoint {
                job_key: key.clone(),
                source: Box::new(e),
            })?;
        }

        info!(
            "Cycle done: {} bundles, {} signals, {} suppressed, {} errors {:?}",
            summary.bundles_processed,
            summary.signals_generated,
            summary.duplicates_suppressed,
            summary.errors,
            summary.by_type
        );
        Ok(summary)
    }

    async fn process_bundle(
        &self,
        cache: &mut CorridorStateCache,
        bundle: &Bundle,
    ) -> Result<Outcome> {
        let now = (self.clock)();

        // write-through before any I/O so the cache always holds the latest state
        let prev = cache.observe(bundle, now);

        let Some(signal_type) = self.detector.detect(prev.as_ref(), bundle) else {
            return Ok(Outcome::Quiet);
        };

        let entity_id = bundle.entity_id();
        let duplicate = self
            .bounded(
                "dedup check",
                self.gate
                    .is_duplicate(&entity_id, signal_type, bundle.window, now),
            )
            .await?;
        if duplicate {
            return Ok(Outcome::Suppressed(signal_type));
        }

        let inserted = self
            .bounded(
                "signal insert",
                self.emitter.emit(bundle, prev.as_ref(), signal_type, now),
            )
            .await;

        match inserted {
            Ok(signal) => Ok(Outcome::Emitted(signal)),
            // A timed out insert keeps running on the blocking pool and may
            // still commit; only count it failed if the row never shows up.
            Err(e @ Error::Timeout { .. }) => {
                let landed = self
                    .bounded(
                        "insert recheck",
                        self.gate
                            .is_duplicate(&entity_id, signal_type, bundle.window, now),
                    )
                    .await
                    .unwrap_or(false);
                if landed {
                    warn!(
                        "Insert of {} for {} timed out but was stored",
                        signal_type,
                        bundle.corridor_key()
                    );
                    Ok(Outcome::Landed(signal_type))
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Scheduler loop: every tick optionally refreshes bundles, then runs one
/// detection cycle. Failures are logged and retried on the next tick.
pub async fn run(cfg: Config, conn: Arc<Mutex<Connection>>) -> Result<()> {
    let orchestrator = CycleOrchestrator::sqlite(
        SqliteStore::new(Arc::clone(&conn)),
        CycleSettings::from(&cfg),
    );

    info!(
        "Orchestrator started: windows {:?}, every {}s, batch {}",
        cfg.windows, cfg.cycle_interval_secs, cfg.batch_limit
    );

    let mut timer = interval(cfg.cycle_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        if cfg.refresh_enabled {
            let conn = Arc::clone(&conn);
            let windows = cfg.windows.clone();
            let refreshed = task::spawn_blocking(move || {
                let mut db = conn.lock().map_err(|_| Error::LockPoisoned)?;
                refresh::refresh_all(&mut db, &windows, Utc::now())
            })
            .await;

            match refreshed {
                Ok(Ok(n)) => debug!("Refresh touched {} bundles", n),
                Ok(Err(e)) => warn!("Bundle refresh failed: {:?}", e),
                Err(e) => error!("Bundle refresh task panicked: {:?}", e),
            }
        }

        match orchestrator.run_cycle().await {
            Ok(summary) => debug!("Cycle summary: {}", serde_json::to_string(&summary)?),
            Err(Error::CycleInProgress) => warn!("Previous cycle still running, skipping tick"),
            Err(e) => error!("Cycle failed, checkpoint kept: {:?}", e),
        }
    }
}
