use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError, SweepReport};

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// In-process claim on one sweep kind. Overlapping runs of the same kind
/// skip instead of repeating the work.
#[derive(Default)]
pub struct SweepClaim {
    held: AtomicBool,
}

pub struct ClaimGuard<'a> {
    held: &'a AtomicBool,
}

impl SweepClaim {
    pub fn try_claim(&self) -> Option<ClaimGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClaimGuard { held: &self.held })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Runs the no-show and expiry sweeps against the engine's clock.
pub struct Sweeper {
    engine: Arc<Engine>,
    no_show: SweepClaim,
    expiry: SweepClaim,
}

impl Sweeper {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            no_show: SweepClaim::default(),
            expiry: SweepClaim::default(),
        }
    }

    /// `Ok(None)` when a no-show sweep is already running.
    pub async fn run_no_show(&self) -> Result<Option<SweepReport>, EngineError> {
        let Some(_claim) = self.no_show.try_claim() else {
            debug!("no-show sweep already running, skipping");
            return Ok(None);
        };
        let now = self.engine.now();
        self.engine.sweep_no_shows(now).await.map(Some)
    }

    /// `Ok(None)` when an expiry sweep is already running.
    pub async fn run_expiry(&self) -> Result<Option<SweepReport>, EngineError> {
        let Some(_claim) = self.expiry.try_claim() else {
            debug!("expiry sweep already running, skipping");
            return Ok(None);
        };
        let now = self.engine.now();
        self.engine.sweep_expired(now).await.map(Some)
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Background task: no-show detection every `every`.
pub async fn run_no_show_sweeper(sweeper: Arc<Sweeper>, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        if let Err(e) = sweeper.run_no_show().await {
            warn!("no-show sweep failed: {e:?}");
        }
    }
}

/// Background task: expiry, waitlist dismissal and promotion every `every`.
pub async fn run_expiry_sweeper(sweeper: Arc<Sweeper>, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        if let Err(e) = sweeper.run_expiry().await {
            warn!("expiry sweep failed: {e:?}");
        }
    }
}

/// Background task: compact the log once it has grown by `threshold` records.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = ticker(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted reservation log"),
            Err(e) => error!("compaction failed: {e:?}"),
        }
    }
}
