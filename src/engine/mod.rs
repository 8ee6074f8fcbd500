mod allocation;
mod availability;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod store;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use conflict::validate_request;
pub use error::{EngineError, ValidationError};
pub use lifecycle::SweepReport;
pub use store::{ReservationStore, SharedSchedule};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::directory::ResourceDirectory;
use crate::model::*;
use crate::notify::{LifecycleEvent, NotifyHub};
use crate::pricing::PricingEngine;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, then one
/// flush + fsync for the batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Compaction must see every append that was queued before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Collaborators the engine is wired to at start-up.
pub struct EngineDeps {
    pub directory: Arc<dyn ResourceDirectory>,
    pub pricing: Arc<PricingEngine>,
    pub clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
}

/// Reservation allocation and lifecycle engine.
///
/// Locking: each spot's schedule has its own write lock, held across the
/// conflict check and the commit. Waitlist insertion and promotion hold
/// `waitlist_lock`. When both are needed the waitlist lock is taken first.
pub struct Engine {
    pub(super) store: ReservationStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn ResourceDirectory>,
    pub(super) pricing: Arc<PricingEngine>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    pub(super) waitlist_lock: Mutex<()>,
    /// Commits hold it shared; compaction holds it exclusively so the
    /// snapshot cannot miss an event that is already in the log.
    commit_gate: RwLock<()>,
}

/// Locks held while a reservation's status is changed.
pub(super) struct ReservationGuard<'a> {
    pub(super) reservation: Reservation,
    pub(super) schedule: Option<OwnedRwLockWriteGuard<SpotSchedule>>,
    _waitlist: Option<MutexGuard<'a, ()>>,
}

impl Engine {
    /// Replay the log at `wal_path`, dropping any torn tail, and start the
    /// group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, deps: EngineDeps, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = ReservationStore::new();
        for event in &events {
            store.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            reservations = store.len(),
            "replayed reservation log"
        );

        Ok(Self {
            store,
            wal_tx,
            notify: deps.notify,
            directory: deps.directory,
            pricing: deps.pricing,
            clock: deps.clock,
            config,
            waitlist_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify. The caller holds whatever locks the event needs.
    pub(super) async fn persist_and_apply(
        &self,
        event: &Event,
        schedule: Option<&mut SpotSchedule>,
    ) -> Result<Reservation, EngineError> {
        let gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.store.apply_event(event, schedule);
        drop(gate);
        let id = event.reservation_id();
        let reservation = self.store.get(&id).ok_or_else(|| EngineError::not_found(id))?;
        self.notify.send(&LifecycleEvent::from_event(event, &reservation));
        Ok(reservation)
    }

    /// Lock whatever guards a reservation's state and re-read it under the lock.
    ///
    /// Waitlisted reservations are guarded by the waitlist lock (promotion may
    /// assign a spot concurrently); placed ones by their spot's schedule lock.
    pub(super) async fn lock_reservation(&self, id: Ulid) -> Result<ReservationGuard<'_>, EngineError> {
        let snapshot = self.store.get(&id).ok_or_else(|| EngineError::not_found(id))?;
        let waitlist = match snapshot.spot_id {
            None => Some(self.waitlist_lock.lock().await),
            Some(_) => None,
        };
        // A spot id never changes once assigned, so re-reading after the
        // waitlist lock is enough to pick the right schedule.
        let spot_id = self
            .store
            .get(&id)
            .ok_or_else(|| EngineError::not_found(id))?
            .spot_id;
        let schedule = match spot_id {
            Some(spot_id) => Some(self.store.schedule(&spot_id).write_owned().await),
            None => None,
        };
        let reservation = self.store.get(&id).ok_or_else(|| EngineError::not_found(id))?;
        Ok(ReservationGuard {
            reservation,
            schedule,
            _waitlist: waitlist,
        })
    }

    /// Compact the WAL down to one snapshot record per reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.store.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
