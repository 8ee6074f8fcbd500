use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSchedule = Arc<RwLock<SpotSchedule>>;

/// Reservation table plus the per-spot conflict index derived from it.
///
/// The table is only mutated through [`ReservationStore::apply_event`], so
/// live writes and log replay go through the same code.
pub struct ReservationStore {
    reservations: DashMap<Ulid, Reservation>,
    schedules: DashMap<SpotId, SharedSchedule>,
    next_seq: AtomicU64,
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            schedules: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Schedule for a spot, created empty on first use.
    pub fn schedule(&self, spot_id: &str) -> SharedSchedule {
        if let Some(existing) = self.schedules.get(spot_id) {
            return existing.value().clone();
        }
        self.schedules
            .entry(spot_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SpotSchedule::new(spot_id.to_string()))))
            .value()
            .clone()
    }

    /// Schedule for a spot that has been used before, without creating one.
    pub fn existing_schedule(&self, spot_id: &str) -> Option<SharedSchedule> {
        self.schedules.get(spot_id).map(|e| e.value().clone())
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    /// Clone every reservation matching `pred`. Never hold map refs across awaits.
    pub fn collect(&self, pred: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Apply a committed event. `schedule` must be the (locked) schedule of the
    /// reservation's spot whenever the event touches a spot.
    pub fn apply_event(&self, event: &Event, schedule: Option<&mut SpotSchedule>) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.next_seq.fetch_max(reservation.seq + 1, Ordering::SeqCst);
                if reservation.status.is_blocking()
                    && let Some(sched) = schedule
                {
                    sched.remove_interval(reservation.id);
                    sched.insert_interval(Interval {
                        reservation_id: reservation.id,
                        span: reservation.span,
                    });
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationPromoted {
                id,
                spot_id,
                spot_type,
                quote,
                at,
            } => {
                let Some(mut r) = self.reservations.get_mut(id) else {
                    return;
                };
                r.spot_id = Some(spot_id.clone());
                r.spot_type = *spot_type;
                r.status = ReservationStatus::Confirmed;
                r.quote = Some(quote.clone());
                r.waitlist_position = None;
                r.updated_at = *at;
                if let Some(sched) = schedule {
                    sched.insert_interval(Interval {
                        reservation_id: *id,
                        span: r.span,
                    });
                }
            }
            Event::StatusChanged {
                id,
                to,
                at,
                reason,
                refund,
                ..
            } => {
                let Some(mut r) = self.reservations.get_mut(id) else {
                    return;
                };
                r.status = *to;
                r.updated_at = *at;
                match to {
                    ReservationStatus::Active => r.checked_in_at = Some(*at),
                    ReservationStatus::Cancelled => r.cancellation_reason = reason.clone(),
                    _ => {}
                }
                if refund.is_some() {
                    r.refund_amount = *refund;
                }
                if *to != ReservationStatus::Waitlisted {
                    r.waitlist_position = None;
                }
                if !to.is_blocking()
                    && let Some(sched) = schedule
                {
                    sched.remove_interval(*id);
                }
            }
        }
    }

    /// Apply an event read back from the log. Replay owns every lock, so
    /// `try_write` always succeeds; never block here since this may run
    /// inside an async context.
    pub fn replay_event(&self, event: &Event) {
        let spot_id = match event {
            Event::ReservationCreated { reservation } => reservation.spot_id.clone(),
            Event::ReservationPromoted { spot_id, .. } => Some(spot_id.clone()),
            Event::StatusChanged { id, .. } => self.reservations.get(id).and_then(|r| r.spot_id.clone()),
        };
        match spot_id {
            Some(spot_id) => {
                let sched = self.schedule(&spot_id);
                let mut guard = sched.try_write().expect("replay: uncontended write");
                self.apply_event(event, Some(&mut guard));
            }
            None => self.apply_event(event, None),
        }
    }

    /// One creation record per reservation, in creation order.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut all = self.collect(|_| true);
        all.sort_by_key(|r| r.seq);
        all.into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect()
    }
}
