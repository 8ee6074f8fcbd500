use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability::{CANCELLATIONS_TOTAL, REFUND_AMOUNT, SWEEP_TRANSITIONS_TOTAL};

use super::{Engine, EngineError, ReservationGuard};

/// What one sweep run changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub no_shows: usize,
    pub completed: usize,
    pub expired: usize,
    pub dismissed: usize,
    pub promoted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

impl Engine {
    /// Commit a status change on a locked reservation. The transition is
    /// checked against the status observed under the lock.
    async fn commit_transition(
        &self,
        guard: &mut ReservationGuard<'_>,
        to: ReservationStatus,
        reason: Option<String>,
        refund: Option<f64>,
    ) -> Result<Reservation, EngineError> {
        let from = guard.reservation.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: guard.reservation.id,
                from,
                to,
            });
        }
        let event = Event::StatusChanged {
            id: guard.reservation.id,
            from,
            to,
            at: self.now(),
            reason,
            refund,
        };
        let updated = self
            .persist_and_apply(&event, guard.schedule.as_deref_mut())
            .await?;
        guard.reservation = updated.clone();
        Ok(updated)
    }

    fn authorize(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        let r = self.store.get(&id).ok_or_else(|| EngineError::not_found(id))?;
        if !actor.may_act_for(&r.requester_id) {
            tracing::warn!(reservation_id = %id, ?actor, "unauthorized reservation change");
            return Err(EngineError::Unauthorized(id));
        }
        Ok(r)
    }

    /// Cancel a reservation on behalf of `actor`, refunding by notice period.
    /// A freed spot is offered to the waitlist right away.
    pub async fn cancel(
        &self,
        id: Ulid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<CancelOutcome, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        self.authorize(id, actor)?;

        let mut guard = self.lock_reservation(id).await?;
        let now = self.now();
        let charged = guard.reservation.charged_amount();
        let refund = self
            .config
            .refund
            .refund(charged, guard.reservation.span.start - now);
        let freed_spot = guard.reservation.status.is_blocking();

        let updated = self
            .commit_transition(&mut guard, ReservationStatus::Cancelled, reason, Some(refund))
            .await?;
        drop(guard);

        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        metrics::histogram!(REFUND_AMOUNT).record(refund);
        tracing::info!(
            reservation_id = %id,
            spot_id = updated.spot_id.as_deref().unwrap_or_default(),
            charged,
            refund,
            "reservation cancelled"
        );

        if freed_spot
            && self.config.promote_on_cancel
            && let Err(e) = self.promote_waitlisted(now).await
        {
            tracing::warn!(reservation_id = %id, error = ?e, "promotion after cancellation failed");
        }

        let message = if charged > 0.0 && refund >= charged {
            format!("reservation cancelled, full refund of {refund:.2}")
        } else {
            format!("reservation cancelled, refund of {refund:.2} of {charged:.2}")
        };
        Ok(CancelOutcome {
            reservation_id: id,
            refund_amount: refund,
            message,
        })
    }

    /// CONFIRMED → ACTIVE, from `start - check_in_early` until `end`.
    pub async fn check_in(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        self.authorize(id, actor)?;
        let mut guard = self.lock_reservation(id).await?;
        let r = &guard.reservation;
        if r.status != ReservationStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                id,
                from: r.status,
                to: ReservationStatus::Active,
            });
        }
        let now = self.now();
        let opens = r.span.start - self.config.check_in_early_ms;
        if now < opens || now >= r.span.end {
            return Err(EngineError::CheckInWindow {
                id,
                opens,
                closes: r.span.end,
            });
        }
        self.commit_transition(&mut guard, ReservationStatus::Active, None, None)
            .await
    }

    /// ACTIVE → COMPLETED.
    pub async fn check_out(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        self.authorize(id, actor)?;
        let mut guard = self.lock_reservation(id).await?;
        if guard.reservation.status != ReservationStatus::Active {
            return Err(EngineError::InvalidTransition {
                id,
                from: guard.reservation.status,
                to: ReservationStatus::Completed,
            });
        }
        self.commit_transition(&mut guard, ReservationStatus::Completed, None, None)
            .await
    }

    /// Status-guarded transition for the sweeps: only fires if the
    /// reservation is still in `expect` and `due` still holds under the lock.
    /// Returns false when someone else got there first.
    async fn sweep_transition(
        &self,
        id: Ulid,
        expect: ReservationStatus,
        to: ReservationStatus,
        due: impl Fn(&Reservation) -> bool,
    ) -> Result<bool, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        if guard.reservation.status != expect || !due(&guard.reservation) {
            return Ok(false);
        }
        self.commit_transition(&mut guard, to, None, None).await?;
        metrics::counter!(SWEEP_TRANSITIONS_TOTAL, "to" => to.to_string()).increment(1);
        Ok(true)
    }

    /// Confirmed reservations never checked in, past start + grace → NO_SHOW.
    pub async fn sweep_no_shows(&self, now: Ms) -> Result<SweepReport, EngineError> {
        let grace = self.config.no_show_grace_ms;
        let due = move |r: &Reservation| r.checked_in_at.is_none() && r.span.start + grace < now;

        let mut report = SweepReport::default();
        for r in self
            .store
            .collect(|r| r.status == ReservationStatus::Confirmed && due(r))
        {
            if self
                .sweep_transition(r.id, ReservationStatus::Confirmed, ReservationStatus::NoShow, due)
                .await?
            {
                report.no_shows += 1;
            }
        }
        if report.no_shows > 0 {
            tracing::info!(no_shows = report.no_shows, "no-show sweep");
        }
        Ok(report)
    }

    /// Close out reservations whose window has passed, dismiss waitlist
    /// entries that can no longer be served, then promote.
    pub async fn sweep_expired(&self, now: Ms) -> Result<SweepReport, EngineError> {
        use ReservationStatus::*;

        let ended = move |r: &Reservation| r.span.end <= now;
        let started = move |r: &Reservation| r.span.start <= now;

        let mut report = SweepReport::default();
        let stale = self.store.collect(|r| match r.status {
            Active | Confirmed => ended(r),
            Waitlisted => started(r),
            _ => false,
        });
        for r in stale {
            match r.status {
                Active => {
                    if self.sweep_transition(r.id, Active, Completed, ended).await? {
                        report.completed += 1;
                    }
                }
                Confirmed => {
                    if self.sweep_transition(r.id, Confirmed, Expired, ended).await? {
                        report.expired += 1;
                    }
                }
                Waitlisted => {
                    if self.sweep_transition(r.id, Waitlisted, Dismissed, started).await? {
                        report.dismissed += 1;
                    }
                }
                _ => {}
            }
        }
        report.promoted = self.promote_waitlisted(now).await?;

        if !report.is_empty() {
            tracing::info!(
                completed = report.completed,
                expired = report.expired,
                dismissed = report.dismissed,
                promoted = report.promoted,
                "expiry sweep"
            );
        }
        Ok(report)
    }
}
