use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::{free_windows, Engine, EngineError, ValidationError};

fn same_group(r: &Reservation, spot_type: SpotType, features: &FeatureSet, span: &Span) -> bool {
    r.status == ReservationStatus::Waitlisted
        && r.spot_type == spot_type
        && &r.features == features
        && r.span.overlaps(span)
}

impl Engine {
    pub fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store.get(&id).ok_or_else(|| EngineError::not_found(id))
    }

    /// All reservations of a requester, oldest first.
    pub fn reservations_for_requester(&self, requester_id: &str) -> Vec<Reservation> {
        let mut out = self.store.collect(|r| r.requester_id == requester_id);
        out.sort_by_key(Reservation::queue_key);
        out
    }

    /// Every reservation ever placed on a spot, by start time.
    pub fn reservations_for_spot(&self, spot_id: &str) -> Vec<Reservation> {
        let mut out = self
            .store
            .collect(|r| r.spot_id.as_deref() == Some(spot_id));
        out.sort_by_key(|r| (r.span.start, r.seq));
        out
    }

    /// Waitlisted entries in the same type/feature group overlapping `span`,
    /// optionally only those queued before `before`.
    pub(super) fn queue_ahead(
        &self,
        spot_type: SpotType,
        features: &FeatureSet,
        span: &Span,
        before: Option<(Ms, u64)>,
    ) -> usize {
        self.store
            .collect(|r| {
                same_group(r, spot_type, features, span)
                    && before.is_none_or(|key| r.queue_key() < key)
            })
            .len()
    }

    /// Ordered waitlist for a group, with live 1-indexed positions.
    pub fn waitlist(&self, spot_type: SpotType, features: &FeatureSet, span: Span) -> Vec<WaitlistEntry> {
        let mut waiting = self
            .store
            .collect(|r| same_group(r, spot_type, features, &span));
        waiting.sort_by_key(Reservation::queue_key);
        waiting
            .into_iter()
            .enumerate()
            .map(|(i, r)| WaitlistEntry {
                reservation_id: r.id,
                requester_id: r.requester_id,
                spot_type: r.spot_type,
                features: r.features,
                span: r.span,
                created_at: r.created_at,
                position: i as u32 + 1,
            })
            .collect()
    }

    /// Current rank of a waitlisted reservation; `None` once it left the waitlist.
    pub fn waitlist_position(&self, id: Ulid) -> Result<Option<u32>, EngineError> {
        let r = self.get_reservation(id)?;
        if r.status != ReservationStatus::Waitlisted {
            return Ok(None);
        }
        let ahead = self.queue_ahead(r.spot_type, &r.features, &r.span, Some(r.queue_key()));
        Ok(Some(ahead as u32 + 1))
    }

    /// Free sub-windows of `span` on a spot.
    pub async fn spot_availability(&self, spot_id: &str, span: Span) -> Result<Vec<Span>, EngineError> {
        if span.end <= span.start {
            return Err(ValidationError::EndBeforeStart.into());
        }
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window exceeds 31 days"));
        }
        if self.directory.get_resource(spot_id).await?.is_none() {
            return Err(EngineError::not_found(spot_id));
        }
        match self.store.existing_schedule(spot_id) {
            Some(sched) => Ok(free_windows(&*sched.read().await, &span)),
            None => Ok(vec![span]),
        }
    }
}
