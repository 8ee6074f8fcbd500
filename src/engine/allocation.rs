use std::collections::HashMap;
use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability::{
    ALLOCATIONS_TOTAL, ALLOCATION_DURATION_SECONDS, WAITLIST_PROMOTIONS_TOTAL,
};
use crate::pricing::{PricingContext, PricingQuote, RateBasis};

use super::conflict::check_no_conflict;
use super::{validate_request, Engine, EngineError};

/// What a spot search is looking for. Shared by fresh allocations and
/// waitlist promotion.
struct Placement<'a> {
    requester_id: &'a str,
    preferred: Option<&'a str>,
    spot_type: SpotType,
    features: &'a FeatureSet,
    span: Span,
    membership: Option<MembershipTier>,
    discount_code: Option<&'a str>,
}

impl<'a> Placement<'a> {
    fn for_request(req: &'a ReservationRequest) -> Self {
        Self {
            requester_id: &req.requester_id,
            preferred: req.spot_id.as_deref(),
            spot_type: req.spot_type,
            features: &req.features,
            span: Span::new(req.start, req.end),
            membership: req.membership,
            discount_code: req.discount_code.as_deref(),
        }
    }

    fn for_waitlisted(r: &'a Reservation) -> Self {
        Self {
            requester_id: &r.requester_id,
            preferred: None,
            spot_type: r.spot_type,
            features: &r.features,
            span: r.span,
            membership: r.membership,
            discount_code: r.discount_code.as_deref(),
        }
    }

    fn pricing_context(&self, spot_type: SpotType) -> PricingContext {
        PricingContext {
            spot_type,
            features: self.features.clone(),
            basis: RateBasis::Hourly,
            start: self.span.start,
            duration_minutes: self.span.duration_minutes(),
            requester_id: Some(self.requester_id.to_string()),
            membership: self.membership,
            discount_code: self.discount_code.map(str::to_string),
        }
    }
}

/// Quotes computed during one search, keyed by the spot type actually assigned.
type QuoteCache = HashMap<SpotType, PricingQuote>;

/// How a walk over the candidate spots ended.
enum Search {
    Placed(Reservation),
    /// A spot looked free but was taken before the commit, and nothing
    /// after it was free either.
    Lost(EngineError),
    Exhausted,
}

impl Engine {
    /// Place a request on a free spot, or waitlist it, or reject it.
    ///
    /// At most one confirmation per spot and overlapping window: the final
    /// conflict check and the commit happen under the spot's write lock.
    pub async fn allocate(&self, req: ReservationRequest) -> Result<AllocationResult, EngineError> {
        let started = Instant::now();
        let result = self.allocate_inner(&req).await;

        let outcome = match &result {
            Ok(r) if r.status == AllocationStatus::Confirmed => "confirmed",
            Ok(_) => "waitlisted",
            Err(e) => e.code(),
        };
        metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(ALLOCATION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            match e {
                EngineError::Upstream(_) | EngineError::WalError(_) => tracing::error!(
                    requester = %req.requester_id,
                    spot_type = %req.spot_type,
                    start = req.start,
                    end = req.end,
                    code = e.code(),
                    detail = e.detail().unwrap_or_default(),
                    "allocation failed"
                ),
                _ => tracing::debug!(requester = %req.requester_id, code = e.code(), "allocation rejected"),
            }
        }
        result
    }

    async fn allocate_inner(&self, req: &ReservationRequest) -> Result<AllocationResult, EngineError> {
        let now = self.now();
        validate_request(req, now)?;

        let placement = Placement::for_request(req);
        let mut quotes = QuoteCache::new();
        let id = Ulid::new();

        let confirm = |spot: &Spot, quote: &PricingQuote| Event::ReservationCreated {
            reservation: self.new_reservation(
                req,
                id,
                Some((spot, quote.clone())),
                now,
                None,
            ),
        };

        match self.place(&placement, &mut quotes, &confirm).await? {
            Search::Placed(r) => return Ok(confirmed_result(&r)),
            Search::Lost(e) if !req.allow_waitlist => return Err(e),
            Search::Exhausted if !req.allow_waitlist => return Err(EngineError::Unavailable),
            _ => {}
        }

        // Second attempt under the waitlist lock: a cancellation between the
        // first search and here would otherwise leave a free spot unclaimed.
        let _waitlist = self.waitlist_lock.lock().await;
        if let Search::Placed(r) = self.place(&placement, &mut quotes, &confirm).await? {
            return Ok(confirmed_result(&r));
        }

        let position = self.queue_ahead(req.spot_type, &req.features, &placement.span, None) as u32 + 1;
        let event = Event::ReservationCreated {
            reservation: self.new_reservation(req, id, None, now, Some(position)),
        };
        let r = self.persist_and_apply(&event, None).await?;
        tracing::info!(
            reservation_id = %r.id,
            requester = %r.requester_id,
            position,
            "reservation waitlisted"
        );
        Ok(AllocationResult {
            status: AllocationStatus::Waitlisted,
            reservation_id: r.id,
            spot_id: None,
            waitlist_position: Some(position),
            quote: None,
            message: format!("no spot available, added to waitlist at position {position}"),
        })
    }

    fn new_reservation(
        &self,
        req: &ReservationRequest,
        id: Ulid,
        placed: Option<(&Spot, PricingQuote)>,
        now: Ms,
        waitlist_position: Option<u32>,
    ) -> Reservation {
        let (spot_id, spot_type, status, quote) = match placed {
            Some((spot, quote)) => (
                Some(spot.id.clone()),
                spot.spot_type,
                ReservationStatus::Confirmed,
                Some(quote),
            ),
            None => (None, req.spot_type, ReservationStatus::Waitlisted, None),
        };
        Reservation {
            id,
            seq: self.store.next_seq(),
            requester_id: req.requester_id.clone(),
            spot_id,
            spot_type,
            features: req.features.clone(),
            span: Span::new(req.start, req.end),
            status,
            vehicle: VehicleInfo {
                license_plate: req.vehicle.license_plate.trim().to_string(),
                ..req.vehicle.clone()
            },
            notes: req.notes.clone(),
            membership: req.membership,
            discount_code: req.discount_code.clone(),
            quote,
            created_at: now,
            updated_at: now,
            checked_in_at: None,
            cancellation_reason: None,
            refund_amount: None,
            waitlist_position,
        }
    }

    /// Candidate spots in search order: the preferred spot if it fits, then
    /// the requested type, then its fallback types, each sorted by id.
    async fn candidates(&self, p: &Placement<'_>) -> Result<Vec<Spot>, EngineError> {
        let mut out = Vec::new();
        if let Some(preferred) = p.preferred
            && let Some(spot) = self.directory.get_resource(preferred).await?
            && spot.matches(p.spot_type, p.features)
        {
            out.push(spot);
        }
        let types = std::iter::once(p.spot_type).chain(p.spot_type.fallbacks().iter().copied());
        for spot_type in types {
            for spot in self.directory.list_resources(spot_type, p.features).await? {
                if Some(spot.id.as_str()) != p.preferred {
                    out.push(spot);
                }
            }
        }
        Ok(out)
    }

    /// Walk the candidates and commit on the first free one. `build` turns
    /// the chosen spot and its quote into the event to persist.
    async fn place<F>(
        &self,
        p: &Placement<'_>,
        quotes: &mut QuoteCache,
        build: &F,
    ) -> Result<Search, EngineError>
    where
        F: Fn(&Spot, &PricingQuote) -> Event,
    {
        let mut lost = None;
        for spot in self.candidates(p).await? {
            // Cheap pre-check under the read lock; the real check is below.
            if self.has_conflict(&spot.id, p.span.start, p.span.end, None).await {
                continue;
            }
            let quote = match quotes.get(&spot.spot_type) {
                Some(q) => q.clone(),
                None => {
                    let q = self.pricing.quote(&p.pricing_context(spot.spot_type)).await?;
                    quotes.insert(spot.spot_type, q.clone());
                    q
                }
            };

            let mut sched = self.store.schedule(&spot.id).write_owned().await;
            if let Err(e) = check_no_conflict(&sched, &p.span, None) {
                tracing::debug!(spot_id = %spot.id, error = %e, "spot taken before commit");
                lost = Some(e);
                continue;
            }
            let event = build(&spot, &quote);
            let r = self.persist_and_apply(&event, Some(&mut *sched)).await?;
            return Ok(Search::Placed(r));
        }
        Ok(lost.map_or(Search::Exhausted, Search::Lost))
    }

    /// Move waitlisted entries onto free spots, earliest-created first.
    /// Quotes are recomputed at promotion time. Returns how many were placed.
    pub async fn promote_waitlisted(&self, now: Ms) -> Result<usize, EngineError> {
        let _waitlist = self.waitlist_lock.lock().await;

        let mut waiting = self.store.collect(|r| {
            r.status == ReservationStatus::Waitlisted && r.span.start > now
        });
        waiting.sort_by_key(Reservation::queue_key);

        let mut promoted = 0;
        for r in &waiting {
            let placement = Placement::for_waitlisted(r);
            let mut quotes = QuoteCache::new();
            let promote = |spot: &Spot, quote: &PricingQuote| Event::ReservationPromoted {
                id: r.id,
                spot_id: spot.id.clone(),
                spot_type: spot.spot_type,
                quote: quote.clone(),
                at: now,
            };
            if let Search::Placed(placed) = self.place(&placement, &mut quotes, &promote).await? {
                promoted += 1;
                metrics::counter!(WAITLIST_PROMOTIONS_TOTAL).increment(1);
                tracing::info!(
                    reservation_id = %placed.id,
                    spot_id = placed.spot_id.as_deref().unwrap_or_default(),
                    "waitlisted reservation promoted"
                );
            }
        }
        Ok(promoted)
    }
}

fn confirmed_result(r: &Reservation) -> AllocationResult {
    let spot_id = r.spot_id.clone().unwrap_or_default();
    tracing::info!(
        reservation_id = %r.id,
        requester = %r.requester_id,
        spot_id = %spot_id,
        "reservation confirmed"
    );
    AllocationResult {
        status: AllocationStatus::Confirmed,
        reservation_id: r.id,
        message: format!("reserved spot {spot_id}"),
        spot_id: Some(spot_id),
        waitlist_position: None,
        quote: r.quote.clone(),
    }
}
