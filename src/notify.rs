use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Ms, Reservation, ReservationStatus, SpotId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Created,
    Waitlisted,
    Promoted,
    Cancelled,
    CheckedIn,
    Completed,
    NoShow,
    Expired,
    Dismissed,
}

/// What the notification collaborator receives. Delivery never affects state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub reservation_id: Ulid,
    pub requester_id: String,
    pub spot_id: Option<SpotId>,
    pub at: Ms,
}

impl LifecycleEvent {
    /// Describe a committed log event, given the reservation as it is after the event.
    pub fn from_event(event: &Event, reservation: &Reservation) -> Self {
        let (kind, at) = match event {
            Event::ReservationCreated { reservation } => {
                let kind = if reservation.status == ReservationStatus::Waitlisted {
                    LifecycleKind::Waitlisted
                } else {
                    LifecycleKind::Created
                };
                (kind, reservation.created_at)
            }
            Event::ReservationPromoted { at, .. } => (LifecycleKind::Promoted, *at),
            Event::StatusChanged { to, at, .. } => {
                let kind = match to {
                    ReservationStatus::Active => LifecycleKind::CheckedIn,
                    ReservationStatus::Completed => LifecycleKind::Completed,
                    ReservationStatus::Cancelled => LifecycleKind::Cancelled,
                    ReservationStatus::NoShow => LifecycleKind::NoShow,
                    ReservationStatus::Expired => LifecycleKind::Expired,
                    ReservationStatus::Dismissed => LifecycleKind::Dismissed,
                    ReservationStatus::Confirmed => LifecycleKind::Promoted,
                    ReservationStatus::Waitlisted => LifecycleKind::Waitlisted,
                };
                (kind, *at)
            }
        };
        Self {
            kind,
            reservation_id: reservation.id,
            requester_id: reservation.requester_id.clone(),
            spot_id: reservation.spot_id.clone(),
            at,
        }
    }
}

/// Broadcast hub: one firehose channel plus a channel per requester.
pub struct NotifyHub {
    all: broadcast::Sender<LifecycleEvent>,
    requesters: DashMap<String, broadcast::Sender<LifecycleEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            requesters: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.all.subscribe()
    }

    /// Subscribe to one requester's events. Creates the channel if needed.
    pub fn subscribe(&self, requester_id: &str) -> broadcast::Receiver<LifecycleEvent> {
        let sender = self
            .requesters
            .entry(requester_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &LifecycleEvent) {
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.requesters.get(&event.requester_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, requester_id: &str) {
        self.requesters.remove(requester_id);
    }
}
