use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{FeatureSet, Spot, SpotId, SpotType};

/// Failure of an external collaborator (directory, rate table, discount registry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub source: &'static str,
    pub message: String,
}

impl UpstreamError {
    pub fn new(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.source, self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Pool over which an occupancy ratio is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccupancyScope {
    All,
    Zone(String),
    Type(SpotType),
}

/// Read-only view of the spot inventory.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Spots of exactly `spot_type` carrying every feature in `features`, sorted by id.
    async fn list_resources(
        &self,
        spot_type: SpotType,
        features: &FeatureSet,
    ) -> Result<Vec<Spot>, UpstreamError>;

    async fn get_resource(&self, id: &str) -> Result<Option<Spot>, UpstreamError>;

    /// Occupied / total for the scope; 0.0 for an empty pool.
    async fn current_occupancy_ratio(&self, scope: &OccupancyScope) -> Result<f64, UpstreamError>;

    async fn zones(&self) -> Result<Vec<String>, UpstreamError>;
}

/// Directory backed by a concurrent map, seeded from code or a JSON file.
pub struct InMemoryDirectory {
    spots: DashMap<SpotId, Spot>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            spots: DashMap::new(),
        }
    }

    pub fn with_spots(spots: impl IntoIterator<Item = Spot>) -> Self {
        let dir = Self::new();
        for spot in spots {
            dir.insert(spot);
        }
        dir
    }

    /// Load a JSON array of spots.
    pub fn load_json(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let spots: Vec<Spot> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::with_spots(spots))
    }

    pub fn insert(&self, spot: Spot) {
        self.spots.insert(spot.id.clone(), spot);
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// Sensor update. Returns false for an unknown spot.
    pub fn set_occupied(&self, id: &str, occupied: bool) -> bool {
        match self.spots.get_mut(id) {
            Some(mut spot) => {
                spot.occupied = occupied;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryDirectory {
    async fn list_resources(
        &self,
        spot_type: SpotType,
        features: &FeatureSet,
    ) -> Result<Vec<Spot>, UpstreamError> {
        let mut found: Vec<Spot> = self
            .spots
            .iter()
            .filter(|e| e.spot_type == spot_type && features.is_subset(&e.features))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_resource(&self, id: &str) -> Result<Option<Spot>, UpstreamError> {
        Ok(self.spots.get(id).map(|e| e.value().clone()))
    }

    async fn current_occupancy_ratio(&self, scope: &OccupancyScope) -> Result<f64, UpstreamError> {
        let (mut total, mut occupied) = (0usize, 0usize);
        for entry in self.spots.iter() {
            let in_scope = match scope {
                OccupancyScope::All => true,
                OccupancyScope::Zone(z) => &entry.zone == z,
                OccupancyScope::Type(t) => entry.spot_type == *t,
            };
            if in_scope {
                total += 1;
                if entry.occupied {
                    occupied += 1;
                }
            }
        }
        if total == 0 {
            return Ok(0.0);
        }
        Ok(occupied as f64 / total as f64)
    }

    async fn zones(&self) -> Result<Vec<String>, UpstreamError> {
        let zones: BTreeSet<String> = self.spots.iter().map(|e| e.zone.clone()).collect();
        Ok(zones.into_iter().collect())
    }
}
