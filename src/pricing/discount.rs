use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::directory::UpstreamError;
use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountKind {
    /// Percentage of the surge-adjusted rate.
    Percent(f64),
    /// Flat amount off the hourly rate.
    Fixed(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountCode {
    pub code: String,
    pub kind: DiscountKind,
    #[serde(default)]
    pub max_discount: Option<f64>,
    #[serde(default)]
    pub valid_from: Option<Ms>,
    #[serde(default)]
    pub valid_until: Option<Ms>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DiscountCode {
    /// `Err(reason)` when the code cannot be used at `now`.
    pub fn check(&self, now: Ms) -> Result<(), &'static str> {
        if !self.active {
            return Err("discount code is no longer active");
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err("discount code is not yet valid");
        }
        if self.valid_until.is_some_and(|until| now >= until) {
            return Err("discount code has expired");
        }
        Ok(())
    }

    /// Discount against `surge_rate`, capped by `max_discount`. Never negative.
    pub fn amount(&self, surge_rate: f64) -> f64 {
        let raw = match self.kind {
            DiscountKind::Percent(pct) => surge_rate * pct / 100.0,
            DiscountKind::Fixed(amount) => amount,
        };
        let capped = match self.max_discount {
            Some(cap) => raw.min(cap),
            None => raw,
        };
        capped.max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

/// External registry of discount codes.
#[async_trait]
pub trait DiscountRegistry: Send + Sync {
    async fn resolve(&self, code: &str) -> Result<Option<DiscountCode>, UpstreamError>;
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Registry held in memory; codes are case-insensitive.
pub struct InMemoryDiscountRegistry {
    codes: DashMap<String, DiscountCode>,
}

impl Default for InMemoryDiscountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDiscountRegistry {
    pub fn new() -> Self {
        Self {
            codes: DashMap::new(),
        }
    }

    pub fn with_codes(codes: impl IntoIterator<Item = DiscountCode>) -> Self {
        let reg = Self::new();
        for code in codes {
            reg.insert(code);
        }
        reg
    }

    /// Load a JSON array of discount codes.
    pub fn load_json(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let codes: Vec<DiscountCode> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::with_codes(codes))
    }

    pub fn insert(&self, code: DiscountCode) {
        self.codes.insert(normalize(&code.code), code);
    }
}

#[async_trait]
impl DiscountRegistry for InMemoryDiscountRegistry {
    async fn resolve(&self, code: &str) -> Result<Option<DiscountCode>, UpstreamError> {
        Ok(self.codes.get(&normalize(code)).map(|e| e.value().clone()))
    }
}
