//! Per-user filter configuration and validation.
//!
//! The schema is closed: unknown fields and unknown enum values are
//! rejected at deserialization, so a stored config that validates here is
//! guaranteed evaluable by the predicates in [`apply`].

pub mod apply;

#[cfg(test)]
mod filter_tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{Strength, ValidationError};

pub use apply::{accepts, apply, BundleCounts, DirectionalBuckets, EventBundle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(default)]
    pub highlow: HighLowFilter,
    #[serde(default)]
    pub trends: TrendFilter,
    #[serde(default)]
    pub surge: SurgeFilter,
}

impl FilterConfig {
    /// Parse and validate a config document. Accepts either the full
    /// `{"filters": {...}}` document or the bare filter map.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let body = value.get("filters").unwrap_or(value);
        serde_json::from_value(body.clone())
            .map_err(|e| ValidationError::new("filters", e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HighLowFilter {
    #[serde(default)]
    pub min_count: u32,
    #[serde(default)]
    pub min_volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendFilter {
    pub strength: Strength,
    pub vwap_position: VwapFilter,
    pub time_window: TimeWindow,
    pub trend_age: AgeWindow,
    pub volume_confirmation: VolumeConfirmation,
}

impl Default for TrendFilter {
    fn default() -> Self {
        Self {
            strength: Strength::Moderate,
            vwap_position: VwapFilter::AnyVwapPosition,
            time_window: TimeWindow::Medium,
            trend_age: AgeWindow::All,
            volume_confirmation: VolumeConfirmation::AllTrends,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurgeFilter {
    pub magnitude: Strength,
    pub trigger_type: TriggerFilter,
    pub surge_age: AgeWindow,
    pub price_range: Vec<PriceRange>,
}

impl Default for SurgeFilter {
    fn default() -> Self {
        Self {
            magnitude: Strength::Moderate,
            trigger_type: TriggerFilter::PriceAndVolume,
            surge_age: AgeWindow::All,
            price_range: vec![
                PriceRange::Penny,
                PriceRange::Low,
                PriceRange::Mid,
                PriceRange::High,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VwapFilter {
    UptrendAboveVwap,
    DowntrendBelowVwap,
    AnyVwapPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Short,
    Medium,
    Long,
}

impl TimeWindow {
    /// Maximum trend age admitted by the window, in seconds.
    pub fn max_age_seconds(&self) -> f64 {
        match self {
            TimeWindow::Short => 180.0,
            TimeWindow::Medium => 360.0,
            TimeWindow::Long => 600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeWindow {
    All,
    Fresh,
    Recent,
}

impl AgeWindow {
    /// Age bound in seconds; trends and surges use different scales.
    pub fn admits(&self, age_seconds: f64, fresh_limit: f64, recent_limit: f64) -> bool {
        match self {
            AgeWindow::All => true,
            AgeWindow::Fresh => age_seconds < fresh_limit,
            AgeWindow::Recent => age_seconds < recent_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeConfirmation {
    VolumeConfirmed,
    AllTrends,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerFilter {
    Price,
    Volume,
    PriceAndVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceRange {
    Penny,
    Low,
    Mid,
    High,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        match self {
            PriceRange::Penny => (0.0..1.0).contains(&price),
            PriceRange::Low => (1.0..25.0).contains(&price),
            PriceRange::Mid => (25.0..100.0).contains(&price),
            PriceRange::High => price >= 100.0,
        }
    }
}
