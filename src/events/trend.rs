//! Sustained-trend events.

use serde_json::{json, Map, Value};

use super::{Strength, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VwapPosition {
    Above,
    Below,
    At,
}

impl VwapPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            VwapPosition::Above => "above",
            VwapPosition::Below => "below",
            VwapPosition::At => "at",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendData {
    pub strength: Strength,
    pub score: f64,
    pub vwap_position: VwapPosition,
    /// How long the trend has been running, in seconds.
    pub age_seconds: f64,
    pub volume_confirmed: bool,
    pub volume_multiplier: f64,
}

impl TrendData {
    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.age_seconds < 0.0 {
            return Err(ValidationError::new("age_seconds", "negative trend age"));
        }
        if !self.score.is_finite() {
            return Err(ValidationError::new(
                "score",
                format!("non-finite trend score: {}", self.score),
            ));
        }
        Ok(())
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("strength".into(), json!(self.strength.as_str()));
        record.insert("score".into(), json!(self.score));
        record.insert("vwap_position".into(), json!(self.vwap_position.as_str()));
        record.insert("trend_age".into(), json!(self.age_seconds));
        record.insert("volume_confirmed".into(), json!(self.volume_confirmed));
        record.insert("volume_multiplier".into(), json!(self.volume_multiplier));
    }
}
