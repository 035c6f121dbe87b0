//! Price/volume surge events.

use serde_json::{json, Map, Value};

use super::{Strength, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurgeTrigger {
    Price,
    Volume,
    PriceAndVolume,
}

impl SurgeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurgeTrigger::Price => "price",
            SurgeTrigger::Volume => "volume",
            SurgeTrigger::PriceAndVolume => "price_and_volume",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurgeData {
    /// Percentage move that triggered the surge.
    pub magnitude_pct: f64,
    pub score: f64,
    pub strength: Strength,
    pub trigger: SurgeTrigger,
    pub volume_multiplier: f64,
    /// Epoch seconds after which the surge is considered stale.
    pub expiration_time: f64,
    /// Surges seen for this ticker today, this one included.
    pub daily_count: u32,
    pub age_seconds: f64,
}

impl SurgeData {
    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.volume_multiplier < 0.0 {
            return Err(ValidationError::new(
                "volume_multiplier",
                format!("invalid volume multiplier: {}", self.volume_multiplier),
            ));
        }
        if self.age_seconds < 0.0 {
            return Err(ValidationError::new("age_seconds", "negative surge age"));
        }
        Ok(())
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("magnitude".into(), json!(self.magnitude_pct));
        record.insert("score".into(), json!(self.score));
        record.insert("strength".into(), json!(self.strength.as_str()));
        record.insert("trigger_type".into(), json!(self.trigger.as_str()));
        record.insert("volume_multiplier".into(), json!(self.volume_multiplier));
        record.insert("expiration".into(), json!(self.expiration_time));
        record.insert("daily_surge_count".into(), json!(self.daily_count));
        record.insert("surge_age".into(), json!(self.age_seconds));
    }
}
