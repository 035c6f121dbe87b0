//! New-extreme events: day and session highs/lows.

use serde_json::{json, Map, Value};

use super::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighLowKind {
    DayHigh,
    DayLow,
    SessionHigh,
    SessionLow,
}

impl HighLowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighLowKind::DayHigh => "day_high",
            HighLowKind::DayLow => "day_low",
            HighLowKind::SessionHigh => "session_high",
            HighLowKind::SessionLow => "session_low",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, HighLowKind::DayHigh | HighLowKind::SessionHigh)
    }
}

#[derive(Debug, Clone)]
pub struct HighLowData {
    pub kind: HighLowKind,
    /// Extreme in force before this event.
    pub previous_extreme: f64,
    pub percent_change: f64,
    /// Seconds since the previous extreme was set.
    pub period_seconds: f64,
    /// How many extremes of this kind the ticker has printed today.
    pub count: u32,
}

impl HighLowData {
    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.previous_extreme < 0.0 {
            return Err(ValidationError::new(
                "previous_extreme",
                format!("invalid previous extreme: {}", self.previous_extreme),
            ));
        }
        if self.period_seconds < 0.0 {
            return Err(ValidationError::new(
                "period_seconds",
                "negative period".to_string(),
            ));
        }
        Ok(())
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("previous_extreme".into(), json!(self.previous_extreme));
        record.insert("extreme_percent_change".into(), json!(self.percent_change));
        record.insert("period_seconds".into(), json!(self.period_seconds));
        record.insert("count".into(), json!(self.count));
    }
}
