//! Fair-market-value feed processing.

use serde_json::Value;

use crate::events::{Event, FmvData, ValidationError};

#[derive(Debug, Clone, Default)]
pub struct FmvDetector;

impl FmvDetector {
    /// Parse one raw FMV record. `market_price` is the caller's latest
    /// known print for the symbol, used for the deviation metrics.
    pub fn process(
        &self,
        raw: &Value,
        market_price: Option<f64>,
    ) -> Result<Event, ValidationError> {
        FmvData::from_feed(raw, market_price)
    }
}
