//! Raw tick (trade print) events entering the queue at top priority.

use serde_json::{json, Map, Value};

use super::ValidationError;

#[derive(Debug, Clone, Default)]
pub struct TickData {
    pub size: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl TickData {
    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.size < 0.0 {
            return Err(ValidationError::new(
                "size",
                format!("invalid trade size: {}", self.size),
            ));
        }
        if let (Some(bid), Some(ask)) = (self.bid, self.ask) {
            if bid > ask {
                return Err(ValidationError::new(
                    "bid",
                    format!("bid {bid} above ask {ask}"),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("size".into(), json!(self.size));
        record.insert("bid".into(), json!(self.bid));
        record.insert("ask".into(), json!(self.ask));
    }
}
