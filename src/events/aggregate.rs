//! Per-minute OHLCV aggregate events.
//!
//! Parses the upstream per-minute schema
//! (`sym, o, h, l, c, v, av, op, vw, a, z, s, e, otc`; `s`/`e` in
//! milliseconds) and computes the derived range/change metrics at
//! construction.

use serde_json::{json, Map, Value};

use super::validation::{opt_f64, req_f64, req_str};
use super::{Direction, Event, EventPayload, ValidationError};
use crate::market::session::{session_at, MarketSession};

#[derive(Debug, Clone, Default)]
pub struct AggregateData {
    // Minute OHLCV
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub minute_volume: f64,
    pub minute_vwap: Option<f64>,

    // Daily context
    pub daily_open: Option<f64>,
    pub accumulated_volume: Option<f64>,
    pub daily_vwap: Option<f64>,

    pub average_trade_size: Option<f64>,
    /// Window bounds in epoch seconds.
    pub start: f64,
    pub end: f64,
    pub is_otc: bool,
    pub session: MarketSession,

    // Derived at construction
    pub range: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub vwap_deviation: Option<f64>,
}

impl AggregateData {
    /// Compute derived fields and validate invariants. Call after filling
    /// the raw fields; construction without this is incomplete.
    pub fn build(mut self) -> Result<Self, ValidationError> {
        self.range = self.high - self.low;
        self.price_change = self.close - self.open;
        self.price_change_pct = if self.open > 0.0 {
            (self.price_change / self.open) * 100.0
        } else {
            0.0
        };
        self.vwap_deviation = self.minute_vwap.map(|vw| {
            if vw > 0.0 {
                ((self.close - vw) / vw) * 100.0
            } else {
                0.0
            }
        });
        self.session = session_at(self.start);
        self.validate()?;
        Ok(self)
    }

    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.minute_volume < 0.0 {
            return Err(ValidationError::new(
                "v",
                format!("invalid minute volume: {}", self.minute_volume),
            ));
        }
        if let Some(av) = self.accumulated_volume {
            if av < 0.0 {
                return Err(ValidationError::new(
                    "av",
                    format!("invalid accumulated volume: {av}"),
                ));
            }
        }
        if self.high < self.open.max(self.close) {
            return Err(ValidationError::new(
                "h",
                format!(
                    "high {} must be >= max(open {}, close {})",
                    self.high, self.open, self.close
                ),
            ));
        }
        if self.low > self.open.min(self.close) {
            return Err(ValidationError::new(
                "l",
                format!(
                    "low {} must be <= min(open {}, close {})",
                    self.low, self.open, self.close
                ),
            ));
        }
        if self.start >= self.end {
            return Err(ValidationError::new(
                "s",
                format!("start {} must be < end {}", self.start, self.end),
            ));
        }
        Ok(())
    }

    /// Parse an upstream per-minute record into a full event. Fail-fast
    /// on any missing required field.
    pub fn from_feed(raw: &Value) -> Result<Event, ValidationError> {
        let ticker = req_str(raw, "sym")?;
        let open = req_f64(raw, "o")?;
        let high = req_f64(raw, "h")?;
        let low = req_f64(raw, "l")?;
        let close = req_f64(raw, "c")?;
        let volume = req_f64(raw, "v")?;
        let start = req_f64(raw, "s")? / 1000.0;
        let end = req_f64(raw, "e")? / 1000.0;

        let data = AggregateData {
            open,
            high,
            low,
            close,
            minute_volume: volume,
            minute_vwap: opt_f64(raw, "vw"),
            daily_open: opt_f64(raw, "op"),
            accumulated_volume: opt_f64(raw, "av"),
            daily_vwap: opt_f64(raw, "a"),
            average_trade_size: opt_f64(raw, "z"),
            start,
            end,
            is_otc: raw.get("otc").and_then(Value::as_bool).unwrap_or(false),
            ..Default::default()
        }
        .build()?;

        let direction = if data.price_change > 0.0 {
            Direction::Up
        } else if data.price_change < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        };
        let percent_change = data.price_change_pct;
        let minute_vwap = data.minute_vwap;

        Ok(Event::new(ticker, close, end, EventPayload::Aggregate(data))?
            .with_direction(direction)
            .with_percent_change(percent_change)
            .with_volume(volume)
            .with_vwap(minute_vwap))
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("open".into(), json!(self.open));
        record.insert("high".into(), json!(self.high));
        record.insert("low".into(), json!(self.low));
        record.insert("close".into(), json!(self.close));
        record.insert("minute_volume".into(), json!(self.minute_volume));
        record.insert("minute_vwap".into(), json!(self.minute_vwap));
        record.insert("daily_open".into(), json!(self.daily_open));
        record.insert("accumulated_volume".into(), json!(self.accumulated_volume));
        record.insert("daily_vwap".into(), json!(self.daily_vwap));
        record.insert("average_trade_size".into(), json!(self.average_trade_size));
        record.insert("start".into(), json!(self.start));
        record.insert("end".into(), json!(self.end));
        record.insert("is_otc".into(), json!(self.is_otc));
        record.insert("session".into(), json!(self.session.as_str()));
        record.insert("range".into(), json!(self.range));
        record.insert("price_change".into(), json!(self.price_change));
        record.insert("price_change_pct".into(), json!(self.price_change_pct));
        record.insert("vwap_deviation".into(), json!(self.vwap_deviation));
    }
}
