//! Fair-market-value events from the upstream model feed.

use serde_json::{json, Map, Value};

use super::validation::{req_f64, req_str};
use super::{Direction, Event, EventPayload, ValidationError};

/// Valuation class from the signed FMV/market deviation:
/// under 1% is fair, then slight/moderate/significant at 3%/10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valuation {
    Fair,
    SlightUndervalued,
    ModerateUndervalued,
    SignificantUndervalued,
    SlightOvervalued,
    ModerateOvervalued,
    SignificantOvervalued,
}

impl Valuation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Valuation::Fair => "fair",
            Valuation::SlightUndervalued => "slight_undervalued",
            Valuation::ModerateUndervalued => "moderate_undervalued",
            Valuation::SignificantUndervalued => "significant_undervalued",
            Valuation::SlightOvervalued => "slight_overvalued",
            Valuation::ModerateOvervalued => "moderate_overvalued",
            Valuation::SignificantOvervalued => "significant_overvalued",
        }
    }

    /// Classify a signed percentage deviation (positive = FMV above
    /// market, i.e. undervalued).
    pub fn classify(deviation_pct: f64) -> Valuation {
        let magnitude = deviation_pct.abs();
        if magnitude < 1.0 {
            return Valuation::Fair;
        }
        let undervalued = deviation_pct > 0.0;
        match (magnitude, undervalued) {
            (m, true) if m < 3.0 => Valuation::SlightUndervalued,
            (m, true) if m < 10.0 => Valuation::ModerateUndervalued,
            (_, true) => Valuation::SignificantUndervalued,
            (m, false) if m < 3.0 => Valuation::SlightOvervalued,
            (m, false) if m < 10.0 => Valuation::ModerateOvervalued,
            (_, false) => Valuation::SignificantOvervalued,
        }
    }

    pub fn is_undervalued(&self) -> bool {
        matches!(
            self,
            Valuation::SlightUndervalued
                | Valuation::ModerateUndervalued
                | Valuation::SignificantUndervalued
        )
    }

    pub fn is_overvalued(&self) -> bool {
        matches!(
            self,
            Valuation::SlightOvervalued
                | Valuation::ModerateOvervalued
                | Valuation::SignificantOvervalued
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct FmvData {
    pub fmv_price: f64,
    /// Original feed timestamp in nanoseconds.
    pub fmv_timestamp_ns: Option<i64>,
    pub market_price: Option<f64>,

    // Derived when a market price is known
    pub deviation: Option<f64>,
    pub deviation_pct: Option<f64>,
    pub valuation: Option<Valuation>,
    pub is_undervalued: Option<bool>,
    pub is_overvalued: Option<bool>,
}

impl FmvData {
    /// Compute valuation metrics and validate. Deviation is signed:
    /// positive means the model price sits above the market.
    pub fn build(mut self) -> Result<Self, ValidationError> {
        if let Some(market) = self.market_price {
            if market > 0.0 {
                let deviation = self.fmv_price - market;
                let pct = (deviation / market) * 100.0;
                let valuation = Valuation::classify(pct);
                self.deviation = Some(deviation);
                self.deviation_pct = Some(pct);
                self.is_undervalued = Some(valuation.is_undervalued());
                self.is_overvalued = Some(valuation.is_overvalued());
                self.valuation = Some(valuation);
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub(super) fn validate(&self) -> Result<(), ValidationError> {
        if self.fmv_price <= 0.0 {
            return Err(ValidationError::new(
                "fmv",
                format!("invalid FMV price: {}", self.fmv_price),
            ));
        }
        if let Some(market) = self.market_price {
            if market <= 0.0 {
                return Err(ValidationError::new(
                    "market_price",
                    format!("invalid market price: {market}"),
                ));
            }
        }
        if let Some(ts) = self.fmv_timestamp_ns {
            if ts <= 0 {
                return Err(ValidationError::new(
                    "t",
                    format!("invalid FMV timestamp: {ts}"),
                ));
            }
        }
        if self.is_undervalued == Some(true) && self.is_overvalued == Some(true) {
            return Err(ValidationError::new(
                "valuation",
                "cannot be both undervalued and overvalued",
            ));
        }
        Ok(())
    }

    /// Parse an upstream FMV record (`sym`, `fmv`, `t` in nanoseconds).
    /// `market_price` comes from the caller's latest known print, if any.
    pub fn from_feed(raw: &Value, market_price: Option<f64>) -> Result<Event, ValidationError> {
        let ticker = req_str(raw, "sym")?;
        let fmv = req_f64(raw, "fmv")?;
        let timestamp_ns = raw.get("t").and_then(Value::as_i64);
        let time = timestamp_ns
            .map(|t| t as f64 / 1_000_000_000.0)
            .unwrap_or_else(super::epoch_now);

        let data = FmvData {
            fmv_price: fmv,
            fmv_timestamp_ns: timestamp_ns,
            market_price,
            ..Default::default()
        }
        .build()?;

        let direction = match data.deviation_pct {
            Some(pct) if pct > 0.0 => Direction::Up,
            Some(pct) if pct < 0.0 => Direction::Down,
            _ => Direction::Flat,
        };
        let percent_change = data.deviation_pct.unwrap_or(0.0);

        Ok(Event::new(ticker, fmv, time, EventPayload::Fmv(data))?
            .with_direction(direction)
            .with_percent_change(percent_change))
    }

    pub(super) fn extend_transport(&self, record: &mut Map<String, Value>) {
        record.insert("fmv_price".into(), json!(self.fmv_price));
        record.insert("fmv_timestamp_ns".into(), json!(self.fmv_timestamp_ns));
        record.insert("market_price".into(), json!(self.market_price));
        record.insert("deviation".into(), json!(self.deviation));
        record.insert("deviation_pct".into(), json!(self.deviation_pct));
        record.insert(
            "valuation".into(),
            json!(self.valuation.map(|v| v.as_str())),
        );
        record.insert("is_undervalued".into(), json!(self.is_undervalued));
        record.insert("is_overvalued".into(), json!(self.is_overvalued));
    }
}
