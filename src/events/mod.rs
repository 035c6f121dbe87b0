//! Typed market event model.
//!
//! Every event carries a common header (ticker, price, time, event id,
//! direction) plus one kind-specific payload. Events are validated at
//! construction and immutable afterwards; downstream consumers only ever
//! read them or convert them to transport records.

pub mod aggregate;
pub mod control;
pub mod fmv;
pub mod highlow;
pub mod surge;
pub mod tick;
pub mod trend;
mod validation;


pub use aggregate::AggregateData;
pub use control::{ControlCommand, ControlData};
pub use fmv::{FmvData, Valuation};
pub use highlow::{HighLowData, HighLowKind};
pub use surge::{SurgeData, SurgeTrigger};
pub use tick::TickData;
pub use trend::{TrendData, VwapPosition};
pub use validation::ValidationError;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float, the timebase for all events.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// Ordinal strength shared by trend and surge events. The derived `Ord`
/// is load-bearing: filters compare event strength against the filter
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Weak => "weak",
            Strength::Moderate => "moderate",
            Strength::Strong => "strong",
        }
    }
}

/// Coarse event kind used for priorities, batch filters, and per-kind
/// counters. The transport-level label can be finer (see
/// [`Event::kind_label`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Control,
    Tick,
    HighLow,
    Trend,
    Surge,
    Aggregate,
    Fmv,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Control => "control",
            EventKind::Tick => "tick",
            EventKind::HighLow => "highlow",
            EventKind::Trend => "trend",
            EventKind::Surge => "surge",
            EventKind::Aggregate => "aggregate",
            EventKind::Fmv => "fmv",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    HighLow(HighLowData),
    Trend(TrendData),
    Surge(SurgeData),
    Aggregate(AggregateData),
    Fmv(FmvData),
    Tick(TickData),
    Control(ControlData),
}

impl EventPayload {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EventPayload::HighLow(d) => d.validate(),
            EventPayload::Trend(d) => d.validate(),
            EventPayload::Surge(d) => d.validate(),
            EventPayload::Aggregate(d) => d.validate(),
            EventPayload::Fmv(d) => d.validate(),
            EventPayload::Tick(d) => d.validate(),
            EventPayload::Control(_) => Ok(()),
        }
    }

    fn extend_transport(&self, record: &mut Map<String, Value>) {
        match self {
            EventPayload::HighLow(d) => d.extend_transport(record),
            EventPayload::Trend(d) => d.extend_transport(record),
            EventPayload::Surge(d) => d.extend_transport(record),
            EventPayload::Aggregate(d) => d.extend_transport(record),
            EventPayload::Fmv(d) => d.extend_transport(record),
            EventPayload::Tick(d) => d.extend_transport(record),
            EventPayload::Control(d) => d.extend_transport(record),
        }
    }
}

/// One market event. Construct with [`Event::new`]; invalid events are
/// rejected there and never enter the pipeline.
#[derive(Debug, Clone)]
pub struct Event {
    pub ticker: String,
    pub price: f64,
    pub time: f64,
    pub event_id: String,
    pub direction: Direction,
    pub percent_change: f64,
    pub volume: Option<f64>,
    pub vwap: Option<f64>,
    pub rel_volume: f64,
    pub label: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        ticker: impl Into<String>,
        price: f64,
        time: f64,
        payload: EventPayload,
    ) -> Result<Self, ValidationError> {
        let ticker = ticker.into();
        if ticker.is_empty() {
            return Err(ValidationError::new("ticker", "empty ticker"));
        }
        let is_control = matches!(payload, EventPayload::Control(_));
        if !is_control && price <= 0.0 {
            return Err(ValidationError::new(
                "price",
                format!("invalid price: {price}"),
            ));
        }
        payload.validate()?;

        Ok(Self {
            event_id: make_event_id(time),
            ticker,
            price,
            time,
            direction: Direction::Flat,
            percent_change: 0.0,
            volume: None,
            vwap: None,
            rel_volume: 0.0,
            label: String::new(),
            payload,
        })
    }

    /// Control events bypass header validation: ticker and price are
    /// sentinel values.
    pub fn control(command: ControlCommand) -> Self {
        Self {
            event_id: make_event_id(epoch_now()),
            ticker: "CONTROL".to_string(),
            price: 0.0,
            time: epoch_now(),
            direction: Direction::Flat,
            percent_change: 0.0,
            volume: None,
            vwap: None,
            rel_volume: 0.0,
            label: String::new(),
            payload: EventPayload::Control(ControlData { command }),
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_percent_change(mut self, percent_change: f64) -> Self {
        self.percent_change = percent_change;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_vwap(mut self, vwap: Option<f64>) -> Self {
        self.vwap = vwap;
        self
    }

    pub fn with_rel_volume(mut self, rel_volume: f64) -> Self {
        self.rel_volume = rel_volume;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::HighLow(_) => EventKind::HighLow,
            EventPayload::Trend(_) => EventKind::Trend,
            EventPayload::Surge(_) => EventKind::Surge,
            EventPayload::Aggregate(_) => EventKind::Aggregate,
            EventPayload::Fmv(_) => EventKind::Fmv,
            EventPayload::Tick(_) => EventKind::Tick,
            EventPayload::Control(_) => EventKind::Control,
        }
    }

    /// Transport-level kind label; finer-grained than [`Event::kind`]
    /// for high/low events.
    pub fn kind_label(&self) -> &'static str {
        match &self.payload {
            EventPayload::HighLow(d) => d.kind.as_str(),
            EventPayload::Trend(_) => "trend",
            EventPayload::Surge(_) => "surge",
            EventPayload::Aggregate(_) => "aggregate_minute",
            EventPayload::Fmv(_) => "fair_market_value",
            EventPayload::Tick(_) => "tick",
            EventPayload::Control(_) => "control",
        }
    }

    /// Display-bound kinds are re-queued to the frontend channel after
    /// dispatch.
    pub fn is_display(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::HighLow | EventKind::Trend | EventKind::Surge
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(self.payload, EventPayload::Control(_))
    }

    pub fn age_seconds(&self, now: f64) -> f64 {
        (now - self.time).max(0.0)
    }

    /// Flat transport record for frontend fan-out. Base fields first,
    /// then kind-specific fields with stable names.
    pub fn to_transport(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("ticker".into(), json!(self.ticker));
        record.insert("kind".into(), json!(self.kind_label()));
        record.insert("price".into(), json!(self.price));
        record.insert("time".into(), json!(self.time));
        record.insert("time_hms".into(), json!(format_hms(self.time)));
        record.insert("event_id".into(), json!(self.event_id));
        record.insert("direction".into(), json!(self.direction.as_str()));
        record.insert("percent_change".into(), json!(self.percent_change));
        record.insert("volume".into(), json!(self.volume));
        record.insert("vwap".into(), json!(self.vwap));
        record.insert("rel_volume".into(), json!(self.rel_volume));
        record.insert("label".into(), json!(self.label));
        self.payload.extend_transport(&mut record);
        record
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} @ ${:.2} ({})",
            self.kind_label().to_uppercase(),
            self.ticker,
            self.price,
            self.direction.as_str()
        )
    }
}

fn make_event_id(time: f64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{:.6}_{}", time, &suffix[..8])
}

/// Render an epoch-seconds timestamp as `hh:mm:ss` (UTC).
pub fn format_hms(time: f64) -> String {
    let secs = time.floor() as i64;
    let nanos = ((time - secs as f64) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}
