//! US equity trading-session classification (Eastern time).

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSession {
    Premarket,
    Regular,
    Afterhours,
}

impl MarketSession {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketSession::Premarket => "premarket",
            MarketSession::Regular => "regular",
            MarketSession::Afterhours => "afterhours",
        }
    }
}

impl Default for MarketSession {
    fn default() -> Self {
        MarketSession::Regular
    }
}

/// Session for an epoch-seconds timestamp: before 09:30 ET is premarket,
/// 09:30-16:00 regular, after 16:00 afterhours.
pub fn session_at(epoch_secs: f64) -> MarketSession {
    let secs = epoch_secs.floor() as i64;
    let Some(utc) = DateTime::from_timestamp(secs, 0) else {
        return MarketSession::Regular;
    };
    let eastern = utc.with_timezone(&New_York).time();
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    if eastern < open {
        MarketSession::Premarket
    } else if eastern < close {
        MarketSession::Regular
    } else {
        MarketSession::Afterhours
    }
}

/// First 30 minutes after the US open (09:30-10:00 ET), when configured
/// market ETFs are promoted to top priority.
pub fn is_market_open_period(now: DateTime<Tz>) -> bool {
    let time = now.time();
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let end = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
    time >= open && time <= end
}

/// Convenience wrapper over the wall clock.
pub fn is_market_open_period_now() -> bool {
    is_market_open_period(Utc::now().with_timezone(&New_York))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn eastern(h: u32, m: u32) -> DateTime<Tz> {
        New_York
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 6, 12)
                    .unwrap()
                    .and_hms_opt(h, m, 0)
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn market_open_window_bounds() {
        assert!(!is_market_open_period(eastern(9, 29)));
        assert!(is_market_open_period(eastern(9, 30)));
        assert!(is_market_open_period(eastern(9, 59)));
        assert!(is_market_open_period(eastern(10, 0)));
        assert!(!is_market_open_period(eastern(10, 1)));
    }

    #[test]
    fn session_classification() {
        let premarket = eastern(8, 0).timestamp() as f64;
        let regular = eastern(12, 0).timestamp() as f64;
        let after = eastern(17, 0).timestamp() as f64;
        assert_eq!(session_at(premarket), MarketSession::Premarket);
        assert_eq!(session_at(regular), MarketSession::Regular);
        assert_eq!(session_at(after), MarketSession::Afterhours);
    }
}
