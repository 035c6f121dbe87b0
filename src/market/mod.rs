//! Per-symbol market state and trading-session classification.

pub mod session;
pub mod state;

pub use session::{is_market_open_period, session_at, MarketSession};
pub use state::{StateRegistry, TickerState};
