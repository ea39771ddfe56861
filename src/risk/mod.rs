//! Risk-based position sizing.
//!
//! Quantity is chosen so that a stop placed two volatility units away
//! loses at most `risk_pct` percent of equity.

mod sizer;

pub use sizer::{position_size, RiskSizer, STOP_VOLATILITY_MULTIPLE};
