//! Harmonic-pattern decision engine.
//!
//! Higher-timeframe bars feed swing extraction and pattern matching; lower
//! timeframe bars drive trendline tracking, entry confirmation and position
//! exits.

pub mod confirmation;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod harmonic;
pub mod logging;
pub mod notify;
pub mod positions;
pub mod reliability;
pub mod risk;
pub mod sizing;
pub mod state;
pub mod storage;
pub mod swing;
pub mod trendline;
pub mod zones;
