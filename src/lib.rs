//! Pattern Trader
//!
//! Automated chart-pattern trading for a single symbol: trend
//! classification, head-and-shoulders / double-top / rectangle detection with
//! retest confirmation, risk-gated position sizing and bracket order
//! execution, driven by a cooperative polling loop.

pub mod analysis;
pub mod config;
pub mod execution;
pub mod feeds;
pub mod indicators;
pub mod risk;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use strategy::{PatternStrategy, StopHandle, StrategyState};
pub use types::*;
