//! Scoring engine
//!
//! Turns canonical monthly series into comparable DAM scores:
//! the benchmark's excess-return series is derived once per run and every
//! candidate is scored against it.

pub mod benchmark;
pub mod calculator;

pub use benchmark::{monthly_risk_free, BenchmarkReturns, DEFAULT_ANNUAL_RISK_FREE};
pub use calculator::{ScoreCalculator, LOOKBACK_CLOSES, VOLATILITY_WINDOW, WR12_WEIGHTS};
