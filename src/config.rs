//! Ranking run configuration
//!
//! Layered with the `config` crate: an optional file, then `DAM_`-prefixed
//! environment variables (nested keys use `__`, e.g. `DAM_RETRIEVAL__MAX_RETRIES`).

use crate::scoring::{monthly_risk_free, DEFAULT_ANNUAL_RISK_FREE, LOOKBACK_CLOSES};
use crate::types::{RankingError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Large caps ranked when no universe is configured
pub const DEFAULT_UNIVERSE: [&str; 20] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "JPM", "JNJ", "V", "UNH", "NVDA", "HD",
    "PG", "MA", "DIS", "PEP", "KO", "MRK", "PFE", "T",
];

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "DAM_CONFIG";

/// Ranking run configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RankingConfig {
    #[serde(default = "default_benchmark_symbol")]
    pub benchmark_symbol: String,
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    /// Minimum monthly closes a candidate needs
    #[serde(default = "default_window_months")]
    pub window_months: usize,
    /// Tickers reported per sector (1, or 2 to include an alternate)
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_risk_free_rate_annual")]
    pub risk_free_rate_annual: f64,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    /// Defaults to today
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Column holding the close in provider tables
    #[serde(default = "default_price_field")]
    pub price_field: String,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            benchmark_symbol: default_benchmark_symbol(),
            universe: default_universe(),
            window_months: default_window_months(),
            top_k: default_top_k(),
            risk_free_rate_annual: default_risk_free_rate_annual(),
            start_date: default_start_date(),
            end_date: None,
            price_field: default_price_field(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl RankingConfig {
    /// Load from the file named by `DAM_CONFIG` (if set) and the process environment
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load(path.as_deref().map(Path::new), None)
    }

    /// Load from an optional file, overlaid with `DAM_` variables.
    ///
    /// `env` replaces the process environment when given.
    pub fn load(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("universe")
                .source(env),
        );

        let config: RankingConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RankingError::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scoring engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.benchmark_symbol.trim().is_empty() {
            return Err(RankingError::InvalidConfig(
                "benchmark_symbol must not be empty".to_string(),
            ));
        }
        if self.window_months < LOOKBACK_CLOSES {
            return Err(RankingError::InvalidConfig(format!(
                "window_months must be at least {} (got {})",
                LOOKBACK_CLOSES, self.window_months
            )));
        }
        if !(1..=2).contains(&self.top_k) {
            return Err(RankingError::InvalidConfig(format!(
                "top_k must be 1 or 2 (got {})",
                self.top_k
            )));
        }
        if !self.risk_free_rate_annual.is_finite() {
            return Err(RankingError::InvalidConfig(
                "risk_free_rate_annual must be finite".to_string(),
            ));
        }
        if let Some(end) = self.end_date {
            if end <= self.start_date {
                return Err(RankingError::InvalidConfig(format!(
                    "end_date {} must be after start_date {}",
                    end, self.start_date
                )));
            }
        }
        if self.retrieval.max_concurrency == 0 {
            return Err(RankingError::InvalidConfig(
                "retrieval.max_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn monthly_risk_free(&self) -> f64 {
        monthly_risk_free(self.risk_free_rate_annual)
    }

    /// Configured end date, or `today`
    pub fn end_date_or(&self, today: NaiveDate) -> NaiveDate {
        self.end_date.unwrap_or(today)
    }
}

/// Retrieval budget: concurrency, per-call timeout, retries, run deadline
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry budget per ticker, shared by its series and sector lookups
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whole-run deadline; partial results are returned once it passes
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            run_deadline_secs: default_run_deadline_secs(),
        }
    }
}

impl RetrievalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

fn default_benchmark_symbol() -> String { "SPY".to_string() }
fn default_universe() -> Vec<String> { DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect() }
fn default_window_months() -> usize { LOOKBACK_CLOSES }
fn default_top_k() -> usize { 1 }
fn default_risk_free_rate_annual() -> f64 { DEFAULT_ANNUAL_RISK_FREE }
fn default_start_date() -> NaiveDate { NaiveDate::from_ymd_opt(2022, 1, 1).unwrap_or_default() }
fn default_price_field() -> String { "Close".to_string() }
fn default_max_concurrency() -> usize { 4 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_max_retries() -> u32 { 1 }
fn default_run_deadline_secs() -> Option<u64> { Some(120) }
