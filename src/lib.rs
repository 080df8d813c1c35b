pub mod types;
pub mod config;
pub mod sources {
    pub mod memory;
    pub mod yahoo;
}
pub mod normalizers;
pub mod scoring;
pub mod aggregators;

pub use types::*;
pub use crate::config::{RankingConfig, RetrievalConfig};
pub use sources::memory::StaticSource;
pub use sources::yahoo::YahooClient;
pub use normalizers::SeriesNormalizer;
pub use scoring::{BenchmarkReturns, ScoreCalculator};
pub use aggregators::SectorAggregator;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Parameters of one ranking run
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRequest {
    pub benchmark_symbol: String,
    pub universe: Vec<String>,
    pub window_months: usize,
    pub top_k: usize,
    pub risk_free_rate_annual: f64,
}

impl RankingRequest {
    pub fn new(benchmark_symbol: impl Into<String>, universe: Vec<String>) -> Self {
        Self {
            benchmark_symbol: benchmark_symbol.into(),
            universe,
            window_months: scoring::LOOKBACK_CLOSES,
            top_k: 1,
            risk_free_rate_annual: scoring::DEFAULT_ANNUAL_RISK_FREE,
        }
    }

    pub fn with_window_months(mut self, window_months: usize) -> Self {
        self.window_months = window_months;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_risk_free_rate(mut self, annual: f64) -> Self {
        self.risk_free_rate_annual = annual;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.benchmark_symbol.trim().is_empty() {
            return Err(RankingError::InvalidConfig(
                "benchmark symbol must not be empty".to_string(),
            ));
        }
        if self.window_months < scoring::LOOKBACK_CLOSES {
            return Err(RankingError::InvalidConfig(format!(
                "window_months must be at least {} (got {})",
                scoring::LOOKBACK_CLOSES,
                self.window_months
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
                "risk-free rate must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&RankingConfig> for RankingRequest {
    fn from(config: &RankingConfig) -> Self {
        Self {
            benchmark_symbol: config.benchmark_symbol.clone(),
            universe: config.universe.clone(),
            window_months: config.window_months,
            top_k: config.top_k,
            risk_free_rate_annual: config.risk_free_rate_annual,
        }
    }
}

/// What happened to one ticker of the universe
enum CandidateOutcome {
    Scored(ScoreRecord),
    Excluded(usize, Exclusion),
}

/// Drives retrieval, normalization, scoring and sector ranking across a universe
pub struct RankingEngine {
    source: Arc<dyn MarketDataSource>,
    config: RankingConfig,
    normalizer: SeriesNormalizer,
}

impl RankingEngine {
    pub fn new(source: Arc<dyn MarketDataSource>, config: RankingConfig) -> Result<Self> {
        config.validate()?;
        let normalizer = SeriesNormalizer::new(config.price_field.clone());
        Ok(Self {
            source,
            config,
            normalizer,
        })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Run the configured ranking as of today
    pub async fn run(&self) -> Result<RankingReport> {
        let request = RankingRequest::from(&self.config);
        self.compute_report_as_of(&request, Utc::now().date_naive()).await
    }

    /// Per-sector ranking, or `BenchmarkUnavailable` when there is nothing to score against
    pub async fn compute_rankings(&self, request: &RankingRequest) -> Result<RankedResult> {
        Ok(self.compute_report(request).await?.rankings)
    }

    pub async fn compute_report(&self, request: &RankingRequest) -> Result<RankingReport> {
        self.compute_report_as_of(request, Utc::now().date_naive()).await
    }

    /// Full run with `today` closing the data window when no end date is configured.
    ///
    /// Per-ticker failures become exclusions; only an unusable benchmark or an invalid
    /// request fails the run.
    pub async fn compute_report_as_of(
        &self,
        request: &RankingRequest,
        today: NaiveDate,
    ) -> Result<RankingReport> {
        request.validate()?;
        let started = Instant::now();
        // The deadline covers the benchmark fetch as well as the candidates
        let deadline = self
            .config
            .retrieval
            .run_deadline()
            .map(|d| tokio::time::Instant::now() + d);
        let start = self.config.start_date;
        let end = self.config.end_date_or(today);

        info!(
            "Ranking {} tickers against {} ({} to {}, window {}, top {})",
            request.universe.len(),
            request.benchmark_symbol,
            start,
            end,
            request.window_months,
            request.top_k
        );

        let benchmark_load = self.load_benchmark(&request.benchmark_symbol, start, end);
        let benchmark_closes = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, benchmark_load)
                .await
                .map_err(|_| {
                    warn!(
                        "Run deadline reached while loading benchmark {}",
                        request.benchmark_symbol
                    );
                    RankingError::BenchmarkUnavailable {
                        symbol: request.benchmark_symbol.trim().to_uppercase(),
                        reason: "run deadline reached".to_string(),
                    }
                })??,
            None => benchmark_load.await?,
        };
        let benchmark = Arc::new(BenchmarkReturns::compute(
            &benchmark_closes,
            scoring::monthly_risk_free(request.risk_free_rate_annual),
            scoring::LOOKBACK_CLOSES,
        )?);

        let mut exclusions: Vec<(usize, Exclusion)> = Vec::new();
        let mut candidates: Vec<(usize, String)> = Vec::new();
        let mut seen = HashSet::new();

        for (position, ticker) in request.universe.iter().enumerate() {
            let ticker = ticker.trim().to_uppercase();
            if ticker.is_empty() {
                continue;
            }
            if !seen.insert(ticker.clone()) {
                warn!("{} listed more than once; keeping first occurrence", ticker);
                exclusions.push((
                    position,
                    Exclusion {
                        ticker,
                        reason: ExclusionReason::Duplicate,
                    },
                ));
                continue;
            }
            candidates.push((position, ticker));
        }

        let mut outcomes = stream::iter(candidates.iter().map(|(position, ticker)| {
            self.evaluate_candidate(*position, ticker, &benchmark, request.window_months, start, end)
        }))
        .buffer_unordered(self.config.retrieval.max_concurrency);

        let mut scores = Vec::new();
        let mut finished = HashSet::new();
        let mut complete = true;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, outcomes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        complete = false;
                        break;
                    }
                },
                None => outcomes.next().await,
            };

            match next {
                Some(CandidateOutcome::Scored(record)) => {
                    finished.insert(record.position);
                    scores.push(record);
                }
                Some(CandidateOutcome::Excluded(position, exclusion)) => {
                    finished.insert(position);
                    exclusions.push((position, exclusion));
                }
                None => break,
            }
        }
        drop(outcomes);

        if !complete {
            let pending: Vec<_> = candidates
                .iter()
                .filter(|(position, _)| !finished.contains(position))
                .collect();
            warn!(
                "Run deadline reached; {} ticker(s) not scored, returning partial ranking",
                pending.len()
            );
            for (position, ticker) in pending {
                exclusions.push((
                    *position,
                    Exclusion {
                        ticker: ticker.clone(),
                        reason: ExclusionReason::DeadlineExceeded,
                    },
                ));
            }
        }

        // Completion order depends on the worker pool; universe order is the tie-break
        scores.sort_by_key(|s| s.position);
        exclusions.sort_by_key(|(position, _)| *position);

        let rankings = SectorAggregator::new(request.top_k).aggregate(&scores);

        info!(
            "Ranking complete in {:?}: {} scored, {} excluded, {} sector(s)",
            started.elapsed(),
            scores.len(),
            exclusions.len(),
            rankings.len()
        );

        Ok(RankingReport {
            benchmark: request.benchmark_symbol.clone(),
            as_of: benchmark_closes.latest_period(),
            rankings,
            scores,
            exclusions: exclusions.into_iter().map(|(_, e)| e).collect(),
            complete,
        })
    }

    /// Latest benchmark period and whether it is the still-forming current month
    pub async fn benchmark_status(&self, today: NaiveDate) -> Result<BenchmarkStatus> {
        let symbol = &self.config.benchmark_symbol;
        let closes = self
            .load_benchmark(symbol, self.config.start_date, self.config.end_date_or(today))
            .await?;

        let latest_period = closes
            .latest_period()
            .ok_or_else(|| RankingError::BenchmarkUnavailable {
                symbol: symbol.clone(),
                reason: "no closes".to_string(),
            })?;

        Ok(BenchmarkStatus {
            symbol: symbol.clone(),
            latest_period,
            using_current_month: latest_period == Period::from_date(today),
        })
    }

    async fn load_benchmark(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CloseSeries> {
        let symbol = symbol.trim().to_uppercase();
        let unavailable = |e: RankingError| {
            warn!("Benchmark {} unavailable: {}", symbol, e);
            RankingError::BenchmarkUnavailable {
                symbol: symbol.clone(),
                reason: e.to_string(),
            }
        };

        let mut retries = self.config.retrieval.max_retries;
        let raw = self
            .fetch_with_retry(&symbol, "series", &mut retries, || {
                self.source.get_monthly_series(&symbol, start, end)
            })
            .await
            .map_err(unavailable)?;

        self.normalizer.normalize(&raw).map_err(unavailable)
    }

    async fn evaluate_candidate(
        &self,
        position: usize,
        ticker: &str,
        benchmark: &Arc<ExcessReturnSeries>,
        window_months: usize,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CandidateOutcome {
        match self
            .score_candidate(position, ticker, benchmark, window_months, start, end)
            .await
        {
            Ok(record) => {
                debug!("{} ({}) DAM {:?}", record.ticker, record.sector, record.dam);
                CandidateOutcome::Scored(record)
            }
            Err(e) => {
                warn!("Excluding {}: {}", ticker, e);
                CandidateOutcome::Excluded(
                    position,
                    Exclusion {
                        ticker: ticker.to_string(),
                        reason: ExclusionReason::from(&e),
                    },
                )
            }
        }
    }

    async fn score_candidate(
        &self,
        position: usize,
        ticker: &str,
        benchmark: &Arc<ExcessReturnSeries>,
        window_months: usize,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ScoreRecord> {
        // One retry budget per ticker, shared by the series and sector lookups
        let mut retries = self.config.retrieval.max_retries;
        let raw = self
            .fetch_with_retry(ticker, "series", &mut retries, || {
                self.source.get_monthly_series(ticker, start, end)
            })
            .await?;
        let closes = self.normalizer.normalize(&raw)?;

        // Length check first so short series never cost a sector lookup
        if closes.len() < window_months {
            return Err(RankingError::InsufficientData {
                symbol: ticker.to_string(),
                points: closes.len(),
                required: window_months,
            });
        }

        let sector = self
            .fetch_with_retry(ticker, "sector", &mut retries, || {
                self.source.get_sector(ticker)
            })
            .await?;

        let candidate = CandidateRecord::new(
            ticker,
            sector,
            closes,
            Arc::clone(benchmark),
            window_months,
        )?;

        ScoreCalculator::try_score(&candidate, position)
    }

    /// Call the source with a per-call timeout, retrying transient failures while
    /// `retries` lasts. Each retry is taken out of `retries`.
    async fn fetch_with_retry<T, F, Fut>(
        &self,
        symbol: &str,
        what: &str,
        retries: &mut u32,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.retrieval.request_timeout();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => RankingError::RetrievalTimeout {
                    symbol: symbol.to_string(),
                    attempts: attempt,
                },
            };

            if !error.is_transient() || *retries == 0 {
                return Err(error);
            }
            *retries -= 1;

            warn!(
                "{} {} ({}) attempt {} failed, retries left {}: {}",
                symbol,
                what,
                self.source.name(),
                attempt,
                retries,
                error
            );
        }
    }
}
