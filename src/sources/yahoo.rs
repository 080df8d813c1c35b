use crate::types::*;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const YAHOO_BASE: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance client: monthly chart history and sector classification
pub struct YahooClient {
    client: Client,
    base_url: Url,
    rate_limiter: tokio::sync::Semaphore,
    last_request: tokio::sync::Mutex<Instant>,
}

impl YahooClient {
    /// Per-request timeout
    const REQUEST_TIMEOUT_SECS: u64 = 10;
    /// Longest Retry-After we are willing to honor
    const MAX_RETRY_AFTER_SECS: u64 = 30;
    /// Minimum spacing between requests
    const MIN_REQUEST_SPACING: Duration = Duration::from_millis(100);

    pub fn new() -> Result<Self> {
        Self::with_base_url(YAHOO_BASE)
    }

    /// Client against another host (a proxy or a mock server)
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RankingError::InvalidConfig(format!("Invalid base URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; dam-ranker/0.1)")
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RankingError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            // Yahoo throttles aggressively; keep concurrent requests low
            rate_limiter: tokio::sync::Semaphore::new(2),
            last_request: tokio::sync::Mutex::new(Instant::now() - Duration::from_secs(10)),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RankingError::InvalidConfig(format!("Base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Rate-limited GET with per-request timeout and one wait-and-retry on 429
    async fn rate_limited_request<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        for attempt in 0..2 {
            let _permit = self
                .rate_limiter
                .acquire()
                .await
                .map_err(|e| RankingError::ApiError(e.to_string()))?;

            {
                let mut last = self.last_request.lock().await;
                let elapsed = last.elapsed();
                if elapsed < Self::MIN_REQUEST_SPACING {
                    tokio::time::sleep(Self::MIN_REQUEST_SPACING - elapsed).await;
                }
                *last = Instant::now();
            }

            debug!("GET {}", url);
            let request = self.client.get(url.clone()).query(query).send();
            let response = match tokio::time::timeout(
                Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
                request,
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => return Err(RankingError::ApiError(e.to_string())),
                Err(_) => {
                    return Err(RankingError::ApiError(format!(
                        "Yahoo request to {} timed out after {}s",
                        url.path(),
                        Self::REQUEST_TIMEOUT_SECS
                    )))
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());

                if attempt == 0 {
                    let wait_secs = retry_after.unwrap_or(5).min(Self::MAX_RETRY_AFTER_SECS);
                    warn!("Yahoo rate limited, waiting {} seconds before retry", wait_secs);
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    continue;
                }

                return Err(RankingError::RateLimit {
                    source_name: "yahoo".to_string(),
                    retry_after,
                });
            }

            if status == StatusCode::NOT_FOUND {
                return Err(RankingError::AssetNotFound(url.path().to_string()));
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(RankingError::ApiError(format!(
                    "Yahoo API error ({}): {}",
                    status, text
                )));
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| RankingError::InvalidResponse(e.to_string()));
        }

        Err(RankingError::ApiError(
            "Unexpected retry loop exit".to_string(),
        ))
    }

    /// Monthly OHLC table, closes adjusted for splits and dividends when available
    pub async fn get_monthly_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawSeries> {
        let url = self.endpoint(&["v8", "finance", "chart", symbol])?;
        let query = [
            ("period1", unix_seconds(start).to_string()),
            ("period2", unix_seconds(end).to_string()),
            ("interval", "1mo".to_string()),
            ("events", "div,splits".to_string()),
        ];

        let response: ChartResponse = self
            .rate_limited_request(url, &query)
            .await
            .map_err(|e| match e {
                RankingError::AssetNotFound(_) => RankingError::AssetNotFound(symbol.to_string()),
                other => other,
            })?;

        if let Some(err) = response.chart.error {
            return Err(RankingError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("{}: {}", err.code, err.description.unwrap_or_default()),
            });
        }

        let result = response
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| RankingError::InvalidResponse(format!("No chart result for {}", symbol)))?;

        Ok(chart_to_raw(symbol, result))
    }

    /// Sector from the asset profile; `None` for funds, indices and unknown symbols
    pub async fn get_sector(&self, symbol: &str) -> Result<Option<String>> {
        let url = self.endpoint(&["v10", "finance", "quoteSummary", symbol])?;
        let query = [("modules", "assetProfile".to_string())];

        let response: QuoteSummaryResponse = match self.rate_limited_request(url, &query).await {
            Ok(r) => r,
            Err(RankingError::AssetNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(response
            .quote_summary
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|r| r.asset_profile)
            .and_then(|p| p.sector)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }
}

fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Lay the chart arrays out as a multi-level table (`field`, `symbol`)
fn chart_to_raw(symbol: &str, result: ChartResult) -> RawSeries {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjusted = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .filter(|a| a.len() == result.timestamp.len());

    let closes = adjusted.unwrap_or(quote.close);
    let columns = ["Open", "High", "Low", "Close"];
    let mut raw = RawSeries::new(
        symbol,
        columns
            .iter()
            .map(|field| ColumnLabel::new([*field, symbol]))
            .collect(),
    );

    let cell = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
            warn!("{}: skipping invalid timestamp {}", symbol, ts);
            continue;
        };
        raw.push_row(
            date,
            vec![
                cell(&quote.open, i),
                cell(&quote.high, i),
                cell(&quote.low, i),
                cell(&closes, i),
            ],
        );
    }

    raw
}

// Response types for Yahoo Finance API
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
    #[serde(default)]
    adjclose: Vec<AdjCloseBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    #[serde(rename = "assetProfile")]
    asset_profile: Option<AssetProfile>,
}

#[derive(Debug, Deserialize)]
struct AssetProfile {
    sector: Option<String>,
}

#[async_trait::async_trait]
impl MarketDataSource for YahooClient {
    async fn get_monthly_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawSeries> {
        YahooClient::get_monthly_series(self, symbol, start, end).await
    }

    async fn get_sector(&self, symbol: &str) -> Result<Option<String>> {
        YahooClient::get_sector(self, symbol).await
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}
