use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Calendar month a monthly close belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First calendar day of the month
    pub fn first_day(&self) -> NaiveDate {
        // month is validated on construction, so day 1 always exists
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// The following calendar month
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = RankingError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RankingError::InvalidResponse(format!("Invalid period: {}", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for Period {
    type Error = RankingError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// One monthly close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub period: Period,
    pub close: Decimal,
}

impl PricePoint {
    pub fn new(period: Period, close: Decimal) -> Self {
        Self { period, close }
    }
}

/// Canonical monthly close series: one positive close per period, periods strictly increasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl CloseSeries {
    /// Build a canonical series from points in any order.
    ///
    /// Points sharing a period collapse to the last one supplied. Empty input or a
    /// non-positive close is rejected.
    pub fn from_points(
        symbol: impl Into<String>,
        points: impl IntoIterator<Item = PricePoint>,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let mut by_period: BTreeMap<Period, Decimal> = BTreeMap::new();

        for point in points {
            if point.close <= Decimal::ZERO {
                return Err(RankingError::DataUnavailable {
                    symbol,
                    reason: format!("non-positive close {} in {}", point.close, point.period),
                });
            }
            by_period.insert(point.period, point.close);
        }

        if by_period.is_empty() {
            return Err(RankingError::DataUnavailable {
                symbol,
                reason: "empty price series".to_string(),
            });
        }

        Ok(Self {
            symbol,
            points: by_period
                .into_iter()
                .map(|(period, close)| PricePoint { period, close })
                .collect(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest_period(&self) -> Option<Period> {
        self.points.last().map(|p| p.period)
    }

    /// The most recent `n` points, or None if the series is shorter
    pub fn tail(&self, n: usize) -> Option<&[PricePoint]> {
        self.points
            .len()
            .checked_sub(n)
            .map(|start| &self.points[start..])
    }

    /// Month-over-month returns; the first period has no return and is omitted.
    ///
    /// A ratio outside `Decimal` range yields a NaN return, which leaves any score
    /// built on it undefined.
    pub fn returns(&self) -> ReturnSeries {
        let points = self
            .points
            .windows(2)
            .map(|w| ReturnPoint {
                period: w[1].period,
                value: relative_change(w[0].close, w[1].close),
            })
            .collect();

        ReturnSeries { points }
    }
}

/// `to / from - 1` as f64, NaN when the division overflows
pub(crate) fn relative_change(from: Decimal, to: Decimal) -> f64 {
    to.checked_div(from)
        .and_then(|ratio| ratio.checked_sub(Decimal::ONE))
        .and_then(|change| change.to_f64())
        .unwrap_or(f64::NAN)
}

/// One monthly return
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub period: Period,
    pub value: f64,
}

/// Ordered monthly returns derived from a [`CloseSeries`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReturnSeries {
    points: Vec<ReturnPoint>,
}

impl ReturnSeries {
    pub fn points(&self) -> &[ReturnPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, period: Period) -> Option<f64> {
        self.points
            .binary_search_by_key(&period, |p| p.period)
            .ok()
            .map(|i| self.points[i].value)
    }

    /// The most recent `n` returns, or None if the series is shorter
    pub fn tail(&self, n: usize) -> Option<&[ReturnPoint]> {
        self.points
            .len()
            .checked_sub(n)
            .map(|start| &self.points[start..])
    }
}

/// Benchmark returns net of the monthly risk-free rate.
///
/// Built once per run and shared read-only across every candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcessReturnSeries {
    symbol: String,
    monthly_risk_free: f64,
    returns: ReturnSeries,
}

impl ExcessReturnSeries {
    pub fn from_returns(symbol: impl Into<String>, returns: &ReturnSeries, monthly_risk_free: f64) -> Self {
        let points = returns
            .points()
            .iter()
            .map(|p| ReturnPoint {
                period: p.period,
                value: p.value - monthly_risk_free,
            })
            .collect();

        Self {
            symbol: symbol.into(),
            monthly_risk_free,
            returns: ReturnSeries { points },
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn monthly_risk_free(&self) -> f64 {
        self.monthly_risk_free
    }

    pub fn get(&self, period: Period) -> Option<f64> {
        self.returns.get(period)
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn latest_period(&self) -> Option<Period> {
        self.returns.points().last().map(|p| p.period)
    }
}

/// Column label as delivered by a provider; may carry several levels
/// (e.g. `["Close", "AAPL"]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLabel {
    pub levels: Vec<String>,
}

impl ColumnLabel {
    pub fn new<S: Into<String>>(levels: impl IntoIterator<Item = S>) -> Self {
        Self {
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            levels: vec![name.into()],
        }
    }

    /// True if any level names `field` (case-insensitive)
    pub fn names(&self, field: &str) -> bool {
        self.levels.iter().any(|l| l.trim().eq_ignore_ascii_case(field))
    }
}

/// One provider row; `values` lines up with [`RawSeries::columns`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// Provider price table before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub symbol: String,
    pub columns: Vec<ColumnLabel>,
    pub rows: Vec<RawRow>,
}

impl RawSeries {
    pub fn new(symbol: impl Into<String>, columns: Vec<ColumnLabel>) -> Self {
        Self {
            symbol: symbol.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, date: NaiveDate, values: Vec<Option<f64>>) {
        self.rows.push(RawRow { date, values });
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<&CloseSeries> for RawSeries {
    fn from(series: &CloseSeries) -> Self {
        let mut raw = RawSeries::new(series.symbol(), vec![ColumnLabel::single("Close")]);
        for point in series.points() {
            raw.push_row(point.period.first_day(), vec![point.close.to_f64()]);
        }
        raw
    }
}

/// A candidate that passed the sector and length checks and can be scored
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub ticker: String,
    pub sector: String,
    pub closes: CloseSeries,
    pub returns: ReturnSeries,
    pub benchmark: Arc<ExcessReturnSeries>,
}

impl CandidateRecord {
    pub fn new(
        ticker: impl Into<String>,
        sector: Option<String>,
        closes: CloseSeries,
        benchmark: Arc<ExcessReturnSeries>,
        min_points: usize,
    ) -> Result<Self> {
        let ticker = ticker.into();

        if closes.len() < min_points {
            return Err(RankingError::InsufficientData {
                symbol: ticker,
                points: closes.len(),
                required: min_points,
            });
        }

        let sector = sector
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RankingError::MissingSector(ticker.clone()))?;

        let returns = closes.returns();

        Ok(Self {
            ticker,
            sector,
            closes,
            returns,
            benchmark,
        })
    }
}

/// The four DAM sub-metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamComponents {
    /// 12-month total return
    pub r12: f64,
    /// Recency-weighted 12-month return
    pub wr12: f64,
    /// 6-month volatility
    pub v6: f64,
    /// 6-month beta against benchmark excess returns
    pub b6: f64,
}

impl DamComponents {
    /// `(R12 * WR12) / (V6 * B6)`, or None when any input or the result is degenerate
    pub fn dam(&self) -> Option<f64> {
        let inputs = [self.r12, self.wr12, self.v6, self.b6];
        if inputs.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let denominator = self.v6 * self.b6;
        if denominator == 0.0 || !denominator.is_finite() {
            return None;
        }

        let dam = (self.r12 * self.wr12) / denominator;
        dam.is_finite().then_some(dam)
    }
}

/// Scoring result for one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub ticker: String,
    pub sector: String,
    pub dam: Option<f64>,
    pub components: Option<DamComponents>,
    /// Position of the ticker in the input universe; ranking tie-break key
    pub position: usize,
}

/// One ranked ticker within a sector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub ticker: String,
    pub dam: f64,
}

/// Sector -> tickers ordered by descending DAM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedResult {
    sectors: BTreeMap<String, Vec<RankedEntry>>,
}

impl RankedResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, sector: String, entries: Vec<RankedEntry>) {
        self.sectors.insert(sector, entries);
    }

    pub fn get(&self, sector: &str) -> Option<&[RankedEntry]> {
        self.sectors.get(sector).map(|v| v.as_slice())
    }

    pub fn sectors(&self) -> impl Iterator<Item = (&str, &[RankedEntry])> {
        self.sectors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Consumer-facing view: winner per sector plus the runner-up when ranked
    pub fn picks(&self) -> Vec<SectorPick> {
        self.sectors
            .iter()
            .filter_map(|(sector, entries)| {
                let first = entries.first()?;
                Some(SectorPick {
                    sector: sector.clone(),
                    ticker: first.ticker.clone(),
                    alt: entries.get(1).map(|e| e.ticker.clone()),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorPick {
    pub sector: String,
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// Why a ticker did not make it into the ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExclusionReason {
    DataUnavailable(String),
    RetrievalTimeout,
    MissingSector,
    InsufficientData { points: usize, required: usize },
    DegenerateScore(String),
    Duplicate,
    DeadlineExceeded,
}

impl From<&RankingError> for ExclusionReason {
    fn from(err: &RankingError) -> Self {
        match err {
            RankingError::RetrievalTimeout { .. } => ExclusionReason::RetrievalTimeout,
            RankingError::MissingSector(_) => ExclusionReason::MissingSector,
            RankingError::InsufficientData {
                points, required, ..
            } => ExclusionReason::InsufficientData {
                points: *points,
                required: *required,
            },
            RankingError::DegenerateScore { reason, .. } => {
                ExclusionReason::DegenerateScore(reason.clone())
            }
            other => ExclusionReason::DataUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub ticker: String,
    pub reason: ExclusionReason,
}

/// Full outcome of one ranking run
#[derive(Debug, Clone, Serialize)]
pub struct RankingReport {
    pub benchmark: String,
    /// Latest benchmark period the ranking was computed against
    pub as_of: Option<Period>,
    pub rankings: RankedResult,
    pub scores: Vec<ScoreRecord>,
    pub exclusions: Vec<Exclusion>,
    /// False when the run deadline cut retrieval short
    pub complete: bool,
}

/// Freshness of the benchmark series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkStatus {
    pub symbol: String,
    pub latest_period: Period,
    /// True when the latest close belongs to the still-forming current month
    pub using_current_month: bool,
}

/// Error types for the ranking pipeline and its data sources
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Benchmark {symbol} unavailable: {reason}")]
    BenchmarkUnavailable { symbol: String, reason: String },

    #[error("Insufficient data for {symbol}: {points} points, {required} required")]
    InsufficientData {
        symbol: String,
        points: usize,
        required: usize,
    },

    #[error("No sector classification for {0}")]
    MissingSector(String),

    #[error("Degenerate score for {ticker}: {reason}")]
    DegenerateScore { ticker: String, reason: String },

    #[error("Retrieval for {symbol} timed out after {attempts} attempt(s)")]
    RetrievalTimeout { symbol: String, attempts: u32 },

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded for {source_name}")]
    RateLimit {
        source_name: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RankingError {
    /// Failures worth another attempt within the retry budget
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RankingError::ApiError(_)
                | RankingError::RateLimit { .. }
                | RankingError::RetrievalTimeout { .. }
        )
    }
}

/// Result type for ranking operations
pub type Result<T> = std::result::Result<T, RankingError>;

/// Trait for market data providers
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Monthly price table for `symbol` between `start` and `end`
    async fn get_monthly_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawSeries>;

    /// Sector classification; `None` when the provider has none
    async fn get_sector(&self, symbol: &str) -> Result<Option<String>>;

    /// Source name
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(y: i32, m: u32) -> Period {
        Period::new(y, m).unwrap()
    }

    #[test]
    fn test_period_parse_and_display() {
        let p: Period = "2024-03".parse().unwrap();
        assert_eq!(p, period(2024, 3));
        assert_eq!(p.to_string(), "2024-03");
        assert!("2024-13".parse::<Period>().is_err());
        assert!("March".parse::<Period>().is_err());
        assert_eq!(period(2023, 12).succ(), period(2024, 1));
    }

    #[test]
    fn test_close_series_sorts_and_dedups() {
        let series = CloseSeries::from_points(
            "AAPL",
            vec![
                PricePoint::new(period(2024, 2), Decimal::from(110)),
                PricePoint::new(period(2024, 1), Decimal::from(100)),
                PricePoint::new(period(2024, 2), Decimal::from(120)),
            ],
        )
        .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].period, period(2024, 1));
        // Last observation for a month wins
        assert_eq!(series.points()[1].close, Decimal::from(120));
    }

    #[test]
    fn test_close_series_rejects_bad_input() {
        assert!(CloseSeries::from_points("X", Vec::new()).is_err());
        let negative = vec![PricePoint::new(period(2024, 1), Decimal::from(-1))];
        assert!(CloseSeries::from_points("X", negative).is_err());
    }

    #[test]
    fn test_returns_omit_first_period() {
        let series = CloseSeries::from_points(
            "AAPL",
            vec![
                PricePoint::new(period(2024, 1), Decimal::from(100)),
                PricePoint::new(period(2024, 2), Decimal::from(110)),
                PricePoint::new(period(2024, 3), Decimal::from(99)),
            ],
        )
        .unwrap();

        let returns = series.returns();
        assert_eq!(returns.len(), 2);
        assert_eq!(returns.get(period(2024, 1)), None);
        assert!((returns.get(period(2024, 2)).unwrap() - 0.10).abs() < 1e-12);
        assert!((returns.get(period(2024, 3)).unwrap() + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_overflowing_return_is_nan() {
        let series = CloseSeries::from_points(
            "BAD",
            vec![
                PricePoint::new(period(2024, 1), Decimal::new(1, 20)),
                PricePoint::new(period(2024, 2), Decimal::from(10_000_000_000i64)),
                PricePoint::new(period(2024, 3), Decimal::from(11_000_000_000i64)),
            ],
        )
        .unwrap();

        let returns = series.returns();
        assert!(returns.get(period(2024, 2)).unwrap().is_nan());
        assert!((returns.get(period(2024, 3)).unwrap() - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_dam_undefined_on_zero_denominator() {
        let components = DamComponents {
            r12: 0.2,
            wr12: 0.3,
            v6: 0.0,
            b6: 1.1,
        };
        assert_eq!(components.dam(), None);

        let nan_beta = DamComponents {
            b6: f64::NAN,
            v6: 0.1,
            ..components
        };
        assert_eq!(nan_beta.dam(), None);
    }

    #[test]
    fn test_picks_include_alt_only_when_ranked() {
        let mut result = RankedResult::new();
        result.insert(
            "Technology".to_string(),
            vec![
                RankedEntry { ticker: "MSFT".to_string(), dam: 3.0 },
                RankedEntry { ticker: "AAPL".to_string(), dam: 2.0 },
            ],
        );
        result.insert(
            "Healthcare".to_string(),
            vec![RankedEntry { ticker: "JNJ".to_string(), dam: 1.0 }],
        );

        let picks = result.picks();
        assert_eq!(picks.len(), 2);
        let tech = picks.iter().find(|p| p.sector == "Technology").unwrap();
        assert_eq!(tech.alt.as_deref(), Some("AAPL"));
        let health = picks.iter().find(|p| p.sector == "Healthcare").unwrap();
        assert_eq!(health.alt, None);
    }
}
