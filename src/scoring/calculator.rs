//! DAM score calculation
//!
//! DAM = (R12 * WR12) / (V6 * B6) over the trailing 13 monthly closes:
//! - R12: total return from the oldest to the newest close
//! - WR12: the 12 monthly returns weighted towards recent months
//! - V6: sample std dev of the last 6 returns, scaled by sqrt(2)
//! - B6: sample beta of the last 6 returns against benchmark excess returns

use crate::types::*;
use statrs::statistics::Statistics;
use std::f64::consts::SQRT_2;

/// Recency weights for WR12, oldest month first. Not normalized: they sum to 1.82.
pub const WR12_WEIGHTS: [f64; 12] = [
    0.01, 0.01, 0.04, 0.04, 0.09, 0.09, 0.16, 0.16, 0.25, 0.25, 0.36, 0.36,
];

/// Closes used for one score (12 monthly returns)
pub const LOOKBACK_CLOSES: usize = 13;

/// Returns used for volatility and beta
pub const VOLATILITY_WINDOW: usize = 6;

pub struct ScoreCalculator;

impl ScoreCalculator {
    /// Compute the four sub-metrics for a candidate.
    ///
    /// Fails only when the inputs cannot cover the window; degenerate values
    /// (zero variance, NaN) are returned as-is and caught by [`DamComponents::dam`].
    pub fn components(candidate: &CandidateRecord) -> Result<DamComponents> {
        let closes = candidate
            .closes
            .tail(LOOKBACK_CLOSES)
            .ok_or_else(|| RankingError::InsufficientData {
                symbol: candidate.ticker.clone(),
                points: candidate.closes.len(),
                required: LOOKBACK_CLOSES,
            })?;
        let returns = candidate
            .returns
            .tail(LOOKBACK_CLOSES - 1)
            .ok_or_else(|| RankingError::InsufficientData {
                symbol: candidate.ticker.clone(),
                points: candidate.closes.len(),
                required: LOOKBACK_CLOSES,
            })?;

        let initial = closes[0].close;
        let last = closes[LOOKBACK_CLOSES - 1].close;
        let r12 = relative_change(initial, last);

        let wr12: f64 = returns
            .iter()
            .zip(WR12_WEIGHTS.iter())
            .map(|(r, w)| r.value * w)
            .sum();

        let recent = &returns[returns.len() - VOLATILITY_WINDOW..];
        let candidate_recent: Vec<f64> = recent.iter().map(|r| r.value).collect();

        let benchmark_recent = recent
            .iter()
            .map(|r| candidate.benchmark.get(r.period).ok_or(r.period))
            .collect::<std::result::Result<Vec<f64>, Period>>()
            .map_err(|period| RankingError::DegenerateScore {
                ticker: candidate.ticker.clone(),
                reason: format!(
                    "benchmark {} has no return for {}",
                    candidate.benchmark.symbol(),
                    period
                ),
            })?;

        let v6 = candidate_recent.iter().std_dev() * SQRT_2;
        let b6 = beta(&candidate_recent, &benchmark_recent);

        Ok(DamComponents { r12, wr12, v6, b6 })
    }

    /// Score a candidate, failing with `DegenerateScore` when DAM is undefined.
    /// `position` is the candidate's index in the input universe.
    pub fn try_score(candidate: &CandidateRecord, position: usize) -> Result<ScoreRecord> {
        let components = Self::components(candidate)?;
        let dam = components.dam().ok_or_else(|| RankingError::DegenerateScore {
            ticker: candidate.ticker.clone(),
            reason: format!(
                "undefined DAM (r12={:.4}, wr12={:.4}, v6={:.4}, b6={:.4})",
                components.r12, components.wr12, components.v6, components.b6
            ),
        })?;

        Ok(ScoreRecord {
            ticker: candidate.ticker.clone(),
            sector: candidate.sector.clone(),
            dam: Some(dam),
            components: Some(components),
            position,
        })
    }
}

/// Sample covariance over sample variance of the benchmark; NaN when undefined
fn beta(candidate: &[f64], benchmark: &[f64]) -> f64 {
    let variance = benchmark.iter().variance();
    if variance == 0.0 || !variance.is_finite() {
        return f64::NAN;
    }
    candidate.iter().covariance(benchmark.iter()) / variance
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    /// Close series starting Jan 2023 at 100, compounding the given monthly returns
    fn closes_from_returns(symbol: &str, returns: &[f64]) -> CloseSeries {
        let mut period = Period::new(2023, 1).unwrap();
        let mut close = 100.0;
        let mut points = vec![PricePoint::new(period, Decimal::try_from(close).unwrap())];
        for r in returns {
            close *= 1.0 + r;
            period = period.succ();
            points.push(PricePoint::new(period, Decimal::try_from(close).unwrap()));
        }
        CloseSeries::from_points(symbol, points).unwrap()
    }

    fn benchmark(returns: &[f64]) -> Arc<ExcessReturnSeries> {
        let closes = closes_from_returns("SPY", returns);
        Arc::new(ExcessReturnSeries::from_returns("SPY", &closes.returns(), 0.002))
    }

    fn candidate(returns: &[f64], bench: Arc<ExcessReturnSeries>) -> CandidateRecord {
        CandidateRecord::new(
            "TEST",
            Some("Technology".to_string()),
            closes_from_returns("TEST", returns),
            bench,
            LOOKBACK_CLOSES,
        )
        .unwrap()
    }

    const BENCH_RETURNS: [f64; 12] = [
        0.01, -0.02, 0.03, 0.015, -0.01, 0.02, 0.01, -0.03, 0.025, 0.005, -0.015, 0.02,
    ];

    #[test]
    fn test_weight_vector() {
        assert_eq!(
            WR12_WEIGHTS,
            [0.01, 0.01, 0.04, 0.04, 0.09, 0.09, 0.16, 0.16, 0.25, 0.25, 0.36, 0.36]
        );
        let total: f64 = WR12_WEIGHTS.iter().sum();
        assert_relative_eq!(total, 1.82, epsilon = 1e-12);
        assert_eq!(WR12_WEIGHTS.len(), LOOKBACK_CLOSES - 1);
    }

    #[test]
    fn test_components_match_definitions() {
        let returns = [
            0.02, 0.01, -0.01, 0.03, 0.02, -0.02, 0.04, 0.01, -0.03, 0.05, 0.02, 0.01,
        ];
        let c = candidate(&returns, benchmark(&BENCH_RETURNS));
        let components = ScoreCalculator::components(&c).unwrap();

        let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
        assert_relative_eq!(components.r12, growth - 1.0, epsilon = 1e-9);

        let wr12: f64 = returns.iter().zip(WR12_WEIGHTS).map(|(r, w)| r * w).sum();
        assert_relative_eq!(components.wr12, wr12, epsilon = 1e-9);

        let recent = &returns[6..];
        let mean = recent.iter().sum::<f64>() / 6.0;
        let var = recent.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 5.0;
        assert_relative_eq!(components.v6, var.sqrt() * SQRT_2, epsilon = 1e-9);

        let dam = components.dam().unwrap();
        assert_relative_eq!(
            dam,
            components.r12 * components.wr12 / (components.v6 * components.b6),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_beta_recovers_linear_sensitivity() {
        // Candidate returns are exactly twice the benchmark excess returns plus a constant
        let excess: Vec<f64> = BENCH_RETURNS.iter().map(|r| r - 0.002).collect();
        let returns: Vec<f64> = excess.iter().map(|e| 2.0 * e + 0.01).collect();

        let c = candidate(&returns, benchmark(&BENCH_RETURNS));
        let components = ScoreCalculator::components(&c).unwrap();
        assert_relative_eq!(components.b6, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_constant_returns_are_degenerate() {
        // Flat prices give zero volatility, so the denominator is zero
        let c = candidate(&[0.0; 12], benchmark(&BENCH_RETURNS));
        assert!(matches!(
            ScoreCalculator::try_score(&c, 0),
            Err(RankingError::DegenerateScore { .. })
        ));
        assert_eq!(ScoreCalculator::components(&c).unwrap().dam(), None);
    }

    #[test]
    fn test_flat_benchmark_is_degenerate() {
        let c = candidate(&BENCH_RETURNS, benchmark(&[0.0; 12]));
        let components = ScoreCalculator::components(&c).unwrap();
        assert!(components.b6.is_nan());
        assert_eq!(components.dam(), None);
    }

    #[test]
    fn test_uses_only_trailing_window() {
        // Extra history before the window must not change the score
        let mut long = vec![0.5, -0.4, 0.3];
        long.extend_from_slice(&BENCH_RETURNS);
        let bench = benchmark(&[0.01; 15]);

        let short_closes = closes_from_returns("TEST", &BENCH_RETURNS);
        let long_closes = closes_from_returns("TEST", &long);

        // Align the short series to the same trailing periods
        let offset: Vec<PricePoint> = long_closes.tail(13).unwrap().to_vec();
        let shifted = CloseSeries::from_points("TEST", offset).unwrap();
        assert_eq!(shifted.len(), short_closes.len());

        let a = CandidateRecord::new("TEST", Some("Tech".into()), long_closes, Arc::clone(&bench), 13).unwrap();
        let b = CandidateRecord::new("TEST", Some("Tech".into()), shifted, bench, 13).unwrap();
        assert_eq!(
            ScoreCalculator::components(&a).unwrap().r12,
            ScoreCalculator::components(&b).unwrap().r12
        );
        assert_eq!(
            ScoreCalculator::components(&a).unwrap().wr12,
            ScoreCalculator::components(&b).unwrap().wr12
        );
    }

    #[test]
    fn test_missing_benchmark_period_is_degenerate() {
        // Benchmark stops three months before the candidate
        let bench = benchmark(&BENCH_RETURNS[..9]);
        let c = CandidateRecord::new(
            "TEST",
            Some("Tech".into()),
            closes_from_returns("TEST", &BENCH_RETURNS),
            bench,
            9,
        )
        .unwrap();
        assert!(matches!(
            ScoreCalculator::components(&c),
            Err(RankingError::DegenerateScore { .. })
        ));
    }
}
