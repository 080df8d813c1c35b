//! Benchmark excess returns

use crate::types::*;
use tracing::debug;

/// Annual risk-free rate used when none is configured
pub const DEFAULT_ANNUAL_RISK_FREE: f64 = 0.024;

/// Annual rate spread evenly over twelve months
pub fn monthly_risk_free(annual: f64) -> f64 {
    annual / 12.0
}

pub struct BenchmarkReturns;

impl BenchmarkReturns {
    /// Derive the benchmark's excess-return series.
    ///
    /// The benchmark needs at least `min_points` closes to cover the trailing window.
    pub fn compute(
        closes: &CloseSeries,
        monthly_risk_free: f64,
        min_points: usize,
    ) -> Result<ExcessReturnSeries> {
        if closes.len() < min_points {
            return Err(RankingError::BenchmarkUnavailable {
                symbol: closes.symbol().to_string(),
                reason: format!("{} monthly closes, {} required", closes.len(), min_points),
            });
        }

        let excess = ExcessReturnSeries::from_returns(
            closes.symbol(),
            &closes.returns(),
            monthly_risk_free,
        );

        debug!(
            "{}: {} benchmark excess returns (rf {:.5}/month)",
            closes.symbol(),
            excess.len(),
            monthly_risk_free
        );

        Ok(excess)
    }
}
