// Normalization of provider price tables into canonical monthly close series
use crate::types::*;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Converts raw provider tables into [`CloseSeries`]
#[derive(Debug, Clone)]
pub struct SeriesNormalizer {
    price_field: String,
}

impl Default for SeriesNormalizer {
    fn default() -> Self {
        Self::new("Close")
    }
}

impl SeriesNormalizer {
    pub fn new(price_field: impl Into<String>) -> Self {
        Self {
            price_field: price_field.into(),
        }
    }

    pub fn price_field(&self) -> &str {
        &self.price_field
    }

    /// Normalize a raw table into a canonical close series.
    ///
    /// The price column is found by matching any level of a column label, so both flat
    /// (`Close`) and multi-level (`Close`/`AAPL`) layouts resolve. Rows with a missing,
    /// non-finite or non-positive close are dropped; several rows in one month collapse
    /// to the last.
    pub fn normalize(&self, raw: &RawSeries) -> Result<CloseSeries> {
        let unavailable = |reason: String| RankingError::DataUnavailable {
            symbol: raw.symbol.clone(),
            reason,
        };

        if raw.is_empty() {
            return Err(unavailable("empty price series".to_string()));
        }

        let column = self.locate_price_column(raw).map_err(unavailable)?;

        let mut points = Vec::with_capacity(raw.rows.len());
        let mut dropped = 0usize;

        for row in &raw.rows {
            let value = row.values.get(column).copied().flatten();
            match value.filter(|v| v.is_finite() && *v > 0.0) {
                Some(v) => match Decimal::try_from(v) {
                    Ok(close) => points.push(PricePoint::new(Period::from_date(row.date), close)),
                    Err(_) => dropped += 1,
                },
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(
                "{}: dropped {} row(s) with unusable {} values",
                raw.symbol, dropped, self.price_field
            );
        }

        if points.is_empty() {
            return Err(unavailable(format!("no usable {} values", self.price_field)));
        }

        let series = CloseSeries::from_points(raw.symbol.clone(), points)?;
        debug!(
            "{}: normalized {} rows into {} monthly closes",
            raw.symbol,
            raw.rows.len(),
            series.len()
        );
        Ok(series)
    }

    fn locate_price_column(&self, raw: &RawSeries) -> std::result::Result<usize, String> {
        let matches: Vec<usize> = raw
            .columns
            .iter()
            .enumerate()
            .filter(|(_, label)| label.names(&self.price_field))
            .map(|(i, _)| i)
            .collect();

        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(format!("missing '{}' column", self.price_field)),
            _ => Err(format!(
                "ambiguous '{}' column ({} matches)",
                self.price_field,
                matches.len()
            )),
        }
    }
}
