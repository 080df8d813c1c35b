//! In-memory market data source for offline runs and tests

use crate::types::*;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Serves pre-loaded price tables and sector labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSource {
    #[serde(default)]
    series: HashMap<String, RawSeries>,
    #[serde(default)]
    sectors: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON fixture of the form `{"series": {...}, "sectors": {...}}`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let invalid = |e: &dyn std::fmt::Display| {
            RankingError::InvalidConfig(format!("fixture {}: {}", path.display(), e))
        };
        let file = std::fs::File::open(path).map_err(|e| invalid(&e))?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| invalid(&e))
    }

    pub fn with_series(mut self, raw: RawSeries) -> Self {
        self.series.insert(raw.symbol.to_uppercase(), raw);
        self
    }

    pub fn with_closes(self, closes: &CloseSeries) -> Self {
        self.with_series(RawSeries::from(closes))
    }

    pub fn with_sector(mut self, symbol: &str, sector: &str) -> Self {
        self.sectors.insert(symbol.to_uppercase(), sector.to_string());
        self
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|s| s.as_str())
    }
}

#[async_trait::async_trait]
impl MarketDataSource for StaticSource {
    async fn get_monthly_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawSeries> {
        let raw = self
            .series
            .get(&symbol.to_uppercase())
            .ok_or_else(|| RankingError::AssetNotFound(symbol.to_string()))?;

        let mut window = RawSeries::new(raw.symbol.clone(), raw.columns.clone());
        window.rows = raw
            .rows
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect();
        Ok(window)
    }

    async fn get_sector(&self, symbol: &str) -> Result<Option<String>> {
        Ok(self.sectors.get(&symbol.to_uppercase()).cloned())
    }

    fn name(&self) -> &str {
        "static"
    }
}
