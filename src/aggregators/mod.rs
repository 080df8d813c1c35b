// Per-sector ranking of scored candidates
use crate::types::*;
use std::collections::BTreeMap;
use tracing::debug;

/// Groups scores by sector and keeps the top `top_k` of each
#[derive(Debug, Clone, Copy)]
pub struct SectorAggregator {
    top_k: usize,
}

impl Default for SectorAggregator {
    fn default() -> Self {
        Self { top_k: 1 }
    }
}

impl SectorAggregator {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Rank scores within each sector, highest DAM first.
    ///
    /// Records without a DAM are skipped. Equal scores keep the order in which the
    /// records were supplied, so callers pass them in universe order.
    pub fn aggregate(&self, scores: &[ScoreRecord]) -> RankedResult {
        let mut by_sector: BTreeMap<&str, Vec<RankedEntry>> = BTreeMap::new();

        for record in scores {
            let Some(dam) = record.dam.filter(|d| d.is_finite()) else {
                continue;
            };
            by_sector
                .entry(record.sector.as_str())
                .or_default()
                .push(RankedEntry {
                    ticker: record.ticker.clone(),
                    dam,
                });
        }

        let mut result = RankedResult::new();
        for (sector, mut entries) in by_sector {
            // sort_by is stable: ties stay in input order
            entries.sort_by(|a, b| b.dam.total_cmp(&a.dam));
            entries.truncate(self.top_k);
            debug!(
                "{}: top {} of sector = {:?}",
                sector,
                entries.len(),
                entries.iter().map(|e| e.ticker.as_str()).collect::<Vec<_>>()
            );
            result.insert(sector.to_string(), entries);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticker: &str, sector: &str, dam: Option<f64>, position: usize) -> ScoreRecord {
        ScoreRecord {
            ticker: ticker.to_string(),
            sector: sector.to_string(),
            dam,
            components: None,
            position,
        }
    }

    fn tickers(result: &RankedResult, sector: &str) -> Vec<String> {
        result
            .get(sector)
            .unwrap_or(&[])
            .iter()
            .map(|e| e.ticker.clone())
            .collect()
    }

    #[test]
    fn test_top_one_per_sector() {
        let scores = vec![
            record("A", "Tech", Some(2.0), 0),
            record("B", "Tech", Some(3.0), 1),
            record("C", "Health", Some(1.0), 2),
        ];

        let result = SectorAggregator::new(1).aggregate(&scores);
        assert_eq!(result.len(), 2);
        assert_eq!(tickers(&result, "Tech"), vec!["B"]);
        assert_eq!(tickers(&result, "Health"), vec!["C"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let scores = vec![
            record("ZZZ", "Tech", Some(1.5), 0),
            record("AAA", "Tech", Some(1.5), 1),
            record("MMM", "Tech", Some(1.5), 2),
        ];

        let result = SectorAggregator::new(2).aggregate(&scores);
        assert_eq!(tickers(&result, "Tech"), vec!["ZZZ", "AAA"]);
    }

    #[test]
    fn test_top_two_does_not_pad() {
        let scores = vec![
            record("A", "Tech", Some(2.0), 0),
            record("B", "Tech", Some(-1.0), 1),
            record("C", "Energy", Some(0.5), 2),
        ];

        let result = SectorAggregator::new(2).aggregate(&scores);
        assert_eq!(tickers(&result, "Tech"), vec!["A", "B"]);
        assert_eq!(tickers(&result, "Energy"), vec!["C"]);
    }

    #[test]
    fn test_undefined_scores_are_skipped() {
        let scores = vec![
            record("A", "Tech", None, 0),
            record("B", "Utilities", None, 1),
            record("C", "Tech", Some(0.1), 2),
        ];

        let result = SectorAggregator::default().aggregate(&scores);
        assert_eq!(tickers(&result, "Tech"), vec!["C"]);
        // Sector with no scored candidates is absent, not empty
        assert!(result.get("Utilities").is_none());
    }

    #[test]
    fn test_empty_input() {
        let result = SectorAggregator::default().aggregate(&[]);
        assert!(result.is_empty());
        assert!(result.picks().is_empty());
    }
}
