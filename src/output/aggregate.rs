//! Turns raw probe results into the final listing

use crate::network::PortState;
use crate::output::metadata::MetadataTable;
use crate::output::{ReportEntry, SweepStats};
use crate::scanner::ScanResult;

pub struct ResultAggregator;

impl ResultAggregator {
    /// Open endpoints, ascending by address then port, each target once
    ///
    /// Completion order of `results` does not matter. With a table, each entry
    /// is left-joined on its `ip:port`.
    pub fn aggregate(results: &[ScanResult], metadata: Option<&MetadataTable>) -> Vec<ReportEntry> {
        let mut open: Vec<&ScanResult> = results.iter().filter(|r| r.is_open()).collect();
        open.sort_by(|a, b| a.target.cmp(&b.target).then(a.probed_at.cmp(&b.probed_at)));
        open.dedup_by_key(|r| r.target);

        open.into_iter()
            .map(|result| ReportEntry {
                target: result.target,
                probed_at: result.probed_at,
                metadata: metadata.and_then(|table| table.get(&result.target)).cloned(),
            })
            .collect()
    }

    pub fn stats(results: &[ScanResult]) -> SweepStats {
        let mut stats = SweepStats {
            units: results.len(),
            ..SweepStats::default()
        };
        for result in results {
            match result.state {
                PortState::Open => stats.open += 1,
                PortState::Closed => stats.closed += 1,
                PortState::Down => stats.down += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ScanTarget;
    use crate::output::metadata::EndpointMetadata;

    fn result(s: &str, state: PortState) -> ScanResult {
        ScanResult::new(s.parse::<ScanTarget>().unwrap(), state)
    }

    #[test]
    fn test_numeric_sort_and_filter() {
        let results = vec![
            result("10.1.134.20:5989", PortState::Open),
            result("10.1.134.3:5989", PortState::Open),
            result("10.1.134.100:5989", PortState::Closed),
            result("10.1.134.3:443", PortState::Open),
            result("9.255.255.255:5989", PortState::Open),
            result("10.1.134.4:5989", PortState::Down),
        ];

        let entries = ResultAggregator::aggregate(&results, None);
        let listed: Vec<String> = entries.iter().map(|e| e.target.to_string()).collect();
        assert_eq!(
            listed,
            vec![
                "9.255.255.255:5989",
                "10.1.134.3:443",
                "10.1.134.3:5989",
                "10.1.134.20:5989"
            ]
        );
        assert!(entries.iter().all(|e| e.metadata.is_none()));
    }

    #[test]
    fn test_duplicates_collapse() {
        let results = vec![
            result("10.1.134.3:5989", PortState::Open),
            result("10.1.134.3:5989", PortState::Open),
        ];
        assert_eq!(ResultAggregator::aggregate(&results, None).len(), 1);
    }

    #[test]
    fn test_metadata_left_join() {
        let mut table = MetadataTable::new();
        table.insert(
            "10.1.134.3:5989".parse().unwrap(),
            EndpointMetadata::new(Some("Acme"), None, Some("1.5")),
        );

        let results = vec![
            result("10.1.134.3:5989", PortState::Open),
            result("10.1.134.4:5989", PortState::Open),
        ];
        let entries = ResultAggregator::aggregate(&results, Some(&table));

        assert_eq!(entries.len(), 2);
        let joined = entries[0].metadata.as_ref().unwrap();
        assert_eq!(joined.company.as_deref(), Some("Acme"));
        assert!(joined.product.is_none());
        assert!(entries[1].metadata.is_none());
    }

    #[test]
    fn test_stats() {
        let results = vec![
            result("10.0.0.1:1", PortState::Open),
            result("10.0.0.2:1", PortState::Closed),
            result("10.0.0.3:1", PortState::Down),
            result("10.0.0.4:1", PortState::Down),
        ];
        let stats = ResultAggregator::stats(&results);
        assert_eq!(stats.units, 4);
        assert_eq!((stats.open, stats.closed, stats.down), (1, 1, 2));
        assert_eq!(stats.retried, 0);
    }
}
