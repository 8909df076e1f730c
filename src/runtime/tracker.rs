use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Aggregated `@tracked` outcomes: heading → outcome string → count.
/// BTreeMaps keep rows sorted ascending for the report.
#[derive(Debug, Default, Clone)]
pub struct OutcomeTracker {
    rows: BTreeMap<String, BTreeMap<String, u64>>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// One outcome per binding release: `0`/`1` per measured qubit, `?` for
    /// a qubit that was never measured since its last reset.
    pub fn record(&mut self, heading: &str, outcome: String) {
        *self.rows.entry(heading.to_string()).or_default().entry(outcome).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: OutcomeTracker) {
        for (heading, outcomes) in other.rows {
            let entry = self.rows.entry(heading).or_default();
            for (outcome, count) in outcomes {
                *entry.entry(outcome).or_insert(0) += count;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn counts(&self, heading: &str) -> Option<&BTreeMap<String, u64>> {
        self.rows.get(heading)
    }

    /// The multi-shot aggregate report.
    pub fn render(&self, shots: u64, elapsed: Duration) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Shots: {}", shots);
        let _ = writeln!(out, "Backend: Bloch Ideal Simulator");
        let _ = writeln!(out, "Elapsed: {:.3}s", elapsed.as_secs_f64());

        for (heading, outcomes) in &self.rows {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", heading);
            let _ = writeln!(out, "outcome | count |  prob");
            let _ = writeln!(out, "--------+-------+-----");
            for (outcome, count) in outcomes {
                let prob = *count as f64 / shots as f64;
                let _ = writeln!(out, "{} | {} | {:.3}", outcome, count, prob);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_sum_across_merges() {
        let mut total = OutcomeTracker::new();
        for _ in 0..3 {
            let mut shot = OutcomeTracker::new();
            shot.record("qubit q", "?".to_string());
            total.merge(shot);
        }
        assert_eq!(total.counts("qubit q").unwrap()["?"], 3);
    }

    #[test]
    fn report_contains_header_and_rows() {
        let mut tracker = OutcomeTracker::new();
        tracker.record("qubit q", "?".to_string());
        tracker.record("qubit q", "?".to_string());
        tracker.record("qubit q", "?".to_string());
        let report = tracker.render(3, Duration::from_millis(120));
        assert!(report.contains("Shots: 3"));
        assert!(report.contains("Backend: Bloch Ideal Simulator"));
        assert!(report.contains("qubit q"));
        assert!(report.contains("? | 3 | 1.000"));
    }

    #[test]
    fn rows_sort_ascending_by_outcome() {
        let mut tracker = OutcomeTracker::new();
        tracker.record("qubit q", "1".to_string());
        tracker.record("qubit q", "0".to_string());
        let report = tracker.render(2, Duration::ZERO);
        let zero = report.find("0 | 1").unwrap();
        let one = report.find("1 | 1").unwrap();
        assert!(zero < one);
    }
}
