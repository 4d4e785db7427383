//! Samples gathered during one learning run.

use crate::display::parse_display_number;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observation: the normalized value written and what the host displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub normalized: f64,
    pub display_raw: String,
    pub display_num: Option<f64>,
}

impl Sample {
    pub fn new(normalized: f64, display_raw: impl Into<String>) -> Self {
        let display_raw = display_raw.into();
        let display_num = parse_display_number(&display_raw);
        Self {
            normalized,
            display_raw,
            display_num,
        }
    }
}

/// Per-run sample storage keyed by live parameter index.
///
/// Insertion order is preserved per parameter; the classifier relies on it
/// for first-seen label ordering.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: BTreeMap<usize, Vec<Sample>>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, sample: Sample) {
        self.samples.entry(index).or_default().push(sample);
    }

    pub fn samples(&self, index: usize) -> &[Sample] {
        self.samples.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Normalized values already probed for a parameter.
    pub fn probed_values(&self, index: usize) -> Vec<f64> {
        self.samples(index).iter().map(|s| s.normalized).collect()
    }

    /// Finite (normalized, numeric display) pairs, in sampling order.
    pub fn numeric_points(&self, index: usize) -> Vec<(f64, f64)> {
        numeric_points(self.samples(index))
    }
}

pub fn numeric_points(samples: &[Sample]) -> Vec<(f64, f64)> {
    samples
        .iter()
        .filter_map(|s| s.display_num.map(|y| (s.normalized, y)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_parses_display() {
        let s = Sample::new(0.5, "1.00 s");
        assert_eq!(s.display_num, Some(1.0));
        let label = Sample::new(1.0, "Hall");
        assert_eq!(label.display_num, None);
    }

    #[test]
    fn test_store_keeps_insertion_order_per_param() {
        let mut store = SampleStore::new();
        store.push(3, Sample::new(1.0, "10 ms"));
        store.push(3, Sample::new(0.0, "1 ms"));
        store.push(1, Sample::new(0.0, "Off"));

        assert_eq!(store.samples(3).len(), 2);
        assert_eq!(store.probed_values(3), vec![1.0, 0.0]);
        assert_eq!(store.numeric_points(3), vec![(1.0, 10.0), (0.0, 1.0)]);
        assert!(store.numeric_points(1).is_empty());
        assert!(store.samples(7).is_empty());
    }
}
