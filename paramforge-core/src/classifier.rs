//! Control-type classification from observed samples.

use crate::display::is_numeric_display;
use crate::sample::Sample;
use serde::{Deserialize, Serialize};

/// Largest distinct-label count still treated as a quantized (enumerated) control.
pub const MAX_QUANTIZED_LABELS: usize = 12;

/// Tolerance when checking samples against the declared normalized domain.
const DOMAIN_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlType {
    Binary,
    Quantized,
    Continuous,
}

impl ControlType {
    pub fn has_labels(self) -> bool {
        matches!(self, ControlType::Binary | ControlType::Quantized)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub control_type: ControlType,
    pub labels: Vec<String>,
    /// 0 when there was not enough evidence to decide.
    pub confidence: f64,
}

/// Distinct display strings in first-seen order.
fn distinct_labels<'a>(samples: impl Iterator<Item = &'a Sample>) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for s in samples {
        let text = s.display_raw.trim();
        if !labels.iter().any(|l| l == text) {
            labels.push(text.to_string());
        }
    }
    labels
}

/// Decide a parameter's control type from its samples.
///
/// Pure function of the sample set: the same samples always produce the same
/// classification. Samples outside `[domain_min, domain_max]` are ignored.
pub fn classify(samples: &[Sample], domain_min: f64, domain_max: f64) -> Classification {
    let (lo, hi) = if domain_min <= domain_max {
        (domain_min, domain_max)
    } else {
        (domain_max, domain_min)
    };
    let in_domain: Vec<&Sample> = samples
        .iter()
        .filter(|s| s.normalized >= lo - DOMAIN_SLACK && s.normalized <= hi + DOMAIN_SLACK)
        .collect();

    if in_domain.len() < 2 {
        return Classification {
            control_type: ControlType::Continuous,
            labels: Vec::new(),
            confidence: 0.0,
        };
    }

    let labels = distinct_labels(in_domain.iter().copied());
    let label_confidence = (in_domain.len() as f64 / (2.0 * labels.len() as f64)).min(1.0);

    if labels.len() <= 2 {
        return Classification {
            control_type: ControlType::Binary,
            labels,
            confidence: label_confidence,
        };
    }

    let non_numeric = labels.iter().filter(|l| !is_numeric_display(l)).count();
    if labels.len() <= MAX_QUANTIZED_LABELS && non_numeric > 0 {
        return Classification {
            control_type: ControlType::Quantized,
            labels,
            confidence: label_confidence,
        };
    }

    Classification {
        control_type: ControlType::Continuous,
        labels: Vec::new(),
        confidence: 1.0,
    }
}

/// Value-keyed label table, sorted by normalized value.
///
/// Consecutive samples (by value) showing the same label form a run; each run
/// is represented by the midpoint of its first and last sampled value, which
/// keeps the written value away from the run's edges.
pub fn build_label_map(samples: &[Sample]) -> Vec<(f64, String)> {
    let mut sorted: Vec<&Sample> = samples.iter().filter(|s| s.normalized.is_finite()).collect();
    sorted.sort_by(|a, b| a.normalized.total_cmp(&b.normalized));

    let mut runs: Vec<(f64, f64, String)> = Vec::new();
    for s in sorted {
        let label = s.display_raw.trim();
        match runs.last_mut() {
            Some((_, last, current)) if current.as_str() == label => *last = s.normalized,
            _ => runs.push((s.normalized, s.normalized, label.to_string())),
        }
    }

    runs.into_iter()
        .map(|(first, last, label)| ((first + last) / 2.0, label))
        .collect()
}
