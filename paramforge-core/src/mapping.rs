//! Persisted per-structure device mapping.

use crate::classifier::{build_label_map, classify, ControlType};
use crate::device_type::UNKNOWN_DEVICE_TYPE;
use crate::display::infer_unit;
use crate::fit::{fit_with_threshold, Fit};
use crate::grouping::GroupingRuleSet;
use crate::invert::{invert, invert_label, invert_linear_bounds};
use crate::resolver::{resolve_param, ParamRef, ParamResolution};
use crate::sample::{numeric_points, Sample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Samples needed before a fit's R² is trusted at full weight.
const FULL_CONFIDENCE_SAMPLES: f64 = 5.0;

/// Section name for parameters whose name is a single word.
pub const GENERAL_SECTION: &str = "General";

fn default_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamMeta {
    pub index: usize,
    pub name: String,
    pub control_type: ControlType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_display: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_display: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_map: Vec<(f64, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<Fit>,
    pub confidence: f64,
    /// Usable samples behind this entry; 0 means "not learned".
    #[serde(default)]
    pub sample_count: usize,
}

impl ParamMeta {
    /// Entry for a parameter with no usable samples.
    pub fn unlearned(index: usize, name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            index,
            name: name.into(),
            control_type: ControlType::Continuous,
            unit: None,
            min,
            max,
            min_display: None,
            max_display: None,
            labels: Vec::new(),
            label_map: Vec::new(),
            fit: None,
            confidence: 0.0,
            sample_count: 0,
        }
    }

    /// Continuous entry interpolating linearly between declared display bounds.
    pub fn naive(
        index: usize,
        name: impl Into<String>,
        min: f64,
        max: f64,
        min_display: f64,
        max_display: f64,
    ) -> Self {
        Self {
            min_display: Some(min_display),
            max_display: Some(max_display),
            ..Self::unlearned(index, name, min, max)
        }
    }

    /// Classify and fit one parameter from its samples.
    pub fn from_samples(
        index: usize,
        name: impl Into<String>,
        min: f64,
        max: f64,
        samples: &[Sample],
        accept_r2: f64,
    ) -> Self {
        let mut meta = Self::unlearned(index, name, min, max);
        if samples.is_empty() {
            return meta;
        }
        meta.sample_count = samples.len();
        meta.unit = samples.iter().find_map(|s| infer_unit(&s.display_raw));

        let classification = classify(samples, min, max);
        meta.control_type = classification.control_type;

        if classification.control_type.has_labels() {
            meta.label_map = build_label_map(samples);
            meta.labels = classification.labels;
            meta.unit = None;
            meta.confidence = classification.confidence;
            return meta;
        }

        let points = numeric_points(samples);
        meta.sample_count = points.len();
        if points.is_empty() {
            return meta;
        }

        let lowest = points.iter().min_by(|a, b| a.0.total_cmp(&b.0));
        let highest = points.iter().max_by(|a, b| a.0.total_cmp(&b.0));
        meta.min_display = lowest.map(|p| p.1);
        meta.max_display = highest.map(|p| p.1);

        let fit = fit_with_threshold(&points, accept_r2);
        let sufficiency = (points.len() as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
        meta.confidence = if classification.confidence == 0.0 {
            0.0
        } else if fit.is_closed_form() {
            fit.r2().clamp(0.0, 1.0) * sufficiency
        } else if points.len() >= 3 {
            // Interpolation reproduces every sample but says nothing between them.
            0.8 * sufficiency
        } else {
            0.5 * sufficiency
        };
        meta.fit = Some(fit);
        meta
    }

    pub fn is_learned(&self) -> bool {
        self.sample_count > 0
    }

    /// Whether the display value grows with the normalized value.
    pub fn is_increasing(&self) -> bool {
        match (&self.fit, self.min_display, self.max_display) {
            (Some(fit), _, _) => fit.is_increasing(),
            (None, Some(lo), Some(hi)) => hi >= lo,
            _ => true,
        }
    }

    /// Predicted display value at normalized `x`, when the entry can tell.
    pub fn forward_display(&self, x: f64) -> Option<f64> {
        if let Some(fit) = &self.fit {
            let y = fit.evaluate(x);
            return y.is_finite().then_some(y);
        }
        let (lo, hi) = (self.min_display?, self.max_display?);
        let span = self.max - self.min;
        if span == 0.0 {
            return Some(lo);
        }
        Some(lo + (x - self.min) / span * (hi - lo))
    }

    /// Normalized value for a numeric display target.
    ///
    /// Without a fit, interpolates between the display bounds; with neither,
    /// the target is taken to be a fraction of the normalized domain.
    pub fn invert_display(&self, target: f64) -> f64 {
        if let Some(fit) = &self.fit {
            return invert(fit, target, self.min, self.max);
        }
        match (self.min_display, self.max_display) {
            (Some(lo), Some(hi)) => invert_linear_bounds(lo, hi, target, self.min, self.max),
            _ => {
                let x = self.min + target * (self.max - self.min);
                x.clamp(self.min.min(self.max), self.min.max(self.max))
            }
        }
    }

    /// Normalized value for a label. Falls back to evenly spaced positions
    /// when only the label list is known.
    pub fn invert_label(&self, label: &str) -> Option<f64> {
        if !self.label_map.is_empty() {
            return invert_label(&self.label_map, label);
        }
        if self.labels.is_empty() {
            return None;
        }
        let spaced: Vec<(f64, String)> = if self.labels.len() == 1 {
            vec![(self.min, self.labels[0].clone())]
        } else {
            let steps = (self.labels.len() - 1) as f64;
            self.labels
                .iter()
                .enumerate()
                .map(|(i, l)| (self.min + (self.max - self.min) * i as f64 / steps, l.clone()))
                .collect()
        };
        invert_label(&spaced, label)
    }

    fn is_less_informed_than(&self, other: &ParamMeta) -> bool {
        if !self.is_learned() {
            return other.is_learned();
        }
        if self.confidence == 0.0 {
            return other.confidence > 0.0;
        }
        self.confidence < other.confidence && self.sample_count < other.sample_count
    }

    /// Combine a fresh entry with the stored one for the same parameter.
    ///
    /// The better-informed entry is kept. Label tables are unioned so a run
    /// that missed some options never removes them.
    pub fn merge(previous: &ParamMeta, fresh: ParamMeta) -> ParamMeta {
        let (base, other) = if fresh.is_less_informed_than(previous) {
            (previous.clone(), fresh)
        } else {
            (fresh, previous.clone())
        };
        if base.control_type.has_labels() && other.control_type.has_labels() {
            base.with_labels_from(&other)
        } else {
            base
        }
    }

    fn with_labels_from(mut self, other: &ParamMeta) -> Self {
        for (x, label) in &other.label_map {
            if !self.label_map.iter().any(|(_, known)| known == label) {
                self.label_map.push((*x, label.clone()));
            }
        }
        self.label_map.sort_by(|a, b| a.0.total_cmp(&b.0));
        for label in &other.labels {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
        if self.control_type == ControlType::Binary && self.labels.len() > 2 {
            self.control_type = ControlType::Quantized;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub signature: String,
    pub device_type: String,
    pub param_count: usize,
    pub params_meta: Vec<ParamMeta>,
    #[serde(default)]
    pub sections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub grouping: GroupingRuleSet,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub learn_runs: u32,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl DeviceMapping {
    pub fn new(
        signature: impl Into<String>,
        device_type: impl Into<String>,
        params_meta: Vec<ParamMeta>,
        grouping: GroupingRuleSet,
    ) -> Self {
        let names: Vec<&str> = params_meta.iter().map(|p| p.name.as_str()).collect();
        let sections = build_sections(&names);
        Self {
            signature: signature.into(),
            device_type: device_type.into(),
            param_count: params_meta.len(),
            params_meta,
            sections,
            grouping,
            updated_at: now_secs(),
            learn_runs: 1,
        }
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params_meta.iter().map(|p| p.name.as_str()).collect()
    }

    /// True when the live device still has the structure this mapping was
    /// learned from. A mapping is void for a device that fails this check.
    pub fn matches_structure<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.param_count == self.params_meta.len()
            && names.len() == self.params_meta.len()
            && names
                .iter()
                .zip(&self.params_meta)
                .all(|(n, p)| n.as_ref() == p.name)
    }

    pub fn param(&self, index: usize) -> Option<&ParamMeta> {
        self.params_meta.iter().find(|p| p.index == index)
    }

    /// Resolve against this mapping's parameter names. `Found` carries the
    /// live parameter index.
    pub fn resolve(&self, param_ref: &ParamRef) -> ParamResolution {
        let names = self.param_names();
        match resolve_param(&names, param_ref) {
            ParamResolution::Found(pos) => ParamResolution::Found(self.params_meta[pos].index),
            ParamResolution::Ambiguous(positions) => ParamResolution::Ambiguous(
                positions.into_iter().map(|p| self.params_meta[p].index).collect(),
            ),
            ParamResolution::NotFound => ParamResolution::NotFound,
        }
    }

    /// Merge a fresh learning result into a previously stored mapping.
    ///
    /// Each parameter keeps whichever entry is better informed (see
    /// [`ParamMeta::merge`]), so partial or flaky runs only add evidence. A
    /// previous mapping with a different structure is replaced outright.
    pub fn merge(previous: Option<&DeviceMapping>, fresh: DeviceMapping) -> DeviceMapping {
        let Some(previous) = previous else {
            return fresh;
        };
        let fresh_names = fresh.param_names();
        if previous.signature != fresh.signature || !previous.matches_structure(&fresh_names) {
            return fresh;
        }

        let mut merged = fresh;
        merged.params_meta = std::mem::take(&mut merged.params_meta)
            .into_iter()
            .map(|meta| match previous.param(meta.index) {
                Some(old) => ParamMeta::merge(old, meta),
                None => meta,
            })
            .collect();
        if merged.device_type == UNKNOWN_DEVICE_TYPE
            && previous.device_type != UNKNOWN_DEVICE_TYPE
        {
            merged.device_type = previous.device_type.clone();
        }
        merged.learn_runs = previous.learn_runs.saturating_add(1);
        merged
    }
}

/// Group parameter names by their first word, for documentation and UI.
pub fn build_sections<S: AsRef<str>>(names: &[S]) -> BTreeMap<String, Vec<String>> {
    let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in names.iter().map(|n| n.as_ref()) {
        let mut words = name.split_whitespace();
        let section = match (words.next(), words.next()) {
            (Some(first), Some(_)) => first.to_string(),
            _ => GENERAL_SECTION.to_string(),
        };
        sections.entry(section).or_default().push(name.to_string());
    }
    sections
}
