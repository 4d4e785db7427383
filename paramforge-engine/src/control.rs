//! Applying display-unit targets to live parameters.
//!
//! The learned mapping gives a first estimate; live readback then confirms
//! it, and for continuous parameters a bounded bisection corrects fits that
//! miss the device curve.

use crate::config::EngineConfig;
use crate::errors::{MappingError, MappingResult};
use crate::labels::{enumerate_labels, samples_from_steps};
use crate::live::{DeviceRef, LiveDevice, ParamReading};
use crate::mapping_store::MappingStore;
use crate::snapshot_cache::SnapshotCache;
use paramforge_core::classifier::ControlType;
use paramforge_core::display::{normalize_token, parse_display_number};
use paramforge_core::invert::{refinement_tolerance, Bisection};
use paramforge_core::mapping::{DeviceMapping, ParamMeta};
use paramforge_core::resolver::{resolve_param, ParamRef, ParamResolution};
use paramforge_core::signature::compute_signature;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TargetValue {
    /// Number in the parameter's display unit ("2.0" for "2.00 s").
    Display(f64),
    Label(String),
    /// Raw host value, written as is.
    Normalized(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOptions {
    /// Put the original value back after measuring.
    pub restore: bool,
    /// Correct the first estimate against live readback.
    pub refine: bool,
    /// Display bounds to interpolate between when no learned mapping exists.
    pub naive_display_bounds: Option<(f64, f64)>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            restore: false,
            refine: true,
            naive_display_bounds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub index: usize,
    pub name: String,
    pub normalized: f64,
    /// Display text read back after the final write.
    pub applied_display: Option<String>,
    pub applied_value: Option<f64>,
    /// Distance from the target after the final write: display units for
    /// numeric targets, 0 or 1 for a label (matched or not), normalized
    /// units for raw targets. `None` without a usable readback.
    pub error_margin: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub restored: bool,
}

impl ResolveOutcome {
    /// Turn a non-converged refinement into an error.
    pub fn into_strict(self) -> MappingResult<Self> {
        match (self.converged, self.error_margin) {
            (false, Some(residual)) => Err(MappingError::BisectionNonConvergent {
                param: self.name,
                best: self.normalized,
                residual,
                iterations: self.iterations,
            }),
            _ => Ok(self),
        }
    }
}

/// What the readback should show.
#[derive(Debug, Clone, PartialEq)]
enum Expected {
    Number(f64),
    Label(String),
    Nothing,
}

fn ambiguous(param: &ParamRef, candidates: Vec<String>) -> MappingError {
    MappingError::AmbiguousParameter {
        param: param.to_string(),
        candidates,
    }
}

fn not_found(param: &ParamRef) -> MappingError {
    MappingError::ParameterNotFound {
        param: param.to_string(),
    }
}

fn resolve_in_mapping(mapping: &DeviceMapping, param: &ParamRef) -> MappingResult<usize> {
    match mapping.resolve(param) {
        ParamResolution::Found(index) => Ok(index),
        ParamResolution::Ambiguous(indices) => Err(ambiguous(
            param,
            indices
                .iter()
                .filter_map(|i| mapping.param(*i).map(|m| m.name.clone()))
                .collect(),
        )),
        ParamResolution::NotFound => Err(not_found(param)),
    }
}

/// Normalized estimate for `target` plus what the readback should show.
fn estimate(meta: &ParamMeta, target: &TargetValue) -> MappingResult<(f64, Expected)> {
    let (lo, hi) = (meta.min.min(meta.max), meta.min.max(meta.max));
    match target {
        TargetValue::Normalized(x) => Ok((x.clamp(lo, hi), Expected::Nothing)),
        TargetValue::Label(label) => {
            if let Some(x) = meta.invert_label(label) {
                return Ok((x, Expected::Label(label.clone())));
            }
            match parse_display_number(label) {
                Some(number) if !meta.control_type.has_labels() => {
                    estimate(meta, &TargetValue::Display(number))
                }
                _ => Err(MappingError::InvalidParameter {
                    param: meta.name.clone(),
                    reason: format!("unknown label {:?}; known: {}", label, meta.labels.join(", ")),
                }),
            }
        }
        TargetValue::Display(value) if meta.control_type.has_labels() => {
            // Enumerated numeric labels ("0 dB", "6 dB"): pick the nearest.
            meta.label_map
                .iter()
                .filter_map(|(x, label)| parse_display_number(label).map(|n| (*x, n)))
                .min_by(|a, b| (a.1 - value).abs().total_cmp(&(b.1 - value).abs()))
                .map(|(x, n)| (x, Expected::Number(n)))
                .ok_or_else(|| MappingError::InvalidParameter {
                    param: meta.name.clone(),
                    reason: format!("{} has no numeric labels", meta.name),
                })
        }
        TargetValue::Display(value) => Ok((meta.invert_display(*value), Expected::Number(*value))),
    }
}

fn readback_error(
    expected: &Expected,
    written: f64,
    reading: Option<&ParamReading>,
) -> Option<f64> {
    let reading = reading?;
    match expected {
        Expected::Number(target) => {
            parse_display_number(&reading.display_value).map(|v| (v - target).abs())
        }
        Expected::Label(label) => {
            let matched = normalize_token(&reading.display_value) == normalize_token(label);
            Some(if matched { 0.0 } else { 1.0 })
        }
        Expected::Nothing => Some((reading.value - written).abs()),
    }
}

/// Single-shot inversion against a mapping, without touching the device.
pub fn simulate(
    mapping: &DeviceMapping,
    param: &ParamRef,
    target: &TargetValue,
) -> MappingResult<ResolveOutcome> {
    let index = resolve_in_mapping(mapping, param)?;
    let meta = mapping.param(index).ok_or_else(|| not_found(param))?;
    let (x, _) = estimate(meta, target)?;
    let applied_value = match meta.control_type {
        ControlType::Continuous => meta.forward_display(x),
        _ => None,
    };
    let applied_display = meta
        .label_map
        .iter()
        .min_by(|a, b| (a.0 - x).abs().total_cmp(&(b.0 - x).abs()))
        .map(|(_, label)| label.clone());
    Ok(ResolveOutcome {
        index,
        name: meta.name.clone(),
        normalized: x,
        applied_display,
        applied_value,
        error_margin: None,
        iterations: 0,
        converged: true,
        restored: false,
    })
}

pub struct ControlService<L> {
    live: Arc<L>,
    store: Arc<dyn MappingStore>,
    cache: Arc<SnapshotCache>,
    config: Arc<EngineConfig>,
}

impl<L: LiveDevice> ControlService<L> {
    pub fn new(
        live: Arc<L>,
        store: Arc<dyn MappingStore>,
        cache: Arc<SnapshotCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            live,
            store,
            cache,
            config,
        }
    }

    /// Settle, then read back. A failed readback is logged and skipped.
    async fn settle_and_read(&self, device: &DeviceRef, index: usize) -> Option<ParamReading> {
        self.cache.invalidate(device);
        tokio::time::sleep(self.config.settle()).await;
        match self.live.get_param(device, index).await {
            Ok(reading) => Some(reading),
            Err(err) => {
                tracing::debug!(index, error = %err, "readback skipped");
                None
            }
        }
    }

    /// Drive one parameter to a target given in display units, a label or a
    /// raw value.
    ///
    /// `signature` pins the structure the caller expects; `None` uses the
    /// device's current structure.
    pub async fn resolve_target(
        &self,
        device: &DeviceRef,
        signature: Option<&str>,
        param: &ParamRef,
        target: &TargetValue,
        options: &ResolveOptions,
    ) -> MappingResult<ResolveOutcome> {
        let snapshot = self.cache.get_or_fetch(device, self.live.as_ref()).await?;
        let names = snapshot.param_names();
        let live_signature = compute_signature(&names);
        let wanted = signature.unwrap_or(live_signature.as_str()).to_string();

        let mut mapping = self
            .store
            .get(&wanted)?
            .filter(|m| m.matches_structure(&names));
        if mapping.is_none() {
            tracing::debug!(signature = %wanted, "no usable mapping for device");
        }

        let index = match &mapping {
            Some(mapping) => resolve_in_mapping(mapping, param)?,
            None => match resolve_param(&names, param) {
                ParamResolution::Found(position) => snapshot.params[position].index,
                ParamResolution::Ambiguous(positions) => {
                    let candidates = positions.iter().map(|p| names[*p].to_string()).collect();
                    return Err(ambiguous(param, candidates));
                }
                ParamResolution::NotFound => return Err(not_found(param)),
            },
        };
        let reading = snapshot.reading(index).cloned().ok_or_else(|| not_found(param))?;

        let learned = mapping
            .as_ref()
            .and_then(|m| m.param(index))
            .filter(|m| m.is_learned())
            .cloned();
        let meta = match (learned, options.naive_display_bounds, target) {
            (Some(meta), _, _) => meta,
            (None, Some((lo, hi)), _) => {
                ParamMeta::naive(index, reading.name.as_str(), reading.min, reading.max, lo, hi)
            }
            (None, None, TargetValue::Normalized(_)) => {
                ParamMeta::unlearned(index, reading.name.as_str(), reading.min, reading.max)
            }
            (None, None, _) if mapping.is_some() => {
                return Err(MappingError::InsufficientSamples {
                    param: reading.name.clone(),
                    count: 0,
                })
            }
            (None, None, _) => return Err(MappingError::NoMappingAvailable { signature: wanted }),
        };

        let meta = match (target, mapping.as_mut()) {
            (TargetValue::Label(label), Some(mapping))
                if meta.control_type.has_labels() && meta.invert_label(label).is_none() =>
            {
                self.seed_labels(device, mapping, meta).await?
            }
            _ => meta,
        };

        let (estimate_x, expected) = estimate(&meta, target)?;
        let mut outcome = self.apply(device, &meta, estimate_x, &expected, options).await?;

        if options.restore {
            match self.live.set_param(device, index, reading.value).await {
                Ok(()) => outcome.restored = true,
                Err(err) => tracing::warn!(param = %reading.name, error = %err, "restore failed"),
            }
            self.cache.invalidate(device);
        }

        tracing::info!(
            param = %outcome.name,
            normalized = outcome.normalized,
            iterations = outcome.iterations,
            converged = outcome.converged,
            "target applied"
        );
        Ok(outcome)
    }

    /// Enumerate a switch or selector on the device, fold what it shows into
    /// the stored entry and save the mapping.
    async fn seed_labels(
        &self,
        device: &DeviceRef,
        mapping: &mut DeviceMapping,
        meta: ParamMeta,
    ) -> MappingResult<ParamMeta> {
        let steps = self.config.max_label_steps;
        let settle = self.config.settle();
        let found = enumerate_labels(self.live.as_ref(), device, meta.index, steps, settle).await?;
        self.cache.invalidate(device);
        let enumerated = ParamMeta::from_samples(
            meta.index,
            meta.name.as_str(),
            meta.min,
            meta.max,
            &samples_from_steps(&found, steps),
            self.config.fit_accept_r2,
        );
        let seeded = ParamMeta::merge(&meta, enumerated);
        tracing::info!(
            signature = %mapping.signature,
            param = %seeded.name,
            labels = seeded.labels.len(),
            "labels enumerated"
        );

        if let Some(slot) = mapping.params_meta.iter_mut().find(|m| m.index == seeded.index) {
            *slot = seeded.clone();
            if let Err(err) = self.store.save(&mapping.signature, mapping) {
                tracing::warn!(
                    signature = %mapping.signature,
                    error = %err,
                    "saving enumerated labels failed"
                );
            }
        }
        Ok(seeded)
    }

    async fn apply(
        &self,
        device: &DeviceRef,
        meta: &ParamMeta,
        x: f64,
        expected: &Expected,
        options: &ResolveOptions,
    ) -> MappingResult<ResolveOutcome> {
        self.live.set_param(device, meta.index, x).await?;
        let first = self.settle_and_read(device, meta.index).await;

        let mut outcome = ResolveOutcome {
            index: meta.index,
            name: meta.name.clone(),
            normalized: x,
            applied_display: first.as_ref().map(|r| r.display_value.clone()),
            applied_value: first.as_ref().and_then(|r| parse_display_number(&r.display_value)),
            error_margin: readback_error(expected, x, first.as_ref()),
            iterations: 0,
            converged: false,
            restored: false,
        };

        let target = match expected {
            Expected::Number(target) => *target,
            Expected::Label(_) => {
                outcome.converged = outcome.error_margin == Some(0.0);
                return Ok(outcome);
            }
            Expected::Nothing => {
                outcome.converged = first.is_some();
                return Ok(outcome);
            }
        };

        let tolerance = refinement_tolerance(
            target,
            self.config.refine_relative_tolerance,
            self.config.refine_absolute_tolerance,
        );
        if outcome.error_margin.map(|e| e <= tolerance).unwrap_or(false) {
            outcome.converged = true;
            return Ok(outcome);
        }
        if !options.refine || meta.control_type != ControlType::Continuous {
            return Ok(outcome);
        }

        let mut bisection = Bisection::new(meta.min, meta.max, target, meta.is_increasing());
        let mut next = match outcome.applied_value {
            Some(value) => bisection.observe(x, value),
            None => bisection.next(),
        };

        let mut last_written = x;
        for _ in 0..self.config.refine_max_iterations {
            outcome.iterations += 1;
            if let Err(err) = self.live.set_param(device, meta.index, next).await {
                tracing::debug!(
                    param = %meta.name,
                    x = next,
                    error = %err,
                    "refinement write skipped"
                );
                continue;
            }
            last_written = next;
            let Some(reading) = self.settle_and_read(device, meta.index).await else {
                continue;
            };
            let Some(value) = parse_display_number(&reading.display_value) else {
                continue;
            };
            let error = (value - target).abs();
            tracing::debug!(param = %meta.name, x = next, value, error, "refinement step");
            if outcome.error_margin.map(|best| error < best).unwrap_or(true) {
                outcome.normalized = next;
                outcome.applied_display = Some(reading.display_value.clone());
                outcome.applied_value = Some(value);
                outcome.error_margin = Some(error);
            }
            if error <= tolerance {
                outcome.converged = true;
                return Ok(outcome);
            }
            next = bisection.observe(next, value);
        }

        // Leave the best estimate applied.
        if last_written != outcome.normalized
            && self.live.set_param(device, meta.index, outcome.normalized).await.is_ok()
        {
            if let Some(reading) = self.settle_and_read(device, meta.index).await {
                outcome.applied_value = parse_display_number(&reading.display_value);
                outcome.error_margin = outcome.applied_value.map(|v| (v - target).abs());
                outcome.applied_display = Some(reading.display_value);
            }
        }
        tracing::warn!(
            param = %meta.name,
            residual = ?outcome.error_margin,
            iterations = outcome.iterations,
            "refinement did not converge"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramforge_core::grouping::GroupingRuleSet;
    use paramforge_core::sample::Sample;

    fn mapping() -> DeviceMapping {
        let decay = ParamMeta::from_samples(
            0,
            "Decay",
            0.0,
            1.0,
            &[
                Sample::new(0.0, "0.10 s"),
                Sample::new(0.5, "1.00 s"),
                Sample::new(1.0, "10.00 s"),
            ],
            0.9,
        );
        let mode = ParamMeta::from_samples(
            1,
            "Mode",
            0.0,
            1.0,
            &[Sample::new(0.0, "Hall"), Sample::new(0.5, "Room"), Sample::new(1.0, "Plate")],
            0.9,
        );
        DeviceMapping::new("sig", "reverb", vec![decay, mode], GroupingRuleSet::default())
    }

    #[test]
    fn test_simulate_display_and_label() {
        let mapping = mapping();
        let decay = simulate(&mapping, &"decay".into(), &TargetValue::Display(2.0)).unwrap();
        assert!((decay.normalized - 20f64.ln() / 100f64.ln()).abs() < 1e-6);
        assert!((decay.applied_value.unwrap() - 2.0).abs() < 1e-6);

        let mode = simulate(&mapping, &1.into(), &TargetValue::Label("room".to_string())).unwrap();
        assert_eq!(mode.normalized, 0.5);
        assert_eq!(mode.applied_display.as_deref(), Some("Room"));
    }

    #[test]
    fn test_unknown_label_is_invalid() {
        let spring = TargetValue::Label("Spring".to_string());
        let err = simulate(&mapping(), &"Mode".into(), &spring).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_label_with_number_on_continuous_param() {
        let meta = mapping().params_meta[0].clone();
        let (x, expected) = estimate(&meta, &TargetValue::Label("2.00 s".to_string())).unwrap();
        assert_eq!(expected, Expected::Number(2.0));
        assert!((x - 0.6505).abs() < 1e-3);
    }

    #[test]
    fn test_strict_outcome() {
        let outcome = ResolveOutcome {
            index: 0,
            name: "Decay".to_string(),
            normalized: 0.4,
            applied_display: None,
            applied_value: Some(1.5),
            error_margin: Some(0.5),
            iterations: 6,
            converged: false,
            restored: false,
        };
        let err = outcome.clone().into_strict().unwrap_err();
        assert_eq!(err.code(), "BISECTION_NON_CONVERGENT");
        let ok = ResolveOutcome {
            converged: true,
            ..outcome
        };
        assert!(ok.into_strict().is_ok());
    }
}
