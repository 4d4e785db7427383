//! Learning job orchestration.
//!
//! A job sweeps a device's parameters through the live host, classifies and
//! fits each one, merges the result into the stored mapping and saves it.
//! Individual probe failures are absorbed and reported on the job; failures
//! that make the whole mapping meaningless abort the job.

use crate::config::EngineConfig;
use crate::errors::{MappingError, MappingResult};
use crate::jobs::{JobRegistry, JobReporter, LearnMode};
use crate::labels::step_values;
use crate::live::{DeviceRef, DeviceSnapshot, LiveDevice, ParamReading};
use crate::mapping_store::MappingStore;
use crate::snapshot_cache::SnapshotCache;
use paramforge_core::classifier::classify;
use paramforge_core::device_type::detect_device_type;
use paramforge_core::fit::{fit_with_threshold, Fit};
use paramforge_core::grouping::classify_relationships;
use paramforge_core::mapping::{DeviceMapping, ParamMeta};
use paramforge_core::resolver::{resolve_param, ParamRef, ParamResolution};
use paramforge_core::sample::{Sample, SampleStore};
use paramforge_core::signature::compute_signature;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Probes closer than this are treated as the same normalized value.
const SAME_PROBE: f64 = 1e-9;

/// Gaps narrower than this are not split further.
const MIN_GAP: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct LearnRequest {
    pub device: DeviceRef,
    pub mode: LearnMode,
    /// Subset to learn; `None` learns every parameter.
    pub params: Option<Vec<ParamRef>>,
}

impl LearnRequest {
    pub fn new(device: DeviceRef, mode: LearnMode) -> Self {
        Self {
            device,
            mode,
            params: None,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamRef>) -> Self {
        self.params = Some(params);
        self
    }
}

pub struct LearningJobHandle {
    pub id: String,
    pub signature: String,
    pub join: JoinHandle<MappingResult<DeviceMapping>>,
}

impl LearningJobHandle {
    /// Wait for the job and return the saved mapping.
    pub async fn wait(self) -> MappingResult<DeviceMapping> {
        self.join.await.map_err(|e| MappingError::Internal {
            message: format!("learning task failed: {}", e),
        })?
    }
}

pub struct LearningService<L> {
    live: Arc<L>,
    store: Arc<dyn MappingStore>,
    registry: Arc<JobRegistry>,
    cache: Arc<SnapshotCache>,
    config: Arc<EngineConfig>,
}

impl<L> Clone for LearningService<L> {
    fn clone(&self) -> Self {
        Self {
            live: Arc::clone(&self.live),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            config: Arc::clone(&self.config),
        }
    }
}

/// Evenly spaced values over `[lo, hi]`, ends included.
fn grid(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..count)
            .map(|i| lo + (hi - lo) * i as f64 / (count - 1) as f64)
            .collect(),
    }
}

fn already_probed(probed: &[f64], x: f64) -> bool {
    probed.iter().any(|p| (p - x).abs() <= SAME_PROBE)
}

/// Midpoint of the widest gap between probed values.
fn widest_gap_midpoint(probed: &[f64]) -> Option<f64> {
    let mut xs: Vec<f64> = probed.iter().copied().filter(|x| x.is_finite()).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs.dedup_by(|a, b| (*a - *b).abs() <= SAME_PROBE);
    xs.windows(2)
        .map(|w| (w[1] - w[0], (w[0] + w[1]) / 2.0))
        .filter(|(gap, _)| *gap > MIN_GAP)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, mid)| mid)
}

fn resolve_targets(snapshot: &DeviceSnapshot, params: &[ParamRef]) -> MappingResult<Vec<usize>> {
    let names = snapshot.param_names();
    let mut indices = Vec::new();
    for param in params {
        let position = match resolve_param(&names, param) {
            ParamResolution::Found(position) => position,
            ParamResolution::Ambiguous(positions) => {
                return Err(MappingError::AmbiguousParameter {
                    param: param.to_string(),
                    candidates: positions.iter().map(|p| names[*p].to_string()).collect(),
                })
            }
            ParamResolution::NotFound => {
                return Err(MappingError::ParameterNotFound {
                    param: param.to_string(),
                })
            }
        };
        let index = snapshot.params[position].index;
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    Ok(indices)
}

impl<L: LiveDevice + 'static> LearningService<L> {
    pub fn new(
        live: Arc<L>,
        store: Arc<dyn MappingStore>,
        registry: Arc<JobRegistry>,
        cache: Arc<SnapshotCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            live,
            store,
            registry,
            cache,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    async fn prepare(
        &self,
        request: &LearnRequest,
    ) -> MappingResult<(DeviceSnapshot, JobReporter)> {
        // Learning always works from the live structure.
        self.cache.invalidate(&request.device);
        let snapshot = self.cache.get_or_fetch(&request.device, self.live.as_ref()).await?;
        let signature = compute_signature(&snapshot.param_names());
        let reporter = self.registry.try_register(&signature, &request.device, request.mode)?;
        tracing::info!(
            signature = %signature,
            job_id = %reporter.id(),
            device = %request.device,
            mode = ?request.mode,
            params = snapshot.params.len(),
            "learning job registered"
        );
        Ok((snapshot, reporter))
    }

    /// Register a job and run it on a background task.
    ///
    /// Fails immediately with `LearningInProgress` when a job for the same
    /// device structure is already running.
    pub async fn start(&self, request: LearnRequest) -> MappingResult<LearningJobHandle> {
        let (snapshot, reporter) = self.prepare(&request).await?;
        let id = reporter.id().to_string();
        let signature = reporter.signature().to_string();
        let service = self.clone();
        let join = tokio::spawn(async move { service.run(reporter, snapshot, request).await });
        Ok(LearningJobHandle { id, signature, join })
    }

    /// Run a job on the current task.
    pub async fn learn_now(&self, request: LearnRequest) -> MappingResult<DeviceMapping> {
        let (snapshot, reporter) = self.prepare(&request).await?;
        self.run(reporter, snapshot, request).await
    }

    async fn run(
        &self,
        reporter: JobReporter,
        snapshot: DeviceSnapshot,
        request: LearnRequest,
    ) -> MappingResult<DeviceMapping> {
        match self.execute(&reporter, &snapshot, &request).await {
            Ok(mapping) => {
                let learned = mapping.params_meta.iter().filter(|p| p.is_learned()).count();
                tracing::info!(
                    signature = %mapping.signature,
                    job_id = %reporter.id(),
                    learned,
                    device_type = %mapping.device_type,
                    "learning job done"
                );
                let total = mapping.param_count;
                reporter.finish(format!("learned {} of {} parameters", learned, total));
                Ok(mapping)
            }
            Err(err) => {
                tracing::warn!(job_id = %reporter.id(), error = %err, "learning job failed");
                reporter.fail(&err);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        reporter: &JobReporter,
        snapshot: &DeviceSnapshot,
        request: &LearnRequest,
    ) -> MappingResult<DeviceMapping> {
        let targets = match &request.params {
            Some(params) => resolve_targets(snapshot, params)?,
            None => snapshot.params.iter().map(|p| p.index).collect(),
        };

        let planned = match request.mode {
            LearnMode::Quick => self.config.quick_anchors.len(),
            LearnMode::Exhaustive => self.config.coarse_points,
        };
        reporter.start(planned * targets.len());

        let mut samples = SampleStore::new();
        for index in &targets {
            let Some(reading) = snapshot.reading(*index) else { continue };
            let device = &request.device;
            match request.mode {
                LearnMode::Quick => self.sweep_quick(reporter, device, reading, &mut samples).await,
                LearnMode::Exhaustive => {
                    self.sweep_exhaustive(reporter, device, reading, &mut samples).await
                }
            }
            self.restore(reporter, &request.device, reading).await;
        }
        self.cache.invalidate(&request.device);

        let metas: Vec<ParamMeta> = snapshot
            .params
            .iter()
            .map(|p| {
                if targets.contains(&p.index) {
                    ParamMeta::from_samples(
                        p.index,
                        p.name.as_str(),
                        p.min,
                        p.max,
                        samples.samples(p.index),
                        self.config.fit_accept_r2,
                    )
                } else {
                    ParamMeta::unlearned(p.index, p.name.as_str(), p.min, p.max)
                }
            })
            .collect();

        for meta in metas.iter().filter(|m| targets.contains(&m.index) && !m.is_learned()) {
            reporter.warn(format!("{}: no usable samples", meta.name));
        }

        let names = snapshot.param_names();
        let signature = reporter.signature().to_string();
        let device_type = detect_device_type(&snapshot.fx_name, &names);
        let grouping = classify_relationships(&device_type, &names);
        let fresh = DeviceMapping::new(signature.clone(), device_type, metas, grouping);

        let previous = self.store.get(&signature)?;
        let merged = DeviceMapping::merge(previous.as_ref(), fresh);
        self.store.save(&signature, &merged)?;
        Ok(merged)
    }

    /// One write/settle/readback round trip. A failure skips the sample.
    async fn probe(
        &self,
        reporter: &JobReporter,
        device: &DeviceRef,
        reading: &ParamReading,
        x: f64,
        samples: &mut SampleStore,
    ) -> bool {
        let result: MappingResult<ParamReading> = async {
            self.live.set_param(device, reading.index, x).await?;
            tokio::time::sleep(self.config.settle()).await;
            self.live.get_param(device, reading.index).await
        }
        .await;

        match result {
            Ok(readback) => {
                tracing::debug!(
                    param = %reading.name,
                    x,
                    display = %readback.display_value,
                    "probe"
                );
                samples.push(reading.index, Sample::new(x, readback.display_value));
                reporter.step();
                true
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %reporter.id(),
                    param = %reading.name,
                    x,
                    error = %err,
                    "probe skipped"
                );
                reporter.skip_probe(format!("{} @ {:.3}: {}", reading.name, x, err));
                false
            }
        }
    }

    async fn probe_all(
        &self,
        reporter: &JobReporter,
        device: &DeviceRef,
        reading: &ParamReading,
        xs: Vec<f64>,
        samples: &mut SampleStore,
    ) {
        let mut probed = samples.probed_values(reading.index);
        let mut fresh = Vec::new();
        for x in xs {
            if !already_probed(&probed, x) {
                probed.push(x);
                fresh.push(x);
            }
        }
        reporter.add_steps(fresh.len());
        for x in fresh {
            self.probe(reporter, device, reading, x, samples).await;
        }
    }

    fn domain(reading: &ParamReading, fraction: f64) -> f64 {
        reading.min + (reading.max - reading.min) * fraction
    }

    fn refit(&self, reading: &ParamReading, samples: &SampleStore) -> Fit {
        fit_with_threshold(&samples.numeric_points(reading.index), self.config.fit_accept_r2)
    }

    async fn sweep_quick(
        &self,
        reporter: &JobReporter,
        device: &DeviceRef,
        reading: &ParamReading,
        samples: &mut SampleStore,
    ) {
        // Failed points count as attempted so gap splitting moves past them.
        let mut attempted = samples.probed_values(reading.index);
        for anchor in &self.config.quick_anchors {
            let x = Self::domain(reading, *anchor);
            attempted.push(x);
            self.probe(reporter, device, reading, x, samples).await;
        }

        let classification = classify(samples.samples(reading.index), reading.min, reading.max);
        if classification.control_type.has_labels() {
            self.sweep_labels(reporter, device, reading, samples, classification.labels.len())
                .await;
            return;
        }

        let mut fit = self.refit(reading, samples);
        let mut extra = 0;
        while fit.r2() < self.config.quick_accept_r2 && extra < self.config.quick_extra_points {
            let Some(x) = widest_gap_midpoint(&attempted) else { break };
            attempted.push(x);
            extra += 1;
            reporter.add_steps(1);
            if self.probe(reporter, device, reading, x, samples).await {
                fit = self.refit(reading, samples);
            }
        }
        tracing::debug!(
            param = %reading.name,
            fit = fit.kind(),
            r2 = fit.r2(),
            extra,
            "quick sweep done"
        );
    }

    async fn sweep_exhaustive(
        &self,
        reporter: &JobReporter,
        device: &DeviceRef,
        reading: &ParamReading,
        samples: &mut SampleStore,
    ) {
        for x in grid(reading.min, reading.max, self.config.coarse_points) {
            self.probe(reporter, device, reading, x, samples).await;
        }

        let classification = classify(samples.samples(reading.index), reading.min, reading.max);
        if classification.control_type.has_labels() {
            self.sweep_labels(reporter, device, reading, samples, classification.labels.len())
                .await;
        } else {
            let xs = grid(reading.min, reading.max, self.config.resolution);
            self.probe_all(reporter, device, reading, xs, samples).await;
        }
    }

    /// Walk a switch or selector in equal steps, twice as fine as the labels
    /// seen so far, until a walk turns up no new label or the step limit is
    /// reached.
    async fn sweep_labels(
        &self,
        reporter: &JobReporter,
        device: &DeviceRef,
        reading: &ParamReading,
        samples: &mut SampleStore,
        mut known: usize,
    ) {
        let max_steps = self.config.max_label_steps;
        loop {
            let steps = (2 * known).clamp(2, max_steps);
            let xs = step_values(steps)
                .into_iter()
                .map(|fraction| Self::domain(reading, fraction))
                .collect();
            self.probe_all(reporter, device, reading, xs, samples).await;

            let found = classify(samples.samples(reading.index), reading.min, reading.max)
                .labels
                .len();
            tracing::debug!(param = %reading.name, steps, known, found, "label walk");
            if found <= known || steps >= max_steps {
                break;
            }
            known = found;
        }
    }

    async fn restore(&self, reporter: &JobReporter, device: &DeviceRef, reading: &ParamReading) {
        if let Err(err) = self.live.set_param(device, reading.index, reading.value).await {
            tracing::warn!(param = %reading.name, error = %err, "restore failed");
            reporter.warn(format!(
                "{}: could not restore {:.4}: {}",
                reading.name, reading.value, err
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_includes_ends() {
        assert_eq!(grid(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(grid(0.0, 1.0, 1), vec![0.0]);
        assert!(grid(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_widest_gap() {
        assert_eq!(widest_gap_midpoint(&[0.0, 0.5, 1.0]), Some(0.75));
        assert_eq!(widest_gap_midpoint(&[0.0, 0.5, 1.0, 0.75]), Some(0.25));
        assert_eq!(widest_gap_midpoint(&[0.5]), None);
        assert_eq!(widest_gap_midpoint(&[0.5, 0.5]), None);
    }
}
