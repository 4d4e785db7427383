//! Learning job bookkeeping.
//!
//! The registry holds one status record per job and the set of signatures
//! with a job in flight. A job's status is written only through its
//! [`JobReporter`]; everyone else reads snapshots.

use crate::errors::{MappingError, MappingResult};
use crate::live::DeviceRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearnMode {
    #[default]
    Quick,
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub signature: String,
    pub device: DeviceRef,
    pub state: JobState,
    pub mode: LearnMode,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub message: Option<String>,
    pub skipped_probes: usize,
    pub warnings: Vec<String>,
    pub created_at: u64,
    pub finished_at: Option<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Finished jobs kept for status queries. Older ones are dropped as new jobs
/// register.
pub const FINISHED_JOBS_KEPT: usize = 64;

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, JobStatus>,
    /// signature -> id of the job working on it
    active: HashMap<String, String>,
    /// job ids in registration order
    order: VecDeque<String>,
}

impl RegistryState {
    /// Drop the oldest finished jobs beyond `keep`.
    fn prune_finished(&mut self, keep: usize) -> usize {
        let finished = self.jobs.values().filter(|job| job.state.is_finished()).count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return 0;
        }
        let jobs = &mut self.jobs;
        self.order.retain(|id| match jobs.get(id).map(|job| job.state.is_finished()) {
            Some(true) if excess > 0 => {
                jobs.remove(id);
                excess -= 1;
                false
            }
            Some(_) => true,
            None => false,
        });
        finished.saturating_sub(keep)
    }
}

#[derive(Default)]
pub struct JobRegistry {
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a queued job for `signature`.
    ///
    /// Fails with `LearningInProgress` while another job holds the signature.
    pub fn try_register(
        self: &Arc<Self>,
        signature: &str,
        device: &DeviceRef,
        mode: LearnMode,
    ) -> MappingResult<JobReporter> {
        let mut state = self.lock();
        if let Some(job_id) = state.active.get(signature) {
            return Err(MappingError::LearningInProgress {
                signature: signature.to_string(),
                job_id: job_id.clone(),
            });
        }

        let pruned = state.prune_finished(FINISHED_JOBS_KEPT);
        if pruned > 0 {
            tracing::debug!(pruned, "finished jobs dropped from history");
        }

        let id = Uuid::new_v4().to_string();
        state.active.insert(signature.to_string(), id.clone());
        state.order.push_back(id.clone());
        state.jobs.insert(
            id.clone(),
            JobStatus {
                id: id.clone(),
                signature: signature.to_string(),
                device: device.clone(),
                state: JobState::Queued,
                mode,
                completed_steps: 0,
                total_steps: 0,
                message: None,
                skipped_probes: 0,
                warnings: Vec::new(),
                created_at: now_secs(),
                finished_at: None,
            },
        );

        Ok(JobReporter {
            registry: Arc::clone(self),
            id,
            signature: signature.to_string(),
        })
    }

    pub fn status(&self, id: &str) -> MappingResult<JobStatus> {
        self.lock().jobs.get(id).cloned().ok_or_else(|| MappingError::JobNotFound {
            job_id: id.to_string(),
        })
    }

    /// All known jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Id of the job currently holding `signature`.
    pub fn active_job(&self, signature: &str) -> Option<String> {
        self.lock().active.get(signature).cloned()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(job) = self.lock().jobs.get_mut(id) {
            f(job);
        }
    }
}

/// Write handle for one job. Dropping it releases the signature; a job
/// dropped before `finish`/`fail` is marked as errored.
pub struct JobReporter {
    registry: Arc<JobRegistry>,
    id: String,
    signature: String,
}

impl JobReporter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn start(&self, total_steps: usize) {
        self.registry.update(&self.id, |job| {
            job.state = JobState::Running;
            job.total_steps = total_steps;
        });
    }

    /// Probes get added while a quick run refines its fits.
    pub fn add_steps(&self, extra: usize) {
        self.registry.update(&self.id, |job| job.total_steps += extra);
    }

    pub fn step(&self) {
        self.registry.update(&self.id, |job| job.completed_steps += 1);
    }

    pub fn skip_probe(&self, warning: impl Into<String>) {
        let warning = warning.into();
        self.registry.update(&self.id, |job| {
            job.skipped_probes += 1;
            job.completed_steps += 1;
            job.warnings.push(warning);
        });
    }

    pub fn warn(&self, warning: impl Into<String>) {
        let warning = warning.into();
        self.registry.update(&self.id, |job| job.warnings.push(warning));
    }

    pub fn finish(self, message: impl Into<String>) {
        let message = message.into();
        self.registry.update(&self.id, |job| {
            job.state = JobState::Done;
            job.completed_steps = job.total_steps.max(job.completed_steps);
            job.message = Some(message);
            job.finished_at = Some(now_secs());
        });
    }

    pub fn fail(self, err: &MappingError) {
        let message = err.to_string();
        self.registry.update(&self.id, |job| {
            job.state = JobState::Error;
            job.message = Some(message);
            job.finished_at = Some(now_secs());
        });
    }
}

impl Drop for JobReporter {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        if let Some(job) = state.jobs.get_mut(&self.id) {
            if !job.state.is_finished() {
                job.state = JobState::Error;
                job.message = Some("job ended before completing".to_string());
                job.finished_at = Some(now_secs());
            }
        }
        if state.active.get(&self.signature) == Some(&self.id) {
            state.active.remove(&self.signature);
        }
    }
}
