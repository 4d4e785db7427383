//! ParamForge engine
//!
//! Learns how live DAW device parameters map between the host's normalized
//! 0..1 values and what the device displays, and drives parameters to
//! display-unit targets using those mappings.
//!
//! - `learning`: background jobs that sample a device and store its mapping
//! - `control`: display/label targets -> normalized writes with readback

pub mod config;
pub mod control;
pub mod errors;
pub mod jobs;
pub mod labels;
pub mod learning;
pub mod live;
pub mod logging;
pub mod mapping_store;
pub mod reaper_client;
pub mod simulated;
pub mod snapshot_cache;

pub use config::EngineConfig;
pub use control::{simulate, ControlService, ResolveOptions, ResolveOutcome, TargetValue};
pub use errors::{ErrorResponse, MappingError, MappingResult};
pub use jobs::{JobRegistry, JobState, JobStatus, LearnMode};
pub use learning::{LearnRequest, LearningJobHandle, LearningService};
pub use live::{DeviceRef, DeviceSnapshot, LiveDevice, ParamReading};
pub use mapping_store::{InMemoryMappingStore, JsonFileMappingStore, MappingStore};
pub use reaper_client::ReaperClient;
pub use simulated::SimulatedDevice;
pub use snapshot_cache::SnapshotCache;

use paramforge_core::mapping::DeviceMapping;
use paramforge_core::resolver::ParamRef;
use paramforge_core::signature::compute_signature;
use std::collections::HashMap;
use std::sync::Arc;

/// Wires the services around one live host and one mapping store.
pub struct Engine<L> {
    config: Arc<EngineConfig>,
    live: Arc<L>,
    store: Arc<dyn MappingStore>,
    cache: Arc<SnapshotCache>,
    learning: LearningService<L>,
    control: ControlService<L>,
}

impl Engine<ReaperClient> {
    /// REAPER over HTTP with mappings stored as JSON files.
    pub fn connect(config: EngineConfig) -> MappingResult<Self> {
        config.validate()?;
        let live = ReaperClient::new(config.reaper_url.clone(), config.request_timeout())?;
        let store = JsonFileMappingStore::new(config.mapping_dir());
        tracing::info!(
            url = %config.reaper_url,
            mappings = %store.dir().display(),
            "engine configured"
        );
        Ok(Self::new(Arc::new(live), Arc::new(store), config))
    }
}

impl<L: LiveDevice + 'static> Engine<L> {
    pub fn new(live: Arc<L>, store: Arc<dyn MappingStore>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(SnapshotCache::new(config.snapshot_ttl()));
        let registry = JobRegistry::new();
        let learning = LearningService::new(
            Arc::clone(&live),
            Arc::clone(&store),
            registry,
            Arc::clone(&cache),
            Arc::clone(&config),
        );
        let control = ControlService::new(
            Arc::clone(&live),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&config),
        );
        Self {
            config,
            live,
            store,
            cache,
            learning,
            control,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn live(&self) -> &Arc<L> {
        &self.live
    }

    pub fn learning(&self) -> &LearningService<L> {
        &self.learning
    }

    pub fn control(&self) -> &ControlService<L> {
        &self.control
    }

    pub async fn start_learning(&self, request: LearnRequest) -> MappingResult<LearningJobHandle> {
        self.learning.start(request).await
    }

    pub fn job_status(&self, id: &str) -> MappingResult<JobStatus> {
        self.learning.registry().status(id)
    }

    pub fn mapping(&self, signature: &str) -> MappingResult<Option<DeviceMapping>> {
        self.store.get(signature)
    }

    /// Stored mapping for the device's current structure, if still valid.
    pub async fn mapping_for(&self, device: &DeviceRef) -> MappingResult<Option<DeviceMapping>> {
        let snapshot = self.cache.get_or_fetch(device, self.live.as_ref()).await?;
        let names = snapshot.param_names();
        let mapping = self.store.get(&compute_signature(&names))?;
        Ok(mapping.filter(|m| m.matches_structure(&names)))
    }

    pub async fn resolve_target(
        &self,
        device: &DeviceRef,
        param: &ParamRef,
        target: &TargetValue,
        options: &ResolveOptions,
    ) -> MappingResult<ResolveOutcome> {
        self.control.resolve_target(device, None, param, target, options).await
    }

    /// Dependents currently switched off by their masters.
    pub async fn inactive_dependents(&self, device: &DeviceRef) -> MappingResult<Vec<String>> {
        let snapshot = self.cache.get_or_fetch(device, self.live.as_ref()).await?;
        let names = snapshot.param_names();
        let signature = compute_signature(&names);
        let mapping = self
            .store
            .get(&signature)?
            .filter(|m| m.matches_structure(&names))
            .ok_or(MappingError::NoMappingAvailable { signature })?;

        let values: HashMap<String, f64> = snapshot
            .params
            .iter()
            .filter(|p| mapping.grouping.masters.contains(&p.name))
            .map(|p| (p.name.clone(), p.value))
            .collect();
        Ok(mapping.grouping.inactive_dependents(&values, self.config.active_threshold))
    }
}
