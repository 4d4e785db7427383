//! Short-lived cache of device parameter lists.

use crate::errors::MappingResult;
use crate::live::{DeviceRef, DeviceSnapshot, LiveDevice};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Owned by the engine and shared by reference; there is no process-wide
/// instance.
pub struct SnapshotCache {
    ttl: Duration,
    entries: Mutex<HashMap<DeviceRef, (Instant, DeviceSnapshot)>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceRef, (Instant, DeviceSnapshot)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh cached snapshot, if any.
    pub fn get(&self, device: &DeviceRef) -> Option<DeviceSnapshot> {
        let entries = self.lock();
        entries
            .get(device)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, snapshot)| snapshot.clone())
    }

    pub async fn get_or_fetch<L: LiveDevice>(
        &self,
        device: &DeviceRef,
        live: &L,
    ) -> MappingResult<DeviceSnapshot> {
        if let Some(snapshot) = self.get(device) {
            return Ok(snapshot);
        }
        let snapshot = live.get_params(device).await?;
        self.lock().insert(device.clone(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    pub fn invalidate(&self, device: &DeviceRef) {
        self.lock().remove(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDevice;

    fn device() -> (DeviceRef, SimulatedDevice) {
        let at = DeviceRef::new(0, 0);
        let sim = SimulatedDevice::new(at.clone(), "JS: Gain")
            .with_param("Gain", 0.5, |x| format!("{:.2}", x));
        (at, sim)
    }

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        let (at, sim) = device();
        let cache = SnapshotCache::new(Duration::from_secs(60));

        let first = cache.get_or_fetch(&at, &sim).await.unwrap();
        assert_eq!(first.params[0].display_value, "0.50");

        sim.set_param(&at, 0, 1.0).await.unwrap();
        let stale = cache.get_or_fetch(&at, &sim).await.unwrap();
        assert_eq!(stale.params[0].display_value, "0.50");

        cache.invalidate(&at);
        let fresh = cache.get_or_fetch(&at, &sim).await.unwrap();
        assert_eq!(fresh.params[0].display_value, "1.00");
    }

    #[tokio::test]
    async fn test_zero_ttl_always_fetches() {
        let (at, sim) = device();
        let cache = SnapshotCache::new(Duration::ZERO);
        cache.get_or_fetch(&at, &sim).await.unwrap();
        assert!(cache.get(&at).is_none());
    }
}
