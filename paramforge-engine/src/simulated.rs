//! In-memory live device.
//!
//! Each parameter renders its display text through a closure, so tests can
//! model any host curve. Readbacks can be made to fail to exercise the
//! dropped-probe paths.

use crate::errors::{MappingError, MappingResult};
use crate::live::{DeviceRef, DeviceSnapshot, LiveDevice, ParamReading};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub type DisplayFn = Arc<dyn Fn(f64) -> String + Send + Sync>;

struct SimParam {
    name: String,
    value: f64,
    display: DisplayFn,
}

#[derive(Default)]
struct SimState {
    params: Vec<SimParam>,
    /// index -> number of upcoming readbacks that fail
    failing_reads: HashMap<usize, usize>,
    /// index -> values at which every readback fails
    failing_values: HashMap<usize, Vec<f64>>,
    writes: Vec<(usize, f64)>,
    offline: bool,
}

pub struct SimulatedDevice {
    address: DeviceRef,
    fx_name: String,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(address: DeviceRef, fx_name: impl Into<String>) -> Self {
        Self {
            address,
            fx_name: fx_name.into(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_param<F>(self, name: impl Into<String>, value: f64, display: F) -> Self
    where
        F: Fn(f64) -> String + Send + Sync + 'static,
    {
        self.lock().params.push(SimParam {
            name: name.into(),
            value,
            display: Arc::new(display),
        });
        self
    }

    /// Switch-style parameter displaying `off` below 0.5 and `on` from 0.5 up.
    pub fn with_switch(
        self,
        name: impl Into<String>,
        value: f64,
        off: &'static str,
        on: &'static str,
    ) -> Self {
        self.with_param(name, value, move |x| (if x >= 0.5 { on } else { off }).to_string())
    }

    /// Enumerated parameter: `labels` split the domain into equal steps.
    pub fn with_labels(
        self,
        name: impl Into<String>,
        value: f64,
        labels: &'static [&'static str],
    ) -> Self {
        self.with_param(name, value, move |x| {
            let last = labels.len().saturating_sub(1);
            let step = (x.clamp(0.0, 1.0) * last as f64).round() as usize;
            labels.get(step.min(last)).copied().unwrap_or_default().to_string()
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` readbacks of `index` fail.
    pub fn fail_reads(&self, index: usize, count: usize) {
        *self.lock().failing_reads.entry(index).or_insert(0) += count;
    }

    /// Make every readback of `index` fail while it sits at `value`.
    pub fn fail_reads_at(&self, index: usize, value: f64) {
        self.lock().failing_values.entry(index).or_default().push(value);
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.lock().params.get(index).map(|p| p.value)
    }

    /// Every `(index, value)` written so far, in order.
    pub fn writes(&self) -> Vec<(usize, f64)> {
        self.lock().writes.clone()
    }

    fn check_address(&self, device: &DeviceRef) -> MappingResult<()> {
        if *device != self.address {
            return Err(MappingError::DeviceNotFound {
                track: device.track,
                fx: device.fx,
            });
        }
        Ok(())
    }

    fn reading(index: usize, param: &SimParam) -> ParamReading {
        ParamReading {
            index,
            name: param.name.clone(),
            value: param.value,
            display_value: (param.display)(param.value),
            min: 0.0,
            max: 1.0,
        }
    }
}

fn unresponsive(operation: &str) -> MappingError {
    MappingError::LiveUnresponsive {
        operation: operation.to_string(),
    }
}

fn missing(index: usize) -> MappingError {
    MappingError::ParameterNotFound {
        param: format!("#{}", index),
    }
}

impl LiveDevice for SimulatedDevice {
    async fn get_params(&self, device: &DeviceRef) -> MappingResult<DeviceSnapshot> {
        self.check_address(device)?;
        let state = self.lock();
        if state.offline {
            return Err(unresponsive("get_params"));
        }
        Ok(DeviceSnapshot {
            fx_name: self.fx_name.clone(),
            params: state
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| Self::reading(i, p))
                .collect(),
        })
    }

    async fn set_param(&self, device: &DeviceRef, index: usize, value: f64) -> MappingResult<()> {
        self.check_address(device)?;
        let mut state = self.lock();
        if state.offline {
            return Err(unresponsive("set_param"));
        }
        let param = state.params.get_mut(index).ok_or_else(|| missing(index))?;
        param.value = value.clamp(0.0, 1.0);
        state.writes.push((index, value));
        Ok(())
    }

    async fn get_param(&self, device: &DeviceRef, index: usize) -> MappingResult<ParamReading> {
        self.check_address(device)?;
        let mut state = self.lock();
        if state.offline {
            return Err(unresponsive("get_param"));
        }
        if let Some(remaining) = state.failing_reads.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(unresponsive("get_param"));
            }
        }
        let param = state.params.get(index).ok_or_else(|| missing(index))?;
        let blocked = state
            .failing_values
            .get(&index)
            .is_some_and(|values| values.iter().any(|v| (v - param.value).abs() < 1e-9));
        if blocked {
            return Err(unresponsive("get_param"));
        }
        Ok(Self::reading(index, param))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(DeviceRef::new(0, 1), "JS: Test")
            .with_param("Gain", 0.5, |x| format!("{:.1} dB", -60.0 + 72.0 * x))
            .with_switch("Bypass", 0.0, "Off", "On")
            .with_labels("Mode", 0.0, &["Hall", "Room", "Plate"])
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let sim = device();
        let at = DeviceRef::new(0, 1);
        sim.set_param(&at, 0, 1.0).await.unwrap();
        assert_eq!(sim.get_param(&at, 0).await.unwrap().display_value, "12.0 dB");
        sim.set_param(&at, 2, 0.5).await.unwrap();
        assert_eq!(sim.get_param(&at, 2).await.unwrap().display_value, "Room");
        assert_eq!(sim.writes(), vec![(0, 1.0), (2, 0.5)]);
    }

    #[tokio::test]
    async fn test_failing_reads_and_wrong_address() {
        let sim = device();
        let at = DeviceRef::new(0, 1);
        sim.fail_reads(1, 1);
        assert!(sim.get_param(&at, 1).await.is_err());
        assert_eq!(sim.get_param(&at, 1).await.unwrap().display_value, "Off");

        sim.fail_reads_at(0, 1.0);
        sim.set_param(&at, 0, 1.0).await.unwrap();
        assert!(sim.get_param(&at, 0).await.is_err());
        sim.set_param(&at, 0, 0.5).await.unwrap();
        assert!(sim.get_param(&at, 0).await.is_ok());

        let err = sim.get_params(&DeviceRef::new(3, 3)).await.unwrap_err();
        assert_eq!(err.code(), "DEVICE_NOT_FOUND");
        assert_eq!(sim.get_param(&at, 9).await.unwrap_err().code(), "PARAMETER_NOT_FOUND");
    }
}
