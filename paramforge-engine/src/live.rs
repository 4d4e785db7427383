//! Live device protocol.
//!
//! Everything the engine needs from a running host: list a device's
//! parameters, write one normalized value, read one back.

use crate::errors::MappingResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Address of one device instance in the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub track: i32,
    pub fx: i32,
}

impl DeviceRef {
    pub fn new(track: i32, fx: i32) -> Self {
        Self { track, fx }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {} fx {}", self.track, self.fx)
    }
}

fn default_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamReading {
    pub index: usize,
    pub name: String,
    pub value: f64,
    #[serde(default, alias = "display")]
    pub display_value: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub fx_name: String,
    pub params: Vec<ParamReading>,
}

impl DeviceSnapshot {
    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn reading(&self, index: usize) -> Option<&ParamReading> {
        self.params.iter().find(|p| p.index == index)
    }
}

/// A running host that exposes device parameters.
///
/// Every call is one round trip and may fail independently; callers decide
/// whether a failure is fatal.
pub trait LiveDevice: Send + Sync {
    fn get_params(
        &self,
        device: &DeviceRef,
    ) -> impl Future<Output = MappingResult<DeviceSnapshot>> + Send;

    fn set_param(
        &self,
        device: &DeviceRef,
        index: usize,
        value: f64,
    ) -> impl Future<Output = MappingResult<()>> + Send;

    fn get_param(
        &self,
        device: &DeviceRef,
        index: usize,
    ) -> impl Future<Output = MappingResult<ParamReading>> + Send;
}
