//! HTTP client for the REAPER extension.

use crate::errors::{MappingError, MappingResult};
use crate::live::{DeviceRef, DeviceSnapshot, LiveDevice, ParamReading};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReaperClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FXParamEntry {
    pub index: usize,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl From<FXParamEntry> for ParamReading {
    fn from(entry: FXParamEntry) -> Self {
        ParamReading {
            index: entry.index,
            name: entry.name,
            value: entry.value,
            display_value: entry.display,
            min: entry.min.unwrap_or(0.0),
            max: entry.max.unwrap_or(1.0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FXParamSnapshot {
    pub track: i32,
    pub fx: i32,
    #[serde(default)]
    pub fx_name: String,
    pub params: Vec<FXParamEntry>,
}

impl ReaperClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MappingResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Health check: is the extension answering?
    pub async fn ping(&self) -> MappingResult<bool> {
        let response = self.client.get(format!("{}/ping", self.base_url)).send().await?;
        Ok(response.status().is_success())
    }

    async fn failure(response: reqwest::Response, operation: &str) -> MappingError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        MappingError::Network {
            message: format!("{} failed with {}: {}", operation, status, body.trim()),
        }
    }

    pub async fn get_fx_params(&self, track: i32, fx: i32) -> MappingResult<FXParamSnapshot> {
        let response = self
            .client
            .get(format!("{}/fx/params", self.base_url))
            .query(&[("track", track), ("fx", fx)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MappingError::DeviceNotFound { track, fx });
        }
        if !response.status().is_success() {
            return Err(Self::failure(response, "get_fx_params").await);
        }

        let snapshot: FXParamSnapshot = response.json().await?;
        Ok(snapshot)
    }
}

impl LiveDevice for ReaperClient {
    async fn get_params(&self, device: &DeviceRef) -> MappingResult<DeviceSnapshot> {
        let snapshot = self.get_fx_params(device.track, device.fx).await?;
        Ok(DeviceSnapshot {
            fx_name: snapshot.fx_name,
            params: snapshot.params.into_iter().map(ParamReading::from).collect(),
        })
    }

    async fn set_param(&self, device: &DeviceRef, index: usize, value: f64) -> MappingResult<()> {
        let response = self
            .client
            .post(format!("{}/fx/param", self.base_url))
            .json(&json!({
                "track": device.track,
                "fx": device.fx,
                "param": index,
                "value": value
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MappingError::ParameterNotFound {
                param: format!("#{} on {}", index, device),
            });
        }
        if !response.status().is_success() {
            return Err(Self::failure(response, "set_param").await);
        }
        Ok(())
    }

    async fn get_param(&self, device: &DeviceRef, index: usize) -> MappingResult<ParamReading> {
        let response = self
            .client
            .get(format!("{}/fx/param", self.base_url))
            .query(&[("track", device.track), ("fx", device.fx)])
            .query(&[("param", index)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MappingError::ParameterNotFound {
                param: format!("#{} on {}", index, device),
            });
        }
        if !response.status().is_success() {
            return Err(Self::failure(response, "get_param").await);
        }

        let entry: FXParamEntry = response.json().await?;
        Ok(entry.into())
    }
}
