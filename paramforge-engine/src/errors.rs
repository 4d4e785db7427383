//! Error types for mapping, learning and control operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Device not found: track {track}, fx {fx}")]
    DeviceNotFound { track: i32, fx: i32 },

    #[error("Parameter {param} not found")]
    ParameterNotFound { param: String },

    #[error("Parameter {param} is ambiguous: {}", .candidates.join(", "))]
    AmbiguousParameter { param: String, candidates: Vec<String> },

    #[error("No mapping available for device signature {signature}")]
    NoMappingAvailable { signature: String },

    #[error("Insufficient samples for {param}: {count}")]
    InsufficientSamples { param: String, count: usize },

    #[error("Live device did not respond: {operation}")]
    LiveUnresponsive { operation: String },

    #[error(
        "Refinement of {param} did not converge after {iterations} iterations \
         (best {best:.4}, residual {residual:.4})"
    )]
    BisectionNonConvergent {
        param: String,
        best: f64,
        residual: f64,
        iterations: usize,
    },

    #[error("Learning job {job_id} already running for signature {signature}")]
    LearningInProgress { signature: String, job_id: String },

    #[error("Learning job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid parameter: {param} - {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Mapping store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MappingError {
    /// Stable code for callers that match on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            MappingError::ParameterNotFound { .. } => "PARAMETER_NOT_FOUND",
            MappingError::AmbiguousParameter { .. } => "AMBIGUOUS_PARAMETER",
            MappingError::NoMappingAvailable { .. } => "NO_MAPPING_AVAILABLE",
            MappingError::InsufficientSamples { .. } => "INSUFFICIENT_SAMPLES",
            MappingError::LiveUnresponsive { .. } => "LIVE_UNRESPONSIVE",
            MappingError::BisectionNonConvergent { .. } => "BISECTION_NON_CONVERGENT",
            MappingError::LearningInProgress { .. } => "LEARNING_IN_PROGRESS",
            MappingError::JobNotFound { .. } => "JOB_NOT_FOUND",
            MappingError::InvalidParameter { .. } => "INVALID_PARAMETER",
            MappingError::Store { .. } => "STORE_ERROR",
            MappingError::Config { .. } => "CONFIG_ERROR",
            MappingError::Network { .. } => "NETWORK_ERROR",
            MappingError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            MappingError::DeviceNotFound { .. } => {
                "The plugin may have been removed or moved. Refresh the track view."
            }
            MappingError::ParameterNotFound { .. } => {
                "The parameter name may be different. Check the plugin's parameter list."
            }
            MappingError::AmbiguousParameter { .. } => {
                "Use the full parameter name or its index."
            }
            MappingError::NoMappingAvailable { .. } => {
                "Run a learning job for this device first."
            }
            MappingError::InsufficientSamples { .. } => {
                "Re-run learning in exhaustive mode."
            }
            MappingError::LiveUnresponsive { .. } => {
                "Make sure REAPER is running and the ParamForge extension is loaded."
            }
            MappingError::BisectionNonConvergent { .. } => {
                "The device curve is irregular. Re-learn the device in exhaustive mode."
            }
            MappingError::LearningInProgress { .. } => {
                "Wait for the running job to finish and poll its status."
            }
            MappingError::JobNotFound { .. } => "Check the job id.",
            MappingError::InvalidParameter { .. } => "Check the parameter name and value range.",
            MappingError::Store { .. } => {
                "Check permissions and free space of the mapping directory."
            }
            MappingError::Config { .. } => "Check your configuration settings.",
            MappingError::Network { .. } => "Check the connection to the host.",
            MappingError::Internal { .. } => "Please report this issue if it persists.",
        }
    }

    /// Whether retrying the same call can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MappingError::Network { .. }
                | MappingError::LiveUnresponsive { .. }
                | MappingError::LearningInProgress { .. }
                | MappingError::BisectionNonConvergent { .. }
        )
    }
}

/// Serializable error response for callers across a process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub suggestion: String,
    pub recoverable: bool,
}

impl From<MappingError> for ErrorResponse {
    fn from(err: MappingError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            suggestion: err.suggestion().to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

pub type MappingResult<T> = Result<T, MappingError>;

impl From<reqwest::Error> for MappingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            MappingError::LiveUnresponsive {
                operation: "connect".to_string(),
            }
        } else if err.is_timeout() {
            MappingError::LiveUnresponsive {
                operation: "request timed out".to_string(),
            }
        } else {
            MappingError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Store {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for MappingError {
    fn from(err: std::io::Error) -> Self {
        MappingError::Store {
            message: err.to_string(),
        }
    }
}
