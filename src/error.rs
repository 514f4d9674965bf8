//! Error types for rPPG Flux

use thiserror::Error;

/// Errors that can occur during an analysis
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to decode frames: {0}")]
    Decode(String),

    #[error(
        "Face detected in only {detected}/{total} frames ({:.1}%, minimum {:.1}%)",
        ratio * 100.0,
        required * 100.0
    )]
    InsufficientDetection {
        detected: usize,
        total: usize,
        ratio: f64,
        required: f64,
    },

    #[error("Extracted signal has no valid samples")]
    ZeroSignal,

    #[error("Extracted signal is flat (standard deviation {0:e})")]
    ZeroVariance(f64),

    #[error("Signal too short: {samples} samples, at least {required} required")]
    SignalTooShort { samples: usize, required: usize },

    #[error("Analysis cancelled after {0} frames")]
    Cancelled(usize),

    #[error("Face detector unavailable: {0}")]
    DetectorInit(String),

    #[error("Unsupported measurement: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComputeError {
    /// Stable name of the failing condition, surfaced to callers alongside the message
    pub fn kind(&self) -> &'static str {
        match self {
            ComputeError::Decode(_) => "DecodeError",
            ComputeError::InsufficientDetection { .. } => "InsufficientDetectionError",
            ComputeError::ZeroSignal => "ZeroSignalError",
            ComputeError::ZeroVariance(_) => "ZeroVarianceError",
            ComputeError::SignalTooShort { .. } => "SignalTooShortError",
            ComputeError::Cancelled(_) => "CancelledError",
            ComputeError::DetectorInit(_) => "DetectorInitError",
            ComputeError::Unsupported(_) => "UnsupportedError",
            ComputeError::InvalidConfig(_) => "InvalidConfigError",
            ComputeError::ConfigParse(_) | ComputeError::ConfigSerialize(_) => "ConfigError",
            ComputeError::JsonError(_) => "JsonError",
            ComputeError::Io(_) => "IoError",
        }
    }

    /// Plain-language cause and advice
    pub fn hint(&self) -> &'static str {
        match self {
            ComputeError::Decode(_) => "The video could not be read. Check the file and its format",
            ComputeError::InsufficientDetection { .. } => {
                "Too few frames showed a face. Retry with better lighting and keep the face centered"
            }
            ComputeError::ZeroSignal => "No usable skin pixels were sampled from the video",
            ComputeError::ZeroVariance(_) => {
                "The face was found but its color never changed. Check exposure and camera auto-correction"
            }
            ComputeError::SignalTooShort { .. } => "Record a longer video (at least 10-30 seconds)",
            ComputeError::Cancelled(_) => "The analysis was cancelled by the caller",
            ComputeError::DetectorInit(_) => {
                "Check the Haar cascade path, or build with the opencv feature to use it"
            }
            ComputeError::Unsupported(_) => "This measurement cannot be estimated from visible-light video",
            ComputeError::InvalidConfig(_)
            | ComputeError::ConfigParse(_)
            | ComputeError::ConfigSerialize(_) => "Fix the configuration file and retry",
            ComputeError::JsonError(_) => "Check JSON syntax",
            ComputeError::Io(_) => "Check file paths and permissions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_signal_kinds_are_distinct() {
        assert_ne!(ComputeError::ZeroSignal.kind(), ComputeError::ZeroVariance(0.0).kind());
    }

    #[test]
    fn test_insufficient_detection_message() {
        let err = ComputeError::InsufficientDetection {
            detected: 12,
            total: 100,
            ratio: 0.12,
            required: 0.6,
        };
        let msg = err.to_string();
        assert!(msg.contains("12/100"));
        assert!(msg.contains("12.0%"));
        assert_eq!(err.kind(), "InsufficientDetectionError");
    }
}
