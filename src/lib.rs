//! rPPG Flux - On-device camera vitals from face video
//!
//! Flux estimates heart rate and heart-rate variability from the tiny colour
//! changes blood flow causes in facial skin (remote photoplethysmography),
//! through a deterministic pipeline: region tracking → signal extraction →
//! conditioning and region fusion → vitals estimation → risk assessment →
//! report encoding.
//!
//! Build with the `opencv` feature for Haar cascade face detection and
//! video-file input; without it the skin-colour cascade locates the face.
//!
//! Stress, blood pressure and risk outputs are heuristics for wellness use
//! only. SpO2 is reported as unsupported.

pub mod conditioner;
pub mod config;
pub mod dsp;
pub mod encoder;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod risk;
pub mod source;
pub mod synthetic;
pub mod tracker;
pub mod types;
pub mod vitals;

pub use config::{AnalysisConfig, DetectionStrategy};
pub use encoder::{ReportEncoder, VitalsReport};
pub use error::ComputeError;
pub use pipeline::{analyze, analyze_with_cancel, raw_rgb_to_report, VitalsProcessor};
pub use source::{FrameSource, ImageSequenceSource, MemoryFrameSource, RawRgbSource};
#[cfg(feature = "opencv")]
pub use source::VideoFileSource;
pub use synthetic::SyntheticFaceVideo;
pub use tracker::{DetectorChain, LandmarkModel, RegionDetector, SkinCascadeDetector};
#[cfg(feature = "opencv")]
pub use tracker::HaarCascadeDetector;
pub use types::{Analysis, FaceRegion, Frame, FrequencyHrv, Roi, Vitals};

/// Re-exported so callers can cancel without depending on tokio-util directly
pub use tokio_util::sync::CancellationToken;

/// Version embedded in all reports
pub const RPPG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "rppg-flux";
