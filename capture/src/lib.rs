//! Camera capture for the QR scanner: frame sources, the camera provider that
//! binds them to use cases, and the latest-frame image analysis pipeline.

pub mod analysis;
pub mod device;
pub mod executor;
pub mod preview;
pub mod provider;
pub mod session;

pub use analysis::{Analyzer, ImageAnalysis, ImageProxy, Resolution, StatsSnapshot};
pub use device::CameraDevice;
pub use executor::SerialExecutor;
pub use preview::Preview;
pub use provider::{BindError, BoundCamera, CameraProvider, CameraSelector};
pub use session::{CaptureSession, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to read frame directory {0}: {1}")]
    Directory(String, std::io::Error),
    #[error("frame directory {0} contains no images")]
    EmptyDirectory(String),
    #[error("invalid camera source {id}: {reason}")]
    InvalidSource { id: String, reason: String },
}
