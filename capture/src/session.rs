use std::sync::Arc;
use tracing::{error, info};

use crate::analysis::ImageAnalysis;
use crate::preview::Preview;
use crate::provider::{BindError, BoundCamera, CameraProvider, CameraSelector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Never bound.
    Idle,
    /// The camera claim is held. Frames may have stopped after a device
    /// error; see [`CaptureSession::is_streaming`].
    Bound(BoundCamera),
    /// Previously bound, or a rebind attempt failed.
    Unbound,
}

/// Explicit owner of the camera binding: `Idle -> Bound -> Unbound -> Bound ...`
pub struct CaptureSession {
    provider: Arc<CameraProvider>,
    state: SessionState,
}

impl CaptureSession {
    pub fn new(provider: Arc<CameraProvider>) -> Self {
        Self {
            provider,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Bound(_))
    }

    /// Bound and the camera is still delivering frames.
    pub async fn is_streaming(&self) -> bool {
        self.is_active() && self.provider.is_streaming().await
    }

    /// Unbind everything, then bind `preview` and `analysis` to the camera
    /// chosen by `selector`. A failure is logged and leaves the camera inactive.
    pub async fn bind(
        &mut self,
        selector: CameraSelector,
        preview: &Preview,
        analysis: &ImageAnalysis,
    ) -> Result<BoundCamera, BindError> {
        self.unbind().await;

        match self
            .provider
            .bind_to_lifecycle(selector, Some(preview), Some(analysis))
            .await
        {
            Ok(camera) => {
                self.state = SessionState::Bound(camera.clone());
                Ok(camera)
            }
            Err(e) => {
                error!(error = %e, facing = %selector.lens_facing, "use case binding failed");
                Err(e)
            }
        }
    }

    pub async fn unbind(&mut self) {
        self.provider.unbind_all().await;
        if self.state != SessionState::Idle {
            if let SessionState::Bound(camera) = &self.state {
                info!(camera = camera.id, "capture session unbound");
            }
            self.state = SessionState::Unbound;
        }
    }
}
