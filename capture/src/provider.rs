use futures_util::StreamExt;
use qr_scanner_common::config::{CameraConfig, LensFacing};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::analysis::ImageAnalysis;
use crate::device::{self, CameraDevice, FrameStream};
use crate::preview::Preview;
use crate::CaptureError;

/// Picks a camera by the direction it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelector {
    pub lens_facing: LensFacing,
}

impl CameraSelector {
    pub const DEFAULT_BACK_CAMERA: Self = Self {
        lens_facing: LensFacing::Back,
    };
    pub const DEFAULT_FRONT_CAMERA: Self = Self {
        lens_facing: LensFacing::Front,
    };

    pub fn new(lens_facing: LensFacing) -> Self {
        Self { lens_facing }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("use cases are already bound to camera {0}")]
    AlreadyBound(String),
    #[error("no camera available with lens facing {0}")]
    NoCamera(LensFacing),
    #[error("failed to open camera {id}: {source}")]
    Connect {
        id: String,
        #[source]
        source: CaptureError,
    },
}

/// The camera a set of use cases is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundCamera {
    pub id: String,
    pub facing: LensFacing,
}

struct ActiveBinding {
    camera: BoundCamera,
    pump: JoinHandle<()>,
    preview: Option<Preview>,
    analysis: Option<ImageAnalysis>,
}

/// Owns the available cameras and at most one active binding.
pub struct CameraProvider {
    cameras: Vec<Arc<dyn CameraDevice>>,
    active: Mutex<Option<ActiveBinding>>,
}

impl CameraProvider {
    /// Build the provider from config.
    pub async fn get_instance(config: &CameraConfig) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CaptureError::HttpConnect)?;

        let mut cameras = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let camera = device::from_config(source, &client)?;
            debug!(id = camera.id(), facing = %camera.facing(), mode = ?source.mode, "camera registered");
            cameras.push(camera);
        }
        Ok(Self::with_cameras(cameras))
    }

    pub fn with_cameras(cameras: Vec<Arc<dyn CameraDevice>>) -> Self {
        Self {
            cameras,
            active: Mutex::new(None),
        }
    }

    pub fn has_camera(&self, selector: CameraSelector) -> bool {
        self.cameras
            .iter()
            .any(|c| c.facing() == selector.lens_facing)
    }

    pub async fn bound_camera(&self) -> Option<BoundCamera> {
        self.active.lock().await.as_ref().map(|b| b.camera.clone())
    }

    /// Whether the bound camera is still delivering frames. The claim can
    /// outlive the stream after a device error.
    pub async fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|b| !b.pump.is_finished())
    }

    /// Open the first camera matching `selector` and start feeding the given
    /// use cases. Fails if use cases are still bound.
    pub async fn bind_to_lifecycle(
        &self,
        selector: CameraSelector,
        preview: Option<&Preview>,
        analysis: Option<&ImageAnalysis>,
    ) -> Result<BoundCamera, BindError> {
        let mut active = self.active.lock().await;
        if let Some(binding) = active.as_ref() {
            return Err(BindError::AlreadyBound(binding.camera.id.clone()));
        }

        let camera = self
            .cameras
            .iter()
            .find(|c| c.facing() == selector.lens_facing)
            .ok_or(BindError::NoCamera(selector.lens_facing))?;

        let stream = camera.connect().await.map_err(|source| BindError::Connect {
            id: camera.id().to_string(),
            source,
        })?;

        let bound = BoundCamera {
            id: camera.id().to_string(),
            facing: camera.facing(),
        };
        if let Some(analysis) = analysis {
            analysis.attach();
        }
        let pump = tokio::spawn(pump_frames(
            bound.id.clone(),
            stream,
            preview.cloned(),
            analysis.cloned(),
        ));

        info!(camera = bound.id, facing = %bound.facing, "use cases bound");
        *active = Some(ActiveBinding {
            camera: bound.clone(),
            pump,
            preview: preview.cloned(),
            analysis: analysis.cloned(),
        });
        Ok(bound)
    }

    /// Stop frame delivery and release the camera claim.
    pub async fn unbind_all(&self) {
        let Some(binding) = self.active.lock().await.take() else {
            return;
        };
        binding.pump.abort();
        if let Some(analysis) = &binding.analysis {
            analysis.detach();
        }
        if let Some(preview) = &binding.preview {
            preview.clear();
        }
        info!(camera = binding.camera.id, "use cases unbound");
    }
}

async fn pump_frames(
    camera_id: String,
    mut stream: FrameStream,
    preview: Option<Preview>,
    analysis: Option<ImageAnalysis>,
) {
    let mut total: u64 = 0;

    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => {
                if frame.is_empty() {
                    debug!(seq = frame.seq, camera = camera_id, "empty frame skipped");
                    continue;
                }
                total += 1;
                if total % 100 == 0 {
                    debug!(total, camera = camera_id, captured = %frame.timestamp_label(), "frames captured");
                }
                let frame = Arc::new(frame);
                if let Some(preview) = &preview {
                    preview.publish(Arc::clone(&frame));
                }
                if let Some(analysis) = &analysis {
                    analysis.offer(frame);
                }
            }
            Err(e) => {
                error!(error = %e, camera = camera_id, "camera stream failed, camera inactive");
                break;
            }
        }
    }

    info!(camera = camera_id, total, "camera stream ended");
    if let Some(analysis) = &analysis {
        analysis.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCamera;

    #[tokio::test]
    async fn binds_camera_matching_selector() {
        let provider = CameraProvider::with_cameras(vec![
            FakeCamera::new("front-cam", LensFacing::Front, 3),
            FakeCamera::new("rear-cam", LensFacing::Back, 3),
        ]);
        let preview = Preview::new();
        let analysis = ImageAnalysis::builder().build();

        let bound = provider
            .bind_to_lifecycle(
                CameraSelector::DEFAULT_BACK_CAMERA,
                Some(&preview),
                Some(&analysis),
            )
            .await
            .unwrap();
        assert_eq!(bound.id, "rear-cam");
        assert!(analysis.is_attached());

        tokio::time::timeout(Duration::from_secs(2), async {
            while preview.latest().map(|f| f.seq) != Some(2) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        // No analyzer set, so every offered frame is dropped.
        assert_eq!(analysis.stats().delivered, 0);
    }

    #[tokio::test]
    async fn second_bind_requires_unbind() {
        let provider =
            CameraProvider::with_cameras(vec![FakeCamera::endless("rear", LensFacing::Back)]);
        let preview = Preview::new();
        provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, Some(&preview), None)
            .await
            .unwrap();

        let err = provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, Some(&preview), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::AlreadyBound(id) if id == "rear"));

        provider.unbind_all().await;
        assert!(provider.bound_camera().await.is_none());
        assert!(preview.latest().is_none());
        provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, Some(&preview), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_facing_is_no_camera() {
        let provider =
            CameraProvider::with_cameras(vec![FakeCamera::new("rear", LensFacing::Back, 1)]);
        assert!(!provider.has_camera(CameraSelector::DEFAULT_FRONT_CAMERA));
        let err = provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_FRONT_CAMERA, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::NoCamera(LensFacing::Front)));
    }

    #[tokio::test]
    async fn connect_failure_leaves_provider_unbound() {
        let provider =
            CameraProvider::with_cameras(vec![FakeCamera::broken("rear", LensFacing::Back)]);
        let analysis = ImageAnalysis::builder().build();
        let err = provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, None, Some(&analysis))
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::Connect { .. }));
        assert!(provider.bound_camera().await.is_none());
        assert!(!analysis.is_attached());
    }

    #[tokio::test]
    async fn stream_end_detaches_analysis() {
        let provider =
            CameraProvider::with_cameras(vec![FakeCamera::new("rear", LensFacing::Back, 2)]);
        let analysis = ImageAnalysis::builder().build();
        provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, None, Some(&analysis))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while analysis.is_attached() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        // The claim stays until explicitly released.
        assert!(provider.bound_camera().await.is_some());
    }

    #[tokio::test]
    async fn streaming_tracks_pump() {
        let provider =
            CameraProvider::with_cameras(vec![FakeCamera::endless("rear", LensFacing::Back)]);
        assert!(!provider.is_streaming().await);
        provider
            .bind_to_lifecycle(CameraSelector::DEFAULT_BACK_CAMERA, None, None)
            .await
            .unwrap();
        assert!(provider.is_streaming().await);
        provider.unbind_all().await;
        assert!(!provider.is_streaming().await);
    }

    #[tokio::test]
    async fn get_instance_builds_configured_devices() {
        let config: CameraConfig = toml::from_str(
            r#"
            [[sources]]
            id = "rear"
            url = "http://127.0.0.1:1/stream"

            [[sources]]
            id = "front"
            facing = "front"
            url = "http://127.0.0.1:1/frame"
            mode = "polling"
            "#,
        )
        .unwrap();
        let provider = CameraProvider::get_instance(&config).await.unwrap();
        assert!(provider.has_camera(CameraSelector::DEFAULT_BACK_CAMERA));
        assert!(provider.has_camera(CameraSelector::DEFAULT_FRONT_CAMERA));
    }
}
