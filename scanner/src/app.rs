use qr_scanner_capture::{
    CameraProvider, CameraSelector, CaptureSession, ImageAnalysis, Preview, SerialExecutor,
};
use qr_scanner_common::config::{Config, LensFacing};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decoder::BarcodeScanner;
use crate::notice::{NoticeLength, Notifier};
use crate::permission::{
    PermissionService, PermissionsResult, REQUEST_CODE_PERMISSIONS, REQUIRED_PERMISSIONS,
};
use crate::presenter::{ResultPresenter, TextView};
use crate::recognition::RecognitionAdapter;
use crate::ui::{UiCommand, UiState};

pub const PERMISSION_DENIED_NOTICE: &str = "Permissions not granted by the user.";

#[derive(Debug)]
pub enum AppEvent {
    Permissions(PermissionsResult),
    Ui(UiCommand),
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    /// The app gave up, e.g. after a permission denial.
    Finish,
    /// Stopped by the operator.
    Stop,
}

/// Everything the controller needs from outside.
pub struct AppDeps {
    pub provider: Arc<CameraProvider>,
    pub permissions: Arc<dyn PermissionService>,
    pub scanner: Arc<dyn BarcodeScanner>,
    pub permission_replies: mpsc::UnboundedSender<PermissionsResult>,
    pub runtime: Handle,
}

/// Screen controller: gates on the camera permission, owns the capture
/// session, and wires analysis frames through recognition to the display.
pub struct ScannerApp {
    permissions: Arc<dyn PermissionService>,
    permission_replies: mpsc::UnboundedSender<PermissionsResult>,
    session: CaptureSession,
    preview: Preview,
    analysis: ImageAnalysis,
    executor: Arc<SerialExecutor>,
    adapter: Arc<RecognitionAdapter>,
    view: TextView,
    notifier: Notifier,
    lens_facing: LensFacing,
    camera_started: bool,
}

impl ScannerApp {
    pub fn new(config: &Config, deps: AppDeps) -> std::io::Result<Self> {
        let view = TextView::new();
        let notifier = Notifier::new();
        let presenter = Arc::new(ResultPresenter::new(view.clone()));
        let adapter = Arc::new(RecognitionAdapter::new(
            deps.scanner,
            presenter,
            notifier.clone(),
            deps.runtime,
        ));
        let executor = Arc::new(SerialExecutor::new("camera-analysis")?);
        let analysis = ImageAnalysis::builder()
            .target_resolution(config.analysis.target_width, config.analysis.target_height)
            .build();

        Ok(Self {
            permissions: deps.permissions,
            permission_replies: deps.permission_replies,
            session: CaptureSession::new(deps.provider),
            preview: Preview::new(),
            analysis,
            executor,
            adapter,
            view,
            notifier,
            lens_facing: config.camera.lens_facing,
            camera_started: false,
        })
    }

    /// Shared state for the display surface.
    pub fn ui_state(&self, commands: mpsc::UnboundedSender<UiCommand>) -> UiState {
        UiState {
            view: self.view.clone(),
            notifier: self.notifier.clone(),
            preview: self.preview.clone(),
            commands,
        }
    }

    pub async fn on_create(&mut self) {
        if self.all_permissions_granted() {
            self.start_camera().await;
        } else {
            info!("camera permission not granted, requesting");
            self.permissions.request_permissions(
                &REQUIRED_PERMISSIONS,
                REQUEST_CODE_PERMISSIONS,
                self.permission_replies.clone(),
            );
        }
    }

    pub async fn handle(&mut self, event: AppEvent) -> Lifecycle {
        match event {
            AppEvent::Permissions(result) => self.on_request_permissions_result(result).await,
            AppEvent::Ui(UiCommand::SwitchCamera(facing)) => {
                self.switch_camera(facing).await;
                Lifecycle::Running
            }
            AppEvent::Interrupt => Lifecycle::Stop,
        }
    }

    pub async fn on_request_permissions_result(&mut self, result: PermissionsResult) -> Lifecycle {
        if result.request_code != REQUEST_CODE_PERMISSIONS {
            debug!(request_code = result.request_code, "ignoring unrelated permission result");
            return Lifecycle::Running;
        }
        let names: Vec<&str> = result.permissions.iter().map(|p| p.name()).collect();
        debug!(
            permissions = ?names,
            reported = result.all_granted(),
            "permission result received"
        );
        // The service's current state decides, not the reported grants.
        if self.all_permissions_granted() {
            self.start_camera().await;
            Lifecycle::Running
        } else {
            warn!("camera permission denied");
            self.notifier.show(PERMISSION_DENIED_NOTICE, NoticeLength::Short);
            Lifecycle::Finish
        }
    }

    /// Bind preview and analysis to the selected camera. A bind failure is
    /// logged by the session and leaves the camera inactive.
    pub async fn start_camera(&mut self) {
        self.camera_started = true;
        self.analysis
            .set_analyzer(Arc::clone(&self.executor), self.adapter.clone());
        let _ = self
            .session
            .bind(
                CameraSelector::new(self.lens_facing),
                &self.preview,
                &self.analysis,
            )
            .await;
    }

    /// Select another camera; rebinds when the camera is running.
    pub async fn switch_camera(&mut self, facing: LensFacing) {
        self.lens_facing = facing;
        if self.camera_started {
            self.start_camera().await;
        }
    }

    pub async fn on_destroy(&mut self) {
        self.session.unbind().await;
        self.analysis.clear_analyzer();
        self.executor.shutdown();
        info!("scanner stopped");
    }

    fn all_permissions_granted(&self) -> bool {
        REQUIRED_PERMISSIONS
            .iter()
            .all(|p| self.permissions.check_self_permission(*p))
    }
}
