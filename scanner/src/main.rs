mod app;
mod decoder;
mod notice;
mod permission;
mod presenter;
mod recognition;
#[cfg(test)]
mod testing;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use app::{AppDeps, AppEvent, Lifecycle, ScannerApp};
use decoder::QrScanner;
use permission::ConsolePermissions;
use qr_scanner_capture::CameraProvider;
use qr_scanner_common::config::Config;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        sources = config.camera.sources.len(),
        lens_facing = %config.camera.lens_facing,
        ui = config.ui.bind,
        "starting qr-scanner"
    );

    let provider = match CameraProvider::get_instance(&config.camera).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "failed to set up cameras");
            std::process::exit(1);
        }
    };

    let runtime = Handle::current();
    let (permission_tx, mut permission_rx) = mpsc::unbounded_channel();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();

    let deps = AppDeps {
        provider,
        permissions: Arc::new(ConsolePermissions::new(
            config.permission.camera,
            runtime.clone(),
        )),
        scanner: Arc::new(QrScanner::new(runtime.clone())),
        permission_replies: permission_tx,
        runtime,
    };
    let mut app = match ScannerApp::new(&config, deps) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to start analysis worker");
            std::process::exit(1);
        }
    };

    let listener = tokio::net::TcpListener::bind(&config.ui.bind)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to bind to {}: {e}", config.ui.bind);
            std::process::exit(1);
        });
    let router = ui::router(Arc::new(app.ui_state(ui_tx)));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "display server failed");
        }
    });
    info!(addr = config.ui.bind, "display server listening");

    app.on_create().await;

    let lifecycle = loop {
        let event = tokio::select! {
            Some(result) = permission_rx.recv() => AppEvent::Permissions(result),
            Some(command) = ui_rx.recv() => AppEvent::Ui(command),
            _ = tokio::signal::ctrl_c() => AppEvent::Interrupt,
        };
        match app.handle(event).await {
            Lifecycle::Running => continue,
            done => break done,
        }
    };

    app.on_destroy().await;
    if lifecycle == Lifecycle::Finish {
        std::process::exit(1);
    }
}
