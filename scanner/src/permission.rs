use qr_scanner_common::config::PermissionMode;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Request code used for the camera permission prompt.
pub const REQUEST_CODE_PERMISSIONS: i32 = 100;

pub const REQUIRED_PERMISSIONS: [Permission; 1] = [Permission::Camera];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Camera,
}

impl Permission {
    pub fn name(self) -> &'static str {
        match self {
            Permission::Camera => "camera",
        }
    }
}

/// Answer to a `request_permissions` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionsResult {
    pub request_code: i32,
    pub permissions: Vec<Permission>,
    pub grants: Vec<bool>,
}

impl PermissionsResult {
    pub fn all_granted(&self) -> bool {
        !self.grants.is_empty() && self.grants.iter().all(|g| *g)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("stdin is not interactive")]
    NotInteractive,
    #[error("permission prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Runtime capability checks.
pub trait PermissionService: Send + Sync {
    fn check_self_permission(&self, permission: Permission) -> bool;

    /// Ask for `permissions`. Returns at once; the answer is sent on `reply`
    /// tagged with `request_code`.
    fn request_permissions(
        &self,
        permissions: &[Permission],
        request_code: i32,
        reply: mpsc::UnboundedSender<PermissionsResult>,
    );
}

/// Permission service backed by config and, in `ask` mode, a terminal prompt.
pub struct ConsolePermissions {
    mode: PermissionMode,
    granted: Arc<AtomicBool>,
    runtime: Handle,
}

impl ConsolePermissions {
    pub fn new(mode: PermissionMode, runtime: Handle) -> Self {
        Self {
            mode,
            granted: Arc::new(AtomicBool::new(mode == PermissionMode::Granted)),
            runtime,
        }
    }
}

impl PermissionService for ConsolePermissions {
    fn check_self_permission(&self, _permission: Permission) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_permissions(
        &self,
        permissions: &[Permission],
        request_code: i32,
        reply: mpsc::UnboundedSender<PermissionsResult>,
    ) {
        let permissions = permissions.to_vec();
        let mode = self.mode;
        let granted = Arc::clone(&self.granted);

        self.runtime.spawn(async move {
            let allow = match mode {
                PermissionMode::Granted => true,
                PermissionMode::Denied => false,
                PermissionMode::Ask => {
                    let names: Vec<&str> = permissions.iter().map(|p| p.name()).collect();
                    let question = format!("Allow access to {}? [y/N] ", names.join(", "));
                    match run_detached(move || prompt(&question)).await {
                        Ok(Ok(answer)) => answer,
                        Ok(Err(e)) => {
                            warn!(error = %e, "permission prompt unavailable, treating as denied");
                            false
                        }
                        Err(_) => {
                            warn!("permission prompt thread ended without an answer");
                            false
                        }
                    }
                }
            };

            if allow {
                granted.store(true, Ordering::SeqCst);
            }
            info!(request_code, granted = allow, "permission request answered");
            let grants = vec![allow; permissions.len()];
            let _ = reply.send(PermissionsResult {
                request_code,
                permissions,
                grants,
            });
        });
    }
}

/// Run a blocking read on its own thread, outside the runtime's blocking
/// pool, so shutting the runtime down never waits on the terminal.
fn run_detached<F>(job: F) -> oneshot::Receiver<Result<bool, PermissionError>>
where
    F: FnOnce() -> Result<bool, PermissionError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("permission-prompt".into())
        .spawn(move || {
            let _ = tx.send(job());
        });
    if let Err(e) = spawned {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(PermissionError::Prompt(e)));
        return rx;
    }
    rx
}

fn prompt(question: &str) -> Result<bool, PermissionError> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Err(PermissionError::NotInteractive);
    }
    let mut stderr = std::io::stderr();
    stderr.write_all(question.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(is_affirmative(&line))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn request(service: &ConsolePermissions) -> PermissionsResult {
        let (tx, mut rx) = mpsc::unbounded_channel();
        service.request_permissions(&REQUIRED_PERMISSIONS, REQUEST_CODE_PERMISSIONS, tx);
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn granted_mode_is_granted_up_front() {
        let service = ConsolePermissions::new(PermissionMode::Granted, Handle::current());
        assert!(service.check_self_permission(Permission::Camera));
        let result = request(&service).await;
        assert!(result.all_granted());
    }

    #[tokio::test]
    async fn denied_mode_answers_deny() {
        let service = ConsolePermissions::new(PermissionMode::Denied, Handle::current());
        assert!(!service.check_self_permission(Permission::Camera));

        let result = request(&service).await;
        assert_eq!(result.request_code, REQUEST_CODE_PERMISSIONS);
        assert_eq!(result.permissions, vec![Permission::Camera]);
        assert_eq!(result.grants, vec![false]);
        assert!(!result.all_granted());
        assert!(!service.check_self_permission(Permission::Camera));
    }

    #[test]
    fn runtime_shutdown_does_not_wait_for_prompt() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            // Stands in for a read_line nobody answers.
            let _pending = run_detached(move || {
                let _ = release_rx.recv();
                Ok(false)
            });
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn detached_job_answer_is_delivered() {
        let answer = run_detached(|| Ok(true)).await.unwrap();
        assert!(answer.unwrap());
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn empty_result_is_not_a_grant() {
        let result = PermissionsResult {
            request_code: REQUEST_CODE_PERMISSIONS,
            permissions: vec![],
            grants: vec![],
        };
        assert!(!result.all_granted());
    }
}
