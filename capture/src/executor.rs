use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("executor {0} has been shut down")]
pub struct ExecutorShutdown(pub String);

/// A single dedicated thread that runs submitted jobs one after another.
///
/// After `shutdown` no new work is accepted. A job already running is left to
/// finish on its own; nothing is interrupted.
pub struct SerialExecutor {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

impl SerialExecutor {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = name.to_string();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(thread = thread_name, "executor thread started");
            while let Ok(job) = rx.recv() {
                // A panicking job must not take the worker down with it.
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    error!(thread = thread_name, "job panicked");
                }
            }
            debug!(thread = thread_name, "executor thread stopped");
        })?;

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
        })
    }

    pub fn execute<F>(&self, job: F) -> Result<(), ExecutorShutdown>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(ExecutorShutdown(self.name.clone()));
        };
        sender
            .send(Box::new(job))
            .map_err(|_| ExecutorShutdown(self.name.clone()))
    }

    pub fn shutdown(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            debug!(thread = self.name, "executor shutdown requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_in_order_on_one_thread() {
        let executor = SerialExecutor::new("test-serial").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            executor
                .execute(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send((i, name)).unwrap();
                })
                .unwrap();
        }
        let seen: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("test-serial")));
    }

    #[test]
    fn rejects_work_after_shutdown() {
        let executor = SerialExecutor::new("test-shutdown").unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.execute(|| {}).is_err());
    }

    #[test]
    fn survives_panicking_job() {
        let executor = SerialExecutor::new("test-panic").unwrap();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        executor.execute(|| panic!("boom")).unwrap();
        let flag = Arc::clone(&ran);
        let (tx, rx) = mpsc::channel();
        executor
            .execute(move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
