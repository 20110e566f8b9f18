use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLength {
    Short,
    Long,
}

impl NoticeLength {
    pub fn duration(self) -> Duration {
        match self {
            NoticeLength::Short => Duration::from_millis(2000),
            NoticeLength::Long => Duration::from_millis(3500),
        }
    }
}

struct Notice {
    text: String,
    expires_at: Instant,
}

/// Transient one-line messages. A new notice replaces the current one.
#[derive(Clone, Default)]
pub struct Notifier {
    current: Arc<Mutex<Option<Notice>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, text: impl Into<String>, length: NoticeLength) {
        self.show_at(text.into(), length, Instant::now());
    }

    fn show_at(&self, text: String, length: NoticeLength, now: Instant) {
        info!(notice = %text, ?length, "notice shown");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(Notice {
            text,
            expires_at: now + length.duration(),
        });
    }

    /// The notice still visible now, if any.
    pub fn current(&self) -> Option<String> {
        self.current_at(Instant::now())
    }

    pub fn current_at(&self, now: Instant) -> Option<String> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(notice) if now < notice.expires_at => Some(notice.text.clone()),
            Some(_) => {
                *current = None;
                None
            }
            None => None,
        }
    }
}
