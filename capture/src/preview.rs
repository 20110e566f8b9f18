use qr_scanner_common::frame::Frame;
use std::sync::Arc;
use tokio::sync::watch;

/// Preview use case: keeps the most recent full-resolution frame for display.
#[derive(Clone)]
pub struct Preview {
    surface: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl Default for Preview {
    fn default() -> Self {
        Self::new()
    }
}

impl Preview {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            surface: Arc::new(tx),
        }
    }

    pub(crate) fn publish(&self, frame: Arc<Frame>) {
        self.surface.send_replace(Some(frame));
    }

    /// Latest frame, if the camera has produced one since it was bound.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.surface.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.surface.send_replace(None);
    }
}
