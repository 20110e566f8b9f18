use qr_scanner_common::barcode::{Barcode, BarcodeValue};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

/// Single-line text label. Each write replaces the previous content.
#[derive(Clone)]
pub struct TextView {
    tx: Arc<watch::Sender<String>>,
}

impl Default for TextView {
    fn default() -> Self {
        Self::new()
    }
}

impl TextView {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn set_text(&self, text: String) {
        self.tx.send_replace(text);
    }

    pub fn text(&self) -> String {
        self.tx.borrow().clone()
    }
}

/// Turns decode results into display text.
pub struct ResultPresenter {
    view: TextView,
    guard: Mutex<()>,
}

impl ResultPresenter {
    pub fn new(view: TextView) -> Self {
        Self {
            view,
            guard: Mutex::new(()),
        }
    }

    /// Show the last candidate, or clear the view when there is none.
    /// Only one call proceeds at a time.
    pub fn show_barcodes(&self, barcodes: &[Barcode]) {
        let _exclusive = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let content = barcodes.last().map(format_content).unwrap_or_default();
        debug!(
            candidates = barcodes.len(),
            kind = barcodes.last().map(Barcode::value_type),
            "presenting scan result"
        );
        self.view.set_text(content);
    }
}

pub fn format_content(barcode: &Barcode) -> String {
    match &barcode.value {
        BarcodeValue::Wifi(wifi) => {
            format!("{} {} {}", wifi.ssid, wifi.password, wifi.encryption)
        }
        BarcodeValue::Url(bookmark) => format!("{} {}", bookmark.title, bookmark.url),
        _ => String::new(),
    }
}
