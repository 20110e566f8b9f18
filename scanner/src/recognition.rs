use qr_scanner_capture::{Analyzer, ImageProxy};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::decoder::{BarcodeScanner, InputImage, ScanError};
use crate::notice::{NoticeLength, Notifier};
use crate::presenter::ResultPresenter;

/// Feeds analysis frames to the barcode scanner and routes the outcome.
///
/// The frame is held until the scan completes, so the analysis pipeline
/// never has more than one scan outstanding.
pub struct RecognitionAdapter {
    scanner: Arc<dyn BarcodeScanner>,
    presenter: Arc<ResultPresenter>,
    notifier: Notifier,
    runtime: Handle,
}

impl RecognitionAdapter {
    pub fn new(
        scanner: Arc<dyn BarcodeScanner>,
        presenter: Arc<ResultPresenter>,
        notifier: Notifier,
        runtime: Handle,
    ) -> Self {
        Self {
            scanner,
            presenter,
            notifier,
            runtime,
        }
    }
}

impl Analyzer for RecognitionAdapter {
    fn analyze(&self, proxy: ImageProxy) {
        let Some(image) = proxy.image() else {
            trace!(seq = proxy.seq(), "frame has no image");
            proxy.close();
            return;
        };

        let input = InputImage::from_media_image(image, proxy.rotation_degrees());
        let completion = self.scanner.process(input);
        let presenter = Arc::clone(&self.presenter);
        let notifier = self.notifier.clone();

        self.runtime.spawn(async move {
            let seq = proxy.seq();
            let outcome = completion
                .await
                .unwrap_or_else(|_| Err(ScanError::Worker("scanner dropped the request".into())));
            proxy.close();

            match outcome {
                Ok(barcodes) => presenter.show_barcodes(&barcodes),
                Err(e) => {
                    warn!(error = %e, seq, "barcode scan failed");
                    notifier.show(e.to_string(), NoticeLength::Long);
                }
            }
        });
    }
}
