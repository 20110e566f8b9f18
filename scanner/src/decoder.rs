use image::{imageops, GrayImage};
use qr_scanner_common::barcode::Barcode;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// An upright luma image ready for barcode detection.
pub struct InputImage {
    luma: GrayImage,
    source_rotation: u32,
}

impl InputImage {
    /// Wrap a camera frame that must be rotated clockwise by
    /// `rotation_degrees` to appear upright.
    pub fn from_media_image(image: &GrayImage, rotation_degrees: u32) -> Self {
        let luma = match rotation_degrees % 360 {
            90 => imageops::rotate90(image),
            180 => imageops::rotate180(image),
            270 => imageops::rotate270(image),
            _ => image.clone(),
        };
        Self {
            luma,
            source_rotation: rotation_degrees,
        }
    }

    pub fn width(&self) -> u32 {
        self.luma.width()
    }

    pub fn height(&self) -> u32 {
        self.luma.height()
    }

    pub fn source_rotation(&self) -> u32 {
        self.source_rotation
    }

    pub fn luma(&self) -> &GrayImage {
        &self.luma
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("input image is empty")]
    EmptyImage,
    #[error("barcode detection failed: {0}")]
    Worker(String),
}

pub type ScanResult = Result<Vec<Barcode>, ScanError>;

/// Asynchronous barcode decoding service.
///
/// `process` returns immediately; the outcome arrives on the receiver from
/// whichever thread finished the work.
pub trait BarcodeScanner: Send + Sync + 'static {
    fn process(&self, image: InputImage) -> oneshot::Receiver<ScanResult>;
}

/// QR-only scanner backed by `rqrr`, running detection on the blocking pool.
pub struct QrScanner {
    runtime: Handle,
}

impl QrScanner {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl BarcodeScanner for QrScanner {
    fn process(&self, image: InputImage) -> oneshot::Receiver<ScanResult> {
        let (tx, rx) = oneshot::channel();
        let detection = self.runtime.spawn_blocking(move || detect_qr_codes(&image));
        self.runtime.spawn(async move {
            let result = match detection.await {
                Ok(result) => result,
                Err(e) => Err(ScanError::Worker(e.to_string())),
            };
            let _ = tx.send(result);
        });
        rx
    }
}

/// Find and decode every QR symbol in `image`, in detection order.
/// Symbols that fail error correction are skipped.
pub fn detect_qr_codes(image: &InputImage) -> ScanResult {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 {
        return Err(ScanError::EmptyImage);
    }

    let luma = image.luma();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w as usize, h as usize, |x, y| {
        luma.get_pixel(x as u32, y as u32).0[0]
    });
    let grids = prepared.detect_grids();
    trace!(
        grids = grids.len(),
        width = w,
        height = h,
        rotation = image.source_rotation(),
        "QR grids detected"
    );

    let mut barcodes = Vec::with_capacity(grids.len());
    for grid in grids {
        match grid.decode() {
            Ok((_meta, content)) => barcodes.push(Barcode::classify(content)),
            Err(e) => debug!(error = ?e, "QR grid failed to decode"),
        }
    }
    Ok(barcodes)
}
