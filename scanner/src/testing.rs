//! Fakes shared by the scanner's unit tests.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qr_scanner_capture::device::{CameraDevice, FrameStream};
use qr_scanner_capture::CaptureError;
use qr_scanner_common::barcode::Barcode;
use qr_scanner_common::config::LensFacing;
use qr_scanner_common::frame::{Frame, Rotation};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::decoder::{BarcodeScanner, InputImage, ScanError, ScanResult};

/// Small grey PNG that the analysis pipeline can decode.
pub fn png_payload() -> Vec<u8> {
    let img = GrayImage::from_pixel(160, 120, Luma([128]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Camera replaying one payload, either a fixed number of times or forever.
pub struct ScriptedCamera {
    id: String,
    facing: LensFacing,
    payload: Vec<u8>,
    count: Option<u64>,
}

impl ScriptedCamera {
    pub fn finite(id: &str, facing: LensFacing, payload: Vec<u8>, count: u64) -> Arc<dyn CameraDevice> {
        Arc::new(Self {
            id: id.to_string(),
            facing,
            payload,
            count: Some(count),
        })
    }

    pub fn endless(id: &str, facing: LensFacing) -> Arc<dyn CameraDevice> {
        Arc::new(Self {
            id: id.to_string(),
            facing,
            payload: png_payload(),
            count: None,
        })
    }
}

impl CameraDevice for ScriptedCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn facing(&self) -> LensFacing {
        self.facing
    }

    fn connect(&self) -> BoxFuture<'_, Result<FrameStream, CaptureError>> {
        let payload = self.payload.clone();
        let count = self.count;
        Box::pin(async move {
            let frames = stream::iter(0..).map(move |seq: u64| -> Result<Frame, CaptureError> {
                Ok(Frame::now(payload.clone(), Rotation::Deg0, seq))
            });
            let stream = match count {
                Some(count) => frames.take(count as usize).boxed(),
                None => frames
                    .then(|frame| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        frame
                    })
                    .boxed(),
            };
            Ok(stream)
        })
    }
}

/// Scanner that answers from a plain thread after a delay and records how
/// many requests overlapped.
pub struct StubScanner {
    outcome: fn() -> ScanResult,
    delay: Duration,
    calls: AtomicU64,
    in_flight: Arc<AtomicU64>,
    max_in_flight: Arc<AtomicU64>,
}

impl StubScanner {
    fn build(outcome: fn() -> ScanResult, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay,
            calls: AtomicU64::new(0),
            in_flight: Arc::new(AtomicU64::new(0)),
            max_in_flight: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Always finds a `Home`/`secret` WPA network.
    pub fn wifi(delay: Duration) -> Arc<Self> {
        Self::build(
            || Ok(vec![Barcode::classify("WIFI:S:Home;T:WPA;P:secret;;")]),
            delay,
        )
    }

    pub fn failing(delay: Duration) -> Arc<Self> {
        Self::build(|| Err(ScanError::Worker("decoder unavailable".into())), delay)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl BarcodeScanner for StubScanner {
    fn process(&self, _image: InputImage) -> oneshot::Receiver<ScanResult> {
        let (tx, rx) = oneshot::channel();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let in_flight = Arc::clone(&self.in_flight);
        let outcome = self.outcome;
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send(outcome());
        });
        rx
    }
}
