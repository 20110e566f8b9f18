use image::imageops::FilterType;
use image::{GrayImage, ImageReader};
use qr_scanner_common::frame::{Frame, Rotation};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::executor::SerialExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Receives analysis frames on the executor thread.
///
/// The next frame is not delivered until the given proxy has been closed or
/// dropped, which may happen on any thread.
pub trait Analyzer: Send + Sync + 'static {
    fn analyze(&self, image: ImageProxy);
}

/// Frame accounting for the analysis use case.
#[derive(Debug, Default)]
struct AnalysisStats {
    delivered: AtomicU64,
    released: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames handed to the analyzer.
    pub delivered: u64,
    /// Delivered frames whose proxy has been closed.
    pub released: u64,
    /// Frames superseded or discarded before reaching the analyzer.
    pub dropped: u64,
}

impl AnalysisStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// One analysis frame, owned by the analyzer until closed.
pub struct ImageProxy {
    image: Option<GrayImage>,
    rotation: Rotation,
    seq: u64,
    captured_at_ms: i64,
    owner: Option<Arc<Pipeline>>,
}

impl ImageProxy {
    /// Decoded luma plane at analysis resolution; `None` if the payload could
    /// not be decoded.
    pub fn image(&self) -> Option<&GrayImage> {
        self.image.as_ref()
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.rotation.degrees()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.image = None;
        if let Some(owner) = self.owner.take() {
            trace!(seq = self.seq, "analysis frame released");
            owner.on_released();
        }
    }
}

impl Drop for ImageProxy {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scale `(width, height)` down so it still covers `target`, keeping aspect
/// ratio. Images already at or below the target are left alone.
pub fn cover_size(width: u32, height: u32, target: Resolution) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = f64::max(
        target.width as f64 / width as f64,
        target.height as f64 / height as f64,
    );
    if scale >= 1.0 {
        return (width, height);
    }
    let w = ((width as f64 * scale).round() as u32).max(target.width);
    let h = ((height as f64 * scale).round() as u32).max(target.height);
    (w, h)
}

fn decode_for_analysis(data: &[u8], target: Resolution) -> Option<GrayImage> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;

    let (w, h) = cover_size(img.width(), img.height(), target);
    let img = if (w, h) != (img.width(), img.height()) {
        img.resize_exact(w, h, FilterType::Triangle)
    } else {
        img
    };
    Some(img.to_luma8())
}

struct PipelineState {
    /// A frame is with the analyzer and has not been released yet.
    busy: bool,
    /// Latest frame that arrived while busy; replaced, never queued.
    pending: Option<Arc<Frame>>,
    /// Not bound to a camera; offered frames are discarded.
    detached: bool,
}

struct Binding {
    executor: Arc<SerialExecutor>,
    analyzer: Arc<dyn Analyzer>,
}

struct Pipeline {
    target: Resolution,
    stats: AnalysisStats,
    state: Mutex<PipelineState>,
    binding: Mutex<Option<Binding>>,
}

impl Pipeline {
    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn binding(&self) -> Option<(Arc<SerialExecutor>, Arc<dyn Analyzer>)> {
        self.binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|b| (Arc::clone(&b.executor), Arc::clone(&b.analyzer)))
    }

    fn offer(self: &Arc<Self>, frame: Arc<Frame>) {
        {
            let mut state = self.state();
            if state.detached {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                return;
            }
            if state.busy {
                if let Some(old) = state.pending.replace(frame) {
                    trace!(seq = old.seq, "superseded analysis frame dropped");
                    self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                }
                return;
            }
            state.busy = true;
        }
        self.dispatch(frame);
    }

    fn dispatch(self: &Arc<Self>, frame: Arc<Frame>) {
        let Some((executor, analyzer)) = self.binding() else {
            debug!(seq = frame.seq, "no analyzer set, frame dropped");
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            self.go_idle();
            return;
        };

        let pipeline = Arc::clone(self);
        let submitted = executor.execute(move || {
            let image = decode_for_analysis(&frame.data, pipeline.target);
            if image.is_none() {
                warn!(seq = frame.seq, bytes = frame.payload_size(), "failed to decode analysis frame");
            }
            let proxy = ImageProxy {
                image,
                rotation: frame.rotation,
                seq: frame.seq,
                captured_at_ms: frame.captured_at_ms,
                owner: Some(Arc::clone(&pipeline)),
            };
            pipeline.stats.delivered.fetch_add(1, Ordering::SeqCst);
            analyzer.analyze(proxy);
        });

        if let Err(e) = submitted {
            debug!(error = %e, "analysis frame not submitted");
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            self.go_idle();
        }
    }

    /// Stop the cycle and discard whatever was waiting.
    fn go_idle(&self) {
        let mut state = self.state();
        state.busy = false;
        if state.pending.take().is_some() {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_released(self: &Arc<Self>) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut state = self.state();
            match state.pending.take() {
                Some(frame) if !state.detached => Some(frame),
                _ => {
                    state.busy = false;
                    None
                }
            }
        };
        if let Some(frame) = next {
            self.dispatch(frame);
        }
    }
}

/// Image analysis use case with a keep-only-latest backpressure strategy.
#[derive(Clone)]
pub struct ImageAnalysis {
    inner: Arc<Pipeline>,
}

pub struct ImageAnalysisBuilder {
    target: Resolution,
}

impl ImageAnalysisBuilder {
    pub fn target_resolution(mut self, width: u32, height: u32) -> Self {
        self.target = Resolution::new(width, height);
        self
    }

    pub fn build(self) -> ImageAnalysis {
        ImageAnalysis {
            inner: Arc::new(Pipeline {
                target: self.target,
                stats: AnalysisStats::default(),
                state: Mutex::new(PipelineState {
                    busy: false,
                    pending: None,
                    detached: true,
                }),
                binding: Mutex::new(None),
            }),
        }
    }
}

impl ImageAnalysis {
    pub fn builder() -> ImageAnalysisBuilder {
        ImageAnalysisBuilder {
            target: Resolution::new(640, 480),
        }
    }

    pub fn target_resolution(&self) -> Resolution {
        self.inner.target
    }

    /// Route frames to `analyzer`, run on `executor`. Replaces any previous analyzer.
    pub fn set_analyzer(&self, executor: Arc<SerialExecutor>, analyzer: Arc<dyn Analyzer>) {
        *self.inner.binding.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Binding { executor, analyzer });
    }

    pub fn clear_analyzer(&self) {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_attached(&self) -> bool {
        !self.inner.state().detached
    }

    pub(crate) fn offer(&self, frame: Arc<Frame>) {
        self.inner.offer(frame);
    }

    pub(crate) fn attach(&self) {
        self.inner.state().detached = false;
    }

    /// Stop accepting frames. A frame already with the analyzer stays there
    /// until its proxy is released.
    pub(crate) fn detach(&self) {
        let mut state = self.inner.state();
        state.detached = true;
        if state.pending.take().is_some() {
            self.inner.stats.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};
    use std::sync::mpsc;
    use std::time::Duration;

    struct HoldingAnalyzer {
        tx: Mutex<mpsc::Sender<ImageProxy>>,
    }

    impl Analyzer for HoldingAnalyzer {
        fn analyze(&self, image: ImageProxy) {
            self.tx.lock().unwrap().send(image).unwrap();
        }
    }

    fn setup(name: &str) -> (ImageAnalysis, mpsc::Receiver<ImageProxy>) {
        let (tx, rx) = mpsc::channel();
        let analysis = ImageAnalysis::builder().target_resolution(100, 100).build();
        let executor = Arc::new(SerialExecutor::new(name).unwrap());
        analysis.set_analyzer(executor, Arc::new(HoldingAnalyzer { tx: Mutex::new(tx) }));
        analysis.attach();
        (analysis, rx)
    }

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(Frame::new(vec![0; 4], Rotation::Deg90, 0, seq))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_pixel(width, height, Luma([200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn keeps_only_latest_while_busy() {
        let (analysis, rx) = setup("test-latest");

        analysis.offer(frame(0));
        let first = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(first.seq(), 0);

        // Frames arriving while frame 0 is held replace each other.
        analysis.offer(frame(1));
        analysis.offer(frame(2));
        analysis.offer(frame(3));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        first.close();
        let second = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(second.seq(), 3);
        assert_eq!(second.rotation_degrees(), 90);
        second.close();

        let stats = analysis.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn dropping_proxy_releases_once() {
        let (analysis, rx) = setup("test-drop");
        analysis.offer(frame(0));
        drop(rx.recv_timeout(WAIT).unwrap());

        analysis.offer(frame(1));
        let proxy = rx.recv_timeout(WAIT).unwrap();
        proxy.close();

        let stats = analysis.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.released, 2);
    }

    #[test]
    fn decodes_and_scales_image() {
        let (analysis, rx) = setup("test-decode");
        analysis.offer(Arc::new(Frame::new(png(640, 480), Rotation::Deg0, 0, 0)));
        let proxy = rx.recv_timeout(WAIT).unwrap();
        let image = proxy.image().expect("png decodes");
        assert_eq!(image.dimensions(), (133, 100));
        proxy.close();
    }

    #[test]
    fn undecodable_payload_has_no_image() {
        let (analysis, rx) = setup("test-garbage");
        analysis.offer(frame(0));
        let proxy = rx.recv_timeout(WAIT).unwrap();
        assert!(proxy.image().is_none());
        proxy.close();
        assert_eq!(analysis.stats().released, 1);
    }

    #[test]
    fn detached_analysis_discards_frames() {
        let (analysis, rx) = setup("test-detached");
        analysis.detach();
        assert!(!analysis.is_attached());
        analysis.offer(frame(0));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(analysis.stats().dropped, 1);
        assert_eq!(analysis.stats().delivered, 0);
    }

    #[test]
    fn shut_down_executor_drops_frames() {
        let (tx, _rx) = mpsc::channel();
        let analysis = ImageAnalysis::builder().build();
        let executor = Arc::new(SerialExecutor::new("test-stopped").unwrap());
        executor.shutdown();
        analysis.set_analyzer(executor, Arc::new(HoldingAnalyzer { tx: Mutex::new(tx) }));
        analysis.attach();

        analysis.offer(frame(0));
        analysis.offer(frame(1));
        let stats = analysis.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn cover_size_keeps_aspect() {
        let target = Resolution::new(100, 100);
        assert_eq!(cover_size(640, 480, target), (133, 100));
        assert_eq!(cover_size(480, 640, target), (100, 133));
        assert_eq!(cover_size(50, 40, target), (50, 40));
        assert_eq!(cover_size(1920, 1080, Resolution::new(320, 240)), (427, 240));
    }
}
