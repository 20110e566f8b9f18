use bytes::BytesMut;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use qr_scanner_common::config::{LensFacing, SourceConfig, SourceMode};
use qr_scanner_common::frame::{Frame, Rotation};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::CaptureError;

pub type FrameStream = BoxStream<'static, Result<Frame, CaptureError>>;

/// A source of camera frames.
///
/// `connect` opens the device; an error there is a bind failure. Once
/// connected, the stream yields frames until the device goes away. An `Err`
/// item ends the session for that camera.
pub trait CameraDevice: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn facing(&self) -> LensFacing;

    fn connect(&self) -> BoxFuture<'_, Result<FrameStream, CaptureError>>;
}

/// Build a device from its config entry.
pub fn from_config(
    source: &SourceConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn CameraDevice>, CaptureError> {
    let rotation =
        Rotation::from_degrees(source.rotation_degrees).ok_or_else(|| CaptureError::InvalidSource {
            id: source.id.clone(),
            reason: format!("unsupported rotation {}", source.rotation_degrees),
        })?;
    let interval = Duration::try_from_secs_f64(1.0 / source.fps)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| CaptureError::InvalidSource {
            id: source.id.clone(),
            reason: format!("unusable fps {}", source.fps),
        })?;
    let meta = DeviceMeta {
        id: source.id.clone(),
        facing: source.facing,
        rotation,
        seq: Arc::new(AtomicU64::new(0)),
    };

    let device: Arc<dyn CameraDevice> = match source.mode {
        SourceMode::Mjpeg => Arc::new(MjpegCamera {
            meta,
            client: client.clone(),
            url: source.url.clone(),
            quality: source.quality,
            fps: source.fps,
        }),
        SourceMode::Polling => Arc::new(PollingCamera {
            meta,
            client: client.clone(),
            url: source.url.clone(),
            quality: source.quality,
            interval,
        }),
        SourceMode::Directory => Arc::new(DirectoryCamera {
            meta,
            dir: PathBuf::from(&source.url),
            interval,
        }),
    };
    Ok(device)
}

struct DeviceMeta {
    id: String,
    facing: LensFacing,
    rotation: Rotation,
    /// Per-device frame sequence, continues across reconnects.
    seq: Arc<AtomicU64>,
}

impl DeviceMeta {
    fn stamper(&self) -> FrameStamper {
        FrameStamper {
            rotation: self.rotation,
            seq: Arc::clone(&self.seq),
        }
    }
}

#[derive(Clone)]
struct FrameStamper {
    rotation: Rotation,
    seq: Arc<AtomicU64>,
}

impl FrameStamper {
    fn stamp(&self, data: Vec<u8>) -> Frame {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Frame::now(data, self.rotation, seq)
    }
}

// ---------------------------------------------------------------------------
// MJPEG multipart stream
// ---------------------------------------------------------------------------

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker, e.g. `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
/// Chunks may split boundaries, headers and images at any byte.
pub struct MultipartParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed a chunk and return every image completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let boundary_len = self.boundary.len();
        let mut images = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    if let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(jpeg_end + boundary_len);
                        if !jpeg.is_empty() {
                            images.push(jpeg);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Avoid re-scanning what was already searched
                        self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                        break;
                    }
                }
            }
        }

        images
    }
}

/// Extract the boundary from a `multipart/x-mixed-replace; boundary=...` header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
    })
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub struct MjpegCamera {
    meta: DeviceMeta,
    client: reqwest::Client,
    url: String,
    quality: u32,
    fps: f64,
}

impl CameraDevice for MjpegCamera {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn facing(&self) -> LensFacing {
        self.meta.facing
    }

    fn connect(&self) -> BoxFuture<'_, Result<FrameStream, CaptureError>> {
        Box::pin(async move {
            info!(url = self.url, camera = self.meta.id, "connecting to MJPEG stream");
            let response = self
                .client
                .get(&self.url)
                .query(&[
                    ("quality", self.quality.to_string()),
                    ("fps", self.fps.to_string()),
                ])
                .send()
                .await
                .map_err(CaptureError::HttpConnect)?;

            if !response.status().is_success() {
                return Err(CaptureError::HttpStatus(response.status().as_u16()));
            }

            let boundary = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(boundary_from_content_type)
                .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
            info!(status = %response.status(), boundary, "connected to MJPEG stream");

            let stamper = self.meta.stamper();
            let bytes = response.bytes_stream().boxed();
            let frames = stream::unfold(
                (bytes, MultipartParser::new(&boundary), VecDeque::new()),
                move |(mut bytes, mut parser, mut pending)| {
                    let stamper = stamper.clone();
                    async move {
                        loop {
                            if let Some(jpeg) = pending.pop_front() {
                                let frame = stamper.stamp(jpeg);
                                debug!(seq = frame.seq, bytes = frame.payload_size(), "MJPEG frame");
                                return Some((Ok(frame), (bytes, parser, pending)));
                            }
                            match bytes.next().await {
                                Some(Ok(chunk)) => pending.extend(parser.push(&chunk)),
                                Some(Err(e)) => {
                                    return Some((
                                        Err(CaptureError::HttpStream(e)),
                                        (bytes, parser, pending),
                                    ))
                                }
                                None => return None,
                            }
                        }
                    }
                },
            );
            Ok(frames.boxed())
        })
    }
}

// ---------------------------------------------------------------------------
// Single-frame polling
// ---------------------------------------------------------------------------

pub struct PollingCamera {
    meta: DeviceMeta,
    client: reqwest::Client,
    url: String,
    quality: u32,
    interval: Duration,
}

async fn fetch_frame(
    client: &reqwest::Client,
    url: &str,
    quality: u32,
) -> Result<Vec<u8>, CaptureError> {
    let response = client
        .get(url)
        .query(&[("quality", quality.to_string())])
        .send()
        .await
        .map_err(CaptureError::HttpConnect)?;
    if !response.status().is_success() {
        return Err(CaptureError::HttpStatus(response.status().as_u16()));
    }
    let body = response.bytes().await.map_err(CaptureError::HttpStream)?;
    Ok(body.to_vec())
}

impl CameraDevice for PollingCamera {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn facing(&self) -> LensFacing {
        self.meta.facing
    }

    fn connect(&self) -> BoxFuture<'_, Result<FrameStream, CaptureError>> {
        Box::pin(async move {
            info!(url = self.url, camera = self.meta.id, "polling camera frames");
            // The first fetch doubles as the reachability check.
            let first = fetch_frame(&self.client, &self.url, self.quality).await?;

            let stamper = self.meta.stamper();
            let client = self.client.clone();
            let url = self.url.clone();
            let quality = self.quality;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let frames = stream::unfold(
                (Some(first), ticker),
                move |(first, mut ticker)| {
                    let stamper = stamper.clone();
                    let client = client.clone();
                    let url = url.clone();
                    async move {
                        if let Some(jpeg) = first {
                            ticker.tick().await;
                            return Some((Ok(stamper.stamp(jpeg)), (None, ticker)));
                        }
                        loop {
                            ticker.tick().await;
                            match fetch_frame(&client, &url, quality).await {
                                Ok(jpeg) => return Some((Ok(stamper.stamp(jpeg)), (None, ticker))),
                                Err(CaptureError::HttpStream(e)) => {
                                    return Some((Err(CaptureError::HttpStream(e)), (None, ticker)))
                                }
                                Err(e) => warn!(error = %e, "failed to fetch camera frame"),
                            }
                        }
                    }
                },
            );
            Ok(frames.boxed())
        })
    }
}

// ---------------------------------------------------------------------------
// Directory replay
// ---------------------------------------------------------------------------

pub struct DirectoryCamera {
    meta: DeviceMeta,
    dir: PathBuf,
    interval: Duration,
}

fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

async fn list_images(dir: &std::path::Path) -> Result<Vec<PathBuf>, CaptureError> {
    let dir_name = dir.display().to_string();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CaptureError::Directory(dir_name.clone(), e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CaptureError::Directory(dir_name.clone(), e))?
    {
        let path = entry.path();
        if is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(CaptureError::EmptyDirectory(dir_name));
    }
    Ok(files)
}

impl CameraDevice for DirectoryCamera {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn facing(&self) -> LensFacing {
        self.meta.facing
    }

    fn connect(&self) -> BoxFuture<'_, Result<FrameStream, CaptureError>> {
        Box::pin(async move {
            let files = list_images(&self.dir).await?;
            info!(dir = %self.dir.display(), files = files.len(), "replaying frame directory");

            let stamper = self.meta.stamper();
            let dir_name = self.dir.display().to_string();
            let ticker = tokio::time::interval(self.interval);
            let frames = stream::unfold((0usize, ticker), move |(index, mut ticker)| {
                let path = files[index % files.len()].clone();
                let stamper = stamper.clone();
                let dir_name = dir_name.clone();
                async move {
                    ticker.tick().await;
                    let item = tokio::fs::read(&path)
                        .await
                        .map(|data| stamper.stamp(data))
                        .map_err(|e| CaptureError::Directory(dir_name, e));
                    Some((item, (index + 1, ticker)))
                }
            });
            Ok(frames.boxed())
        })
    }
}
