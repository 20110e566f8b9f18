/// Clockwise rotation that brings a sensor image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Returns `None` for anything other than 0, 90, 180 or 270.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// A camera frame with its capture metadata.
///
/// The payload is always an encoded still (JPEG from HTTP cameras, JPEG or PNG
/// from directory replay). Pixel decoding is deferred to the analysis worker so
/// the capture path never touches pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub rotation: Rotation,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, rotation: Rotation, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            data,
            rotation,
            captured_at_ms,
            seq,
        }
    }

    /// Stamp a frame with the current wall-clock time.
    pub fn now(data: Vec<u8>, rotation: Rotation, seq: u64) -> Self {
        Self::new(data, rotation, chrono::Utc::now().timestamp_millis(), seq)
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.rotation.degrees()
    }

    pub fn payload_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Human-readable capture time, e.g. `20260218T093000000Z`.
    pub fn timestamp_label(&self) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unsupported rotation: {0} degrees")]
    Rotation(u32),
}

impl TryFrom<u32> for Rotation {
    type Error = FrameError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees).ok_or(FrameError::Rotation(degrees))
    }
}
