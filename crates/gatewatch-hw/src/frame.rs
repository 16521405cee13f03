//! Frame type, live-view JPEGs and the shared latest-frame slot.

use bytes::Bytes;
use gatewatch_core::gallery::encode_jpeg;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// JPEG quality used for the live view.
pub const VIEW_JPEG_QUALITY: u8 = 80;

const PLACEHOLDER_WIDTH: u32 = 640;
const PLACEHOLDER_HEIGHT: u32 = 480;
const PLACEHOLDER_GRAY: u8 = 24;

/// Where a frame came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// On-demand check (bypasses alert cooldown).
    Manual,
    /// Pushed by the camera.
    #[default]
    Stream,
}

impl FromStr for Provenance {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "stream" => Ok(Self::Stream),
            other => Err(FrameError::UnknownProvenance(other.to_string())),
        }
    }
}

/// A decoded camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<DynamicImage>,
    pub provenance: Provenance,
    /// Arrival order, assigned by [`FrameBuffer::next_sequence`].
    pub sequence: u64,
    /// When the frame was decoded; used for per-frame latency.
    pub timestamp: Instant,
}

impl Frame {
    /// Decode an encoded image (JPEG, PNG).
    pub fn decode(bytes: &[u8], provenance: Provenance, sequence: u64) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let image = image::load_from_memory(bytes).map_err(FrameError::Decode)?;
        Ok(Self {
            image: Arc::new(image),
            provenance,
            sequence,
            timestamp: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        encode_jpeg(&self.image, quality).map_err(FrameError::Encode)
    }
}

/// The JPEG served to viewers before any frame has arrived.
pub fn placeholder_jpeg() -> Result<Bytes, FrameError> {
    let image = RgbImage::from_pixel(
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        Rgb([PLACEHOLDER_GRAY; 3]),
    );
    encode_jpeg(&DynamicImage::ImageRgb8(image), VIEW_JPEG_QUALITY)
        .map(Bytes::from)
        .map_err(FrameError::Encode)
}

struct Latest {
    sequence: u64,
    jpeg: Bytes,
}

/// Latest encoded frame for the live view.
///
/// The lock only covers swapping the slot; callers encode before publishing.
/// A publish older than the slot's frame is dropped so viewers never step
/// back in arrival order.
pub struct FrameBuffer {
    slot: Mutex<Option<Latest>>,
    placeholder: Bytes,
    arrivals: AtomicU64,
}

impl FrameBuffer {
    pub fn new(placeholder: Bytes) -> Self {
        Self {
            slot: Mutex::new(None),
            placeholder,
            arrivals: AtomicU64::new(0),
        }
    }

    /// Next arrival sequence number (starts at 1).
    pub fn next_sequence(&self) -> u64 {
        self.arrivals.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Replace the slot unless it already holds a later frame.
    pub fn publish(&self, sequence: u64, jpeg: Bytes) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*slot, Some(latest) if latest.sequence > sequence) {
            tracing::debug!(sequence, "stale frame not published");
            return false;
        }
        *slot = Some(Latest { sequence, jpeg });
        true
    }

    /// Latest frame, or the placeholder if nothing was published yet.
    pub fn snapshot(&self) -> Bytes {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some(latest) => latest.jpeg.clone(),
            None => self.placeholder.clone(),
        }
    }

    pub fn latest_sequence(&self) -> Option<u64> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.sequence)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image body")]
    Empty,
    #[error("cannot decode image: {0}")]
    Decode(image::ImageError),
    #[error("cannot encode image: {0}")]
    Encode(image::ImageError),
    #[error("unknown frame source: {0:?}")]
    UnknownProvenance(String),
}
