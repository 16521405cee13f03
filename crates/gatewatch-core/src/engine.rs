//! Capability traits for the external recognition engine.
//!
//! The engine itself (face detector, embedding model) lives outside this
//! crate. Calls are synchronous and may be slow; callers run them off the
//! async runtime.

use crate::gallery::GalleryError;
use crate::types::{Embedding, FaceCandidate};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Request(String),
    #[error("engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
    #[error("embedding has {query} dimensions but the gallery index has {gallery}")]
    DimensionMismatch { query: usize, gallery: usize },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
}

/// Face-presence filter: finds face candidates in an image.
pub trait PresenceDetector: Send {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, EngineError>;
}

/// Embedding extractor: turns the dominant face in an image into a vector.
///
/// Returns `Ok(None)` when the engine finds no face to embed.
pub trait Embedder: Send {
    fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError>;
}
