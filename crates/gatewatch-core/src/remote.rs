//! HTTP client for an external recognition service.
//!
//! The service exposes two endpoints, each taking a JPEG body:
//!
//! - `POST /faces` → `{"faces": [{"x", "y", "width", "height", "confidence"}]}`
//! - `POST /embed` → `{"embedding": [f32, ...]}` or `{"embedding": null}`
//!
//! Uses the blocking reqwest client; construct and call it from the engine
//! thread only, never from inside the async runtime.

use crate::engine::{Embedder, EngineError, PresenceDetector};
use crate::gallery::encode_jpeg;
use crate::types::{Embedding, FaceCandidate};
use image::DynamicImage;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const UPLOAD_JPEG_QUALITY: u8 = 85;

#[derive(Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<FaceCandidate>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Vec<f32>>,
}

/// Recognition service client implementing both engine capabilities.
pub struct RemoteEngine {
    client: Client,
    base_url: String,
}

impl RemoteEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Request(format!("client build: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_image<T: DeserializeOwned>(&self, path: &str, image: &DynamicImage) -> Result<T, EngineError> {
        let url = format!("{}/{}", self.base_url, path);
        let body = encode_jpeg(image, UPLOAD_JPEG_QUALITY)?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .map_err(|e| EngineError::Request(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .map_err(|e| EngineError::InvalidResponse(format!("{path}: {e}")))
    }
}

impl PresenceDetector for RemoteEngine {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceCandidate>, EngineError> {
        let response: FacesResponse = self.post_image("faces", image)?;
        Ok(response.faces)
    }
}

impl Embedder for RemoteEngine {
    fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
        let response: EmbedResponse = self.post_image("embed", image)?;
        match response.embedding {
            Some(values) if values.is_empty() => {
                Err(EngineError::InvalidResponse("empty embedding".into()))
            }
            Some(values) => Ok(Some(Embedding { values })),
            None => Ok(None),
        }
    }
}
