//! Document and object store clients used for alert persistence.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Append-only JSON document collection.
pub trait DocumentStore: Send + Sync {
    /// Create a document; returns its id.
    fn create<'a>(
        &'a self,
        collection: &'a str,
        document: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, StoreError>>;
}

/// Blob storage addressed by key.
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key`; returns the public URL.
    fn upload<'a>(
        &'a self,
        key: &'a str,
        bytes: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, StoreError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Request(format!("client build: {e}")))
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `POST {base}/{collection}` with a JSON body.
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Created {
    id: Option<String>,
}

impl RestDocumentStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl DocumentStore for RestDocumentStore {
    fn create<'a>(
        &'a self,
        collection: &'a str,
        document: serde_json::Value,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let url = format!("{}/{}", self.base_url, collection);
            let response = self
                .client
                .post(&url)
                .json(&document)
                .send()
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;
            let response = check(response).await?;

            // Stores that answer without an id still accepted the write.
            let id = response
                .json::<Created>()
                .await
                .ok()
                .and_then(|c| c.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Ok(id)
        })
    }
}

/// `PUT {upload_base}/{key}`; objects are served from `{public_base}/{key}`.
pub struct RestObjectStore {
    client: reqwest::Client,
    upload_url: String,
    public_url: String,
}

impl RestObjectStore {
    pub fn new(upload_url: &str, public_url: Option<&str>, timeout: Duration) -> Result<Self, StoreError> {
        let upload_url = upload_url.trim_end_matches('/').to_string();
        let public_url = public_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| upload_url.clone());
        Ok(Self {
            client: http_client(timeout)?,
            upload_url,
            public_url,
        })
    }
}

impl ObjectStore for RestObjectStore {
    fn upload<'a>(
        &'a self,
        key: &'a str,
        bytes: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let response = self
                .client
                .put(format!("{}/{}", self.upload_url, key))
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes)
                .send()
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;
            check(response).await?;
            Ok(format!("{}/{}", self.public_url, key))
        })
    }
}
