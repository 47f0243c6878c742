//! Google Cloud Storage object store.
//!
//! A lock is a single object. Creating it with `ifGenerationMatch=0` only
//! succeeds while the object does not exist, which makes the upload a
//! conditional create. Deletes are unconditional; the lock provider checks
//! the holder before deleting.
//!
//! The storage endpoint fails transiently (429, 5xx, resets), so every call
//! runs inside [`retry_until_deadline`]: only 200 (create, read) and 204
//! (delete) count as success, anything else is retried with exponential
//! backoff until the deadline, whose error is then returned.


use super::{ObjectStore, StoredObject};
use crate::config::GcsConfig;
use crate::error::{MutexError, Result};
use crate::retry::{Attempt, Backoff, Deadline, retry_until_deadline};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

pub const DEFAULT_UPLOAD_URL: &str = "https://storage.googleapis.com/upload/storage/v1";
pub const DEFAULT_API_URL: &str = "https://storage.googleapis.com/storage/v1";

const GENERATION_HEADER: &str = "x-goog-generation";

/// Base URLs for the upload and JSON APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsEndpoints {
    pub upload_url: String,
    pub api_url: String,
}

impl GcsEndpoints {
    /// The public Google endpoints.
    pub fn google() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Endpoints rooted at another host, e.g. a storage emulator.
    pub fn at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            upload_url: format!("{}/upload/storage/v1", base),
            api_url: format!("{}/storage/v1", base),
        }
    }
}

/// Object metadata resource; only the generation is needed.
#[derive(Debug, Deserialize)]
struct ObjectResource {
    generation: String,
}

/// One lock object in a GCS bucket.
#[derive(Debug, Clone)]
pub struct GcsObject {
    client: Client,
    endpoints: GcsEndpoints,
    bucket: String,
    object: String,
    access_token: Option<String>,
}

impl GcsObject {
    pub fn new(config: &GcsConfig, object: impl Into<String>) -> Result<Self> {
        let endpoints = match &config.endpoint {
            Some(endpoint) => GcsEndpoints::at(endpoint),
            None => GcsEndpoints::google(),
        };

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| MutexError::BackendError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            bucket: config.bucket.clone(),
            object: object.into(),
            access_token: config.access_token.clone(),
        })
    }

    fn base(url: &str) -> Result<Url> {
        Url::parse(url)
            .map_err(|e| MutexError::ConfigError(format!("invalid storage URL '{}': {}", url, e)))
    }

    /// `{upload}/b/{bucket}/o?name=..&uploadType=media&ifGenerationMatch=..`
    fn create_url(&self, if_generation_match: i64) -> Result<Url> {
        let mut url = Self::base(&self.endpoints.upload_url)?;
        url.path_segments_mut()
            .map_err(|_| MutexError::ConfigError("storage URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["b", self.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("name", &self.object)
            .append_pair("uploadType", "media")
            .append_pair("ifGenerationMatch", &if_generation_match.to_string());
        Ok(url)
    }

    /// `{api}/b/{bucket}/o/{object}`
    fn object_url(&self) -> Result<Url> {
        let mut url = Self::base(&self.endpoints.api_url)?;
        url.path_segments_mut()
            .map_err(|_| MutexError::ConfigError("storage URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["b", self.bucket.as_str(), "o", self.object.as_str()]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch the generation from the metadata resource.
    fn read_generation(&self, url: &Url, deadline: &Deadline) -> Attempt<Option<i64>> {
        let request = self
            .authorize(self.client.get(url.clone()))
            .timeout(deadline.remaining());
        match request.send() {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => Attempt::Done(None),
            Ok(response) if response.status() == StatusCode::OK => {
                match response.json::<ObjectResource>() {
                    Ok(resource) => match resource.generation.parse() {
                        Ok(generation) => Attempt::Done(Some(generation)),
                        Err(_) => Attempt::Fail(MutexError::BackendError(format!(
                            "object metadata has invalid generation '{}'",
                            resource.generation
                        ))),
                    },
                    Err(e) => Attempt::Retry(format!("metadata body unreadable: {}", e)),
                }
            }
            Ok(response) => Attempt::Retry(format!("metadata read returned {}", response.status())),
            Err(e) => Attempt::Retry(format!("metadata read failed: {}", e)),
        }
    }

    fn read_once(&self, url: &Url, deadline: &Deadline) -> Attempt<Option<StoredObject>> {
        let mut media_url = url.clone();
        media_url.query_pairs_mut().append_pair("alt", "media");
        let request = self
            .authorize(self.client.get(media_url))
            .timeout(deadline.remaining());

        let response = match request.send() {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("read failed: {}", e)),
        };
        match response.status() {
            StatusCode::NOT_FOUND => return Attempt::Done(None),
            StatusCode::OK => {}
            status => return Attempt::Retry(format!("read returned {}", status)),
        }

        let header_generation = response
            .headers()
            .get(GENERATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let value = match response.text() {
            Ok(value) => value,
            Err(e) => return Attempt::Retry(format!("read body unreadable: {}", e)),
        };

        let generation = match header_generation {
            Some(generation) => generation,
            None => match self.read_generation(url, deadline) {
                Attempt::Done(Some(generation)) => generation,
                // Deleted between the two requests.
                Attempt::Done(None) => return Attempt::Done(None),
                Attempt::Retry(reason) => return Attempt::Retry(reason),
                Attempt::Fail(e) => return Attempt::Fail(e),
            },
        };

        Attempt::Done(Some(StoredObject { value, generation }))
    }
}

impl ObjectStore for GcsObject {
    fn create(&self, value: &str, if_generation_match: i64, deadline: &Deadline) -> Result<()> {
        let url = self.create_url(if_generation_match)?;
        retry_until_deadline(*deadline, Backoff::default(), |deadline| {
            let request = self
                .authorize(self.client.post(url.clone()))
                .header(CONTENT_TYPE, "text/plain")
                .body(value.to_string())
                .timeout(deadline.remaining());
            match request.send() {
                Ok(response) if response.status() == StatusCode::OK => Attempt::Done(()),
                Ok(response) => Attempt::Retry(format!("create returned {}", response.status())),
                Err(e) => Attempt::Retry(format!("create failed: {}", e)),
            }
        })
    }

    fn delete(&self, deadline: &Deadline) -> Result<()> {
        let url = self.object_url()?;
        retry_until_deadline(*deadline, Backoff::default(), |deadline| {
            let request = self
                .authorize(self.client.delete(url.clone()))
                .timeout(deadline.remaining());
            match request.send() {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => Attempt::Done(()),
                Ok(response) => Attempt::Retry(format!("delete returned {}", response.status())),
                Err(e) => Attempt::Retry(format!("delete failed: {}", e)),
            }
        })
    }

    fn read(&self, deadline: &Deadline) -> Result<Option<StoredObject>> {
        let url = self.object_url()?;
        retry_until_deadline(*deadline, Backoff::default(), |deadline| {
            self.read_once(&url, deadline)
        })
    }

    fn backend_name(&self) -> &'static str {
        "gcs"
    }
}
