use crate::error::SyncError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Versioned blob storage with conditional writes.
///
/// ETags are opaque version identifiers; implementations return them with
/// surrounding quotes stripped. Conditional writes report a lost race as
/// `Ok(None)` rather than an error: 412 means "someone else got there
/// first", which every caller handles as ordinary control flow.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key`, returning the new ETag.
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<String, SyncError>;

    /// Streams a local file to `key`, returning the new ETag.
    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<String, SyncError>;

    /// Fetches the object and its ETag. Absent objects are
    /// [`SyncError::NotFound`].
    async fn get(&self, key: &str) -> Result<(Vec<u8>, String), SyncError>;

    /// Streams the object into `dest`, returning its ETag.
    async fn download_to(&self, key: &str, dest: &Path) -> Result<String, SyncError>;

    /// Returns the object's ETag without its body.
    async fn head(&self, key: &str) -> Result<String, SyncError>;

    /// Removes the object. Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> Result<(), SyncError>;

    /// Creates the object only if the key is vacant (`If-None-Match: *`).
    /// `Ok(None)` means the object already existed and was left untouched.
    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Replaces the object only while it still carries `etag` (`If-Match`).
    /// `Ok(None)` means the precondition failed.
    async fn put_if_match(
        &self,
        key: &str,
        body: Vec<u8>,
        etag: &str,
        content_type: &str,
    ) -> Result<Option<String>, SyncError>;
}

fn clean_etag(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string()
}

/// S3-compatible HTTP object store.
///
/// `base_url` addresses the bucket (`https://host/bucket`); keys are
/// appended as path segments. Request pacing (timeouts) comes from the
/// injected [`reqwest::Client`].
pub struct HttpObjectStore {
    http: reqwest::Client,
    base_url: String,
    auth: Option<HeaderValue>,
}

impl HttpObjectStore {
    /// Creates a store over `base_url` with an optional bearer token.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<&str>,
    ) -> Result<Self, SyncError> {
        let auth = match token {
            Some(t) => Some(
                HeaderValue::from_str(&format!("Bearer {t}"))
                    .map_err(|_| SyncError::Status {
                        status: 0,
                        body: "object store token is not a valid header value".to_string(),
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, self.url(key));
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        builder
    }

    fn etag_of(response: &reqwest::Response) -> Result<String, SyncError> {
        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(clean_etag)
            .ok_or_else(|| SyncError::Status {
                status: response.status().as_u16(),
                body: "response carried no etag".to_string(),
            })
    }

    async fn fail_from(response: reqwest::Response) -> SyncError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SyncError::Status { status, body }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, SyncError> {
        let response = self
            .request(reqwest::Method::PUT, key)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from(response).await);
        }
        Self::etag_of(&response)
    }

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<String, SyncError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let stream = tokio_util::io::ReaderStream::new(file);
        let response = self
            .request(reqwest::Method::PUT, key)
            .header(CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from(response).await);
        }
        Self::etag_of(&response)
    }

    async fn get(&self, key: &str) -> Result<(Vec<u8>, String), SyncError> {
        let response = self.request(reqwest::Method::GET, key).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound),
            s if s.is_success() => {
                let etag = Self::etag_of(&response)?;
                let body = response.bytes().await?.to_vec();
                Ok((body, etag))
            }
            _ => Err(Self::fail_from(response).await),
        }
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<String, SyncError> {
        let response = self.request(reqwest::Method::GET, key).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound),
            s if s.is_success() => {
                let etag = Self::etag_of(&response)?;
                let mut file = tokio::fs::File::create(dest).await?;
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    file.write_all(&chunk?).await?;
                }
                file.flush().await?;
                Ok(etag)
            }
            _ => Err(Self::fail_from(response).await),
        }
    }

    async fn head(&self, key: &str) -> Result<String, SyncError> {
        let response = self.request(reqwest::Method::HEAD, key).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound),
            s if s.is_success() => Self::etag_of(&response),
            _ => Err(Self::fail_from(response).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SyncError> {
        let response = self.request(reqwest::Method::DELETE, key).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(Self::fail_from(response).await),
        }
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<String>, SyncError> {
        let response = self
            .request(reqwest::Method::PUT, key)
            .header(CONTENT_TYPE, content_type)
            .header(IF_NONE_MATCH, "*")
            .body(body)
            .send()
            .await?;
        match response.status() {
            StatusCode::PRECONDITION_FAILED => Ok(None),
            s if s.is_success() => Ok(Some(Self::etag_of(&response)?)),
            _ => Err(Self::fail_from(response).await),
        }
    }

    async fn put_if_match(
        &self,
        key: &str,
        body: Vec<u8>,
        etag: &str,
        content_type: &str,
    ) -> Result<Option<String>, SyncError> {
        let response = self
            .request(reqwest::Method::PUT, key)
            .header(CONTENT_TYPE, content_type)
            .header(IF_MATCH, format!("\"{etag}\""))
            .body(body)
            .send()
            .await?;
        match response.status() {
            StatusCode::PRECONDITION_FAILED => Ok(None),
            s if s.is_success() => Ok(Some(Self::etag_of(&response)?)),
            _ => Err(Self::fail_from(response).await),
        }
    }
}

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    #[allow(dead_code)]
    content_type: String,
}

/// In-process object store with the same conditional-write semantics as
/// the HTTP implementation. Backs the test suites and single-process
/// experiments.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    versions: AtomicU64,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        format!("v{}", self.versions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, SyncError> {
        let etag = self.next_etag();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: body,
                etag: etag.clone(),
                content_type: content_type.to_string(),
            },
        );
        Ok(etag)
    }

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<String, SyncError> {
        let body = tokio::fs::read(path).await?;
        self.upload(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> Result<(Vec<u8>, String), SyncError> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .map(|o| (o.data.clone(), o.etag.clone()))
            .ok_or(SyncError::NotFound)
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<String, SyncError> {
        let (data, etag) = self.get(key).await?;
        tokio::fs::write(dest, data).await?;
        Ok(etag)
    }

    async fn head(&self, key: &str) -> Result<String, SyncError> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .map(|o| o.etag.clone())
            .ok_or(SyncError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), SyncError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<String>, SyncError> {
        let etag = self.next_etag();
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            return Ok(None);
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                etag: etag.clone(),
                content_type: content_type.to_string(),
            },
        );
        Ok(Some(etag))
    }

    async fn put_if_match(
        &self,
        key: &str,
        body: Vec<u8>,
        etag: &str,
        content_type: &str,
    ) -> Result<Option<String>, SyncError> {
        let new_etag = self.next_etag();
        let mut objects = self.objects.lock().unwrap();
        match objects.get(key) {
            Some(existing) if existing.etag == etag => {
                objects.insert(
                    key.to_string(),
                    StoredObject {
                        data: body,
                        etag: new_etag.clone(),
                        content_type: content_type.to_string(),
                    },
                );
                Ok(Some(new_etag))
            }
            _ => Ok(None),
        }
    }
}
