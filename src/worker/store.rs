//! Named, versioned request/response cache generations.
//!
//! [`CacheStorage`] is the seam to the platform's cache store; the worker only
//! ever opens generations by name, matches and puts entries by key, and drops
//! whole generations on version rollover. [`MemoryCacheStorage`] keeps
//! generations for the life of the process; the disk-backed store lives in
//! `infra::disk_cache`.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::RwLock;

use super::error::CacheStoreError;

/// A fully buffered response.
///
/// The body is reference counted, so cloning to both serve and store a
/// response never consumes it twice.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl StoredResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with a single `Content-Type` header.
    pub fn with_content_type(
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(status, headers, body.into())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }
}

impl IntoResponse for StoredResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.clear();
        for (name, value) in self.headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        response
    }
}

/// One cache generation.
#[async_trait]
pub trait CacheGeneration: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>, CacheStoreError>;

    /// Store `response` under `key`, replacing any previous entry atomically.
    async fn put(&self, key: &str, response: StoredResponse) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError>;

    async fn keys(&self) -> Result<Vec<String>, CacheStoreError>;
}

/// The set of generations known to the platform.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it when absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, CacheStoreError>;

    async fn names(&self) -> Result<Vec<String>, CacheStoreError>;

    /// Remove a generation and every entry in it.
    async fn delete(&self, name: &str) -> Result<bool, CacheStoreError>;
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    generations: RwLock<HashMap<String, Arc<MemoryGeneration>>>,
    quota_bytes: Option<usize>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit every generation to `quota_bytes` of response bodies.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            generations: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, CacheStoreError> {
        let mut guard = self.generations.write().await;
        let generation: Arc<dyn CacheGeneration> = guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryGeneration::new(name, self.quota_bytes)))
            .clone();
        Ok(generation)
    }

    async fn names(&self) -> Result<Vec<String>, CacheStoreError> {
        let guard = self.generations.read().await;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheStoreError> {
        let mut guard = self.generations.write().await;
        Ok(guard.remove(name).is_some())
    }
}

struct MemoryGeneration {
    name: String,
    entries: RwLock<HashMap<String, StoredResponse>>,
    quota_bytes: Option<usize>,
}

impl MemoryGeneration {
    fn new(name: &str, quota_bytes: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            quota_bytes,
        }
    }
}

#[async_trait]
impl CacheGeneration for MemoryGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>, CacheStoreError> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &str, response: StoredResponse) -> Result<(), CacheStoreError> {
        let mut guard = self.entries.write().await;

        if let Some(quota) = self.quota_bytes {
            let used: usize = guard
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, entry)| entry.body().len())
                .sum();
            if used + response.body().len() > quota {
                return Err(CacheStoreError::QuotaExceeded {
                    key: key.to_string(),
                    quota,
                });
            }
        }

        guard.insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut guard = self.entries.write().await;
        Ok(guard.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheStoreError> {
        let guard = self.entries.read().await;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(body: &'static str) -> StoredResponse {
        StoredResponse::with_content_type(StatusCode::OK, "text/plain", body)
    }

    #[tokio::test]
    async fn open_returns_the_same_generation_by_name() {
        let storage = MemoryCacheStorage::new();
        let first = storage.open("cards-v1").await.expect("open");
        first.put("/a.json", text("a")).await.expect("put");

        let again = storage.open("cards-v1").await.expect("reopen");
        let entry = again.lookup("/a.json").await.expect("lookup");
        assert_eq!(entry.expect("entry").body(), &Bytes::from_static(b"a"));
        assert_eq!(again.name(), "cards-v1");
    }

    #[tokio::test]
    async fn put_replaces_previous_entry() {
        let storage = MemoryCacheStorage::new();
        let generation = storage.open("cards-v1").await.expect("open");
        generation.put("/a.json", text("old")).await.expect("put");
        generation.put("/a.json", text("new")).await.expect("put");

        let entry = generation.lookup("/a.json").await.expect("lookup");
        assert_eq!(entry.expect("entry").body(), &Bytes::from_static(b"new"));
        assert_eq!(generation.keys().await.expect("keys"), vec!["/a.json"]);
    }

    #[tokio::test]
    async fn delete_drops_the_whole_generation() {
        let storage = MemoryCacheStorage::new();
        storage.open("cards-v1").await.expect("open");
        storage.open("cards-v2").await.expect("open");

        assert!(storage.delete("cards-v1").await.expect("delete"));
        assert!(!storage.delete("cards-v1").await.expect("delete twice"));
        assert_eq!(storage.names().await.expect("names"), vec!["cards-v2"]);

        let reopened = storage.open("cards-v1").await.expect("reopen");
        assert!(reopened.keys().await.expect("keys").is_empty());
    }

    #[tokio::test]
    async fn quota_rejects_writes_that_do_not_fit() {
        let storage = MemoryCacheStorage::with_quota(4);
        let generation = storage.open("cards-v1").await.expect("open");

        generation.put("/a", text("abc")).await.expect("fits");
        let err = generation
            .put("/b", text("de"))
            .await
            .expect_err("exceeds quota");
        assert!(matches!(err, CacheStoreError::QuotaExceeded { quota: 4, .. }));

        // Replacing an entry only counts the new body.
        generation.put("/a", text("abcd")).await.expect("replace fits");
    }

    #[test]
    fn into_response_keeps_status_headers_and_body() {
        let stored = StoredResponse::with_content_type(StatusCode::ACCEPTED, "text/html", "<p>");
        let response = stored.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).expect("content type"),
            "text/html"
        );
    }
}
