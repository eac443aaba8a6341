//! Scripted network and a broken cache store used by the worker's unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::http::StatusCode;

use super::{
    error::{CacheStoreError, NetworkError},
    network::{Network, NetworkRequest},
    store::{CacheGeneration, CacheStorage, StoredResponse},
};

enum Reply {
    Respond(StoredResponse),
    Fail,
}

/// Answers from a fixed table; unknown URLs get a 404.
#[derive(Default)]
pub(crate) struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ok(body: &'static str) -> StoredResponse {
        StoredResponse::with_content_type(StatusCode::OK, "text/plain", body)
    }

    pub(crate) fn serve(&self, url: &str, body: &'static str) {
        self.reply(url, Reply::Respond(Self::ok(body)));
    }

    pub(crate) fn status(&self, url: &str, status: StatusCode) {
        self.reply(
            url,
            Reply::Respond(StoredResponse::with_content_type(status, "text/plain", "")),
        );
    }

    pub(crate) fn fail(&self, url: &str) {
        self.reply(url, Reply::Fail);
    }

    /// Every URL sent so far, in order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reply(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), reply);
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn send(&self, request: NetworkRequest) -> Result<StoredResponse, NetworkError> {
        let url = request.url.to_string();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());

        match self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url)
        {
            Some(Reply::Respond(response)) => Ok(response.clone()),
            Some(Reply::Fail) => Err(NetworkError::transport(format!("{url} unreachable"))),
            None => Ok(StoredResponse::with_content_type(
                StatusCode::NOT_FOUND,
                "text/plain",
                "not found",
            )),
        }
    }
}

/// A cache store whose generations can never be opened.
pub(crate) struct UnavailableStorage;

#[async_trait]
impl CacheStorage for UnavailableStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, CacheStoreError> {
        Err(CacheStoreError::unavailable(name, "disk detached"))
    }

    async fn names(&self) -> Result<Vec<String>, CacheStoreError> {
        Err(CacheStoreError::unavailable("*", "disk detached"))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheStoreError> {
        Err(CacheStoreError::unavailable(name, "disk detached"))
    }
}
