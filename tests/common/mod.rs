#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::http::StatusCode;
use offline_worker::worker::{
    CacheStorage, LifecycleController, MemoryCacheStorage, Network, NetworkError, NetworkRequest,
    StoredResponse, WorkerConfig,
};
use url::Url;

pub const ORIGIN: &str = "https://cards.example/";

/// Upstream that serves a fixed set of URLs and can be taken offline.
#[derive(Default)]
pub struct Upstream {
    pages: Mutex<HashMap<String, StoredResponse>>,
    offline: Mutex<bool>,
    hits: Mutex<Vec<String>>,
}

impl Upstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, content_type: &'static str, body: &'static str) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                url.to_string(),
                StoredResponse::with_content_type(StatusCode::OK, content_type, body),
            );
    }

    pub fn go_offline(&self) {
        *self.offline.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Network for Upstream {
    async fn send(&self, request: NetworkRequest) -> Result<StoredResponse, NetworkError> {
        let url = request.url.to_string();
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());

        if *self.offline.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(NetworkError::transport("connection refused"));
        }

        Ok(self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url)
            .cloned()
            .unwrap_or_else(|| {
                StoredResponse::with_content_type(StatusCode::NOT_FOUND, "text/plain", "missing")
            }))
    }
}

/// A site with the default core files plus one data file and one image.
pub fn site() -> Arc<Upstream> {
    let upstream = Upstream::new();
    upstream.serve(ORIGIN, "text/html", "<h1>home</h1>");
    upstream.serve(&format!("{ORIGIN}index.html"), "text/html", "<h1>home</h1>");
    upstream.serve(&format!("{ORIGIN}view.html"), "text/html", "<h1>view</h1>");
    upstream.serve(&format!("{ORIGIN}packs.json"), "application/json", r#"["starter"]"#);
    upstream.serve(&format!("{ORIGIN}data/cards.json"), "application/json", r#"{"cards":3}"#);
    upstream.serve(&format!("{ORIGIN}img/ace.png"), "image/png", "png-bytes");
    upstream
}

pub fn origin() -> Url {
    Url::parse(ORIGIN).expect("origin parses")
}

pub fn worker(version: &str, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Arc<LifecycleController> {
    Arc::new(LifecycleController::new(
        WorkerConfig::new(origin(), "cards", version),
        storage,
        network,
    ))
}

pub async fn active_worker(upstream: Arc<Upstream>) -> Arc<LifecycleController> {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
    let worker = worker("v1", storage, upstream);
    worker.start().await;
    worker
}
