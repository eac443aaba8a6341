use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use url::Url;

use super::{error::NetworkError, store::StoredResponse};

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl NetworkRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// The network the worker sits in front of.
///
/// Any HTTP status is a successful send; only transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, request: NetworkRequest) -> Result<StoredResponse, NetworkError>;
}
