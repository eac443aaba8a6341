//! Upstream network access over `reqwest`.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header};
use reqwest::{Client, redirect};

use crate::worker::{Network, NetworkError, NetworkRequest, StoredResponse};

use super::error::InfraError;

const MAX_REDIRECTS: usize = 10;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self, InfraError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("offline-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: NetworkRequest) -> Result<StoredResponse, NetworkError> {
        let NetworkRequest {
            method,
            url,
            mut headers,
            body,
        } = request;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_builder() {
                    NetworkError::InvalidRequest(err.to_string())
                } else {
                    NetworkError::transport(err.to_string())
                }
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = response
            .bytes()
            .await
            .map_err(|err| NetworkError::transport(format!("failed to read body: {err}")))?;

        Ok(StoredResponse::new(status, headers, body))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
