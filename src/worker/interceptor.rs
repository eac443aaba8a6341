//! Per-request dispatch between the cache and the network.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use metrics::counter;
use tracing::debug;
use url::Url;

use super::{
    classify::{ResourceClass, ResourceLocator},
    error::FetchError,
    fetcher::{FetchPlan, LookupOrder, ResolvedFrom, ResourceFetcher, StorePolicy},
    mode::ModeFlag,
    network::NetworkRequest,
    store::StoredResponse,
};

const METRIC_FALLBACK: &str = "offline_worker_fallback_total";

/// Marks whether a response came from the cache (`hit`) or the network (`miss`).
pub const WORKER_CACHE_HEADER: HeaderName = HeaderName::from_static("x-worker-cache");

const UNAVAILABLE_TEXT: &str = "Service unavailable: the resource could not be loaded from the network or the offline cache.";
const UNAVAILABLE_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body><h1>Offline</h1><p>This page could not be loaded from the network or the offline cache.</p></body></html>\n";

/// A request a page made under the worker's scope.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Top-level document load.
    pub navigation: bool,
    pub body: Bytes,
}

impl InterceptedRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            navigation: false,
            body: Bytes::new(),
        }
    }
}

/// How an intercepted request was answered.
#[derive(Debug)]
pub enum Interception {
    /// Served from the cache or the network.
    Resolved(StoredResponse),
    /// Non-GET request forwarded upstream untouched.
    Forwarded(StoredResponse),
    /// Synthesized because nothing could deliver the resource.
    Unavailable {
        response: StoredResponse,
        error: FetchError,
    },
}

impl Interception {
    pub fn into_stored(self) -> StoredResponse {
        match self {
            Self::Resolved(response) | Self::Forwarded(response) => response,
            Self::Unavailable { response, .. } => response,
        }
    }
}

pub struct RequestInterceptor {
    fetcher: Arc<ResourceFetcher>,
    mode: Arc<ModeFlag>,
}

impl RequestInterceptor {
    pub fn new(fetcher: Arc<ResourceFetcher>, mode: Arc<ModeFlag>) -> Self {
        Self { fetcher, mode }
    }

    /// Answer `request`. Never fails: when neither the network nor the cache
    /// can deliver, the page gets a synthesized 503.
    pub async fn handle(&self, request: InterceptedRequest) -> Interception {
        if request.method != Method::GET {
            return self.pass_through(request).await;
        }

        let locator = ResourceLocator::from_url(request.url, self.fetcher.origin());
        let class = ResourceClass::classify(locator.path(), request.navigation);
        let plan = self.plan_for(class);

        match self.fetcher.fetch_resource(&locator, plan).await {
            Ok(resolved) => {
                let marker = match resolved.source {
                    ResolvedFrom::Cache => "hit",
                    ResolvedFrom::Network => "miss",
                };
                let mut response = resolved.response;
                response.set_header(WORKER_CACHE_HEADER, HeaderValue::from_static(marker));
                Interception::Resolved(response)
            }
            Err(error) => {
                counter!(METRIC_FALLBACK, "class" => class.as_str()).increment(1);
                debug!(
                    target = "offline_worker::interceptor",
                    key = %locator.cache_key(),
                    class = class.as_str(),
                    error = %error,
                    "serving unavailable response"
                );
                Interception::Unavailable {
                    response: unavailable_response(class),
                    error,
                }
            }
        }
    }

    fn plan_for(&self, class: ResourceClass) -> FetchPlan {
        if class.is_mode_aware() {
            FetchPlan {
                order: LookupOrder::from(self.mode.current()),
                markup: class == ResourceClass::Markup,
                store: StorePolicy::Always,
            }
        } else {
            FetchPlan {
                order: LookupOrder::NetworkFirst,
                markup: false,
                store: StorePolicy::SameOriginOnly,
            }
        }
    }

    async fn pass_through(&self, request: InterceptedRequest) -> Interception {
        debug!(
            target = "offline_worker::interceptor",
            method = %request.method,
            url = %request.url,
            "passing request through"
        );

        let url = request.url.to_string();
        let outgoing = NetworkRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
        };

        match self.fetcher.network().send(outgoing).await {
            Ok(response) => Interception::Forwarded(response),
            Err(source) => Interception::Unavailable {
                response: StoredResponse::with_content_type(
                    StatusCode::BAD_GATEWAY,
                    "text/plain",
                    "Bad gateway: the upstream server could not be reached.",
                ),
                error: FetchError::Network { url, source },
            },
        }
    }
}

/// The response served when a request cannot be satisfied at all.
pub fn unavailable_response(class: ResourceClass) -> StoredResponse {
    match class {
        ResourceClass::Markup => StoredResponse::with_content_type(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/html",
            UNAVAILABLE_HTML,
        ),
        _ => StoredResponse::with_content_type(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain",
            UNAVAILABLE_TEXT,
        ),
    }
}
