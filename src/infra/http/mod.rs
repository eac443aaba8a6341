//! HTTP surface that stands in for the browser's worker platform.
//!
//! Every request outside `/_worker/` is an intercepted fetch. Pages talk to
//! the worker through the control routes: they post control messages and
//! receive progress events over server-sent events.

mod control;
mod intercept;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::worker::LifecycleController;

use middleware::{log_responses, set_request_context};

/// Header a page uses to identify itself to the worker.
pub const CLIENT_HEADER: &str = "x-worker-client";

#[derive(Clone)]
pub struct HttpState {
    pub worker: Arc<LifecycleController>,
}

impl HttpState {
    pub fn new(worker: Arc<LifecycleController>) -> Self {
        Self { worker }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/_worker/messages", post(control::post_message))
        .route("/_worker/events", get(control::events))
        .route("/_worker/status", get(control::status))
        .fallback(intercept::intercept)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
