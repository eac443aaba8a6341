use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::{
    error::{ErrorReport, HttpError},
    worker::{InterceptedRequest, Interception},
};

use super::HttpState;

const SOURCE: &str = "infra::http::intercept";
const MAX_FORWARDED_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Route an arbitrary request through the worker's interceptor.
pub(super) async fn intercept(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let url = match request_url(&parts.uri, &state.worker.config().origin) {
        Ok(url) => url,
        Err(reason) => {
            return HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                reason,
            )
            .into_response();
        }
    };

    let body = match to_bytes(body, MAX_FORWARDED_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
                &err,
            )
            .into_response();
        }
    };

    let navigation = is_navigation(&parts.method, &parts.headers);
    let interception = state
        .worker
        .interceptor()
        .handle(InterceptedRequest {
            method: parts.method,
            url,
            headers: parts.headers,
            navigation,
            body,
        })
        .await;

    match interception {
        Interception::Resolved(response) | Interception::Forwarded(response) => {
            response.into_response()
        }
        Interception::Unavailable { response, error } => {
            let status = response.status();
            let mut response = response.into_response();
            ErrorReport::from_error(SOURCE, status, &error).attach(&mut response);
            response
        }
    }
}

/// Resolve the request target against the origin. Absolute-form targets
/// (proxy style) are taken as they are, so they may name remote resources.
fn request_url(uri: &Uri, origin: &Url) -> Result<Url, String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|err| format!("invalid target `{uri}`: {err}"));
    }

    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    origin
        .join(target)
        .map_err(|err| format!("invalid target `{target}`: {err}"))
}

fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    if *method != Method::GET {
        return false;
    }
    if let Some(mode) = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
        return mode.eq_ignore_ascii_case("navigate");
    }
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.starts_with("text/html"))
}
