use std::convert::Infallible;

use async_stream::stream;
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::HttpError,
    worker::{ClientId, ControlMessage, MessageOutcome},
};

use super::{CLIENT_HEADER, HttpState};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct EventsQuery {
    client: Option<String>,
}

/// Accept a control message from a page.
pub(super) async fn post_message(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let client = client_id(&headers, None);

    let message = ControlMessage::from_slice(&body).map_err(|err| {
        warn!(
            target = "offline_worker::http::control",
            client = client.as_ref().map(ClientId::as_str).unwrap_or(""),
            error = %err,
            "rejected control message"
        );
        HttpError::from(err)
    })?;

    let kind = message.kind();
    let response = match state.worker.handle_message(client, message) {
        MessageOutcome::ModeChanged { previous, current } => Json(json!({
            "type": kind,
            "previous": previous,
            "mode": current,
        }))
        .into_response(),
        MessageOutcome::PrefetchStarted { total, .. } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "type": kind,
                "total": total,
            })),
        )
            .into_response(),
    };

    Ok(response)
}

/// Stream worker → page messages to one connected page.
///
/// The first event (`client`) carries the page's id, generated when the page
/// did not supply one; the page echoes it in `x-worker-client` on later
/// control messages.
pub(super) async fn events(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Response {
    let id = client_id(&headers, query.client.as_deref()).unwrap_or_else(ClientId::generate);
    let mut subscription = state.worker.clients().subscribe(id.clone());
    info!(
        target = "offline_worker::http::control",
        client = %id,
        "page connected"
    );

    let stream = stream! {
        yield Ok::<Event, Infallible>(Event::default().event("client").data(id.as_str()));

        while let Some(message) = subscription.recv().await {
            match Event::default().json_data(&message) {
                Ok(event) => yield Ok(event),
                Err(err) => warn!(
                    target = "offline_worker::http::control",
                    client = %id,
                    error = %err,
                    "failed to encode worker message"
                ),
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub(super) async fn status(State(state): State<HttpState>) -> Response {
    Json(state.worker.status().await).into_response()
}

fn client_id(headers: &HeaderMap, fallback: Option<&str>) -> Option<ClientId> {
    headers
        .get(CLIENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(fallback)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ClientId::new)
}
