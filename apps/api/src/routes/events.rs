//! Event streaming (SSE)
//!
//! Events are live notifications, not primary data storage; a subscriber
//! that missed an event may not assume durability. Each message is a
//! `data: <json>` frame; heartbeats are comment lines at a fixed cadence.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use conductor_engine::bus::DEFAULT_BUFFER;

use crate::state::AppState;

/// Heartbeat cadence for idle streams
const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Only stream events for this application
    pub app: Option<String>,
}

/// GET /api/events/stream - live event stream over SSE
async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.bus.subscribe(query.app, DEFAULT_BUFFER).await;

    let stream = ReceiverStream::new(subscription.rx).map(|event| {
        let sse = match serde_json::to_string(&event) {
            Ok(json) => SseEvent::default().data(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                SseEvent::default().comment("serialization error")
            }
        };
        Ok(sse)
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT))
}

/// Build event routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/stream", get(stream_events))
}
