//! Real-time graph updates over WebSocket
//!
//! On connect the client receives the current graph, then a fresh
//! projection after every lifecycle event touching the application. The
//! socket closes when the client goes away or the send fails.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};

use conductor_engine::bus::DEFAULT_BUFFER;

use crate::state::AppState;

/// GET /api/graph/{app}/ws
pub async fn graph_updates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, app))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, app: String) {
    let mut subscription = state.bus.subscribe(Some(app.clone()), DEFAULT_BUFFER).await;

    if !send_graph(&mut socket, &state, &app).await {
        return;
    }

    loop {
        tokio::select! {
            event = subscription.rx.recv() => {
                if event.is_none() {
                    break;
                }
                if !send_graph(&mut socket, &state, &app).await {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Ignore pings and client chatter.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.bus.unsubscribe(subscription.id).await;
}

/// Project and push the graph; false when the socket is gone.
async fn send_graph(socket: &mut WebSocket, state: &AppState, app: &str) -> bool {
    let graph = match state.projector.project(app).await {
        Ok(graph) => graph,
        Err(e) => {
            tracing::warn!(app, error = %e, "graph projection failed");
            return socket
                .send(Message::Text(
                    serde_json::json!({"error": e.to_string()}).to_string().into(),
                ))
                .await
                .is_ok();
        }
    };

    match serde_json::to_string(&graph) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}
