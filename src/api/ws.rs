//! `/ws` event stream: a sync snapshot on connect, then every campaign event.
//!
//! Clients may also drive the approval state machine over the socket.

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::campaign::CampaignBook;
use crate::campaign::events::CampaignEvent;

/// Actions a client can send over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Approve { message_id: Uuid },
    Reject { message_id: Uuid },
    Send { message_id: Uuid },
    Edit {
        message_id: Uuid,
        body: String,
        #[serde(default)]
        subject: Option<String>,
    },
}

pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn sync_event(book: &CampaignBook) -> CampaignEvent {
    CampaignEvent::Sync {
        campaigns: book.list(None).await,
    }
}

async fn send_event(socket: &mut WebSocket, event: &CampaignEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, event = event.label(), "Failed to serialize event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");
    let book = state.service.book().clone();

    // Subscribe before the snapshot so nothing falls between the two.
    let mut rx = book.subscribe();

    if !send_event(&mut socket, &sync_event(&book).await).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_event(&mut socket, &sync_event(&book).await).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &book).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Results reach the client through the broadcast, so failures are only logged.
async fn handle_client_message(text: &str, book: &CampaignBook) {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };

    let (message_id, result) = match action {
        ClientAction::Approve { message_id } => (message_id, book.approve(message_id).await),
        ClientAction::Reject { message_id } => (message_id, book.reject(message_id).await),
        ClientAction::Send { message_id } => (message_id, book.send(message_id).await),
        ClientAction::Edit {
            message_id,
            body,
            subject,
        } => (message_id, book.edit(message_id, body, subject).await),
    };

    match result {
        Ok(message) => info!(message_id = %message_id, status = %message.status, "Message updated via WS"),
        Err(e) => warn!(message_id = %message_id, error = %e, "WS action failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_actions() {
        let id = Uuid::new_v4();
        let action: ClientAction =
            serde_json::from_str(&format!(r#"{{"action":"edit","message_id":"{id}","body":"Hi"}}"#))
                .unwrap();
        match action {
            ClientAction::Edit {
                message_id,
                body,
                subject,
            } => {
                assert_eq!(message_id, id);
                assert_eq!(body, "Hi");
                assert!(subject.is_none());
            }
            other => panic!("unexpected action {other:?}"),
        }

        assert!(serde_json::from_str::<ClientAction>(r#"{"action":"dismiss"}"#).is_err());
    }
}
