//! WebSocket connections: one [`RemoteSession`] per socket.
//!
//! Requests from a connection are handled in arrival order. Pushes go
//! through a bounded outbound queue drained by a writer task.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::protocol::{ClientFrame, RequestId, ServerFrame, recover_request_id};
use crate::session::{AckError, RemoteSession, SessionError, Tag};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(state.outbound_capacity);
    let session = state.sessions.register(state.relay.clone(), tx).await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let types = ServerFrame::Types {
        types: state.relay.registry().descriptors(),
    };
    if session.send(types).await.is_ok() {
        info!(session = %session.id(), "Client connected");
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    if let Some(reply) = respond(&session, text.as_str()).await
                        && session.send(reply).await.is_err()
                    {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(session = %session.id(), error = %e, "Socket error");
                    break;
                }
            }
        }
    }

    state.sessions.unregister(session.id()).await;
    writer.abort();
    info!(session = %session.id(), "Client disconnected");
}

/// Handle one text frame from a client and build the reply, if any.
pub async fn respond(session: &RemoteSession, text: &str) -> Option<ServerFrame> {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session = %session.id(), error = %e, "Unparseable client frame");
            let err = SessionError::InvalidRequest(e.to_string());
            return Some(match recover_request_id(text) {
                Some(id) => ServerFrame::nack(id, AckError::from(&err)),
                None => ServerFrame::Error {
                    message: err.to_string(),
                },
            });
        }
    };

    match frame {
        ClientFrame::Publish { channel, msg, ty } => {
            if let Err(e) = session.publish(&channel, msg, ty.as_ref()).await {
                warn!(session = %session.id(), channel, error = %e, "Client publish failed");
            }
            None
        }
        ClientFrame::Subscribe { id, channel, ty } => {
            Some(tag_reply(id, session.subscribe(&channel, ty.as_ref()).await))
        }
        ClientFrame::SubscribeAll { id } => Some(tag_reply(id, session.subscribe_all().await)),
        ClientFrame::Unsubscribe { id, tag } => {
            session.unsubscribe(tag).await;
            Some(ServerFrame::ack(id))
        }
        ClientFrame::Flush { id } => Some(reply(id, session.flush().await)),
        ClientFrame::Pause { id } => Some(reply(id, session.pause())),
        ClientFrame::Resume { id } => Some(reply(id, session.resume())),
        ClientFrame::SetQueueSize { id, size } => {
            Some(reply(id, session.set_queue_size(size).await))
        }
    }
}

fn reply(id: RequestId, result: Result<(), SessionError>) -> ServerFrame {
    match result {
        Ok(()) => ServerFrame::ack(id),
        Err(e) => nack(id, &e),
    }
}

fn tag_reply(id: RequestId, result: Result<Tag, SessionError>) -> ServerFrame {
    match result {
        Ok(tag) => ServerFrame::ack_tag(id, tag),
        Err(e) => nack(id, &e),
    }
}

fn nack(id: RequestId, err: &SessionError) -> ServerFrame {
    debug!(id, error = %err, "Request failed");
    ServerFrame::nack(id, AckError::from(err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::bridge::Status;
    use crate::test_helpers::{Op, fake_relay};

    async fn ask(session: &RemoteSession, request: Value) -> Value {
        let reply = respond(session, &request.to_string()).await.unwrap();
        serde_json::to_value(reply).unwrap()
    }

    #[tokio::test]
    async fn subscribe_acks_with_tag() {
        let (relay, _fake) = fake_relay();
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let ack = ask(
            &session,
            json!({"event": "subscribe", "id": 1, "channel": "POSE", "type": "example_t"}),
        )
        .await;
        assert_eq!(ack, json!({"event": "ack", "id": 1, "ok": true, "tag": 1}));

        let ack = ask(&session, json!({"event": "subscribe_all", "id": 2})).await;
        assert_eq!(ack["tag"], 2);
    }

    #[tokio::test]
    async fn unknown_type_is_reported_with_session_code() {
        let (relay, _fake) = fake_relay();
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let ack = ask(
            &session,
            json!({"event": "subscribe", "id": 3, "channel": "POSE", "type": "nope_t"}),
        )
        .await;
        assert_eq!(ack["ok"], false);
        assert_eq!(ack["error"]["code"], "unknown_type");
    }

    #[tokio::test]
    async fn transport_failures_are_translated() {
        let (relay, fake) = fake_relay();
        fake.script(Op::Flush, [Status::Intr]);
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let ack = ask(&session, json!({"event": "flush", "id": 4})).await;
        assert_eq!(ack["ok"], false);
        assert_eq!(ack["error"]["code"], "transport_error");
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_tag_acks() {
        let (relay, _fake) = fake_relay();
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let ack = ask(&session, json!({"event": "unsubscribe", "id": 5, "tag": 40})).await;
        assert_eq!(ack, json!({"event": "ack", "id": 5, "ok": true}));
    }

    #[tokio::test]
    async fn unsubscribe_acks_when_the_transport_fails() {
        let (relay, fake) = fake_relay();
        fake.script(Op::Unsubscribe, [Status::Intr]);
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let ack = ask(&session, json!({"event": "subscribe", "id": 1, "channel": "POSE"})).await;
        let tag = ack["tag"].as_u64().unwrap();
        let ack = ask(&session, json!({"event": "unsubscribe", "id": 2, "tag": tag})).await;
        assert_eq!(ack, json!({"event": "ack", "id": 2, "ok": true}));
        assert_eq!(session.subscription_count(), 0);
    }

    #[tokio::test]
    async fn publish_has_no_reply() {
        let (relay, fake) = fake_relay();
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let request = json!({
            "event": "client-to-server",
            "channel": "POSE",
            "type": "example_t",
            "msg": {"utime": 1, "position": [0.0, 0.0, 0.0], "name": "x"}
        });
        assert!(respond(&session, &request.to_string()).await.is_none());
        assert_eq!(fake.calls(Op::Publish), 1);
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error() {
        let (relay, _fake) = fake_relay();
        let (tx, _rx) = mpsc::channel(8);
        let session = RemoteSession::new(relay, tx);

        let with_id = ask(&session, json!({"event": "setQueueSize", "id": 6})).await;
        assert_eq!(with_id["id"], 6);
        assert_eq!(with_id["error"]["code"], "invalid_request");

        let reply = respond(&session, "{{{").await.unwrap();
        assert!(matches!(reply, ServerFrame::Error { .. }));
    }
}
