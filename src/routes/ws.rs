use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::coordinator::{JoinOk, SharedCoordinator};
use crate::dispatch::EventSender;
use crate::error::RelayError;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::Session;

pub fn router() -> Router {
    Router::new().route("/chat", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(coordinator): Extension<SharedCoordinator>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, coordinator))
}

/* ---------------- per connection ---------------- */

async fn client_session(socket: WebSocket, coordinator: SharedCoordinator) {
    let mut session = Session::new(Uuid::new_v4());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    coordinator.connect(session.id, out_tx.clone()).await;
    tracing::info!(session = %session.id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let typing_deadline = session.typing_deadline();
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(raw))) => match serde_json::from_str::<ClientEvent>(&raw) {
                    Ok(event) => handle_event(&coordinator, &mut session, &out_tx, event).await,
                    Err(err) => tracing::debug!(session = %session.id, %err, "skipping unparseable frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(err)) => {
                    tracing::debug!(session = %session.id, %err, "socket error");
                    break;
                }
            },
            // the client went quiet mid-type: retract the indicator ourselves
            _ = typing_expired(typing_deadline) => {
                if let Some(room) = session.disarm_typing() {
                    coordinator.stop_typing(&room, session.display_name()).await;
                }
            }
        }
    }

    // transport is gone: flush any live typing indicator, then presence
    if let Some(room) = session.disarm_typing() {
        coordinator.stop_typing(&room, session.display_name()).await;
    }
    coordinator.disconnect(session.id).await;
    send_task.abort();
    tracing::info!(session = %session.id, "client disconnected");
}

async fn typing_expired(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn handle_event(
    coordinator: &SharedCoordinator,
    session: &mut Session,
    out: &EventSender,
    event: ClientEvent,
) {
    match event {
        ClientEvent::SetUsername { username } => {
            let name = username.display_name().trim();
            if name.is_empty() {
                return;
            }
            tracing::debug!(session = %session.id, name, email = ?username.email(), "set_username");
            session.set_username(name.to_owned());
            coordinator.set_username(session.id, name).await;
        }

        ClientEvent::JoinRoom { room_name, password } => {
            let ack = match coordinator.join(session.id, &room_name, &password).await {
                Ok(JoinOk { messages, users }) => ServerEvent::join_success(messages, users),
                Err(err) => ServerEvent::join_failure(ack_message("join_room", err)),
            };
            let _ = out.send(ack);
        }

        ClientEvent::DeleteRoom { room_name, password } => {
            let ack = match coordinator.delete_room(&room_name, &password).await {
                Ok(()) => ServerEvent::DeleteResult {
                    ok: true,
                    message: None,
                },
                Err(err) => ServerEvent::DeleteResult {
                    ok: false,
                    message: Some(ack_message("delete_room", err)),
                },
            };
            let _ = out.send(ack);
        }

        ClientEvent::GetRooms => match coordinator.list_rooms().await {
            Ok(rooms) => {
                let _ = out.send(ServerEvent::Rooms { rooms });
            }
            Err(err) => {
                let _ = out.send(ServerEvent::Error {
                    message: ack_message("get_rooms", err),
                });
            }
        },

        ClientEvent::SendMessage { room_name, text } => {
            // sending ends the sender's typing indicator
            if let Some(room) = session.disarm_typing() {
                coordinator.stop_typing(&room, session.display_name()).await;
            }
            if let Err(err) = coordinator.send_message(session.id, &room_name, &text).await {
                let _ = out.send(ServerEvent::Error {
                    message: ack_message("send_message", err),
                });
            }
        }

        ClientEvent::Typing { room_name } => {
            // switching rooms mid-type retracts the old indicator first
            if let Some(prev) = session.disarm_typing() {
                if prev != room_name {
                    coordinator.stop_typing(&prev, session.display_name()).await;
                }
            }
            session.arm_typing(room_name.clone());
            coordinator.typing(&room_name, session.display_name()).await;
        }

        ClientEvent::StopTyping { room_name } => {
            session.disarm_typing();
            coordinator.stop_typing(&room_name, session.display_name()).await;
        }

        ClientEvent::AddReaction {
            message_id,
            reaction,
        } => {
            if let Err(err) = coordinator
                .toggle_reaction(session.id, &message_id, &reaction)
                .await
            {
                let _ = out.send(ServerEvent::Error {
                    message: ack_message("add_reaction", err),
                });
            }
        }
    }
}

/// Client-safe ack text; store failures additionally land in the log with
/// their sqlx source, which the wire message never carries.
fn ack_message(op: &'static str, err: RelayError) -> String {
    if !err.is_rejection() {
        tracing::error!(op, error = ?err, "store operation failed");
    }
    err.to_string()
}
