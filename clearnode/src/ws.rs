//! The websocket endpoint: one task per connection, reading signed RPC
//! messages in receive order, writing responses and server pushes through a
//! single outgoing channel.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use slog::{debug, error, info, warn, Logger};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use primitives::{
    rpc::{AuthRequestParams, ErrorKind, Message, MessageKind, Method},
    Address,
};

use crate::{
    auth::AuthState,
    db::{self, rpc_record::RpcRecord},
    handlers,
    subscriptions::ConnectionId,
    Application, HandlerError,
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(app): Extension<Arc<Application>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: Arc<Application>) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let logger = app
        .logger
        .new(slog::o!("connection" => connection_id.to_string()));
    info!(logger, "connection opened");

    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();

    let ping_interval = Duration::from_secs(app.config.ping_interval_secs);
    let writer = tokio::spawn(write_loop(sink, out_rx, ping_interval));

    let mut auth = AuthState::new(app.config.challenge_ttl_secs);

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => {
                process_message(
                    &app,
                    &logger,
                    &mut auth,
                    connection_id,
                    text.as_bytes(),
                    &out_tx,
                )
                .await;
            }
            Ok(WsMessage::Binary(data)) => {
                process_message(&app, &logger, &mut auth, connection_id, &data, &out_tx).await;
            }
            // tungstenite answers pings on its own
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(_)) => break,
            Err(err) => {
                warn!(logger, "websocket read failed"; "error" => %err);
                break;
            }
        }
    }

    if let Some(address) = auth.authenticated() {
        app.subscriptions.unsubscribe(&address, &connection_id);
    }
    drop(out_tx);
    let _ = writer.await;

    info!(logger, "connection closed");
}

/// Owns the write half: serializes outgoing messages and keeps the socket
/// alive with protocol pings.
async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut out_rx: UnboundedReceiver<Message>,
    ping_interval: Duration,
) {
    let mut interval = tokio::time::interval(ping_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it
    interval.tick().await;

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => match outgoing {
                Some(message) => {
                    let text = match String::from_utf8(message.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn process_message(
    app: &Application,
    logger: &Logger,
    auth: &mut AuthState,
    connection_id: ConnectionId,
    bytes: &[u8],
    out_tx: &UnboundedSender<Message>,
) {
    let message = match Message::parse(bytes) {
        Ok(message) if message.kind == MessageKind::Request => message,
        Ok(_) => {
            // a "res" envelope is not something a client may send
            send_error(app, logger, out_tx, best_effort_id(bytes), ErrorKind::FailsMalformed);
            return;
        }
        Err(err) => {
            debug!(logger, "dropping malformed message"; "error" => %err);
            send_error(app, logger, out_tx, best_effort_id(bytes), ErrorKind::FailsMalformed);
            return;
        }
    };

    let request_id = message.payload.request_id;
    let now = Utc::now();

    let (mut response, record_sender) = match message.method() {
        Some(Method::AuthRequest) => match auth.handle_auth_request(&message, now) {
            Ok(challenge) => {
                let sender = message
                    .payload
                    .named_params::<AuthRequestParams>()
                    .ok()
                    .map(|params| params.address);
                let response = Message::response(
                    request_id,
                    &Method::AuthChallenge.to_string(),
                    vec![json!(challenge)],
                );

                (response, sender)
            }
            Err(err) => {
                debug!(logger, "auth_request rejected"; "error" => %err);
                (Message::error_response(request_id, err.kind()), None)
            }
        },
        Some(Method::AuthVerify) => match auth.handle_auth_verify(&message, now) {
            Ok(verified) => {
                app.subscriptions
                    .subscribe(verified.address, connection_id, out_tx.clone());
                info!(logger, "authenticated"; "address" => %verified.address);

                let response = Message::response(
                    request_id,
                    &Method::AuthVerify.to_string(),
                    vec![json!(verified)],
                );

                (response, Some(verified.address))
            }
            Err(err) => {
                debug!(logger, "auth_verify rejected"; "error" => %err);
                (Message::error_response(request_id, err.kind()), None)
            }
        },
        _ => match auth.authenticated() {
            None => (
                Message::error_response(request_id, ErrorKind::FailsUnauthenticated),
                None,
            ),
            Some(caller) => match handlers::dispatch(app, caller, &message).await {
                Ok(response) => (response, Some(caller)),
                Err(err) => {
                    warn!(logger, "handler failed";
                          "method" => %message.payload.method, "error" => %err);

                    (Message::error_response(request_id, err.kind()), Some(caller))
                }
            },
        },
    };

    if let Err(err) = app.sign_message(&mut response) {
        error!(logger, "failed to sign response"; "error" => %err);
        return;
    }

    // the audit record is written before the response leaves the broker
    if let Some(sender) = record_sender {
        record_exchange(app, logger, sender, &message, &response).await;
    }

    let _ = out_tx.send(response);
}

async fn record_exchange(
    app: &Application,
    logger: &Logger,
    sender: Address,
    request: &Message,
    response: &Message,
) {
    let record = RpcRecord {
        sender,
        req_id: request.payload.request_id,
        method: request.payload.method.clone(),
        params: serde_json::Value::Array(request.payload.params.clone()),
        timestamp: request.payload.timestamp,
        req_sig: request
            .signatures
            .iter()
            .map(|signature| signature.to_string())
            .collect(),
        response: serde_json::Value::Array(response.payload.params.clone()),
        res_sig: response
            .signatures
            .iter()
            .map(|signature| signature.to_string())
            .collect(),
    };

    let result: Result<(), HandlerError> = async {
        let client = app.pool.get().await.map_err(db::PoolError::from)?;
        db::rpc_record::insert(&*client, &record).await?;

        Ok(())
    }
    .await;

    if let Err(err) = result {
        error!(logger, "failed to persist rpc record";
               "sender" => %sender, "error" => %err);
    }
}

fn send_error(
    app: &Application,
    logger: &Logger,
    out_tx: &UnboundedSender<Message>,
    request_id: u64,
    kind: ErrorKind,
) {
    let mut response = Message::error_response(request_id, kind);
    if let Err(err) = app.sign_message(&mut response) {
        error!(logger, "failed to sign error response"; "error" => %err);
        return;
    }

    let _ = out_tx.send(response);
}

/// Digs the request id out of an unparseable envelope, falling back to zero.
fn best_effort_id(bytes: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|value| {
            value
                .get("req")
                .or_else(|| value.get("res"))
                .and_then(|payload| payload.get(0))
                .and_then(|id| id.as_u64())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn best_effort_id_recovers_what_it_can() {
        // a request whose array is too short still yields its id
        assert_eq!(9, best_effort_id(br#"{"req":[9,"ping"],"sig":[]}"#));
        assert_eq!(3, best_effort_id(br#"{"res":[3],"sig":[]}"#));
        assert_eq!(0, best_effort_id(br#"{"req":["x","ping"],"sig":[]}"#));
        assert_eq!(0, best_effort_id(b"not json"));
        assert_eq!(0, best_effort_id(br#"{"sig":[]}"#));
    }
}
