//! `ChannelStream` over WebSocket.
//!
//! The upgrade request's headers are the call metadata, so the handshake is
//! where the authorization gate runs; a refused call never becomes a
//! websocket. Afterwards every text frame carries one JSON
//! [`ChannelStreamRequest`] and every outbound frame one JSON
//! [`StreamFrame`]. The final frame is always a `status`, followed by a
//! close frame.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{future, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_util::sync::{CancellationToken, PollSendError, PollSender};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::{header, HeaderValue, StatusCode};
use tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message as WsMessage};

use crate::bridge::StreamBridge;
use crate::error::{Code, RpcError};
use crate::gate::{methods, Caller, Metadata};
use crate::models::{ChannelEvent, ChannelStreamRequest, StreamFrame};
use crate::AppState;

/// How long a finished stream waits for its writer to flush.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Binds `addr` and serves channel streams until `shutdown` fires.
pub async fn websocket_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> io::Result<()> {
    info!("WebSocket listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("WebSocket server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("WebSocket accept failed: {}", e);
                    continue;
                }
            },
        };

        let state = state.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state, cancel).await {
                warn!("WebSocket error from {}: {:?}", peer, e);
            }
        });
    }
}

fn metadata(req: &Request) -> Metadata {
    req.headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect()
}

fn refuse(err: &RpcError) -> ErrorResponse {
    let body = serde_json::to_string(&err.to_status()).unwrap_or_default();
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() =
        StatusCode::from_u16(err.code.http_status().code).unwrap_or(StatusCode::UNAUTHORIZED);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn close_code(code: Code) -> CloseCode {
    match code {
        Code::Canceled => CloseCode::Normal,
        Code::InvalidArgument => CloseCode::Invalid,
        Code::Unauthenticated | Code::PermissionDenied => CloseCode::Policy,
        Code::NotFound | Code::Unavailable => CloseCode::Away,
        _ => CloseCode::Error,
    }
}

fn decode(
    msg: Result<WsMessage, tungstenite::Error>,
) -> Option<Result<ChannelStreamRequest, RpcError>> {
    let parsed = match msg {
        Ok(WsMessage::Text(text)) => serde_json::from_str(text.as_str()),
        Ok(WsMessage::Binary(bytes)) => serde_json::from_slice(&bytes),
        Ok(_) => return None,
        Err(e) => return Some(Err(RpcError::canceled(format!("connection lost: {e}")))),
    };
    Some(parsed.map_err(|e| RpcError::invalid_argument(format!("malformed request: {e}"))))
}

async fn handle_connection(
    stream: TcpStream,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), tungstenite::Error> {
    let mut caller: Option<Caller> = None;
    let gate = state.gate.clone();
    let check = |req: &Request, response: Response| {
        match gate.identify(methods::CHANNEL_STREAM, &metadata(req)) {
            Ok(identity) => {
                caller = Some(identity);
                Ok(response)
            }
            Err(e) => Err(refuse(&e)),
        }
    };

    let ws_stream = match accept_hdr_async(stream, check).await {
        Ok(ws_stream) => ws_stream,
        Err(tungstenite::Error::Http(response)) => {
            info!("ChannelStream refused with {}", response.status());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let Some(caller) = caller else {
        return Ok(());
    };
    info!("{} opened a channel stream", caller.username);

    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<StreamFrame>(state.config.subscriber_buffer.max(1));

    // Writer task: forward frames to the socket, close after the status.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let close = match &frame {
                StreamFrame::Status(status) => Some(CloseFrame {
                    code: close_code(status.code),
                    reason: status.code.to_string().into(),
                }),
                StreamFrame::Event(_) => None,
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Could not encode frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(WsMessage::text(text)).await.is_err() {
                break;
            }
            if close.is_some() {
                let _ = ws_sender.send(WsMessage::Close(close)).await;
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let inbound = ws_receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(WsMessage::Close(_)))))
        .filter_map(|msg| future::ready(decode(msg)));
    let outbound = PollSender::new(frame_tx.clone()).with(|event: ChannelEvent| {
        future::ready(Ok::<_, PollSendError<StreamFrame>>(StreamFrame::Event(event)))
    });

    let bridge = StreamBridge::new(
        state.registry.clone(),
        caller.username.clone(),
        state.config.subscriber_buffer,
    );
    let status = bridge.run(inbound, outbound, cancel).await;

    debug!("{}: sending final status {}", caller.username, status);
    if frame_tx
        .try_send(StreamFrame::Status(status.to_status()))
        .is_err()
    {
        warn!("{}: writer is backed up, final status dropped", caller.username);
    }
    drop(frame_tx);

    if timeout(WRITER_GRACE, &mut writer).await.is_err() {
        warn!("{}: writer did not drain, closing connection", caller.username);
        writer.abort();
    }
    Ok(())
}
