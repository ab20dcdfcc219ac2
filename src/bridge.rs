//! Couples one client stream to one channel actor.
//!
//! The bridge knows nothing about websockets: it reads requests from any
//! [`Stream`] and writes events to any [`Sink`]. The first request decides
//! which channel the stream is bound to; every later request must name the
//! same channel and the same user.

use std::fmt;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::ChannelHandle;
use crate::error::{Code, RpcError};
use crate::models::{ChannelEvent, ChannelStreamRequest};
use crate::registry::ChannelRegistry;

struct Bound {
    handle: ChannelHandle,
    events: tokio::sync::mpsc::Receiver<ChannelEvent>,
}

pub struct StreamBridge {
    registry: ChannelRegistry,
    username: String,
    buffer: usize,
    conn_id: Uuid,
    bound: Option<Bound>,
}

impl StreamBridge {
    /// `buffer` bounds the events waiting to be written to this client.
    pub fn new(registry: ChannelRegistry, username: impl Into<String>, buffer: usize) -> Self {
        Self {
            registry,
            username: username.into(),
            buffer,
            conn_id: Uuid::new_v4(),
            bound: None,
        }
    }

    /// Pumps both directions until the stream ends, then returns the status
    /// it ended with. Clean shutdowns end with [`Code::Canceled`].
    pub async fn run<I, O>(mut self, inbound: I, outbound: O, cancel: CancellationToken) -> RpcError
    where
        I: Stream<Item = Result<ChannelStreamRequest, RpcError>>,
        O: Sink<ChannelEvent>,
        O::Error: fmt::Display,
    {
        let mut inbound = std::pin::pin!(inbound);
        let mut outbound = std::pin::pin!(outbound);

        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break RpcError::canceled("stream canceled"),
                event = next_event(&mut self.bound) => match event {
                    Some(event) => {
                        // A client that stops reading must not pin the stream open.
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            sent = outbound.send(event) => Some(sent),
                        };
                        match sent {
                            None => break RpcError::canceled("stream canceled"),
                            Some(Err(e)) => break RpcError::canceled(format!("client went away: {e}")),
                            Some(Ok(())) => {}
                        }
                    }
                    None => break self.detached(),
                },
                request = inbound.next() => match request {
                    Some(Ok(request)) => {
                        if let Err(e) = self.forward(request, &cancel).await {
                            break e;
                        }
                    }
                    Some(Err(e)) => break e,
                    None => break RpcError::canceled("client closed the stream"),
                },
            }
        };

        if let Some(bound) = &self.bound {
            bound.handle.unsubscribe(&self.username, self.conn_id).await;
        }
        if status.code == Code::Canceled {
            info!("{}: stream ended ({})", self.username, status.message);
        } else {
            warn!("{}: stream ended with {}", self.username, status);
        }
        status
    }

    async fn forward(
        &mut self,
        mut request: ChannelStreamRequest,
        cancel: &CancellationToken,
    ) -> Result<(), RpcError> {
        if request.username.is_empty() {
            request.username = self.username.clone();
        } else if request.username != self.username {
            return Err(RpcError::invalid_argument(format!(
                "username mismatch: stream belongs to '{}', request names '{}'",
                self.username, request.username
            )));
        }

        let handle = match &self.bound {
            Some(bound) if bound.handle.id() != request.channel_id => {
                return Err(RpcError::invalid_argument(format!(
                    "channel ID mismatch: stream is bound to channel {}, request names {}",
                    bound.handle.id(),
                    request.channel_id
                )));
            }
            Some(bound) => bound.handle.clone(),
            None => self.bind(request.channel_id).await?,
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::canceled("stream canceled")),
            sent = handle.send(request) => sent.map_err(RpcError::from),
        }
    }

    async fn bind(&mut self, channel_id: u64) -> Result<ChannelHandle, RpcError> {
        let handle = self
            .registry
            .lookup(channel_id)
            .await
            .map_err(|_| RpcError::invalid_argument(format!("invalid channel ID: {channel_id}")))?;

        let (role, events) = handle
            .subscribe(&self.username, self.conn_id, self.buffer)
            .await?;
        info!(
            "{} joined channel {} stream as {}",
            self.username, channel_id, role
        );

        self.bound = Some(Bound {
            handle: handle.clone(),
            events,
        });
        Ok(handle)
    }

    /// The actor let go of our event queue.
    fn detached(&self) -> RpcError {
        match &self.bound {
            Some(bound) if !bound.handle.is_stopped() => {
                debug!("{} was dropped by channel {}", self.username, bound.handle.id());
                RpcError::new(
                    Code::Unavailable,
                    format!(
                        "stream fell behind and was dropped from channel {}",
                        bound.handle.id()
                    ),
                )
            }
            Some(bound) => {
                RpcError::not_found(format!("channel {} has been removed", bound.handle.id()))
            }
            None => RpcError::internal("stream lost its channel", "event queue without binding"),
        }
    }
}

async fn next_event(bound: &mut Option<Bound>) -> Option<ChannelEvent> {
    match bound {
        Some(bound) => bound.events.recv().await,
        None => std::future::pending().await,
    }
}
