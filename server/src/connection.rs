use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use tokio::sync::{mpsc, Mutex};

use crate::{error::DeliveryError, protocol::ServerMessage};

/// Write half of a peer connection.
#[async_trait]
pub trait PeerSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError>;

    async fn close(&mut self) -> Result<(), DeliveryError>;
}

#[async_trait]
impl PeerSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        SinkExt::close(self)
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))
    }
}

/// In-process peer; every frame lands on the receiving end of the channel.
#[async_trait]
impl PeerSink for mpsc::UnboundedSender<String> {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError> {
        self.send(text).map_err(|_| DeliveryError::Closed)
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Shared handle to a peer's write half. Each send holds the lock for the
/// whole frame, so concurrent writers never interleave.
#[derive(Clone)]
pub struct Connection {
    sink: Arc<Mutex<Box<dyn PeerSink>>>,
}

impl Connection {
    pub fn new(sink: impl PeerSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    pub async fn send(&self, message: &ServerMessage) -> Result<(), DeliveryError> {
        let text = message.to_json()?;
        self.sink.lock().await.send_text(text).await
    }

    /// Like [`send`](Self::send), but gives up after `limit`.
    pub async fn send_within(
        &self,
        message: &ServerMessage,
        limit: Duration,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(limit, self.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Send(format!(
                "timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    pub async fn close(&self) -> Result<(), DeliveryError> {
        self.sink.lock().await.close().await
    }
}
