use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{
    stomp::StompFrame,
    transport::{BrokerConnector, BrokerHandle, BrokerLink, InboundFrame, LinkEvent},
};

/// Connects to a STOMP broker exposed over a plain WebSocket endpoint.
pub struct WsStompConnector {
    ws_url: String,
    host: String,
}

impl WsStompConnector {
    pub fn new(ws_url: impl Into<String>) -> Result<Self> {
        let ws_url = ws_url.into();
        let parsed =
            Url::parse(&ws_url).with_context(|| format!("invalid websocket url: {ws_url}"))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => bail!("websocket url has no host: {ws_url}"),
        };
        Ok(Self { ws_url, host })
    }
}

#[async_trait]
impl BrokerConnector for WsStompConnector {
    async fn connect(&self) -> Result<BrokerLink> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.ws_url))?;
        let (mut writer, mut reader) = ws_stream.split();

        writer
            .send(Message::Text(StompFrame::connect(&self.host).encode()))
            .await
            .context("failed to send STOMP CONNECT")?;

        loop {
            let message = reader
                .next()
                .await
                .ok_or_else(|| anyhow!("websocket closed before STOMP CONNECTED"))?
                .context("websocket receive failed during STOMP handshake")?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => bail!("websocket closed before STOMP CONNECTED"),
                _ => continue,
            };
            let Some(frame) = StompFrame::decode(&text)? else {
                continue;
            };
            match frame.command.as_str() {
                "CONNECTED" => break,
                "ERROR" => bail!(
                    "broker rejected STOMP CONNECT: {}",
                    frame.get("message").unwrap_or(&frame.body)
                ),
                other => bail!("unexpected {other} frame before CONNECTED"),
            }
        }
        debug!(url = %self.ws_url, "stomp: session established");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        // Ends once every sender is dropped, flushing whatever was queued.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(err) = writer.send(message).await {
                    warn!(error = %err, "stomp: websocket send failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        let (events, events_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            let reason = loop {
                let Some(message) = reader.next().await else {
                    break None;
                };
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break None,
                    Ok(_) => continue,
                    Err(err) => break Some(format!("websocket receive failed: {err}")),
                };
                match StompFrame::decode(&text) {
                    Ok(Some(frame)) => match frame.command.as_str() {
                        "MESSAGE" => {
                            let Some(destination) = frame.get("destination") else {
                                warn!("stomp: MESSAGE frame without destination");
                                continue;
                            };
                            let frame = InboundFrame {
                                destination: destination.to_string(),
                                body: frame.body.clone(),
                            };
                            if events.send(LinkEvent::Frame(frame)).is_err() {
                                return;
                            }
                        }
                        "ERROR" => {
                            break Some(format!(
                                "broker error: {}",
                                frame.get("message").unwrap_or(&frame.body)
                            ))
                        }
                        other => debug!(command = other, "stomp: ignoring frame"),
                    },
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "stomp: dropping undecodable frame"),
                }
            };
            let _ = events.send(LinkEvent::Closed(reason));
        });

        Ok(BrokerLink {
            handle: Arc::new(WsStompHandle {
                outbound,
                reader_task,
            }),
            events: events_rx,
        })
    }
}

struct WsStompHandle {
    outbound: mpsc::UnboundedSender<Message>,
    reader_task: JoinHandle<()>,
}

impl WsStompHandle {
    fn enqueue(&self, frame: StompFrame) -> Result<()> {
        self.outbound
            .send(Message::Text(frame.encode()))
            .map_err(|_| anyhow!("websocket writer is closed"))
    }
}

#[async_trait]
impl BrokerHandle for WsStompHandle {
    async fn subscribe(&self, subscription_id: &str, destination: &str) -> Result<()> {
        self.enqueue(StompFrame::subscribe(subscription_id, destination))
    }

    async fn publish(&self, destination: &str, body: &str) -> Result<()> {
        self.enqueue(StompFrame::send(destination, body))
    }

    async fn close(&self) {
        let _ = self.enqueue(StompFrame::disconnect());
        let _ = self.outbound.send(Message::Close(None));
        self.reader_task.abort();
    }
}

impl Drop for WsStompHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
