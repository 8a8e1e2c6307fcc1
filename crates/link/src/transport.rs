use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use snafu::ResultExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::error::{
    ChannelClosedSnafu, ConnectSnafu, ConnectTimeoutSnafu, LinkError, LinkResult,
    SerializeMessageSnafu,
};
use super::protocol::{InboundEvent, OutboundMessage, parse_inbound_frame};

pub const DEFAULT_AGENT_URL: &str = "ws://localhost:8765";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type LinkWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_URL)
    }
}

/// Lifecycle and payload events observed on one agent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The channel is usable. Emitted once per connection.
    Ready,
    Inbound(InboundEvent),
    /// The agent closed the channel.
    Closed,
    Failed(String),
}

/// Cloneable write half handed to whoever issues requests.
///
/// Messages queue in order until the socket is open, then flush.
#[derive(Debug, Clone)]
pub struct LinkSender {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl LinkSender {
    pub fn send(&self, message: OutboundMessage) -> LinkResult<()> {
        let action = message.action();
        if self.outbound.send(message).is_err() {
            return ChannelClosedSnafu {
                stage: "queue-outbound-message",
            }
            .fail();
        }

        tracing::debug!(action, "queued outbound message");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Session-side end of exactly one connection.
///
/// A disconnected link stays disconnected; reconnecting means building a new link.
pub struct AgentLink {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

pub struct LinkHandle {
    pub link: AgentLink,
    pub worker: LinkWorker,
}

impl AgentLink {
    /// Prepares a WebSocket connection. Nothing happens until `worker` is spawned.
    pub fn connect(config: LinkConfig) -> LinkHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker: LinkWorker = Box::pin(run_socket_worker(
            config,
            outbound_rx,
            event_tx,
            shutdown_rx,
        ));

        LinkHandle {
            link: Self {
                outbound: outbound_tx,
                events: event_rx,
                shutdown_tx: Some(shutdown_tx),
            },
            worker,
        }
    }

    /// Builds an in-process link whose remote end is driven by the returned peer.
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let _ = event_tx.send(LinkEvent::Ready);

        let link = Self {
            outbound: outbound_tx,
            events: event_rx,
            shutdown_tx: Some(shutdown_tx),
        };
        let peer = LoopbackPeer {
            outbound: outbound_rx,
            events: event_tx,
            shutdown: shutdown_rx,
        };
        (link, peer)
    }

    pub fn sender(&self) -> LinkSender {
        LinkSender {
            outbound: self.outbound.clone(),
        }
    }

    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.events.try_recv().ok()
    }

    /// Tears the connection down. Returns `true` only for the call that did it.
    pub fn disconnect(&mut self) -> bool {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return false;
        };

        tracing::debug!("disconnecting agent link");
        let _ = shutdown_tx.send(());
        true
    }

    pub fn is_disconnected(&self) -> bool {
        self.shutdown_tx.is_none()
    }
}

impl Drop for AgentLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// In-memory remote end of a loopback link.
///
/// Frames pushed here take the same parse path as frames read from a socket.
pub struct LoopbackPeer {
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<LinkEvent>,
    shutdown: oneshot::Receiver<()>,
}

impl LoopbackPeer {
    /// Delivers a raw text frame. Returns `false` once the link is gone.
    pub fn push_frame(&self, text: &str) -> bool {
        forward_frame(&self.events, text)
    }

    pub fn push_event(&self, event: InboundEvent) -> bool {
        self.events.send(LinkEvent::Inbound(event)).is_ok()
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.events.send(LinkEvent::Failed(message.into())).is_ok()
    }

    pub fn close(&self) -> bool {
        self.events.send(LinkEvent::Closed).is_ok()
    }

    pub async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }

    pub fn is_disconnected(&mut self) -> bool {
        !matches!(
            self.shutdown.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

async fn open_socket(config: &LinkConfig) -> LinkResult<AgentSocket> {
    let connecting = connect_async(config.url.as_str());
    match tokio::time::timeout(config.connect_timeout, connecting).await {
        Ok(result) => {
            let (socket, _response) = result.context(ConnectSnafu {
                stage: "open-socket",
                url: config.url.clone(),
            })?;
            Ok(socket)
        }
        Err(_) => ConnectTimeoutSnafu {
            stage: "open-socket-timeout",
            url: config.url.clone(),
            timeout: config.connect_timeout,
        }
        .fail(),
    }
}

fn encode_outbound(message: &OutboundMessage) -> LinkResult<String> {
    serde_json::to_string(message).context(SerializeMessageSnafu {
        stage: "serialize-outbound-message",
        action: message.action(),
    })
}

fn forward_frame(event_tx: &mpsc::UnboundedSender<LinkEvent>, text: &str) -> bool {
    match parse_inbound_frame(text) {
        Ok(event) => {
            tracing::debug!(kind = event.kind(), "received agent event");
            event_tx.send(LinkEvent::Inbound(event)).is_ok()
        }
        Err(error) => {
            // A bad frame says nothing about the operation in flight; keep the link up.
            tracing::warn!(
                frame_len = text.len(),
                error = %error,
                "dropping malformed agent frame"
            );
            !event_tx.is_closed()
        }
    }
}

fn emit_failure(event_tx: &mpsc::UnboundedSender<LinkEvent>, error: &LinkError) {
    let _ = event_tx.send(LinkEvent::Failed(error.to_string()));
}

async fn run_socket_worker(
    config: LinkConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        _ = &mut shutdown_rx => {
            tracing::debug!(url = %config.url, "agent link shut down before connecting");
            return;
        }
        result = open_socket(&config) => result,
    };

    let socket = match opened {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(url = %config.url, error = %error, "failed to connect to agent");
            emit_failure(&event_tx, &error);
            return;
        }
    };

    tracing::info!(url = %config.url, "connected to agent");
    let (mut ws_tx, mut ws_rx) = socket.split();
    if event_tx.send(LinkEvent::Ready).is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::info!(url = %config.url, "closing agent connection");
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };

                let text = match encode_outbound(&message) {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::error!(error = %error, "failed to encode outbound message");
                        emit_failure(&event_tx, &error);
                        continue;
                    }
                };

                if let Err(source) = ws_tx.send(Message::Text(text)).await {
                    let error = LinkError::Socket {
                        stage: "write-frame",
                        source,
                    };
                    tracing::error!(action = message.action(), error = %error, "failed to send frame");
                    emit_failure(&event_tx, &error);
                    break;
                }
                tracing::debug!(action = message.action(), "sent outbound message");
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !forward_frame(&event_tx, &text) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(url = %config.url, "agent closed the connection");
                        let _ = event_tx.send(LinkEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(source)) => {
                        let error = LinkError::Socket {
                            stage: "read-frame",
                            source,
                        };
                        tracing::error!(error = %error, "agent socket read failed");
                        emit_failure(&event_tx, &error);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn loopback_emits_ready_once_and_parses_frames() {
        let (mut link, mut peer) = AgentLink::loopback();

        assert_eq!(link.try_recv(), Some(LinkEvent::Ready));
        assert!(peer.push_frame("{ definitely not json"));
        assert!(peer.push_frame(r#"{"type":"image_generated","imageData":"data:image/png;base64,AAAA"}"#));

        assert_eq!(
            link.recv().await,
            Some(LinkEvent::Inbound(InboundEvent::ImageGenerated {
                image_data: "data:image/png;base64,AAAA".to_string(),
            }))
        );
        assert_eq!(link.try_recv(), None);

        link.sender()
            .send(OutboundMessage::EnhancePrompt {
                original_prompt: "a cat".to_string(),
            })
            .unwrap();
        assert_eq!(
            peer.next_outbound().await,
            Some(OutboundMessage::EnhancePrompt {
                original_prompt: "a cat".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut link, mut peer) = AgentLink::loopback();

        assert!(!peer.is_disconnected());
        assert!(link.disconnect());
        assert!(!link.disconnect());
        assert!(link.is_disconnected());
        assert!(peer.is_disconnected());
    }

    #[tokio::test]
    async fn send_fails_once_remote_end_is_gone() {
        let (link, peer) = AgentLink::loopback();
        let sender = link.sender();
        drop(peer);

        let error = sender
            .send(OutboundMessage::Transcribe {
                audio_data: "AAAA".to_string(),
            })
            .unwrap_err();
        assert!(matches!(error, LinkError::ChannelClosed { .. }));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn socket_worker_flushes_queued_sends_after_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

            let request = loop {
                match socket.next().await.unwrap().unwrap() {
                    Message::Text(text) => break text,
                    _ => continue,
                }
            };

            socket
                .send(Message::Text("garbage".to_string()))
                .await
                .unwrap();
            socket
                .send(Message::Text(
                    r#"{"type":"prompt_enhanced","magicPrompt":"a fluffy cat","aspectRatio":"4:3"}"#
                        .to_string(),
                ))
                .await
                .unwrap();
            socket.close(None).await.unwrap();
            request
        });

        let LinkHandle { mut link, worker } =
            AgentLink::connect(LinkConfig::new(format!("ws://{address}")));
        // Queued before the worker even starts.
        link.sender()
            .send(OutboundMessage::EnhancePrompt {
                original_prompt: "a cat".to_string(),
            })
            .unwrap();
        let worker = tokio::spawn(worker);

        assert_eq!(link.recv().await, Some(LinkEvent::Ready));
        assert_eq!(
            link.recv().await,
            Some(LinkEvent::Inbound(InboundEvent::PromptEnhanced {
                magic_prompt: "a fluffy cat".to_string(),
                aspect_ratio: "4:3".to_string(),
            }))
        );
        assert_eq!(link.recv().await, Some(LinkEvent::Closed));

        let request = server.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&request).unwrap();
        assert_eq!(value["action"], "enhance_prompt");
        assert_eq!(value["originalPrompt"], "a cat");

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_agent_surfaces_failure_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let LinkHandle { mut link, worker } = AgentLink::connect(
            LinkConfig::new(format!("ws://{address}"))
                .with_connect_timeout(Duration::from_secs(2)),
        );
        tokio::spawn(worker);

        match link.recv().await {
            Some(LinkEvent::Failed(message)) => assert!(message.contains("failed to connect")),
            other => panic!("expected failure event, got {other:?}"),
        }
    }
}
