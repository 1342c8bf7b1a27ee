//! Transport over a plain conversation WebSocket.
//!
//! The socket has no media tracks or rooms, so the remote agent is modelled as
//! a single participant whose audio counts as subscribed for as long as the
//! socket is open. Both delivery modes map onto the same ordered stream.

use super::{
    ConnectionState, RemoteParticipant, TrackKind, Transport, TransportError, TransportEvent,
    TransportEvents,
};
use crate::credentials::ConnectionCredentials;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity reported for the agent end of the socket.
pub const AGENT_IDENTITY: &str = "agent";

struct Connection {
    outbound: mpsc::UnboundedSender<WsMessage>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct WebSocketTransport {
    connection: Mutex<Option<Connection>>,
    /// Id of the open connection, 0 when there is none.
    open: Arc<AtomicU64>,
    next_id: AtomicU64,
    microphone_enabled: AtomicBool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) != 0
    }

    /// Whether the local microphone is currently switched on.
    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        credentials: &ConnectionCredentials,
    ) -> Result<TransportEvents, TransportError> {
        let mut request = credentials
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some(token) = &credentials.token {
            let value = format!("Bearer {}", token.expose_secret())
                .parse::<HeaderValue>()
                .map_err(|e| TransportError::Connect(format!("invalid token: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        info!(url = %credentials.server_url, "WebSocket connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.connection.lock().await.replace(Connection {
            outbound,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        self.open.store(id, Ordering::SeqCst);
        self.microphone_enabled.store(true, Ordering::SeqCst);

        // Writer: drains the outbound queue until cancelled.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    message = outbound_rx.recv() => match message {
                        Some(message) => {
                            if let Err(e) = sink.send(message).await {
                                warn!(error = %e, "WebSocket send failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.close().await;
        });

        // Reader: forwards payloads and reports when the socket goes away.
        let open = self.open.clone();
        let reader_events = events_tx.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    message = source.next() => message,
                };
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = reader_events
                            .send(TransportEvent::DataReceived(text.as_bytes().to_vec()));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let _ = reader_events.send(TransportEvent::DataReceived(bytes.to_vec()));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                    None => break,
                }
            }
            // A newer connection may already have taken over.
            let _ = open.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
            let _ = reader_events.send(TransportEvent::ConnectionStateChanged(
                ConnectionState::Disconnected,
            ));
        });

        for event in [
            TransportEvent::ConnectionStateChanged(ConnectionState::Connected),
            TransportEvent::ParticipantJoined {
                identity: AGENT_IDENTITY.to_string(),
            },
            TransportEvent::TrackSubscribed {
                participant: AGENT_IDENTITY.to_string(),
                kind: TrackKind::Audio,
            },
        ] {
            let _ = events_tx.send(event);
        }
        Ok(events_rx)
    }

    async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.cancel.cancel();
            info!("WebSocket disconnected");
        }
        self.open.store(0, Ordering::SeqCst);
    }

    /// WebSocket frames are always delivered in order; `reliable` is ignored.
    async fn publish(&self, payload: Vec<u8>, _reliable: bool) -> Result<(), TransportError> {
        let guard = self.connection.lock().await;
        let connection = guard
            .as_ref()
            .filter(|_| self.is_open())
            .ok_or(TransportError::NotConnected)?;
        let text = String::from_utf8(payload).map_err(|e| TransportError::Send(e.to_string()))?;
        connection
            .outbound
            .send(WsMessage::Text(text.into()))
            .map_err(|_| TransportError::NotConnected)
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.microphone_enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Microphone switched");
        Ok(())
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        if !self.is_open() {
            return Vec::new();
        }
        vec![RemoteParticipant {
            identity: AGENT_IDENTITY.to_string(),
            published_audio_tracks: 1,
            subscribed_audio_tracks: 1,
        }]
    }

    fn is_data_channel_ready(&self) -> bool {
        self.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn credentials(url: String) -> ConnectionCredentials {
        ConnectionCredentials {
            server_url: url,
            token: None,
            agent_id: None,
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let message = ws.next().await.unwrap().unwrap();
            ws.send(message).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let transport = WebSocketTransport::new();
        let mut events = transport
            .connect(&credentials(format!("ws://{addr}")))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::ConnectionStateChanged(ConnectionState::Connected))
        );
        assert!(transport.is_data_channel_ready());
        assert!(transport.remote_participants()[0].has_usable_audio());

        transport
            .publish(br#"{"type":"user_activity"}"#.to_vec(), true)
            .await
            .unwrap();

        let mut received = None;
        let mut disconnected = false;
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::DataReceived(bytes) => received = Some(bytes),
                TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected) => {
                    disconnected = true;
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(received.as_deref(), Some(&br#"{"type":"user_activity"}"#[..]));
        assert!(disconnected);
        assert!(!transport.is_data_channel_ready());
        assert!(transport.remote_participants().is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_replaced_connection_does_not_close_its_successor() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let first_addr = first.local_addr().unwrap();
        let (close_first, closed) = tokio::sync::oneshot::channel::<()>();
        let first_server = tokio::spawn(async move {
            let (stream, _) = first.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = closed.await;
            let _ = ws.close(None).await;
        });

        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second_addr = second.local_addr().unwrap();
        let second_server = tokio::spawn(async move {
            let (stream, _) = second.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.next().await.unwrap().unwrap()
        });

        let transport = WebSocketTransport::new();
        transport
            .connect(&credentials(format!("ws://{first_addr}")))
            .await
            .unwrap();
        let _events = transport
            .connect(&credentials(format!("ws://{second_addr}")))
            .await
            .unwrap();

        let _ = close_first.send(());
        first_server.await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(transport.is_data_channel_ready());
        transport.publish(b"{}".to_vec(), true).await.unwrap();
        assert_eq!(second_server.await.unwrap(), WsMessage::Text("{}".into()));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = WebSocketTransport::new();
        assert_eq!(
            transport.publish(b"{}".to_vec(), true).await,
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            transport.set_microphone_enabled(false).await,
            Err(TransportError::NotConnected)
        );
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketTransport::new()
            .connect(&credentials(format!("ws://{addr}")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
