//! The real-time transport the session runs on.
//!
//! The engine only needs a handful of primitives from the media layer:
//! connect / disconnect, publishing opaque payloads, a microphone switch, a
//! snapshot of remote participants, and an ordered stream of notifications.
//! Everything else (negotiation, track plumbing, audio devices) stays behind
//! this trait.

pub mod websocket;

use crate::credentials::ConnectionCredentials;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Kind of media track a participant publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

/// Point-in-time view of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub published_audio_tracks: usize,
    pub subscribed_audio_tracks: usize,
}

impl RemoteParticipant {
    /// A participant counts as audio-capable only once one of its audio tracks
    /// is subscribed; a published-but-unsubscribed track cannot be heard yet.
    pub fn has_usable_audio(&self) -> bool {
        self.subscribed_audio_tracks > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Notifications delivered by the transport, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ParticipantJoined {
        identity: String,
    },
    /// `remaining` is the number of remote participants still connected.
    ParticipantLeft {
        identity: String,
        remaining: usize,
    },
    TrackPublished {
        participant: String,
        kind: TrackKind,
    },
    TrackSubscribed {
        participant: String,
        kind: TrackKind,
    },
    ConnectionStateChanged(ConnectionState),
    DataReceived(Vec<u8>),
}

/// Receiving half of a connection's notification stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Microphone unavailable: {0}")]
    Microphone(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection and returns its notification stream.
    async fn connect(
        &self,
        credentials: &ConnectionCredentials,
    ) -> Result<TransportEvents, TransportError>;

    /// Closes the connection. Must be harmless when already disconnected.
    async fn disconnect(&self);

    /// Sends an opaque payload to the remote agent.
    async fn publish(&self, payload: Vec<u8>, reliable: bool) -> Result<(), TransportError>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    fn remote_participants(&self) -> Vec<RemoteParticipant>;

    /// Whether reliable messages can be delivered right now.
    fn is_data_channel_ready(&self) -> bool;
}
