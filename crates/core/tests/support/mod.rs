//! Shared fixtures for session tests: a scriptable in-memory transport and
//! helpers for driving a controller under paused time.

#![allow(dead_code)]

use async_trait::async_trait;
use parley_core::{
    credentials::{ConnectionCredentials, StaticCredentials},
    transport::{RemoteParticipant, Transport, TransportError, TransportEvent, TransportEvents},
    EngineConfig, SessionController, SessionSnapshot,
};
use parley_protocol::{codec, IncomingEvent, OutgoingEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const AGENT_ID: &str = "agent-123";

#[derive(Default)]
struct State {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    participants: Vec<RemoteParticipant>,
    published: Vec<(Vec<u8>, bool)>,
    connect_error: Option<TransportError>,
    hang_connect: bool,
    publish_gate: Option<Arc<Notify>>,
    failing_publishes: usize,
    publish_always_fails: bool,
    data_channel_ready: bool,
    microphone_error: Option<TransportError>,
    microphone_enabled: bool,
    connects: usize,
    disconnects: usize,
}

/// In-memory transport whose behaviour each test scripts up front.
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                data_channel_ready: true,
                microphone_enabled: true,
                ..State::default()
            })),
        }
    }

    /// A transport whose agent is already subscribed when the connection opens.
    pub fn with_agent() -> Self {
        let transport = Self::new();
        transport.set_participants(vec![participant("agent-room-1", 1)]);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_participants(&self, participants: Vec<RemoteParticipant>) {
        self.lock().participants = participants;
    }

    pub fn fail_connect(&self, err: TransportError) {
        self.lock().connect_error = Some(err);
    }

    pub fn hang_connect(&self) {
        self.lock().hang_connect = true;
    }

    /// Lets connects after this one go through; a connect already hanging stays stuck.
    pub fn release_connect(&self) {
        self.lock().hang_connect = false;
    }

    /// Parks every publish until [`FakeTransport::release_publishes`], which
    /// fails them as if the link had dropped.
    pub fn hold_publishes(&self) {
        self.lock().publish_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_publishes(&self) {
        if let Some(gate) = self.lock().publish_gate.take() {
            gate.notify_waiters();
        }
    }

    /// Fails the next `count` publishes.
    pub fn fail_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    pub fn fail_all_publishes(&self, fail: bool) {
        self.lock().publish_always_fails = fail;
    }

    pub fn set_data_channel_ready(&self, ready: bool) {
        self.lock().data_channel_ready = ready;
    }

    pub fn fail_microphone(&self, err: TransportError) {
        self.lock().microphone_error = Some(err);
    }

    pub fn microphone_enabled(&self) -> bool {
        self.lock().microphone_enabled
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = &self.lock().events {
            let _ = tx.send(event);
        }
    }

    /// Delivers `event` as if the agent had sent it over the data channel.
    pub fn send_incoming(&self, event: IncomingEvent) {
        let bytes = codec::encode_incoming(&event).unwrap();
        self.emit(TransportEvent::DataReceived(bytes));
    }

    pub fn published_raw(&self) -> Vec<(Vec<u8>, bool)> {
        self.lock().published.clone()
    }

    pub fn published(&self) -> Vec<OutgoingEvent> {
        self.lock()
            .published
            .iter()
            .map(|(bytes, _)| codec::decode_outgoing(bytes).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _credentials: &ConnectionCredentials,
    ) -> Result<TransportEvents, TransportError> {
        let hang = {
            let mut state = self.lock();
            state.connects += 1;
            if let Some(err) = state.connect_error.clone() {
                return Err(err);
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().events = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        let mut state = self.lock();
        state.disconnects += 1;
        state.events = None;
    }

    async fn publish(&self, payload: Vec<u8>, reliable: bool) -> Result<(), TransportError> {
        let gate = self.lock().publish_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
            return Err(TransportError::Send("link dropped".into()));
        }
        let mut state = self.lock();
        if state.publish_always_fails {
            return Err(TransportError::Send("injected failure".into()));
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(TransportError::Send("injected failure".into()));
        }
        state.published.push((payload, reliable));
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(err) = state.microphone_error.clone() {
            return Err(err);
        }
        state.microphone_enabled = enabled;
        Ok(())
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.lock().participants.clone()
    }

    fn is_data_channel_ready(&self) -> bool {
        self.lock().data_channel_ready
    }
}

pub fn participant(identity: &str, subscribed_audio_tracks: usize) -> RemoteParticipant {
    RemoteParticipant {
        identity: identity.to_string(),
        published_audio_tracks: 1,
        subscribed_audio_tracks,
    }
}

pub fn credentials() -> ConnectionCredentials {
    ConnectionCredentials {
        server_url: "wss://agent.test".to_string(),
        token: None,
        agent_id: Some(AGENT_ID.to_string()),
    }
}

pub fn controller(transport: &FakeTransport) -> SessionController {
    SessionController::new(
        Arc::new(transport.clone()),
        Arc::new(StaticCredentials::new(credentials())),
        EngineConfig::default(),
    )
}

/// Waits until the published snapshot satisfies `predicate`.
pub async fn wait_for<F>(controller: &SessionController, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut updates = controller.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(30), updates.wait_for(predicate))
        .await
        .expect("condition not reached in time")
        .expect("controller dropped")
        .clone();
    snapshot
}

/// Lets spawned tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
