//! The session controller: the public face of a conversation.
//!
//! All session state lives in one mutex-guarded container shared between the
//! command methods, the per-session dispatch loop and the handshake task. Every
//! background mutation carries the generation it was spawned for and is
//! discarded when the session it belongs to is gone.

use super::{
    SessionOptions, dispatch,
    state::{EndReason, InitializationStatus, MessageRole, Session, SessionSnapshot, SessionState},
};
use crate::{
    config::EngineConfig,
    credentials::{AuthSource, CredentialSource},
    error::SessionError,
    transport::Transport,
};
use parley_protocol::{
    codec,
    events::{FeedbackScore, OutgoingEvent},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

type StartResult = Result<(), SessionError>;

/// State guarded by the controller lock.
pub(crate) struct Inner {
    pub session: Session,
    /// Bumped by every `start`; background work for older values is stale.
    pub generation: u64,
    /// Cancels every task belonging to the current session.
    pub cancel: CancellationToken,
    /// Completes the caller's `start` once the session is active or failed.
    pub pending_start: Option<oneshot::Sender<StartResult>>,
}

impl Inner {
    /// Whether background work for `generation` may still touch the session.
    pub fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.session.state.is_live()
    }

    /// Cancels outstanding work and clears per-conversation data.
    fn teardown(&mut self) {
        self.cancel.cancel();
        self.session.clear_conversation();
    }
}

pub(crate) struct Shared {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialSource>,
    pub config: EngineConfig,
    pub inner: Mutex<Inner>,
    pub updates: watch::Sender<SessionSnapshot>,
}

impl Shared {
    pub fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.session.snapshot());
    }

    /// Applies `f` if the session for `generation` is still live.
    pub async fn update<R>(&self, generation: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut inner = self.inner.lock().await;
        if !inner.is_live(generation) {
            return None;
        }
        let result = f(&mut inner.session);
        self.publish(&inner);
        Some(result)
    }

    pub async fn is_active(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        inner.generation == generation && inner.session.state == SessionState::Active
    }

    /// Marks the session active after the handshake and releases `start`.
    pub async fn activate(
        &self,
        generation: u64,
        agent_id: Option<String>,
        initialization: InitializationStatus,
    ) {
        let mut inner = self.inner.lock().await;
        if !inner.is_live(generation) {
            return;
        }
        let session = &mut inner.session;
        session.state = SessionState::Active;
        if agent_id.is_some() {
            session.agent_id = agent_id;
        }
        if session.initialization != InitializationStatus::Acknowledged {
            session.initialization = initialization;
        }
        info!(agent_id = ?session.agent_id, initialization = ?session.initialization, "Session active");
        self.publish(&inner);
        if let Some(tx) = inner.pending_start.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Ends the session for `generation` through the single teardown path.
    ///
    /// Returns `false` when the session was already gone, so racing callers
    /// (explicit `end`, transport disconnect, agent departure) tear down once.
    pub async fn finish(&self, generation: u64, reason: EndReason, disconnect: bool) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if !inner.is_live(generation) {
                return false;
            }
            let was_connecting = inner.session.state == SessionState::Connecting;
            inner.teardown();
            if was_connecting {
                let err = SessionError::ConnectionFailed(format!(
                    "session closed before the agent became ready ({:?})",
                    reason
                ));
                inner.session.state = SessionState::Error;
                inner.session.last_error = Some(err.to_string());
                if let Some(tx) = inner.pending_start.take() {
                    let _ = tx.send(Err(err));
                }
            } else {
                inner.session.state = SessionState::Ended;
                inner.session.end_reason = Some(reason);
            }
            info!(?reason, "Session finished");
            self.publish(&inner);
        }
        if disconnect {
            self.transport.disconnect().await;
        }
        true
    }

    /// Resolves a failed `start` attempt, unless something else already did.
    ///
    /// An attempt that went active while it was failing counts as started.
    async fn fail_start(&self, generation: u64, err: SessionError) -> StartResult {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Err(err);
            }
            match inner.session.state {
                SessionState::Active => {
                    debug!(error = %err, "Session became active as the start attempt failed");
                    return Ok(());
                }
                SessionState::Connecting => {}
                _ => return Err(err),
            }
            inner.teardown();
            inner.pending_start = None;
            inner.session.state = SessionState::Error;
            inner.session.last_error = Some(err.to_string());
            self.publish(&inner);
        }
        error!(error = %err, "Session start failed");
        self.transport.disconnect().await;
        Err(err)
    }
}

/// Fetches credentials, connects and hands the session to its dispatch loop,
/// then waits for the handshake to finish.
async fn establish(
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    auth: AuthSource,
    options: SessionOptions,
    ready_rx: oneshot::Receiver<StartResult>,
) -> StartResult {
    info!("Fetching connection credentials");
    let credentials = shared
        .credentials
        .fetch(&auth)
        .await
        .map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?;

    info!(server_url = %credentials.server_url, "Connecting transport");
    let events = shared
        .transport
        .connect(&credentials)
        .await
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

    if cancel.is_cancelled() {
        return Err(SessionError::ConnectionFailed(
            "session was torn down while connecting".to_string(),
        ));
    }

    let dispatcher = dispatch::Dispatcher::new(
        shared,
        generation,
        cancel,
        options.into_initiation(),
        credentials.agent_id,
    );
    tokio::spawn(dispatcher.run(events).in_current_span());

    ready_rx.await.unwrap_or_else(|_| {
        Err(SessionError::ConnectionFailed(
            "session closed before the agent became ready".to_string(),
        ))
    })
}

/// Drives one conversation at a time over an injected transport.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        config: EngineConfig,
    ) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                credentials,
                config,
                inner: Mutex::new(Inner {
                    session: Session::default(),
                    generation: 0,
                    cancel: CancellationToken::new(),
                    pending_start: None,
                }),
                updates,
            }),
        }
    }

    /// Observes every state change of the controller.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.updates.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.updates.borrow().state
    }

    /// Starts a conversation and resolves once it is active.
    ///
    /// Any previous session is torn down first. On failure the controller is
    /// left in `SessionState::Error`, from which `start` may be called again.
    pub async fn start(&self, auth: AuthSource, options: SessionOptions) -> StartResult {
        let (generation, cancel, ready_rx) = {
            let mut inner = self.shared.inner.lock().await;
            if !inner.session.state.can_start() {
                return Err(SessionError::AlreadyActive);
            }
            inner.teardown();
            inner.generation += 1;
            inner.cancel = CancellationToken::new();
            inner.session.state = SessionState::Connecting;
            inner.session.end_reason = None;
            inner.session.last_error = None;
            let (tx, rx) = oneshot::channel();
            inner.pending_start = Some(tx);
            self.shared.publish(&inner);
            (inner.generation, inner.cancel.clone(), rx)
        };

        // Detached so that dropping this future cannot strand the session in
        // `Connecting`; the start timeout still settles it.
        let shared = self.shared.clone();
        let attempt = async move {
            let connecting = establish(shared.clone(), generation, cancel, auth, options, ready_rx);
            let result = match tokio::time::timeout(shared.config.start_timeout, connecting).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::AgentTimeout),
            };
            match result {
                Ok(()) => Ok(()),
                Err(err) => shared.fail_start(generation, err).await,
            }
        }
        .instrument(info_span!("session", generation));

        tokio::spawn(attempt)
            .await
            .unwrap_or_else(|e| Err(SessionError::ConnectionFailed(format!("start task failed: {e}"))))
    }

    /// Ends the active session. A no-op in any other state.
    pub async fn end(&self) {
        let generation = {
            let inner = self.shared.inner.lock().await;
            if inner.session.state != SessionState::Active {
                debug!(state = ?inner.session.state, "end() ignored, no active session");
                return;
            }
            inner.generation
        };
        self.shared.finish(generation, EndReason::UserEnded, true).await;
    }

    /// Sends a typed user turn and records it in the message log.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let generation = self
            .send(&OutgoingEvent::UserMessage { text: text.clone() }, true)
            .await?;
        self.shared
            .update(generation, |session| session.push_message(MessageRole::User, text))
            .await;
        Ok(())
    }

    /// Asks the agent to stop talking.
    pub async fn interrupt_agent(&self) -> Result<(), SessionError> {
        let generation = self.send(&OutgoingEvent::UserActivity, true).await?;
        self.shared
            .update(generation, |session| session.agent_speaking = false)
            .await;
        Ok(())
    }

    /// Signals user presence without interrupting local state.
    pub async fn send_user_activity(&self) -> Result<(), SessionError> {
        self.send(&OutgoingEvent::UserActivity, true).await.map(|_| ())
    }

    /// Gives the agent background context that does not prompt a reply.
    pub async fn update_context(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(&OutgoingEvent::ContextualUpdate { text: text.into() }, true)
            .await
            .map(|_| ())
    }

    pub async fn send_feedback(&self, score: FeedbackScore, event_id: u64) -> Result<(), SessionError> {
        self.send(&OutgoingEvent::Feedback { score, event_id }, true)
            .await
            .map(|_| ())
    }

    /// Returns the result of a client tool call and clears it from the pending set.
    pub async fn send_tool_result<T>(
        &self,
        tool_call_id: &str,
        result: &T,
        is_error: bool,
    ) -> Result<(), SessionError>
    where
        T: Serialize + ?Sized,
    {
        self.active_generation().await?;
        let event = OutgoingEvent::tool_result(tool_call_id, result, is_error)?;
        let generation = self.send(&event, true).await?;
        self.shared
            .update(generation, |session| session.remove_tool_call(tool_call_id))
            .await;
        Ok(())
    }

    pub async fn send_mcp_tool_approval(
        &self,
        tool_call_id: impl Into<String>,
        is_approved: bool,
    ) -> Result<(), SessionError> {
        let event = OutgoingEvent::McpToolApprovalResult {
            tool_call_id: tool_call_id.into(),
            is_approved,
        };
        self.send(&event, true).await.map(|_| ())
    }

    /// Streams microphone audio (PCM16 little-endian). Dropped while muted.
    pub async fn send_audio_chunk(&self, pcm: &[u8]) -> Result<(), SessionError> {
        let muted = {
            let inner = self.shared.inner.lock().await;
            if inner.session.state != SessionState::Active {
                return Err(SessionError::NotConnected);
            }
            inner.session.muted
        };
        if muted {
            return Ok(());
        }
        self.send(&OutgoingEvent::audio_chunk(pcm), false)
            .await
            .map(|_| ())
    }

    /// Clears a tool call without answering it. Valid in any state.
    pub async fn mark_tool_call_completed(&self, tool_call_id: &str) -> bool {
        let mut inner = self.shared.inner.lock().await;
        let removed = inner.session.remove_tool_call(tool_call_id);
        if removed {
            self.shared.publish(&inner);
        }
        removed
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let generation = self.active_generation().await?;
        self.shared
            .transport
            .set_microphone_enabled(!muted)
            .await
            .map_err(|e| SessionError::MicrophoneToggleFailed(e.to_string()))?;
        self.shared
            .update(generation, |session| session.muted = muted)
            .await
            .ok_or(SessionError::NotConnected)
    }

    /// Flips the mute flag and returns the new value.
    pub async fn toggle_mute(&self) -> Result<bool, SessionError> {
        let muted = {
            let inner = self.shared.inner.lock().await;
            if inner.session.state != SessionState::Active {
                return Err(SessionError::NotConnected);
            }
            !inner.session.muted
        };
        self.set_muted(muted).await?;
        Ok(muted)
    }

    async fn active_generation(&self) -> Result<u64, SessionError> {
        let inner = self.shared.inner.lock().await;
        if inner.session.state != SessionState::Active {
            return Err(SessionError::NotConnected);
        }
        Ok(inner.generation)
    }

    /// Encodes and publishes `event` for the active session.
    ///
    /// A failed publish is reported as `NotConnected` when the session ended
    /// while the send was in flight.
    async fn send(&self, event: &OutgoingEvent, reliable: bool) -> Result<u64, SessionError> {
        let generation = self.active_generation().await?;
        let payload = codec::encode(event)?;
        if let Err(e) = self.shared.transport.publish(payload, reliable).await {
            if !self.shared.is_active(generation).await {
                return Err(SessionError::NotConnected);
            }
            warn!(event_type = event.event_type(), error = %e, "Publish failed");
            return Err(SessionError::PublishFailed(e.to_string()));
        }
        debug!(event_type = event.event_type(), "Published event");
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{ConnectionCredentials, StaticCredentials};
    use crate::transport::{RemoteParticipant, TransportError, TransportEvents};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn connect(
            &self,
            _credentials: &ConnectionCredentials,
        ) -> Result<TransportEvents, TransportError> {
            Err(TransportError::Connect("unused".into()))
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn publish(&self, _payload: Vec<u8>, _reliable: bool) -> Result<(), TransportError> {
            Ok(())
        }

        async fn set_microphone_enabled(&self, _enabled: bool) -> Result<(), TransportError> {
            Ok(())
        }

        fn remote_participants(&self) -> Vec<RemoteParticipant> {
            Vec::new()
        }

        fn is_data_channel_ready(&self) -> bool {
            true
        }
    }

    fn shared_in(state: SessionState, transport: Arc<CountingTransport>) -> Shared {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        let mut session = Session::default();
        session.state = state;
        Shared {
            transport,
            credentials: Arc::new(StaticCredentials::new(ConnectionCredentials {
                server_url: "ws://unused".into(),
                token: None,
                agent_id: None,
            })),
            config: EngineConfig::default(),
            inner: Mutex::new(Inner {
                session,
                generation: 3,
                cancel: CancellationToken::new(),
                pending_start: None,
            }),
            updates,
        }
    }

    #[tokio::test]
    async fn test_failed_start_that_went_active_counts_as_started() {
        let transport = Arc::new(CountingTransport::default());
        let shared = shared_in(SessionState::Active, transport.clone());

        assert_eq!(shared.fail_start(3, SessionError::AgentTimeout).await, Ok(()));
        assert_eq!(shared.inner.lock().await.session.state, SessionState::Active);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_start_moves_connecting_session_to_error() {
        let transport = Arc::new(CountingTransport::default());
        let shared = shared_in(SessionState::Connecting, transport.clone());

        let result = shared.fail_start(3, SessionError::AgentTimeout).await;
        assert_eq!(result, Err(SessionError::AgentTimeout));
        let inner = shared.inner.lock().await;
        assert_eq!(inner.session.state, SessionState::Error);
        assert!(inner.cancel.is_cancelled());
        assert_eq!(shared.updates.borrow().state, SessionState::Error);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_from_older_generation_is_ignored() {
        let transport = Arc::new(CountingTransport::default());
        let shared = shared_in(SessionState::Connecting, transport.clone());

        let result = shared.fail_start(2, SessionError::AgentTimeout).await;
        assert_eq!(result, Err(SessionError::AgentTimeout));
        assert_eq!(shared.inner.lock().await.session.state, SessionState::Connecting);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);
    }
}
