//! Per-session event loop.
//!
//! One task per session consumes transport notifications in order, decodes
//! data payloads and applies them to the session, and owns the readiness and
//! speaking timers. It stops when the session's cancellation token fires or
//! the session ends from inside the loop.

use super::{
    controller::Shared,
    handshake,
    state::{EndReason, InitializationStatus, MessageRole},
};
use crate::{
    readiness::{ReadinessDetector, ReadinessSignal},
    transport::{ConnectionState, TransportEvent, TransportEvents},
};
use parley_protocol::{
    codec,
    events::{ConversationInitiation, IncomingEvent, OutgoingEvent},
};
use std::{ops::ControlFlow, sync::Arc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Agent-side tool whose response means the agent hung up.
const END_CALL_TOOL: &str = "end_call";

type Flow = ControlFlow<()>;

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    detector: ReadinessDetector,
    speaking_deadline: Option<Instant>,
    /// Agent id known from the credentials, preferred over the participant identity.
    agent_id: Option<String>,
    /// Taken by the first readiness signal.
    initiation: Option<ConversationInitiation>,
    handshake: Option<CancellationToken>,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        generation: u64,
        cancel: CancellationToken,
        initiation: ConversationInitiation,
        agent_id: Option<String>,
    ) -> Self {
        let detector = ReadinessDetector::new(shared.config.readiness.clone());
        Self {
            shared,
            generation,
            cancel,
            detector,
            speaking_deadline: None,
            agent_id,
            initiation: Some(initiation),
            handshake: None,
        }
    }

    pub async fn run(mut self, mut events: TransportEvents) {
        let participants = self.shared.transport.remote_participants();
        let signal = self.detector.on_connected(Instant::now(), &participants);
        if self.on_signal(signal).await.is_continue() {
            self.event_loop(&mut events).await;
        }
        if let Some(handshake) = self.handshake.take() {
            handshake.cancel();
        }
        debug!("Dispatch loop stopped");
    }

    async fn event_loop(&mut self, events: &mut TransportEvents) {
        let cancel = self.cancel.clone();
        loop {
            let readiness_deadline = self.detector.next_deadline();
            let speaking_deadline = self.speaking_deadline;
            let flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => Flow::Break(()),
                event = events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        info!("Transport event stream closed");
                        self.shared
                            .finish(self.generation, EndReason::TransportClosed, false)
                            .await;
                        Flow::Break(())
                    }
                },
                _ = wait_until(readiness_deadline) => {
                    let transport = self.shared.transport.clone();
                    let signal = self
                        .detector
                        .on_deadline(Instant::now(), || transport.remote_participants());
                    self.on_signal(signal).await
                }
                _ = wait_until(speaking_deadline) => {
                    self.speaking_deadline = None;
                    debug!("No agent audio within the speaking timeout");
                    self.shared
                        .update(self.generation, |session| session.agent_speaking = false)
                        .await;
                    Flow::Continue(())
                }
            };
            if flow.is_break() {
                return;
            }
        }
    }

    async fn on_signal(&mut self, signal: Option<ReadinessSignal>) -> Flow {
        match signal {
            None => Flow::Continue(()),
            Some(ReadinessSignal::Ready { participant, .. }) => {
                let Some(initiation) = self.initiation.take() else {
                    return Flow::Continue(());
                };
                let token = self.cancel.child_token();
                self.handshake = Some(token.clone());
                let agent_id = self.agent_id.clone().or(participant);
                tokio::spawn(handshake::run(
                    self.shared.clone(),
                    self.generation,
                    token,
                    initiation,
                    agent_id,
                )
                .in_current_span());
                Flow::Continue(())
            }
            Some(ReadinessSignal::Disconnected) => {
                self.shared
                    .finish(self.generation, EndReason::AgentLeft, true)
                    .await;
                Flow::Break(())
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::DataReceived(bytes) => match codec::decode(&bytes) {
                Ok(event) => self.on_incoming(event).await,
                Err(e) => {
                    warn!(error = %e, len = bytes.len(), "Dropping undecodable payload");
                    Flow::Continue(())
                }
            },
            TransportEvent::TrackSubscribed { participant, kind } => {
                let signal = self.detector.on_track_subscribed(&participant, kind);
                self.on_signal(signal).await
            }
            TransportEvent::ParticipantLeft {
                identity,
                remaining,
            } => {
                debug!(%identity, remaining, "Participant left");
                let signal = self.detector.on_participant_left(remaining);
                self.on_signal(signal).await
            }
            TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected) => {
                info!("Transport disconnected");
                self.shared
                    .finish(self.generation, EndReason::TransportClosed, false)
                    .await;
                Flow::Break(())
            }
            other => {
                debug!(event = ?other, "Transport event");
                Flow::Continue(())
            }
        }
    }

    async fn on_incoming(&mut self, event: IncomingEvent) -> Flow {
        let generation = self.generation;
        match event {
            IncomingEvent::Ping { ping_event } => {
                let pong = OutgoingEvent::Pong {
                    event_id: ping_event.event_id,
                };
                match codec::encode(&pong) {
                    Ok(payload) => {
                        if let Err(e) = self.shared.transport.publish(payload, true).await {
                            warn!(event_id = ping_event.event_id, error = %e, "Pong not delivered");
                        }
                    }
                    Err(e) => warn!(error = %e, "Could not encode pong"),
                }
            }
            IncomingEvent::Audio { audio_event } => {
                let event_id = audio_event.event_id;
                let speaking = self
                    .shared
                    .update(generation, |session| {
                        if session.is_interrupted(event_id) {
                            return false;
                        }
                        session.agent_speaking = true;
                        session.last_audio_event_id = Some(event_id);
                        true
                    })
                    .await;
                match speaking {
                    Some(true) => {
                        self.speaking_deadline =
                            Some(Instant::now() + self.shared.config.speaking_timeout);
                    }
                    Some(false) => debug!(event_id, "Ignoring audio from an interrupted response"),
                    None => {}
                }
            }
            IncomingEvent::Interruption { interruption_event } => {
                self.speaking_deadline = None;
                self.shared
                    .update(generation, |session| {
                        session.record_interruption(interruption_event.event_id)
                    })
                    .await;
            }
            IncomingEvent::UserTranscript {
                user_transcription_event,
            } => {
                self.shared
                    .update(generation, |session| {
                        session.push_message(
                            MessageRole::User,
                            user_transcription_event.user_transcript,
                        )
                    })
                    .await;
            }
            IncomingEvent::AgentResponse {
                agent_response_event,
            } => {
                self.shared
                    .update(generation, |session| {
                        session.tentative_agent_response = None;
                        session.push_message(MessageRole::Agent, agent_response_event.agent_response)
                    })
                    .await;
            }
            IncomingEvent::AgentResponseCorrection {
                agent_response_correction_event: correction,
            } => {
                let corrected = self
                    .shared
                    .update(generation, |session| {
                        session.correct_agent_message(
                            &correction.original_agent_response,
                            correction.corrected_agent_response,
                        )
                    })
                    .await;
                if corrected == Some(false) {
                    debug!("Correction for an unknown agent response");
                }
            }
            IncomingEvent::VadScore { vad_score_event } => {
                self.shared
                    .update(generation, |session| {
                        session.vad_score = vad_score_event.vad_score
                    })
                    .await;
            }
            IncomingEvent::InternalTentativeAgentResponse {
                tentative_agent_response_internal_event: tentative,
            } => {
                self.shared
                    .update(generation, |session| {
                        session.tentative_agent_response = Some(tentative.tentative_agent_response)
                    })
                    .await;
            }
            IncomingEvent::ConversationInitiationMetadata {
                conversation_initiation_metadata_event: metadata,
            } => {
                info!(
                    conversation_id = %metadata.conversation_id,
                    output_format = %metadata.agent_output_audio_format,
                    "Conversation initiated"
                );
                self.shared
                    .update(generation, |session| {
                        session.conversation_id = Some(metadata.conversation_id);
                        session.initialization = InitializationStatus::Acknowledged;
                    })
                    .await;
            }
            IncomingEvent::ClientToolCall { client_tool_call } => {
                info!(
                    tool = %client_tool_call.tool_name,
                    tool_call_id = %client_tool_call.tool_call_id,
                    "Client tool call"
                );
                self.shared
                    .update(generation, |session| session.add_tool_call(client_tool_call))
                    .await;
            }
            IncomingEvent::AgentToolResponse {
                agent_tool_response,
            } => {
                debug!(
                    tool = %agent_tool_response.tool_name,
                    is_error = agent_tool_response.is_error,
                    "Agent tool response"
                );
                if agent_tool_response.tool_name == END_CALL_TOOL {
                    self.shared
                        .finish(generation, EndReason::AgentEndedCall, true)
                        .await;
                    return Flow::Break(());
                }
            }
        }
        Flow::Continue(())
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
