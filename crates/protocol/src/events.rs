//! Typed wire events exchanged with the remote agent over the data channel.
//!
//! Every tagged message is a JSON object whose `type` field selects the variant.
//! Incoming variants wrap their payload in a nested object named after the event
//! (e.g. `user_transcription_event`), outgoing variants are flat.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifies the client in the `source_info` block of the init message.
pub const CLIENT_SOURCE: &str = "rust_sdk";

// --- Incoming (agent -> client) ---

/// Messages sent from the agent to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingEvent {
    /// A finalized transcription of the user's speech.
    UserTranscript {
        user_transcription_event: UserTranscription,
    },
    /// A complete text response from the agent.
    AgentResponse {
        agent_response_event: AgentResponse,
    },
    /// The agent's previous response was truncated, usually after an interruption.
    AgentResponseCorrection {
        agent_response_correction_event: AgentResponseCorrection,
    },
    /// A fragment of synthesized agent speech.
    Audio { audio_event: AudioEvent },
    /// The user interrupted the agent.
    Interruption { interruption_event: Interruption },
    /// Voice activity probability for the user's input.
    VadScore { vad_score_event: VadScore },
    /// A provisional agent response that may still change.
    InternalTentativeAgentResponse {
        tentative_agent_response_internal_event: TentativeAgentResponse,
    },
    /// Sent once the agent accepted the init message.
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: ConversationMetadata,
    },
    /// Keep-alive check; must be answered with a `pong`.
    Ping { ping_event: Ping },
    /// The agent asks the client to run a tool.
    ClientToolCall { client_tool_call: ClientToolCall },
    /// Informational: the agent ran one of its own tools.
    AgentToolResponse {
        agent_tool_response: AgentToolResponse,
    },
}

impl IncomingEvent {
    /// Every `type` discriminator the client understands.
    pub const TYPES: &'static [&'static str] = &[
        "user_transcript",
        "agent_response",
        "agent_response_correction",
        "audio",
        "interruption",
        "vad_score",
        "internal_tentative_agent_response",
        "conversation_initiation_metadata",
        "ping",
        "client_tool_call",
        "agent_tool_response",
    ];

    /// The wire discriminator for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserTranscript { .. } => "user_transcript",
            Self::AgentResponse { .. } => "agent_response",
            Self::AgentResponseCorrection { .. } => "agent_response_correction",
            Self::Audio { .. } => "audio",
            Self::Interruption { .. } => "interruption",
            Self::VadScore { .. } => "vad_score",
            Self::InternalTentativeAgentResponse { .. } => "internal_tentative_agent_response",
            Self::ConversationInitiationMetadata { .. } => "conversation_initiation_metadata",
            Self::Ping { .. } => "ping",
            Self::ClientToolCall { .. } => "client_tool_call",
            Self::AgentToolResponse { .. } => "agent_tool_response",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserTranscription {
    pub user_transcript: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub agent_response: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentResponseCorrection {
    pub original_agent_response: String,
    pub corrected_agent_response: String,
}

/// A base64 PCM fragment of agent speech.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioEvent {
    pub audio_base_64: String,
    pub event_id: u64,
    /// Character-level timing, present only when the agent enables alignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Alignment {
    pub chars: Vec<String>,
    pub char_start_times_ms: Vec<u64>,
    pub char_durations_ms: Vec<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Interruption {
    pub event_id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VadScore {
    pub vad_score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TentativeAgentResponse {
    pub tentative_agent_response: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationMetadata {
    pub conversation_id: String,
    pub agent_output_audio_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input_audio_format: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ping {
    pub event_id: u64,
    /// Round-trip estimate measured by the agent, absent on the first ping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<u64>,
}

/// A request from the agent to execute a client-side tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientToolCall {
    pub tool_name: String,
    pub tool_call_id: String,
    /// Opaque tool arguments, passed through untouched.
    #[serde(default)]
    pub parameters: Value,
    /// Whether the agent waits for a `client_tool_result`.
    #[serde(default = "default_expects_response")]
    pub expects_response: bool,
}

fn default_expects_response() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentToolResponse {
    pub tool_name: String,
    pub tool_call_id: String,
    pub tool_type: String,
    pub is_error: bool,
}

// --- Outgoing (client -> agent) ---

/// Messages sent from the client to the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEvent {
    /// Answer to an incoming `ping`.
    Pong { event_id: u64 },
    /// The initialization message; must be the first message the agent accepts.
    ConversationInitiationClientData(ConversationInitiation),
    /// User rating of an agent response.
    Feedback { score: FeedbackScore, event_id: u64 },
    /// Result of a client tool call.
    ClientToolResult {
        tool_call_id: String,
        result: Value,
        is_error: bool,
    },
    /// Background information for the agent that does not trigger a reply.
    ContextualUpdate { text: String },
    /// A typed user turn.
    UserMessage { text: String },
    /// Signals user presence; the agent yields the floor.
    UserActivity,
    /// Approval decision for an MCP tool that requires confirmation.
    McpToolApprovalResult {
        tool_call_id: String,
        is_approved: bool,
    },
    /// Raw base64 microphone audio. Encoded without the `type` envelope.
    #[serde(skip)]
    UserAudioChunk(String),
}

impl OutgoingEvent {
    /// Every tagged discriminator the client may emit.
    pub const TYPES: &'static [&'static str] = &[
        "pong",
        "conversation_initiation_client_data",
        "feedback",
        "client_tool_result",
        "contextual_update",
        "user_message",
        "user_activity",
        "mcp_tool_approval_result",
    ];

    /// Field name of the untagged audio chunk frame.
    pub const AUDIO_CHUNK_FIELD: &'static str = "user_audio_chunk";

    /// Builds a `client_tool_result`, serializing `result` into the wire value.
    pub fn tool_result<T>(
        tool_call_id: impl Into<String>,
        result: &T,
        is_error: bool,
    ) -> Result<Self, crate::CodecError>
    where
        T: Serialize + ?Sized,
    {
        let result = serde_json::to_value(result)
            .map_err(|e| crate::CodecError::UnencodableValue(e.to_string()))?;
        Ok(Self::ClientToolResult {
            tool_call_id: tool_call_id.into(),
            result,
            is_error,
        })
    }

    /// Wraps little-endian PCM16 samples as an audio chunk.
    pub fn audio_chunk(pcm: &[u8]) -> Self {
        Self::UserAudioChunk(base64::engine::general_purpose::STANDARD.encode(pcm))
    }

    /// The wire discriminator, or the flat field name for audio chunks.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::ConversationInitiationClientData(_) => "conversation_initiation_client_data",
            Self::Feedback { .. } => "feedback",
            Self::ClientToolResult { .. } => "client_tool_result",
            Self::ContextualUpdate { .. } => "contextual_update",
            Self::UserMessage { .. } => "user_message",
            Self::UserActivity => "user_activity",
            Self::McpToolApprovalResult { .. } => "mcp_tool_approval_result",
            Self::UserAudioChunk(_) => Self::AUDIO_CHUNK_FIELD,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackScore {
    Like,
    Dislike,
}

/// Payload of `conversation_initiation_client_data`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ConversationInitiation {
    #[serde(default)]
    pub conversation_config_override: ConversationConfigOverride,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_llm_extra_body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dynamic_variables: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub source_info: SourceInfo,
}

/// Per-session overrides of the agent configuration.
///
/// Groups with no field set are left out of the encoded object entirely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ConversationConfigOverride {
    #[serde(default, skip_serializing_if = "AgentOverride::is_empty")]
    pub agent: AgentOverride,
    #[serde(default, skip_serializing_if = "TtsOverride::is_empty")]
    pub tts: TtsOverride,
    #[serde(default, skip_serializing_if = "ConversationOverride::is_empty")]
    pub conversation: ConversationOverride,
}

impl ConversationConfigOverride {
    pub fn is_empty(&self) -> bool {
        self.agent.is_empty() && self.tts.is_empty() && self.conversation.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AgentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl AgentOverride {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_none() && self.first_message.is_none() && self.language.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TtsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "finite_number"
    )]
    pub speed: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "finite_number"
    )]
    pub stability: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "finite_number"
    )]
    pub similarity_boost: Option<f64>,
}

/// JSON has no literal for NaN or infinity; refuse them instead of writing `null`.
fn finite_number<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(number) if !number.is_finite() => Err(serde::ser::Error::custom(format!(
            "{number} is not a finite number"
        ))),
        _ => value.serialize(serializer),
    }
}

impl TtsOverride {
    pub fn is_empty(&self) -> bool {
        self.voice_id.is_none()
            && self.speed.is_none()
            && self.stability.is_none()
            && self.similarity_boost.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ConversationOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_only: Option<bool>,
}

impl ConversationOverride {
    pub fn is_empty(&self) -> bool {
        self.text_only.is_none()
    }
}

/// Fixed block naming the client library and its version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub source: String,
    pub version: String,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            source: CLIENT_SOURCE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
