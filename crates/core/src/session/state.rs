//! Session aggregate and the snapshot published to observers.

use chrono::{DateTime, Utc};
use parley_protocol::events::ClientToolCall;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Ended,
    Error,
}

impl SessionState {
    /// Whether the session is connecting or active.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    /// Whether a new session may be started from this state.
    pub fn can_start(self) -> bool {
        !self.is_live()
    }
}

/// Why an active session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserEnded,
    TransportClosed,
    AgentLeft,
    AgentEndedCall,
}

/// Delivery state of the init message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationStatus {
    #[default]
    Pending,
    /// Published; no acknowledgement seen yet.
    Sent,
    /// The agent answered with conversation metadata.
    Acknowledged,
    /// Every delivery attempt failed. The session stays usable.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable view of a session handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    /// Outstanding tool calls, ordered by call id.
    pub pending_tool_calls: Vec<ClientToolCall>,
    pub agent_speaking: bool,
    pub muted: bool,
    pub initialization: InitializationStatus,
    pub vad_score: f64,
    pub tentative_agent_response: Option<String>,
    /// Event id of the most recent agent audio fragment, used for feedback.
    pub last_audio_event_id: Option<u64>,
    pub end_reason: Option<EndReason>,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Session::default().snapshot()
    }
}

/// Mutable session state. Only ever touched behind the controller's lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub state: SessionState,
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub muted: bool,
    pub messages: Vec<Message>,
    pub pending_tool_calls: BTreeMap<String, ClientToolCall>,
    pub agent_speaking: bool,
    pub initialization: InitializationStatus,
    pub vad_score: f64,
    pub tentative_agent_response: Option<String>,
    pub last_audio_event_id: Option<u64>,
    /// Audio fragments at or before this event id were cut off by an interruption.
    pub last_interrupt_id: Option<u64>,
    pub end_reason: Option<EndReason>,
    pub last_error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            agent_id: None,
            conversation_id: None,
            muted: false,
            messages: Vec::new(),
            pending_tool_calls: BTreeMap::new(),
            agent_speaking: false,
            initialization: InitializationStatus::Pending,
            vad_score: 0.0,
            tentative_agent_response: None,
            last_audio_event_id: None,
            last_interrupt_id: None,
            end_reason: None,
            last_error: None,
        }
    }
}

impl Session {
    /// Drops everything that belongs to a single conversation. The lifecycle
    /// state, end reason and last error are left for the caller to set.
    pub fn clear_conversation(&mut self) {
        self.agent_id = None;
        self.conversation_id = None;
        self.muted = false;
        self.messages.clear();
        self.pending_tool_calls.clear();
        self.agent_speaking = false;
        self.initialization = InitializationStatus::Pending;
        self.vad_score = 0.0;
        self.tentative_agent_response = None;
        self.last_audio_event_id = None;
        self.last_interrupt_id = None;
    }

    /// Whether audio `event_id` belongs to a response that was interrupted.
    pub fn is_interrupted(&self, event_id: u64) -> bool {
        self.last_interrupt_id.is_some_and(|last| event_id <= last)
    }

    pub fn record_interruption(&mut self, event_id: u64) {
        let last = self.last_interrupt_id.map_or(event_id, |last| last.max(event_id));
        self.last_interrupt_id = Some(last);
        self.agent_speaking = false;
    }

    pub fn push_message(&mut self, role: MessageRole, content: String) {
        self.messages.push(Message {
            role,
            content,
            created_at: Utc::now(),
        });
    }

    /// Rewrites the latest agent message matching `original`.
    pub fn correct_agent_message(&mut self, original: &str, corrected: String) -> bool {
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Agent && m.content == original)
        {
            Some(message) => {
                message.content = corrected;
                true
            }
            None => false,
        }
    }

    /// Registers a tool call; a repeated id replaces the earlier entry.
    pub fn add_tool_call(&mut self, call: ClientToolCall) {
        self.pending_tool_calls.insert(call.tool_call_id.clone(), call);
    }

    pub fn remove_tool_call(&mut self, tool_call_id: &str) -> bool {
        self.pending_tool_calls.remove(tool_call_id).is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            agent_id: self.agent_id.clone(),
            conversation_id: self.conversation_id.clone(),
            messages: self.messages.clone(),
            pending_tool_calls: self.pending_tool_calls.values().cloned().collect(),
            agent_speaking: self.agent_speaking,
            muted: self.muted,
            initialization: self.initialization,
            vad_score: self.vad_score,
            tentative_agent_response: self.tentative_agent_response.clone(),
            last_audio_event_id: self.last_audio_event_id,
            end_reason: self.end_reason,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_call(id: &str) -> ClientToolCall {
        ClientToolCall {
            tool_name: "lookup".into(),
            tool_call_id: id.into(),
            parameters: json!({}),
            expects_response: true,
        }
    }

    #[test]
    fn test_start_allowed_states() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Ended.can_start());
        assert!(SessionState::Error.can_start());
        assert!(!SessionState::Connecting.can_start());
        assert!(!SessionState::Active.can_start());
    }

    #[test]
    fn test_tool_calls_keyed_by_id() {
        let mut session = Session::default();
        session.add_tool_call(tool_call("b"));
        session.add_tool_call(tool_call("a"));
        session.add_tool_call(tool_call("a"));

        let ids: Vec<_> = session
            .snapshot()
            .pending_tool_calls
            .into_iter()
            .map(|c| c.tool_call_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(session.remove_tool_call("a"));
        assert!(!session.remove_tool_call("a"));
        assert!(!session.remove_tool_call("missing"));
    }

    #[test]
    fn test_correction_targets_latest_matching_agent_message() {
        let mut session = Session::default();
        session.push_message(MessageRole::Agent, "same".into());
        session.push_message(MessageRole::User, "same".into());
        session.push_message(MessageRole::Agent, "same".into());

        assert!(session.correct_agent_message("same", "cut".into()));
        let contents: Vec<_> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["same", "same", "cut"]);
        assert!(!session.correct_agent_message("unknown", "x".into()));
    }

    #[test]
    fn test_clear_conversation_resets_mute_and_collections() {
        let mut session = Session::default();
        session.state = SessionState::Active;
        session.muted = true;
        session.agent_speaking = true;
        session.push_message(MessageRole::User, "hi".into());
        session.add_tool_call(tool_call("x"));

        session.clear_conversation();

        assert_eq!(session.state, SessionState::Active);
        assert!(!session.muted);
        assert!(!session.agent_speaking);
        assert!(session.messages.is_empty());
        assert!(session.pending_tool_calls.is_empty());
    }

    #[test]
    fn test_interruption_cutoff() {
        let mut session = Session::default();
        assert!(!session.is_interrupted(0));

        session.record_interruption(4);
        session.record_interruption(2);
        assert!(session.is_interrupted(0));
        assert!(session.is_interrupted(4));
        assert!(!session.is_interrupted(5));

        session.clear_conversation();
        assert!(!session.is_interrupted(0));
    }

    #[test]
    fn test_message_role_display() {
        assert_eq!(MessageRole::User.to_string(), "user");
        assert_eq!(MessageRole::Agent.to_string(), "agent");
    }
}
