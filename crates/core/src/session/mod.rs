//! Conversation sessions: lifecycle, inbound event handling and the
//! initialization handshake.

mod controller;
mod dispatch;
mod handshake;
pub mod state;

pub use controller::SessionController;
pub use state::{
    EndReason, InitializationStatus, Message, MessageRole, SessionSnapshot, SessionState,
};

use parley_protocol::events::{ConversationConfigOverride, ConversationInitiation};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-session parameters sent to the agent in the init message.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub overrides: ConversationConfigOverride,
    pub custom_llm_extra_body: Option<Value>,
    pub dynamic_variables: BTreeMap<String, Value>,
    pub user_id: Option<String>,
}

impl SessionOptions {
    pub(crate) fn into_initiation(self) -> ConversationInitiation {
        ConversationInitiation {
            conversation_config_override: self.overrides,
            custom_llm_extra_body: self.custom_llm_extra_body,
            dynamic_variables: self.dynamic_variables,
            user_id: self.user_id,
            ..ConversationInitiation::default()
        }
    }
}
