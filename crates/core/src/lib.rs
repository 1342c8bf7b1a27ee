//! Parley Session Engine
//!
//! Client-side engine for real-time voice and text conversations with a
//! remote AI agent. A [`SessionController`] connects over an injected
//! [`Transport`], waits for the agent to become ready, delivers the init
//! message and then keeps a [`SessionSnapshot`] current as events flow in.

pub mod config;
pub mod credentials;
pub mod error;
pub mod readiness;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{ConfigError, EndpointConfig, EngineConfig, ReadinessTiming};
pub use credentials::{
    AuthError, AuthSource, ConnectionCredentials, CredentialSource, SignedUrlSource,
    StaticCredentials,
};
pub use error::SessionError;
pub use retry::RetryPolicy;
pub use session::{
    EndReason, InitializationStatus, Message, MessageRole, SessionController, SessionOptions,
    SessionSnapshot, SessionState,
};
pub use transport::{Transport, TransportError, TransportEvent, websocket::WebSocketTransport};
