use parley_protocol::CodecError;

/// Errors returned by the public session operations.
///
/// Every failure a caller can observe maps to exactly one of these variants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("No active session")]
    NotConnected,
    #[error("A session is already connecting or active")]
    AlreadyActive,
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Agent did not become ready in time")]
    AgentTimeout,
    #[error("Failed to toggle microphone: {0}")]
    MicrophoneToggleFailed(String),
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(SessionError::NotConnected.to_string(), "No active session");
        assert_eq!(
            SessionError::AuthenticationFailed("bad token".into()).to_string(),
            "Authentication failed: bad token"
        );
    }

    #[test]
    fn test_codec_error_converts() {
        let err: SessionError = CodecError::UnknownEventType("x".into()).into();
        assert_eq!(err.to_string(), "Unknown event type: x");
        assert!(matches!(err, SessionError::Codec(_)));
    }
}
