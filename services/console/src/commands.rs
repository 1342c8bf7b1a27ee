//! The console's line-oriented command language.
//!
//! Plain lines are sent as user messages; lines starting with `/` are
//! commands.

use parley_core::{SessionController, SessionError, SessionSnapshot, SessionState};
use parley_protocol::events::FeedbackScore;
use serde_json::Value;

pub const HELP: &str = "\
/context <text>        send background context to the agent
/mute, /unmute         switch the microphone
/like, /dislike        rate the latest agent response
/interrupt             ask the agent to stop talking
/tool <id> <json>      answer a pending client tool call
/status                show the session state
/end                   end the conversation
/help                  show this help";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Say(String),
    Context(String),
    Mute,
    Unmute,
    Feedback(FeedbackScore),
    Interrupt,
    ToolResult { tool_call_id: String, result: Value },
    Status,
    End,
    Help,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown command: /{0} (try /help)")]
    UnknownCommand(String),
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("Tool result is not valid JSON: {0}")]
    InvalidJson(String),
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };
        let parsed = match name {
            "context" if rest.is_empty() => return Err(ParseError::MissingArgument("context")),
            "context" => Self::Context(rest.to_string()),
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "like" => Self::Feedback(FeedbackScore::Like),
            "dislike" => Self::Feedback(FeedbackScore::Dislike),
            "interrupt" => Self::Interrupt,
            "tool" => {
                let (tool_call_id, raw) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ParseError::MissingArgument("tool"))?;
                let result = serde_json::from_str(raw.trim())
                    .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
                Self::ToolResult {
                    tool_call_id: tool_call_id.to_string(),
                    result,
                }
            }
            "status" => Self::Status,
            "end" | "quit" => Self::End,
            "help" => Self::Help,
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(Some(parsed))
    }

    /// Runs the command against `controller` and returns text for the user.
    pub async fn execute(self, controller: &SessionController) -> Result<Option<String>, SessionError> {
        match self {
            Self::Say(text) => controller.send_message(text).await?,
            Self::Context(text) => controller.update_context(text).await?,
            Self::Mute => controller.set_muted(true).await?,
            Self::Unmute => controller.set_muted(false).await?,
            Self::Feedback(score) => match controller.snapshot().last_audio_event_id {
                Some(event_id) => controller.send_feedback(score, event_id).await?,
                None => return Ok(Some("Nothing to rate yet".to_string())),
            },
            Self::Interrupt => controller.interrupt_agent().await?,
            Self::ToolResult {
                tool_call_id,
                result,
            } => controller.send_tool_result(&tool_call_id, &result, false).await?,
            Self::Status => return Ok(Some(describe(&controller.snapshot()))),
            Self::End => controller.end().await,
            Self::Help => return Ok(Some(HELP.to_string())),
        }
        Ok(None)
    }
}

/// One-line summary of a snapshot.
pub fn describe(snapshot: &SessionSnapshot) -> String {
    let mut summary = format!("state={:?}", snapshot.state).to_lowercase();
    if let Some(id) = &snapshot.conversation_id {
        summary.push_str(&format!(" conversation={id}"));
    }
    if snapshot.state == SessionState::Active {
        summary.push_str(&format!(
            " init={:?} muted={} speaking={} messages={} pending_tools={}",
            snapshot.initialization,
            snapshot.muted,
            snapshot.agent_speaking,
            snapshot.messages.len(),
            snapshot.pending_tool_calls.len()
        ));
    }
    if let Some(reason) = snapshot.end_reason {
        summary.push_str(&format!(" reason={reason:?}"));
    }
    if let Some(error) = &snapshot.last_error {
        summary.push_str(&format!(" error={error}"));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::EndReason;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            ConsoleCommand::parse("  hello agent  "),
            Ok(Some(ConsoleCommand::Say("hello agent".to_string())))
        );
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(ConsoleCommand::parse("/mute"), Ok(Some(ConsoleCommand::Mute)));
        assert_eq!(
            ConsoleCommand::parse("/dislike"),
            Ok(Some(ConsoleCommand::Feedback(FeedbackScore::Dislike)))
        );
        assert_eq!(ConsoleCommand::parse("/quit"), Ok(Some(ConsoleCommand::End)));
        assert_eq!(
            ConsoleCommand::parse("/context user is on mobile"),
            Ok(Some(ConsoleCommand::Context("user is on mobile".to_string())))
        );
    }

    #[test]
    fn test_tool_result_command() {
        assert_eq!(
            ConsoleCommand::parse(r#"/tool call-1 {"ok": true}"#),
            Ok(Some(ConsoleCommand::ToolResult {
                tool_call_id: "call-1".to_string(),
                result: json!({ "ok": true }),
            }))
        );
        assert_eq!(
            ConsoleCommand::parse("/tool call-1"),
            Err(ParseError::MissingArgument("tool"))
        );
        assert!(matches!(
            ConsoleCommand::parse("/tool call-1 {oops"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_bad_commands() {
        assert_eq!(
            ConsoleCommand::parse("/dance"),
            Err(ParseError::UnknownCommand("dance".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("/context"),
            Err(ParseError::MissingArgument("context"))
        );
    }

    #[test]
    fn test_describe_ended_session() {
        let snapshot = SessionSnapshot {
            state: SessionState::Ended,
            end_reason: Some(EndReason::AgentLeft),
            ..SessionSnapshot::default()
        };
        assert_eq!(describe(&snapshot), "state=ended reason=AgentLeft");
    }
}
