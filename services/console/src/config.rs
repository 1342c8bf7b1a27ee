use clap::Parser;
use parley_core::{AuthSource, ConfigError, EndpointConfig, EngineConfig, SessionOptions};
use parley_protocol::events::{AgentOverride, ConversationOverride};
use tracing::Level;

/// Talk to a conversational agent from the terminal.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct Args {
    /// Agent to connect to. Falls back to PARLEY_AGENT_ID.
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Request a signed URL with PARLEY_API_KEY instead of connecting directly.
    #[arg(long)]
    pub private: bool,

    /// Ask the agent to answer in text only.
    #[arg(long)]
    pub text_only: bool,

    /// Replace the agent's opening line.
    #[arg(long)]
    pub first_message: Option<String>,

    /// Conversation language, e.g. "en".
    #[arg(long)]
    pub language: Option<String>,

    /// Caller identifier forwarded to the agent.
    #[arg(long)]
    pub user_id: Option<String>,
}

/// Everything the console needs to run, resolved from arguments and environment.
#[derive(Debug)]
pub struct Settings {
    pub agent_id: String,
    pub private: bool,
    pub options: SessionOptions,
    pub log_level: Level,
    pub engine: EngineConfig,
    pub endpoints: EndpointConfig,
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let agent_id = match args.agent_id {
            Some(agent_id) => agent_id,
            None => std::env::var("PARLEY_AGENT_ID")
                .ok()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ConfigError::MissingVar("PARLEY_AGENT_ID".to_string()))?,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let mut options = SessionOptions {
            user_id: args.user_id,
            ..SessionOptions::default()
        };
        options.overrides.agent = AgentOverride {
            prompt: None,
            first_message: args.first_message,
            language: args.language,
        };
        if args.text_only {
            options.overrides.conversation = ConversationOverride {
                text_only: Some(true),
            };
        }

        Ok(Self {
            agent_id,
            private: args.private,
            options,
            log_level,
            engine: EngineConfig::from_env()?,
            endpoints: EndpointConfig::from_env()?,
        })
    }

    pub fn auth_source(&self) -> AuthSource {
        let agent_id = self.agent_id.clone();
        if self.private {
            AuthSource::PrivateAgent { agent_id }
        } else {
            AuthSource::PublicAgent { agent_id }
        }
    }
}
