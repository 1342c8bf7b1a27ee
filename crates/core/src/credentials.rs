//! Connection credential acquisition.
//!
//! A session is started from an [`AuthSource`]; a [`CredentialSource`] turns it
//! into the URL and token the transport connects with.

use crate::config::EndpointConfig;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

/// How the caller identifies the agent it wants to talk to.
#[derive(Debug)]
pub enum AuthSource {
    /// An agent that accepts unauthenticated conversations.
    PublicAgent { agent_id: String },
    /// An agent that requires a signed URL obtained with an API key.
    PrivateAgent { agent_id: String },
    /// A token minted elsewhere (e.g. by the caller's backend).
    ConversationToken {
        server_url: String,
        token: SecretString,
    },
}

/// Everything the transport needs to connect.
#[derive(Debug)]
pub struct ConnectionCredentials {
    pub server_url: String,
    pub token: Option<SecretString>,
    /// The agent identifier, when the auth source reveals it.
    pub agent_id: Option<String>,
}

impl ConnectionCredentials {
    /// Copies the credentials, including the secret.
    pub fn duplicate(&self) -> Self {
        Self {
            server_url: self.server_url.clone(),
            token: self.token.as_ref().map(copy_secret),
            agent_id: self.agent_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("An API key is required for private agents")]
    MissingApiKey,
    #[error("Credential request rejected with status {0}")]
    Rejected(u16),
    #[error("Credential request failed: {0}")]
    Http(String),
    #[error("Unexpected credential response: {0}")]
    InvalidResponse(String),
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, auth: &AuthSource) -> Result<ConnectionCredentials, AuthError>;
}

/// Returns the same credentials for every request.
pub struct StaticCredentials {
    credentials: ConnectionCredentials,
}

impl StaticCredentials {
    pub fn new(credentials: ConnectionCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self, _auth: &AuthSource) -> Result<ConnectionCredentials, AuthError> {
        Ok(self.credentials.duplicate())
    }
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Resolves auth sources against the conversation HTTP API.
///
/// Public agents connect straight to the WebSocket endpoint, private agents
/// exchange the API key for a short-lived signed URL, and conversation tokens
/// pass through untouched.
pub struct SignedUrlSource {
    http: reqwest::Client,
    endpoints: EndpointConfig,
}

impl SignedUrlSource {
    pub fn new(endpoints: EndpointConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    fn public_url(&self, agent_id: &str) -> Result<String, AuthError> {
        let base = format!("{}/v1/convai/conversation", self.endpoints.websocket_base);
        reqwest::Url::parse_with_params(&base, &[("agent_id", agent_id)])
            .map(String::from)
            .map_err(|e| AuthError::InvalidEndpoint(format!("{base}: {e}")))
    }

    async fn signed_url(&self, agent_id: &str) -> Result<String, AuthError> {
        let api_key = self
            .endpoints
            .api_key
            .as_ref()
            .ok_or(AuthError::MissingApiKey)?;
        let url = format!(
            "{}/v1/convai/conversation/get-signed-url",
            self.endpoints.api_base
        );
        debug!(%url, agent_id, "Requesting signed conversation URL");

        let response = self
            .http
            .get(&url)
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", api_key.expose_secret())
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(status.as_u16()));
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(body.signed_url)
    }
}

#[async_trait]
impl CredentialSource for SignedUrlSource {
    async fn fetch(&self, auth: &AuthSource) -> Result<ConnectionCredentials, AuthError> {
        match auth {
            AuthSource::PublicAgent { agent_id } => Ok(ConnectionCredentials {
                server_url: self.public_url(agent_id)?,
                token: None,
                agent_id: Some(agent_id.clone()),
            }),
            AuthSource::PrivateAgent { agent_id } => {
                let server_url = self.signed_url(agent_id).await?;
                info!(agent_id, "Obtained signed conversation URL");
                Ok(ConnectionCredentials {
                    server_url,
                    token: None,
                    agent_id: Some(agent_id.clone()),
                })
            }
            AuthSource::ConversationToken { server_url, token } => Ok(ConnectionCredentials {
                server_url: server_url.clone(),
                token: Some(copy_secret(token)),
                agent_id: None,
            }),
        }
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}
