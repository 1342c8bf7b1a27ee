//! Delivery of the init message once the agent is ready.

use super::{controller::Shared, state::InitializationStatus};
use crate::retry::{RetryError, retry};
use parley_protocol::{
    codec,
    events::{ConversationInitiation, OutgoingEvent},
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Waits for the data channel, publishes the init message with retries and
/// marks the session active.
///
/// Delivery failure is not fatal: the session still becomes active with
/// `InitializationStatus::Failed`. Returns without touching the session when
/// `cancel` fires.
pub(crate) async fn run(
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    initiation: ConversationInitiation,
    agent_id: Option<String>,
) {
    if !wait_for_data_channel(&shared, &cancel).await {
        return;
    }

    let status = match codec::encode(&OutgoingEvent::ConversationInitiationClientData(initiation)) {
        Ok(payload) => deliver(&shared, &cancel, payload).await,
        Err(e) => {
            error!(error = %e, "Could not encode init message");
            Some(InitializationStatus::Failed)
        }
    };

    if let Some(status) = status {
        shared.activate(generation, agent_id, status).await;
    }
}

/// Returns `false` if cancelled while waiting.
async fn wait_for_data_channel(shared: &Shared, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + shared.config.data_channel_timeout;
    let poll = shared.config.readiness.poll_interval;
    loop {
        if shared.transport.is_data_channel_ready() {
            return true;
        }
        if Instant::now() >= deadline {
            warn!(
                timeout = ?shared.config.data_channel_timeout,
                "Data channel not confirmed ready, sending init anyway"
            );
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

async fn deliver(
    shared: &Shared,
    cancel: &CancellationToken,
    payload: Vec<u8>,
) -> Option<InitializationStatus> {
    let result = retry(&shared.config.init_retry, cancel, |attempt| {
        let transport = shared.transport.clone();
        let payload = payload.clone();
        async move {
            debug!(attempt, "Publishing init message");
            transport.publish(payload, true).await
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!("Init message sent");
            Some(InitializationStatus::Sent)
        }
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        }) => {
            error!(attempts, error = %last_error, "Init message could not be delivered");
            Some(InitializationStatus::Failed)
        }
        Err(RetryError::Cancelled) => None,
    }
}
