//! Agent readiness detection.
//!
//! Decides the single moment a freshly connected agent is usable. Three
//! independent triggers race: a track-subscription notification, a periodic
//! re-check of participant state (notifications can be dropped), and a grace
//! timer that guarantees bounded latency. The first one moves the detector to
//! `Ready`; later ones are ignored.
//!
//! The detector owns no tasks. Its timers are deadlines exposed through
//! [`ReadinessDetector::next_deadline`] which the owning event loop waits on,
//! so tearing the loop down cancels them with it.

use crate::config::ReadinessTiming;
use crate::transport::{RemoteParticipant, TrackKind};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Idle,
    WaitingForSignal,
    Ready,
}

/// What moved the detector to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyTrigger {
    /// An audio-capable participant was already present at connect time.
    AlreadySubscribed,
    /// A track-subscription notification arrived.
    TrackSubscribed,
    /// The polling loop observed an audio-capable participant.
    Polled,
    /// Nothing confirmed the agent in time; proceeding anyway.
    GracePeriodElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessSignal {
    Ready {
        trigger: ReadyTrigger,
        /// Identity of the participant believed to be the agent, if any.
        participant: Option<String>,
    },
    Disconnected,
}

pub struct ReadinessDetector {
    timing: ReadinessTiming,
    state: ReadinessState,
    grace_deadline: Option<Instant>,
    next_poll: Option<Instant>,
}

impl ReadinessDetector {
    pub fn new(timing: ReadinessTiming) -> Self {
        Self {
            timing,
            state: ReadinessState::Idle,
            grace_deadline: None,
            next_poll: None,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Handles a successful transport connection.
    ///
    /// Fires immediately when an audio-capable participant is already present,
    /// otherwise arms the grace and polling deadlines.
    pub fn on_connected(
        &mut self,
        now: Instant,
        participants: &[RemoteParticipant],
    ) -> Option<ReadinessSignal> {
        if self.state != ReadinessState::Idle {
            return None;
        }
        if let Some(agent) = participants.iter().find(|p| p.has_usable_audio()) {
            return self.fire(ReadyTrigger::AlreadySubscribed, Some(agent.identity.clone()));
        }

        self.state = ReadinessState::WaitingForSignal;
        self.grace_deadline = Some(now + self.timing.grace_period);
        self.next_poll = Some(now + self.timing.poll_interval);
        debug!(
            participants = participants.len(),
            grace_period = ?self.timing.grace_period,
            "No audio-capable agent yet, waiting for a signal"
        );
        None
    }

    pub fn on_track_subscribed(
        &mut self,
        participant: &str,
        kind: TrackKind,
    ) -> Option<ReadinessSignal> {
        if self.state != ReadinessState::WaitingForSignal || kind != TrackKind::Audio {
            return None;
        }
        self.fire(ReadyTrigger::TrackSubscribed, Some(participant.to_string()))
    }

    /// The earliest pending timer, if the detector is waiting.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state != ReadinessState::WaitingForSignal {
            return None;
        }
        match (self.grace_deadline, self.next_poll) {
            (Some(grace), Some(poll)) => Some(grace.min(poll)),
            (grace, poll) => grace.or(poll),
        }
    }

    /// Handles an expired deadline. `participants` is only consulted when a
    /// poll or the grace timer is actually due.
    pub fn on_deadline<F>(&mut self, now: Instant, participants: F) -> Option<ReadinessSignal>
    where
        F: FnOnce() -> Vec<RemoteParticipant>,
    {
        if self.state != ReadinessState::WaitingForSignal {
            return None;
        }
        let grace_due = self.grace_deadline.is_some_and(|d| now >= d);
        let poll_due = self.next_poll.is_some_and(|d| now >= d);
        if !grace_due && !poll_due {
            return None;
        }

        let snapshot = participants();
        if let Some(agent) = snapshot.iter().find(|p| p.has_usable_audio()) {
            return self.fire(ReadyTrigger::Polled, Some(agent.identity.clone()));
        }
        if grace_due {
            let fallback = snapshot.first().map(|p| p.identity.clone());
            return self.fire(ReadyTrigger::GracePeriodElapsed, fallback);
        }

        self.next_poll = Some(now + self.timing.poll_interval);
        None
    }

    /// Handles a participant departure. Only an empty room counts as a
    /// disconnect; churn with other participants present is ignored.
    pub fn on_participant_left(&mut self, remaining: usize) -> Option<ReadinessSignal> {
        if remaining > 0 || self.state == ReadinessState::Idle {
            return None;
        }
        info!(from = ?self.state, "Agent left, readiness reset");
        self.reset();
        Some(ReadinessSignal::Disconnected)
    }

    /// Returns to `Idle` and drops all pending deadlines.
    pub fn reset(&mut self) {
        self.state = ReadinessState::Idle;
        self.grace_deadline = None;
        self.next_poll = None;
    }

    fn fire(&mut self, trigger: ReadyTrigger, participant: Option<String>) -> Option<ReadinessSignal> {
        self.state = ReadinessState::Ready;
        self.grace_deadline = None;
        self.next_poll = None;
        info!(?trigger, participant = ?participant, "Agent ready");
        Some(ReadinessSignal::Ready {
            trigger,
            participant,
        })
    }
}
