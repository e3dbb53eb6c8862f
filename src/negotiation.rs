//! Offer/answer state machine for the meeting's single peer connection.
//!
//! ```text
//! idle --LocalOffer--> offering --RemoteAnswer--> answered --Connected--> connected
//! idle --RemoteOffer-> answered
//! connected --LocalOffer/RemoteOffer--> offering/answered   (renegotiation)
//! offering --RemoteOffer--> answered   (polite side only, otherwise glare)
//! *    --Close--> closed
//! ```

use std::fmt;

use thiserror::Error;

use crate::signal::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    Answered,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Answered => "answered",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    LocalOffer,
    RemoteOffer,
    RemoteAnswer,
    Connected,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("remote offer arrived while our own offer is outstanding")]
    Glare,
    #[error("{event:?} is not valid while {state}")]
    Unexpected {
        state: NegotiationState,
        event: NegotiationEvent,
    },
    #[error("negotiation is closed")]
    Closed,
}

#[derive(Debug)]
pub struct Negotiator {
    state: NegotiationState,
    polite: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            polite: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// A polite side gives up its own outstanding offer when the offers
    /// cross; exactly one of the two sides must be polite.
    pub fn set_polite(&mut self, polite: bool) {
        self.polite = polite;
    }

    /// Where `event` would take the machine, without taking it there.
    pub fn transition(&self, event: NegotiationEvent) -> Result<NegotiationState, NegotiationError> {
        use NegotiationEvent as E;
        use NegotiationState as S;

        match (self.state, event) {
            (S::Closed, E::Close) => Ok(S::Closed),
            (S::Closed, _) => Err(NegotiationError::Closed),
            (_, E::Close) => Ok(S::Closed),
            (S::Idle | S::Connected, E::LocalOffer) => Ok(S::Offering),
            (S::Idle | S::Connected, E::RemoteOffer) => Ok(S::Answered),
            (S::Offering, E::RemoteOffer) if self.polite => Ok(S::Answered),
            (S::Offering, E::RemoteOffer) => Err(NegotiationError::Glare),
            (S::Offering, E::RemoteAnswer) => Ok(S::Answered),
            (S::Answered | S::Connected, E::Connected) => Ok(S::Connected),
            (state, event) => Err(NegotiationError::Unexpected { state, event }),
        }
    }

    pub fn apply(&mut self, event: NegotiationEvent) -> Result<NegotiationState, NegotiationError> {
        let next = self.transition(event)?;
        if next == NegotiationState::Closed {
            self.pending_candidates.clear();
        }
        self.state = next;
        Ok(next)
    }

    /// Records that a remote description has been applied and returns the
    /// candidates that were waiting for it, in arrival order.
    pub fn remote_description_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending_candidates)
    }

    /// Returns the candidate back when it can be applied right away;
    /// otherwise it is queued until the remote description lands.
    pub fn accept_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<Option<IceCandidate>, NegotiationError> {
        if self.state == NegotiationState::Closed {
            return Err(NegotiationError::Closed);
        }
        if self.remote_description_set {
            Ok(Some(candidate))
        } else {
            self.pending_candidates.push(candidate);
            Ok(None)
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }
}
