//! Outgoing media tracks
//!
//! The streamer offers one send-only video and one send-only audio track to
//! every player. Each track walks through SDP negotiation on its own so the
//! engine knows which mids are live once the answer is accepted.

use str0m::media::{MediaKind, Mid};

/// An outgoing media track offered to a player.
#[derive(Debug)]
pub struct TrackOut {
    /// The kind of media (audio or video)
    pub(crate) kind: MediaKind,
    /// Current negotiation state of the track
    pub(crate) state: TrackOutState,
}

/// The negotiation state of an outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutState {
    /// Track needs to be added in the next offer
    ToOpen,
    /// Track is in an offer awaiting the answer
    Negotiating(Mid),
    /// Track is fully negotiated
    Open(Mid),
}

impl TrackOut {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            state: TrackOutState::ToOpen,
        }
    }

    /// Gets the media ID (Mid) for this track, if assigned.
    pub fn mid(&self) -> Option<Mid> {
        match self.state {
            TrackOutState::ToOpen => None,
            TrackOutState::Negotiating(m) | TrackOutState::Open(m) => Some(m),
        }
    }

    /// Marks a negotiating track as open once the answer is in.
    pub fn confirm(&mut self) {
        if let TrackOutState::Negotiating(m) = self.state {
            self.state = TrackOutState::Open(m);
        }
    }
}
