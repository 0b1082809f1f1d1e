//! Dispatcher outcomes
//!
//! Everything the dispatcher produces for the world outside the session
//! registry: messages for the relay, and what viewers sent over their data
//! channels.

use crate::model::input::DecodedFrame;
use crate::model::message::{OutboundMessage, PlayerId};

/// Outcomes propagated from the dispatcher to the streamer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagated {
    /// A message to send to the signaling relay.
    Relay(OutboundMessage),

    /// An input frame decoded from a player's data channel.
    Input(PlayerId, DecodedFrame),

    /// A text message from a player's data channel.
    Text(PlayerId, String),
}

impl Propagated {
    /// Extracts the player the outcome concerns, if any.
    ///
    /// # Returns
    ///
    /// * `Some(&PlayerId)` - For per-player relay messages and channel data
    /// * `None` - For relay messages not tied to a player, like `endpointId`
    pub fn player_id(&self) -> Option<&PlayerId> {
        match self {
            Propagated::Input(p, _) | Propagated::Text(p, _) => Some(p),
            Propagated::Relay(
                OutboundMessage::Offer { player_id, .. }
                | OutboundMessage::IceCandidate { player_id, .. }
                | OutboundMessage::IceCandidateComplete { player_id },
            ) => Some(player_id),
            Propagated::Relay(OutboundMessage::EndpointId { .. }) => None,
        }
    }
}
