//! WebRTC transport engine interface
//!
//! The dispatcher drives negotiation through [`TransportEngine`] and never
//! touches a WebRTC stack directly. Engines are sans-IO in the same sense as
//! str0m: commands return immediately, and anything the engine wants to tell
//! the streamer (candidates, state changes, channel data) is queued on the
//! player's handle and drained with [`TransportEngine::poll_event`].

pub mod rtc;
mod tracks;

use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;

use crate::model::candidate::CandidateDescriptor;
use crate::model::message::{CandidateInit, IceServer};

/// Transport configuration built from the relay's `config` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

/// Errors reported by an engine command.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no transport configuration received yet")]
    NotConfigured,
    #[error("failed to create local description: {0}")]
    Offer(String),
    #[error("no offer pending for this answer")]
    NoPendingOffer,
    #[error("invalid remote description: {0}")]
    Sdp(String),
    #[error("rejected remote candidate {candidate}: {reason}")]
    Candidate { candidate: String, reason: String },
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
    #[error(transparent)]
    Rtc(#[from] str0m::RtcError),
}

/// Peer connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Failed,
    Closed,
}

/// Something the engine wants the streamer to know about one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate to advertise to the viewer.
    LocalCandidate(CandidateInit),
    /// All local candidates have been advertised.
    GatheringComplete,
    StateChanged(ConnectionState),
    ChannelOpen(String),
    ChannelMessage { binary: bool, data: Vec<u8> },
}

/// A UDP datagram read from the shared socket.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub contents: Vec<u8>,
}

/// The WebRTC stack behind the dispatcher.
///
/// One engine serves every player; `Handle` is the per-player peer connection
/// and is owned by that player's session.
pub trait TransportEngine {
    type Handle;

    /// Replaces the configuration used for players connecting from now on.
    fn configure(&mut self, config: TransportConfig);

    /// Allocates a peer connection for a new player.
    fn open(&mut self) -> Result<Self::Handle, TransportError>;

    /// Registers the outgoing audio/video tracks and the input data channel.
    fn add_local_tracks(&mut self, handle: &mut Self::Handle, channel_label: &str);

    /// Creates the local offer and returns its SDP.
    fn create_offer(&mut self, handle: &mut Self::Handle) -> Result<String, TransportError>;

    fn apply_answer(&mut self, handle: &mut Self::Handle, sdp: &str)
        -> Result<(), TransportError>;

    fn add_remote_candidate(
        &mut self,
        handle: &mut Self::Handle,
        candidate: &CandidateDescriptor,
    ) -> Result<(), TransportError>;

    /// Next event queued on the handle, if any.
    fn poll_event(&mut self, handle: &mut Self::Handle) -> Option<TransportEvent>;

    /// Whether the datagram belongs to this handle's connection.
    fn accepts(&self, handle: &Self::Handle, datagram: &Datagram) -> bool;

    fn handle_datagram(&mut self, handle: &mut Self::Handle, datagram: &Datagram);

    fn handle_timeout(&mut self, handle: &mut Self::Handle, now: Instant);

    /// When the handle next needs [`handle_timeout`](Self::handle_timeout).
    fn poll_timeout(&self, handle: &Self::Handle) -> Option<Instant>;

    /// Releases the peer connection.
    fn close(&mut self, handle: Self::Handle);
}

#[cfg(test)]
pub mod mock;
