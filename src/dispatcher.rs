//! Signaling dispatcher
//!
//! Turns relay messages and transport events into session transitions, engine
//! commands and [`Propagated`] outcomes. The dispatcher is the only code that
//! touches the session registry, and it is driven from a single event loop, so
//! every method takes `&mut self` and runs to completion.
//!
//! Nothing a single player sends can take the streamer down: failures are
//! logged and the offending message, candidate or frame is dropped.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::candidate::{self, CandidateDescriptor, MalformedCandidate};
use crate::model::input::{self, InputEvent};
use crate::model::message::{CandidateInit, InboundMessage, OutboundMessage, PlayerId};
use crate::model::propagated::Propagated;
use crate::model::session::{PlayerSession, SessionError, SessionRegistry, SessionState};
use crate::transport::{
    ConnectionState, Datagram, TransportConfig, TransportEngine, TransportError, TransportEvent,
};

/// Most remote candidates kept per player while the answer is outstanding.
const MAX_PENDING_CANDIDATES: usize = 32;

/// Why a relay message was dropped.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Candidate(#[from] MalformedCandidate),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct SignalingDispatcher<E: TransportEngine> {
    engine: E,
    sessions: SessionRegistry<E::Handle>,
    streamer_id: String,
    channel_label: String,
}

impl<E: TransportEngine> SignalingDispatcher<E> {
    pub fn new(engine: E, streamer_id: impl Into<String>, channel_label: impl Into<String>) -> Self {
        Self {
            engine,
            sessions: SessionRegistry::new(),
            streamer_id: streamer_id.into(),
            channel_label: channel_label.into(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, player_id: &PlayerId) -> Option<SessionState> {
        self.sessions.get(player_id).ok().map(PlayerSession::state)
    }

    /// Decodes a relay text frame and handles it.
    pub fn handle_text(&mut self, text: &str) -> Vec<Propagated> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => self.handle(message),
            Err(e) => {
                warn!("Failed to parse signaling message: {} ({})", e, text);
                vec![]
            }
        }
    }

    /// Entry point for every inbound relay message.
    pub fn handle(&mut self, message: InboundMessage) -> Vec<Propagated> {
        debug!("📩 Signaling message: {:?}", message);

        let result = match message {
            InboundMessage::Config {
                peer_connection_options,
            } => {
                self.engine.configure(TransportConfig {
                    ice_servers: peer_connection_options.ice_servers,
                });
                Ok(vec![])
            }
            InboundMessage::Identify => {
                info!("📤 Identifying as {}", self.streamer_id);
                Ok(vec![Propagated::Relay(OutboundMessage::EndpointId {
                    id: self.streamer_id.clone(),
                })])
            }
            InboundMessage::PlayerConnected { player_id } => self.player_connected(player_id),
            InboundMessage::PlayerDisconnected { player_id } => {
                if !self.close_session(&player_id) {
                    debug!("Player {} disconnected without a session", player_id);
                }
                Ok(vec![])
            }
            InboundMessage::Answer { player_id, sdp } => self.answer(&player_id, &sdp),
            InboundMessage::IceCandidate {
                player_id,
                candidate,
            } => self.remote_candidate(&player_id, &candidate),
            InboundMessage::Unknown => {
                debug!("Ignoring signaling message of unknown type");
                Ok(vec![])
            }
        };

        result.unwrap_or_else(|e| {
            warn!("Dropped signaling message: {}", e);
            vec![]
        })
    }

    fn player_connected(&mut self, player_id: PlayerId) -> Result<Vec<Propagated>, DispatchError> {
        info!("🎮 Player {} connected, negotiating", player_id);

        // A reconnect under the same id starts over.
        if self.close_session(&player_id) {
            warn!("Player {} reconnected, replaced the previous session", player_id);
        }

        let handle = self.engine.open()?;
        let session = self.sessions.create(player_id.clone(), handle)?;
        self.engine
            .add_local_tracks(&mut session.transport, &self.channel_label);

        let sdp = match self.engine.create_offer(&mut session.transport) {
            Ok(sdp) => sdp,
            Err(e) => {
                self.discard(&player_id);
                return Err(e.into());
            }
        };
        session.transition(SessionState::OfferSent)?;

        info!("📤 Offer sent to player {}", player_id);
        Ok(vec![Propagated::Relay(OutboundMessage::Offer {
            player_id,
            sdp,
        })])
    }

    fn answer(&mut self, player_id: &PlayerId, sdp: &str) -> Result<Vec<Propagated>, DispatchError> {
        let session = self.sessions.get_mut(player_id)?;
        session.check(SessionState::AnswerApplied)?;

        self.engine.apply_answer(&mut session.transport, sdp)?;
        session.transition(SessionState::AnswerApplied)?;
        info!("🔄 Player {}: remote description applied", player_id);

        let pending = std::mem::take(&mut session.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "Player {}: applying {} queued candidate(s)",
                player_id,
                pending.len()
            );
        }
        for candidate in &pending {
            if let Err(e) = apply_candidate(&mut self.engine, session, candidate) {
                warn!("Player {}: dropped queued candidate: {}", player_id, e);
            }
        }

        Ok(vec![])
    }

    fn remote_candidate(
        &mut self,
        player_id: &PlayerId,
        init: &CandidateInit,
    ) -> Result<Vec<Propagated>, DispatchError> {
        let session = self.sessions.get_mut(player_id)?;
        let descriptor =
            candidate::translate(&init.candidate, &init.sdp_mid, init.sdp_m_line_index)?;

        match session.state() {
            state if state.awaits_answer() => {
                if session.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                    warn!(
                        "Player {}: {} candidates already queued, dropped {}",
                        player_id, MAX_PENDING_CANDIDATES, descriptor
                    );
                    return Ok(vec![]);
                }
                debug!(
                    "Player {}: queued candidate {} until the answer",
                    player_id, descriptor
                );
                session.pending_candidates.push(descriptor);
            }
            state if state.is_inert() => {
                debug!(
                    "Player {}: ignoring candidate for {} session",
                    player_id,
                    session.state()
                );
            }
            _ => apply_candidate(&mut self.engine, session, &descriptor)?,
        }

        Ok(vec![])
    }

    /// Handles an event the engine raised for one player.
    pub fn handle_transport_event(
        &mut self,
        player_id: &PlayerId,
        event: TransportEvent,
    ) -> Vec<Propagated> {
        let Ok(session) = self.sessions.get(player_id) else {
            debug!("Event for unknown player {}: {:?}", player_id, event);
            return vec![];
        };
        if session.state().is_inert() && !matches!(event, TransportEvent::StateChanged(_)) {
            debug!(
                "Player {}: dropped {:?} for {} session",
                player_id,
                event,
                session.state()
            );
            return vec![];
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                debug!("📤 Player {}: local candidate {}", player_id, candidate.candidate);
                vec![Propagated::Relay(OutboundMessage::IceCandidate {
                    player_id: player_id.clone(),
                    candidate,
                })]
            }
            TransportEvent::GatheringComplete => {
                info!("✅ Player {}: all local candidates sent", player_id);
                vec![Propagated::Relay(OutboundMessage::IceCandidateComplete {
                    player_id: player_id.clone(),
                })]
            }
            TransportEvent::StateChanged(state) => {
                self.connection_state_changed(player_id, state);
                vec![]
            }
            TransportEvent::ChannelOpen(label) => {
                info!("✅ Player {}: data channel '{}' open", player_id, label);
                vec![]
            }
            TransportEvent::ChannelMessage { binary: true, data } => {
                let decoded = input::decode(&data);
                match &decoded.event {
                    InputEvent::Error(failure) => warn!(
                        "Player {}: bad input frame {}: {}",
                        player_id, decoded.raw_hex, failure
                    ),
                    InputEvent::Unknown { event_id } => debug!(
                        "Player {}: unknown input event {} ({})",
                        player_id, event_id, decoded.raw_hex
                    ),
                    event => debug!("Player {}: {:?}", player_id, event),
                }
                vec![Propagated::Input(player_id.clone(), decoded)]
            }
            TransportEvent::ChannelMessage { binary: false, data } => {
                let text = String::from_utf8_lossy(&data).into_owned();
                debug!("📩 Player {}: text message {:?}", player_id, text);
                vec![Propagated::Text(player_id.clone(), text)]
            }
        }
    }

    fn connection_state_changed(&mut self, player_id: &PlayerId, state: ConnectionState) {
        let next = match state {
            ConnectionState::New | ConnectionState::Checking => {
                debug!("🔄 Player {}: connection {:?}", player_id, state);
                return;
            }
            ConnectionState::Closed => {
                info!("Player {}: connection closed", player_id);
                self.close_session(player_id);
                return;
            }
            ConnectionState::Connected => SessionState::Connected,
            ConnectionState::Failed => SessionState::Failed,
        };

        let Ok(session) = self.sessions.get_mut(player_id) else {
            return;
        };
        match session.transition(next) {
            Ok(_) if next == SessionState::Failed => {
                error!("❌ Player {}: connection failed, session kept", player_id)
            }
            Ok(_) => info!("✅ Player {}: connected", player_id),
            Err(e) => warn!("{}", e),
        }
    }

    /// Drains pending engine events from every session.
    pub fn poll(&mut self) -> Vec<Propagated> {
        let mut events = vec![];
        for session in self.sessions.iter_mut() {
            while let Some(event) = self.engine.poll_event(&mut session.transport) {
                events.push((session.player_id().clone(), event));
            }
        }

        events
            .into_iter()
            .flat_map(|(player_id, event)| self.handle_transport_event(&player_id, event))
            .collect()
    }

    /// Routes a datagram from the shared socket to the session it belongs to.
    pub fn receive(&mut self, datagram: Datagram) {
        let engine = &mut self.engine;
        match self
            .sessions
            .iter_mut()
            .find(|s| engine.accepts(&s.transport, &datagram))
        {
            Some(session) => engine.handle_datagram(&mut session.transport, &datagram),
            // Common right after an offer: the viewer's first STUN can beat the answer.
            None => debug!("No session accepts UDP input from {}", datagram.source),
        }
    }

    /// Drives time forward in every session.
    pub fn handle_timeout(&mut self, now: Instant) {
        for session in self.sessions.iter_mut() {
            self.engine.handle_timeout(&mut session.transport, now);
        }
    }

    /// The earliest instant any session needs [`handle_timeout`](Self::handle_timeout).
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.sessions
            .iter()
            .filter_map(|s| self.engine.poll_timeout(&s.transport))
            .min()
    }

    /// Closes every session. Returns how many were closed.
    pub fn shutdown(&mut self) -> usize {
        let player_ids = self.sessions.player_ids();
        for player_id in &player_ids {
            self.close_session(player_id);
        }
        player_ids.len()
    }

    /// Tears down a session and releases its transport. Returns whether one existed.
    fn close_session(&mut self, player_id: &PlayerId) -> bool {
        let Some(mut session) = self.sessions.remove(player_id) else {
            return false;
        };
        if let Err(e) = session.transition(SessionState::Closed) {
            debug!("{}", e);
        }
        self.engine.close(session.transport);
        info!("Player {}: session closed", player_id);
        true
    }

    /// Drops a half-built session without logging it as a disconnect.
    fn discard(&mut self, player_id: &PlayerId) {
        if let Some(session) = self.sessions.remove(player_id) {
            self.engine.close(session.transport);
        }
    }
}

fn apply_candidate<E: TransportEngine>(
    engine: &mut E,
    session: &mut PlayerSession<E::Handle>,
    candidate: &CandidateDescriptor,
) -> Result<(), DispatchError> {
    engine.add_remote_candidate(&mut session.transport, candidate)?;
    // A connected session keeps accepting late candidates without regressing.
    if session.state() != SessionState::Connected {
        session.transition(SessionState::IceExchanging)?;
    }
    debug!(
        "❄️ Player {}: added remote candidate {}",
        session.player_id(),
        candidate
    );
    Ok(())
}
