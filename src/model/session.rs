//! Per-player session state
//!
//! The [`SessionRegistry`] is the single owner of every [`PlayerSession`]. It
//! lives inside the dispatcher and is only touched from the streamer's event
//! loop, so plain `&mut` access is all the synchronization it needs.

use std::collections::hash_map::{Entry, HashMap};
use std::fmt;

use thiserror::Error;

use crate::model::candidate::CandidateDescriptor;
use crate::model::message::PlayerId;

/// Negotiation progress of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    OfferSent,
    AnswerApplied,
    IceExchanging,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    /// Whether the session has stopped negotiating for good. Inert sessions
    /// take no candidates and relay nothing until they are removed.
    pub fn is_inert(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    /// Whether remote candidates must wait for the answer.
    pub fn awaits_answer(self) -> bool {
        matches!(self, SessionState::New | SessionState::OfferSent)
    }

    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (New, OfferSent) => true,
            (OfferSent, AnswerApplied) => true,
            (AnswerApplied | IceExchanging, IceExchanging) => true,
            (_, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "NEW",
            SessionState::OfferSent => "OFFER_SENT",
            SessionState::AnswerApplied => "ANSWER_APPLIED",
            SessionState::IceExchanging => "ICE_EXCHANGING",
            SessionState::Connected => "CONNECTED",
            SessionState::Failed => "FAILED",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session for player {0}")]
    NotFound(PlayerId),
    #[error("player {0} already has a session")]
    Duplicate(PlayerId),
    #[error("player {player_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        player_id: PlayerId,
        from: SessionState,
        to: SessionState,
    },
}

/// Everything the streamer tracks for one connected viewer.
///
/// `H` is the transport engine's handle; the session owns it exclusively.
#[derive(Debug)]
pub struct PlayerSession<H> {
    player_id: PlayerId,
    state: SessionState,
    /// Remote candidates that arrived before the answer, in arrival order.
    pub pending_candidates: Vec<CandidateDescriptor>,
    pub transport: H,
}

impl<H> PlayerSession<H> {
    pub fn new(player_id: PlayerId, transport: H) -> Self {
        Self {
            player_id,
            state: SessionState::New,
            pending_candidates: vec![],
            transport,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves the session to `next`, refusing transitions the state machine
    /// doesn't allow. Re-entering the current state is a no-op for
    /// `IceExchanging`, `Connected` and `Failed`.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, SessionError> {
        self.check(next)?;
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Checks that [`transition`](Self::transition) to `next` would succeed.
    pub fn check(&self, next: SessionState) -> Result<(), SessionError> {
        let reentry =
            self.state == next && matches!(next, SessionState::Connected | SessionState::Failed);
        if reentry || self.state.can_become(next) {
            return Ok(());
        }

        Err(SessionError::InvalidTransition {
            player_id: self.player_id.clone(),
            from: self.state,
            to: next,
        })
    }
}

/// Exclusive owner of the `PlayerId -> PlayerSession` mapping.
#[derive(Debug)]
pub struct SessionRegistry<H> {
    sessions: HashMap<PlayerId, PlayerSession<H>>,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<H> SessionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session in state `New`.
    ///
    /// Existing sessions are never replaced here; callers that want
    /// replace-on-reconnect must [`remove`](Self::remove) first.
    pub fn create(
        &mut self,
        player_id: PlayerId,
        transport: H,
    ) -> Result<&mut PlayerSession<H>, SessionError> {
        match self.sessions.entry(player_id) {
            Entry::Occupied(entry) => Err(SessionError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                let session = PlayerSession::new(entry.key().clone(), transport);
                Ok(entry.insert(session))
            }
        }
    }

    pub fn get(&self, player_id: &PlayerId) -> Result<&PlayerSession<H>, SessionError> {
        self.sessions
            .get(player_id)
            .ok_or_else(|| SessionError::NotFound(player_id.clone()))
    }

    pub fn get_mut(&mut self, player_id: &PlayerId) -> Result<&mut PlayerSession<H>, SessionError> {
        self.sessions
            .get_mut(player_id)
            .ok_or_else(|| SessionError::NotFound(player_id.clone()))
    }

    pub fn remove(&mut self, player_id: &PlayerId) -> Option<PlayerSession<H>> {
        self.sessions.remove(player_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession<H>> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession<H>> {
        self.sessions.values_mut()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicates() {
        let mut registry = SessionRegistry::new();
        registry.create("p1".into(), 1u8).unwrap();

        let err = registry.create("p1".into(), 2u8).unwrap_err();
        assert_eq!(err, SessionError::Duplicate("p1".into()));
        assert_eq!(registry.get(&"p1".into()).unwrap().transport, 1);
    }

    #[test]
    fn get_and_remove() {
        let mut registry = SessionRegistry::new();
        registry.create(PlayerId::Number(3), ()).unwrap();

        assert_eq!(registry.get(&PlayerId::Number(3)).unwrap().state(), SessionState::New);
        assert!(matches!(
            registry.get(&PlayerId::from("3")),
            Err(SessionError::NotFound(_))
        ));

        assert!(registry.remove(&PlayerId::Number(3)).is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(&PlayerId::Number(3)).is_none());
    }

    #[test]
    fn happy_path_transitions() {
        let mut session = PlayerSession::new("p1".into(), ());
        for next in [
            SessionState::OfferSent,
            SessionState::AnswerApplied,
            SessionState::IceExchanging,
            SessionState::IceExchanging,
            SessionState::Connected,
            SessionState::Closed,
        ] {
            session.transition(next).unwrap();
        }
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut session = PlayerSession::new("p1".into(), ());
        assert!(session.transition(SessionState::AnswerApplied).is_err());
        assert!(session.transition(SessionState::IceExchanging).is_err());
        assert_eq!(session.state(), SessionState::New);

        session.transition(SessionState::OfferSent).unwrap();
        session.transition(SessionState::AnswerApplied).unwrap();
        session.transition(SessionState::Connected).unwrap();
        assert!(session.transition(SessionState::IceExchanging).is_err());
    }

    #[test]
    fn failed_is_sticky_and_closed_is_terminal() {
        let mut session = PlayerSession::new("p1".into(), ());
        session.transition(SessionState::OfferSent).unwrap();
        assert!(!session.state().is_inert());
        session.transition(SessionState::Failed).unwrap();
        session.transition(SessionState::Failed).unwrap();
        assert!(session.state().is_inert());
        assert!(session.transition(SessionState::Connected).is_err());

        session.transition(SessionState::Closed).unwrap();
        for next in [SessionState::New, SessionState::Failed, SessionState::Closed] {
            assert!(session.transition(next).is_err());
        }
        assert!(session.state().is_inert());
    }
}
