//! str0m-backed transport engine
//!
//! Every player gets its own [`Rtc`] instance while all of them share one UDP
//! socket. Incoming datagrams are demultiplexed with `Rtc::accepts`, the same
//! way a str0m SFU routes traffic to its clients.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::ChannelId;
use str0m::media::{Direction, MediaKind};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::tracks::{TrackOut, TrackOutState};
use super::{
    ConnectionState, Datagram, TransportConfig, TransportEngine, TransportError, TransportEvent,
};
use crate::model::candidate::CandidateDescriptor;
use crate::model::message::CandidateInit;

/// Stream id shared by the outgoing audio and video tracks.
const STREAM_ID: &str = "pixelstreaming";

/// One peer connection, owned by a player's session.
#[derive(Debug)]
pub struct RtcPeer {
    rtc: Rtc,
    pending: Option<SdpPendingOffer>,
    channel_label: Option<String>,
    cid: Option<ChannelId>,
    tracks_out: Vec<TrackOut>,
    local_candidates: Vec<Candidate>,
    events: VecDeque<TransportEvent>,
    state: ConnectionState,
    timeout: Option<Instant>,
}

impl RtcPeer {
    fn new(rtc: Rtc, local_candidates: Vec<Candidate>) -> Self {
        Self {
            rtc,
            pending: None,
            channel_label: None,
            cid: None,
            tracks_out: vec![],
            local_candidates,
            events: VecDeque::new(),
            state: ConnectionState::New,
            timeout: None,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.events.push_back(TransportEvent::StateChanged(state));
        }
    }

    /// Disconnects after an unrecoverable str0m error.
    fn fail(&mut self, reason: impl std::fmt::Debug) {
        warn!("Peer connection failed: {:?}", reason);
        self.rtc.disconnect();
        self.set_state(ConnectionState::Failed);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("🔌 ICE state = {:?}", state);
                match state {
                    IceConnectionState::New => self.set_state(ConnectionState::New),
                    IceConnectionState::Checking => self.set_state(ConnectionState::Checking),
                    // Reported once DTLS is up as well, see Event::Connected.
                    IceConnectionState::Connected | IceConnectionState::Completed => {}
                    // No ICE restart: a lost path ends the peer.
                    IceConnectionState::Disconnected => self.fail("ICE disconnected"),
                }
            }
            Event::Connected => self.set_state(ConnectionState::Connected),
            Event::ChannelOpen(cid, label) => {
                if self.cid.is_some_and(|expected| expected != cid) {
                    warn!("⚠️  Unexpected data channel '{}' ({:?})", label, cid);
                }
                self.cid = Some(cid);
                self.events.push_back(TransportEvent::ChannelOpen(label));
            }
            Event::ChannelData(data) => {
                self.events.push_back(TransportEvent::ChannelMessage {
                    binary: data.binary,
                    data: data.data,
                });
            }
            Event::ChannelClose(cid) => {
                debug!("Data channel {:?} closed", cid);
            }
            other => debug!("Event (other): {:?}", other),
        }
    }

    /// The mid used to tag trickled local candidates. All media is bundled, so
    /// the first m-line stands in for the whole transport.
    fn bundle_mid(&self) -> String {
        self.tracks_out
            .iter()
            .find_map(|t| t.mid())
            .map(|mid| mid.to_string())
            .unwrap_or_default()
    }
}

/// The str0m engine. Cheap to construct; each player's [`RtcPeer`] holds the
/// per-connection state.
pub struct RtcEngine {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: Option<TransportConfig>,
}

impl RtcEngine {
    pub fn new(socket: Arc<UdpSocket>) -> Result<Self, TransportError> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            config: None,
        })
    }

    fn receive<'a>(datagram: &'a Datagram) -> Option<Input<'a>> {
        let contents = datagram.contents.as_slice().try_into().ok()?;
        Some(Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source: datagram.source,
                destination: datagram.destination,
                contents,
            },
        ))
    }
}

impl TransportEngine for RtcEngine {
    type Handle = RtcPeer;

    fn configure(&mut self, config: TransportConfig) {
        // str0m only gathers host candidates; relay/STUN servers are carried
        // along so a later config can be compared against the current one.
        for server in &config.ice_servers {
            debug!("ICE server: {:?}", server.urls);
        }
        info!(
            "📝 Transport configured with {} ICE server(s)",
            config.ice_servers.len()
        );
        self.config = Some(config);
    }

    fn open(&mut self) -> Result<RtcPeer, TransportError> {
        if self.config.is_none() {
            return Err(TransportError::NotConfigured);
        }

        let mut rtc = Rtc::builder().build();
        let rejected = |reason: String| TransportError::Candidate {
            candidate: self.local_addr.to_string(),
            reason,
        };
        let candidate = Candidate::host(self.local_addr, Protocol::Udp)
            .map_err(|e| rejected(e.to_string()))?;
        let candidate = rtc
            .add_local_candidate(candidate)
            .cloned()
            .ok_or_else(|| rejected("not accepted as a local candidate".to_string()))?;

        Ok(RtcPeer::new(rtc, vec![candidate]))
    }

    fn add_local_tracks(&mut self, handle: &mut RtcPeer, channel_label: &str) {
        handle.tracks_out.push(TrackOut::new(MediaKind::Video));
        handle.tracks_out.push(TrackOut::new(MediaKind::Audio));
        handle.channel_label = Some(channel_label.to_string());
    }

    fn create_offer(&mut self, handle: &mut RtcPeer) -> Result<String, TransportError> {
        let mut change = handle.rtc.sdp_api();

        for track in &mut handle.tracks_out {
            if track.mid().is_none() {
                let mid = change.add_media(
                    track.kind,
                    Direction::SendOnly,
                    Some(STREAM_ID.to_string()),
                    None,
                    None,
                );
                track.state = TrackOutState::Negotiating(mid);
            }
        }

        if handle.cid.is_none() {
            if let Some(label) = &handle.channel_label {
                handle.cid = Some(change.add_channel(label.clone()));
            }
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| TransportError::Offer("nothing to negotiate".to_string()))?;
        handle.pending = Some(pending);

        // Local candidates are known up front, so gathering completes as soon
        // as the offer exists.
        let sdp_mid = handle.bundle_mid();
        for candidate in &handle.local_candidates {
            handle
                .events
                .push_back(TransportEvent::LocalCandidate(CandidateInit {
                    candidate: candidate.to_sdp_string(),
                    sdp_mid: sdp_mid.clone(),
                    sdp_m_line_index: 0,
                }));
        }
        handle.events.push_back(TransportEvent::GatheringComplete);

        Ok(offer.to_sdp_string())
    }

    fn apply_answer(&mut self, handle: &mut RtcPeer, sdp: &str) -> Result<(), TransportError> {
        let answer =
            SdpAnswer::from_sdp_string(sdp).map_err(|e| TransportError::Sdp(e.to_string()))?;
        let pending = handle.pending.take().ok_or(TransportError::NoPendingOffer)?;

        handle.rtc.sdp_api().accept_answer(pending, answer)?;

        for track in &mut handle.tracks_out {
            track.confirm();
        }
        Ok(())
    }

    fn add_remote_candidate(
        &mut self,
        handle: &mut RtcPeer,
        candidate: &CandidateDescriptor,
    ) -> Result<(), TransportError> {
        let line = candidate.to_sdp_line();
        let parsed = Candidate::from_sdp_string(&line).map_err(|e| TransportError::Candidate {
            candidate: line.clone(),
            reason: e.to_string(),
        })?;
        handle.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    fn poll_event(&mut self, handle: &mut RtcPeer) -> Option<TransportEvent> {
        loop {
            if let Some(event) = handle.events.pop_front() {
                return Some(event);
            }

            if !handle.rtc.is_alive() {
                handle.timeout = None;
                // A failed peer stays failed; only a clean disconnect closes it.
                if !matches!(
                    handle.state,
                    ConnectionState::Failed | ConnectionState::Closed
                ) {
                    handle.set_state(ConnectionState::Closed);
                    continue;
                }
                return None;
            }

            match handle.rtc.poll_output() {
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self
                        .socket
                        .try_send_to(&transmit.contents, transmit.destination)
                    {
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Timeout(t)) => {
                    handle.timeout = Some(t);
                    return None;
                }
                Ok(Output::Event(event)) => handle.handle_event(event),
                Err(e) => handle.fail(e),
            }
        }
    }

    fn accepts(&self, handle: &RtcPeer, datagram: &Datagram) -> bool {
        Self::receive(datagram).is_some_and(|input| handle.rtc.accepts(&input))
    }

    fn handle_datagram(&mut self, handle: &mut RtcPeer, datagram: &Datagram) {
        if !handle.rtc.is_alive() {
            return;
        }
        let Some(input) = Self::receive(datagram) else {
            return;
        };
        if let Err(e) = handle.rtc.handle_input(input) {
            handle.fail(e);
        }
    }

    fn handle_timeout(&mut self, handle: &mut RtcPeer, now: Instant) {
        if !handle.rtc.is_alive() {
            return;
        }
        if let Err(e) = handle.rtc.handle_input(Input::Timeout(now)) {
            handle.fail(e);
        }
    }

    fn poll_timeout(&self, handle: &RtcPeer) -> Option<Instant> {
        handle.timeout
    }

    fn close(&mut self, mut handle: RtcPeer) {
        handle.rtc.disconnect();
    }
}
