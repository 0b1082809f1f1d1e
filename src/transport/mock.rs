//! In-memory engine for dispatcher tests.

use std::collections::VecDeque;
use std::time::Instant;

use super::{Datagram, TransportConfig, TransportEngine, TransportError, TransportEvent};
use crate::model::candidate::CandidateDescriptor;

#[derive(Debug, Default)]
pub struct MockHandle {
    pub id: usize,
    pub channel_label: Option<String>,
    pub offers: usize,
    pub answer: Option<String>,
    pub remote_candidates: Vec<CandidateDescriptor>,
    pub events: VecDeque<TransportEvent>,
    pub timeouts: Vec<Instant>,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    pub config: Option<TransportConfig>,
    pub opened: usize,
    pub closed: Vec<usize>,
    pub fail_offers: bool,
    pub reject_candidates: bool,
}

impl MockEngine {
    pub fn configured() -> Self {
        Self {
            config: Some(TransportConfig::default()),
            ..Self::default()
        }
    }
}

impl TransportEngine for MockEngine {
    type Handle = MockHandle;

    fn configure(&mut self, config: TransportConfig) {
        self.config = Some(config);
    }

    fn open(&mut self) -> Result<MockHandle, TransportError> {
        if self.config.is_none() {
            return Err(TransportError::NotConfigured);
        }
        self.opened += 1;
        Ok(MockHandle {
            id: self.opened,
            ..MockHandle::default()
        })
    }

    fn add_local_tracks(&mut self, handle: &mut MockHandle, channel_label: &str) {
        handle.channel_label = Some(channel_label.to_string());
    }

    fn create_offer(&mut self, handle: &mut MockHandle) -> Result<String, TransportError> {
        if self.fail_offers {
            return Err(TransportError::Offer("scripted failure".to_string()));
        }
        handle.offers += 1;
        Ok(format!("v=0 offer-{}", handle.id))
    }

    fn apply_answer(&mut self, handle: &mut MockHandle, sdp: &str) -> Result<(), TransportError> {
        if !sdp.starts_with("v=0") {
            return Err(TransportError::Sdp("missing version line".to_string()));
        }
        handle.answer = Some(sdp.to_string());
        Ok(())
    }

    fn add_remote_candidate(
        &mut self,
        handle: &mut MockHandle,
        candidate: &CandidateDescriptor,
    ) -> Result<(), TransportError> {
        if self.reject_candidates {
            return Err(TransportError::Candidate {
                candidate: candidate.to_sdp_line(),
                reason: "scripted rejection".to_string(),
            });
        }
        handle.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn poll_event(&mut self, handle: &mut MockHandle) -> Option<TransportEvent> {
        handle.events.pop_front()
    }

    fn accepts(&self, handle: &MockHandle, datagram: &Datagram) -> bool {
        datagram.contents.first() == Some(&(handle.id as u8))
    }

    fn handle_datagram(&mut self, handle: &mut MockHandle, datagram: &Datagram) {
        handle.events.push_back(TransportEvent::ChannelMessage {
            binary: true,
            data: datagram.contents[1..].to_vec(),
        });
    }

    fn handle_timeout(&mut self, handle: &mut MockHandle, now: Instant) {
        handle.timeouts.push(now);
    }

    fn poll_timeout(&self, handle: &MockHandle) -> Option<Instant> {
        handle.timeouts.last().copied()
    }

    fn close(&mut self, handle: MockHandle) {
        self.closed.push(handle.id);
    }
}
