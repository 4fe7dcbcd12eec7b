// In-memory backend for exercising the transport state machines

use super::peer::PeerBackend;
use super::server::BackendFactory;
use super::signaling::SessionDescription;
use super::{ChannelKind, Payload, PeerId, TransportError};

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub fail_negotiation: bool,
    pub fail_sends: bool,
    pub offers_accepted: usize,
    pub answer_accepted: bool,
    pub remote_candidates: Vec<String>,
    pub sent: Vec<(ChannelKind, Payload)>,
    pub closed: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerBackend for FakeBackend {
    fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        if self.fail_negotiation {
            return Err(TransportError::Negotiation("fake offer failure".to_string()));
        }
        Ok(SessionDescription::offer("fake-offer"))
    }

    fn accept_offer(
        &mut self,
        _offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if self.fail_negotiation {
            return Err(TransportError::Negotiation("fake offer rejected".to_string()));
        }
        self.offers_accepted += 1;
        Ok(SessionDescription::answer("fake-answer"))
    }

    fn accept_answer(&mut self, _answer: &SessionDescription) -> Result<(), TransportError> {
        if self.fail_negotiation {
            return Err(TransportError::Negotiation("fake answer rejected".to_string()));
        }
        self.answer_accepted = true;
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), TransportError> {
        if !candidate.starts_with("candidate:") {
            return Err(TransportError::InvalidCandidate(candidate.to_string()));
        }
        self.remote_candidates.push(candidate.to_string());
        Ok(())
    }

    fn send(&mut self, channel: ChannelKind, payload: &Payload) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Send("fake send failure".to_string()));
        }
        self.sent.push((channel, payload.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Hands out fresh fake backends, optionally failing creation
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub fail_create: bool,
    pub created: Vec<(PeerId, String)>,
}

impl BackendFactory for FakeFactory {
    type Backend = FakeBackend;

    fn create(&mut self, peer: PeerId, name: &str) -> Result<FakeBackend, TransportError> {
        if self.fail_create {
            return Err(TransportError::Rtc("fake factory failure".to_string()));
        }
        self.created.push((peer, name.to_string()));
        Ok(FakeBackend::new())
    }
}
