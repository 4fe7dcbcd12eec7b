// Offer/answer/candidate negotiation for one peer connection
//
// The host is always the offerer (it reacts to `connect`), the joining side
// is always the answerer. Messages arriving in a state where they make no
// sense are logged and dropped; none of them can tear the connection down.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::peer::PeerBackend;

/// SDP blob as carried inside offer/answer messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// Signaling payloads carried in relay envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Joiner asks the host to start negotiating
    Connect,
    Offer { offer: SessionDescription },
    Answer { answer: SessionDescription },
    /// An empty candidate string marks end-of-candidates
    Candidate { candidate: String },
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn name(&self) -> &'static str {
        match self {
            SignalMessage::Connect => "connect",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    Offering,
    AwaitingAnswer,
    Answering,
    CandidateExchange,
    ChannelsOpening,
    Open,
    Closed,
}

/// Negotiation driver wrapped around a connection backend
///
/// Outgoing signaling is queued and drained with [`SignalingPeer::poll_outgoing`].
/// Local candidates gathered before our own description went out are held
/// back, since the remote side would drop them anyway.
pub struct SignalingPeer<B> {
    backend: B,
    role: Role,
    state: NegotiationState,
    has_remote_description: bool,
    local_description_sent: bool,
    held_candidates: Vec<String>,
    outgoing: VecDeque<SignalMessage>,
}

impl<B: PeerBackend> SignalingPeer<B> {
    pub fn offerer(backend: B) -> Self {
        Self::with_role(backend, Role::Offerer)
    }

    pub fn answerer(backend: B) -> Self {
        Self::with_role(backend, Role::Answerer)
    }

    fn with_role(backend: B, role: Role) -> Self {
        Self {
            backend,
            role,
            state: NegotiationState::New,
            has_remote_description: false,
            local_description_sent: false,
            held_candidates: Vec::new(),
            outgoing: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Offerer only: create both channels and queue the offer
    pub fn start(&mut self) {
        if self.role != Role::Offerer || self.state != NegotiationState::New {
            warn!(state = ?self.state, role = ?self.role, "Ignoring start outside of a fresh offerer");
            return;
        }
        self.state = NegotiationState::Offering;
        match self.backend.create_offer() {
            Ok(offer) => {
                self.outgoing.push_back(SignalMessage::Offer { offer });
                self.state = NegotiationState::AwaitingAnswer;
                self.local_description_sent = true;
                self.release_held_candidates();
            }
            Err(e) => {
                warn!("Failed to create offer: {}", e);
                self.state = NegotiationState::Closed;
            }
        }
    }

    pub fn handle_signal(&mut self, message: SignalMessage) {
        if self.state == NegotiationState::Closed {
            debug!(kind = message.name(), "Dropping signal for closed peer");
            return;
        }
        match message {
            SignalMessage::Offer { offer } => self.handle_offer(offer),
            SignalMessage::Answer { answer } => self.handle_answer(answer),
            SignalMessage::Candidate { candidate } => self.handle_candidate(candidate),
            SignalMessage::Connect => {
                warn!(state = ?self.state, "Unexpected connect for an existing peer");
            }
            SignalMessage::Unknown => {
                warn!("Dropping unknown signaling message");
            }
        }
    }

    fn handle_offer(&mut self, offer: SessionDescription) {
        if self.role != Role::Answerer || self.state != NegotiationState::New {
            warn!(state = ?self.state, role = ?self.role, "Ignoring unexpected offer");
            return;
        }
        self.state = NegotiationState::Answering;
        match self.backend.accept_offer(&offer) {
            Ok(answer) => {
                self.has_remote_description = true;
                self.outgoing.push_back(SignalMessage::Answer { answer });
                self.state = NegotiationState::CandidateExchange;
                self.local_description_sent = true;
                self.release_held_candidates();
            }
            Err(e) => {
                warn!("Rejected remote offer: {}", e);
                self.state = NegotiationState::New;
            }
        }
    }

    fn handle_answer(&mut self, answer: SessionDescription) {
        if self.role != Role::Offerer || self.state != NegotiationState::AwaitingAnswer {
            warn!(state = ?self.state, role = ?self.role, "Ignoring unexpected answer");
            return;
        }
        match self.backend.accept_answer(&answer) {
            Ok(()) => {
                self.has_remote_description = true;
                self.state = NegotiationState::CandidateExchange;
            }
            Err(e) => warn!("Rejected remote answer: {}", e),
        }
    }

    fn handle_candidate(&mut self, candidate: String) {
        if candidate.is_empty() {
            debug!("Remote end of candidates");
            return;
        }
        if !self.has_remote_description {
            warn!(state = ?self.state, "Dropping candidate received before remote description");
            return;
        }
        if let Err(e) = self.backend.add_remote_candidate(&candidate) {
            warn!("Failed to add remote candidate: {}", e);
        }
    }

    /// Forward a locally gathered candidate; empty means gathering finished
    pub fn local_candidate(&mut self, candidate: String) {
        if self.state == NegotiationState::Closed {
            return;
        }
        if self.local_description_sent {
            self.outgoing.push_back(SignalMessage::Candidate { candidate });
        } else {
            self.held_candidates.push(candidate);
        }
    }

    fn release_held_candidates(&mut self) {
        for candidate in self.held_candidates.drain(..) {
            self.outgoing.push_back(SignalMessage::Candidate { candidate });
        }
    }

    /// A data channel opened; `all_open` when both are up
    pub fn channel_opened(&mut self, all_open: bool) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.state = if all_open {
            NegotiationState::Open
        } else {
            NegotiationState::ChannelsOpening
        };
    }

    pub fn close(&mut self) {
        if self.state != NegotiationState::Closed {
            self.state = NegotiationState::Closed;
            self.held_candidates.clear();
            self.outgoing.clear();
            self.backend.close();
        }
    }

    pub fn poll_outgoing(&mut self) -> Option<SignalMessage> {
        self.outgoing.pop_front()
    }
}
