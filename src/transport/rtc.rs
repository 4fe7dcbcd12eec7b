// str0m-backed peer connection
//
// One `Rtc` per remote peer; all of them share the runtime's UDP socket and
// incoming datagrams are routed to whichever instance accepts them.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use str0m::channel::{ChannelConfig, ChannelId, Reliability};
use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use super::peer::{BackendEvent, PeerBackend};
use super::server::BackendFactory;
use super::signaling::SessionDescription;
use super::{ChannelKind, Payload, PeerId, TransportError};

pub struct RtcBackend {
    rtc: Rtc,
    reliable: Option<ChannelId>,
    unreliable: Option<ChannelId>,
    pending_offer: Option<SdpPendingOffer>,
    retention_ms: u16,
    events: VecDeque<BackendEvent>,
    deadline: Option<Instant>,
    lost: bool,
}

impl RtcBackend {
    /// New connection advertising the given local candidates
    pub fn new(local_candidates: &[Candidate], retention_ms: u16) -> Self {
        let mut rtc = Rtc::builder().set_rtp_mode(false).build();
        let mut events = VecDeque::new();
        for candidate in local_candidates {
            if rtc.add_local_candidate(candidate.clone()).is_some() {
                events.push_back(BackendEvent::LocalCandidate(candidate.to_sdp_string()));
            } else {
                warn!(candidate = %candidate.to_sdp_string(), "Local candidate rejected");
            }
        }
        // all candidates are known up front
        events.push_back(BackendEvent::LocalCandidate(String::new()));

        Self {
            rtc,
            reliable: None,
            unreliable: None,
            pending_offer: None,
            retention_ms,
            events,
            deadline: None,
            lost: false,
        }
    }

    /// When str0m next wants a timeout input
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_alive(&self) -> bool {
        !self.lost && self.rtc.is_alive()
    }

    /// Offer a datagram; returns false when it belongs to another connection
    pub fn receive(
        &mut self,
        now: Instant,
        source: SocketAddr,
        destination: SocketAddr,
        bytes: &[u8],
    ) -> Result<bool, TransportError> {
        let contents = bytes
            .try_into()
            .map_err(|e| TransportError::Rtc(format!("unparseable datagram: {e}")))?;
        let input = Input::Receive(
            now,
            Receive {
                proto: Protocol::Udp,
                source,
                destination,
                contents,
            },
        );
        if !self.rtc.accepts(&input) {
            return Ok(false);
        }
        self.rtc
            .handle_input(input)
            .map_err(|e| TransportError::Rtc(e.to_string()))?;
        Ok(true)
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.deadline.is_some_and(|deadline| deadline > now) {
            return Ok(());
        }
        self.rtc
            .handle_input(Input::Timeout(now))
            .map_err(|e| TransportError::Rtc(e.to_string()))
    }

    /// Flush pending transmits onto the socket and collect what happened
    pub fn drive(&mut self, socket: &UdpSocket) -> Vec<BackendEvent> {
        while !self.lost {
            match self.rtc.poll_output() {
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = socket.try_send_to(&transmit.contents, transmit.destination) {
                        warn!(destination = %transmit.destination, "UDP send failed: {}", e);
                    } else {
                        trace!(bytes = transmit.contents.len(), destination = %transmit.destination, "UDP send");
                    }
                }
                Ok(Output::Timeout(deadline)) => {
                    self.deadline = Some(deadline);
                    break;
                }
                Ok(Output::Event(event)) => self.on_event(event),
                Err(e) => {
                    warn!("Peer connection error: {}", e);
                    self.mark_lost();
                }
            }
        }
        if !self.lost && !self.rtc.is_alive() {
            self.mark_lost();
        }
        self.events.drain(..).collect()
    }

    fn mark_lost(&mut self) {
        if !self.lost {
            self.lost = true;
            self.deadline = None;
            self.events.push_back(BackendEvent::ConnectionLost);
        }
    }

    fn kind_of(&self, id: ChannelId) -> Option<ChannelKind> {
        if self.reliable == Some(id) {
            Some(ChannelKind::Reliable)
        } else if self.unreliable == Some(id) {
            Some(ChannelKind::Unreliable)
        } else {
            None
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                debug!(?state, "ICE state");
                if state == IceConnectionState::Disconnected {
                    self.mark_lost();
                }
            }
            Event::ChannelOpen(id, label) => match ChannelKind::from_label(&label) {
                Some(ChannelKind::Reliable) => {
                    self.reliable = Some(id);
                    self.events
                        .push_back(BackendEvent::ChannelOpen(ChannelKind::Reliable));
                }
                Some(ChannelKind::Unreliable) => {
                    self.unreliable = Some(id);
                    self.events
                        .push_back(BackendEvent::ChannelOpen(ChannelKind::Unreliable));
                }
                None => warn!(%label, "Ignoring unexpected data channel"),
            },
            Event::ChannelData(data) => {
                let Some(kind) = self.kind_of(data.id) else {
                    debug!("Data on an unknown channel");
                    return;
                };
                let payload = if data.binary {
                    Payload::Binary(data.data)
                } else {
                    match String::from_utf8(data.data) {
                        Ok(text) => Payload::Text(text),
                        Err(_) => {
                            warn!(channel = kind.label(), "Dropping text message that is not UTF-8");
                            return;
                        }
                    }
                };
                self.events.push_back(BackendEvent::Data(kind, payload));
            }
            Event::ChannelClose(id) => {
                if let Some(kind) = self.kind_of(id) {
                    self.events.push_back(BackendEvent::ChannelClosed(kind));
                }
            }
            Event::Connected => debug!("DTLS connected"),
            _ => {}
        }
    }

    fn channel_config(&self, kind: ChannelKind) -> ChannelConfig {
        let (ordered, reliability) = match kind {
            ChannelKind::Reliable => (true, Reliability::Reliable),
            ChannelKind::Unreliable => (
                false,
                Reliability::MaxPacketLifetime {
                    lifetime: self.retention_ms,
                },
            ),
        };
        ChannelConfig {
            label: kind.label().to_string(),
            ordered,
            reliability,
            negotiated: None,
            protocol: String::new(),
        }
    }
}

impl PeerBackend for RtcBackend {
    fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        let reliable = self.channel_config(ChannelKind::Reliable);
        let unreliable = self.channel_config(ChannelKind::Unreliable);

        let mut change = self.rtc.sdp_api();
        let reliable_id = change.add_channel_with_config(reliable);
        let unreliable_id = change.add_channel_with_config(unreliable);
        let (offer, pending) = change
            .apply()
            .ok_or_else(|| TransportError::Negotiation("no changes to offer".to_string()))?;

        self.reliable = Some(reliable_id);
        self.unreliable = Some(unreliable_id);
        self.pending_offer = Some(pending);
        Ok(SessionDescription::offer(offer.to_sdp_string()))
    }

    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let offer = SdpOffer::from_sdp_string(&offer.sdp)
            .map_err(|e| TransportError::Negotiation(format!("bad offer: {e}")))?;
        let answer = self
            .rtc
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        Ok(SessionDescription::answer(answer.to_sdp_string()))
    }

    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), TransportError> {
        let pending = self
            .pending_offer
            .take()
            .ok_or_else(|| TransportError::Negotiation("no offer outstanding".to_string()))?;
        let answer = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| TransportError::Negotiation(format!("bad answer: {e}")))?;
        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| TransportError::Negotiation(e.to_string()))
    }

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), TransportError> {
        let line = candidate.strip_prefix("a=").unwrap_or(candidate);
        let candidate = Candidate::from_sdp_string(line)
            .map_err(|e| TransportError::InvalidCandidate(format!("{line}: {e}")))?;
        self.rtc.add_remote_candidate(candidate);
        Ok(())
    }

    fn send(&mut self, channel: ChannelKind, payload: &Payload) -> Result<(), TransportError> {
        let id = match channel {
            ChannelKind::Reliable => self.reliable,
            ChannelKind::Unreliable => self.unreliable,
        }
        .ok_or(TransportError::ChannelNotOpen(channel.label()))?;
        let mut handle = self
            .rtc
            .channel(id)
            .ok_or(TransportError::ChannelNotOpen(channel.label()))?;
        handle
            .write(payload.is_binary(), payload.as_bytes())
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) {
        self.rtc.disconnect();
        self.deadline = None;
    }
}

/// Builds str0m connections sharing one socket's candidates
pub struct RtcFactory {
    candidates: Vec<Candidate>,
    retention_ms: u16,
}

impl RtcFactory {
    pub fn new(candidates: Vec<Candidate>, retention_ms: u16) -> Self {
        Self {
            candidates,
            retention_ms,
        }
    }

    pub fn build(&self) -> RtcBackend {
        RtcBackend::new(&self.candidates, self.retention_ms)
    }
}

impl BackendFactory for RtcFactory {
    type Backend = RtcBackend;

    fn create(&mut self, peer: PeerId, name: &str) -> Result<RtcBackend, TransportError> {
        debug!(peer, %name, candidates = self.candidates.len(), "Creating peer connection");
        Ok(self.build())
    }
}
