// Open/closed tracking for the reliable + unreliable channel pair

use super::ChannelKind;

/// Connectivity transition produced by a channel state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

/// Tracks both channels of one peer
///
/// The pair counts as connected only while both channels are open. Each
/// transition is reported exactly once: `Connected` when the second channel
/// opens, `Disconnected` when the first channel closes afterwards. Once any
/// channel has closed the pair is finished and later opens are ignored.
#[derive(Debug, Default, Clone)]
pub struct DualChannel {
    reliable_open: bool,
    unreliable_open: bool,
    connected: bool,
    finished: bool,
}

impl DualChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_open(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Reliable => self.reliable_open,
            ChannelKind::Unreliable => self.unreliable_open,
        }
    }

    /// Whether a channel has closed; the pair will not connect again
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn open(&mut self, kind: ChannelKind) -> Option<Connectivity> {
        if self.finished {
            return None;
        }
        match kind {
            ChannelKind::Reliable => self.reliable_open = true,
            ChannelKind::Unreliable => self.unreliable_open = true,
        }
        if self.reliable_open && self.unreliable_open && !self.connected {
            self.connected = true;
            return Some(Connectivity::Connected);
        }
        None
    }

    pub fn close(&mut self, kind: ChannelKind) -> Option<Connectivity> {
        match kind {
            ChannelKind::Reliable => self.reliable_open = false,
            ChannelKind::Unreliable => self.unreliable_open = false,
        }
        self.finished = true;
        if self.connected {
            self.connected = false;
            return Some(Connectivity::Disconnected);
        }
        None
    }

    /// Close both channels at once (connection-level failure)
    pub fn close_all(&mut self) -> Option<Connectivity> {
        let first = self.close(ChannelKind::Reliable);
        let second = self.close(ChannelKind::Unreliable);
        first.or(second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_once_reliable_first() {
        let mut pair = DualChannel::new();
        assert_eq!(pair.open(ChannelKind::Reliable), None);
        assert!(!pair.is_connected());
        assert_eq!(pair.open(ChannelKind::Unreliable), Some(Connectivity::Connected));
        assert!(pair.is_connected());
    }

    #[test]
    fn test_connected_once_unreliable_first() {
        let mut pair = DualChannel::new();
        assert_eq!(pair.open(ChannelKind::Unreliable), None);
        assert_eq!(pair.open(ChannelKind::Reliable), Some(Connectivity::Connected));
        // duplicate open notifications do not re-fire
        assert_eq!(pair.open(ChannelKind::Reliable), None);
        assert_eq!(pair.open(ChannelKind::Unreliable), None);
    }

    #[test]
    fn test_disconnected_once_not_per_channel() {
        let mut pair = DualChannel::new();
        pair.open(ChannelKind::Reliable);
        pair.open(ChannelKind::Unreliable);

        assert_eq!(pair.close(ChannelKind::Unreliable), Some(Connectivity::Disconnected));
        assert!(!pair.is_connected());
        assert_eq!(pair.close(ChannelKind::Reliable), None);
        assert!(pair.is_finished());
    }

    #[test]
    fn test_close_before_connect_reports_nothing() {
        let mut pair = DualChannel::new();
        pair.open(ChannelKind::Reliable);
        assert_eq!(pair.close(ChannelKind::Reliable), None);
        assert!(pair.is_finished());
        // a late open cannot revive the pair
        assert_eq!(pair.open(ChannelKind::Reliable), None);
        assert_eq!(pair.open(ChannelKind::Unreliable), None);
        assert!(!pair.is_connected());
    }

    #[test]
    fn test_close_all_reports_once() {
        let mut pair = DualChannel::new();
        pair.open(ChannelKind::Reliable);
        pair.open(ChannelKind::Unreliable);
        assert_eq!(pair.close_all(), Some(Connectivity::Disconnected));
        assert_eq!(pair.close_all(), None);
    }
}
