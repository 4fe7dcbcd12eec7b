// Binary formats carried on the unreliable channel
//
// Everything is a sequence of little-endian u16 words:
//   snapshot (server -> client): [seqLow, seqHigh, repeated(id, x, y, type, controlBits)]
//   state report (client -> server): [x, y, controlBits]

use thiserror::Error;

use super::entity::{Controls, Entity, EntityId};

const WORD: usize = 2;
const RECORD_WORDS: usize = 5;
const REPORT_WORDS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload length {0} is not a whole number of 16-bit words")]
    OddLength(usize),
    #[error("snapshot is missing its sequence header")]
    MissingHeader,
    #[error("snapshot body of {0} words is not a whole number of entity records")]
    TruncatedRecord(usize),
    #[error("state report must be exactly 3 words, got {0}")]
    ReportLength(usize),
    #[error("sequence {value} exceeds ceiling {ceiling}")]
    SequenceOutOfRange { value: u32, ceiling: u16 },
}

/// One entity as carried in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub x: u16,
    pub y: u16,
    pub kind: u16,
    pub controls: Controls,
}

impl EntityRecord {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            x: to_word(entity.x),
            y: to_word(entity.y),
            kind: entity.kind as u16,
            controls: entity.controls,
        }
    }
}

/// Full authoritative state for one server tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Raw counter value; interpreted against the configured ceiling by the receiver
    pub sequence: u32,
    pub records: Vec<EntityRecord>,
}

/// A client's report of its own entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateReport {
    pub x: u16,
    pub y: u16,
    pub controls: Controls,
}

impl StateReport {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            x: to_word(entity.x),
            y: to_word(entity.y),
            controls: entity.controls,
        }
    }
}

/// Floor a pixel coordinate into a transport word, saturating at the u16 range
pub fn to_word(value: f32) -> u16 {
    value.floor().clamp(0.0, u16::MAX as f32) as u16
}

fn words(bytes: &[u8]) -> Result<Vec<u16>, WireError> {
    if bytes.len() % WORD != 0 {
        return Err(WireError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(WORD)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn push_word(out: &mut Vec<u8>, word: u16) {
    out.extend_from_slice(&word.to_le_bytes());
}

impl Snapshot {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WORD * (2 + RECORD_WORDS * self.records.len()));
        push_word(&mut out, (self.sequence & 0xFFFF) as u16);
        push_word(&mut out, (self.sequence >> 16) as u16);
        for record in &self.records {
            push_word(&mut out, record.id);
            push_word(&mut out, record.x);
            push_word(&mut out, record.y);
            push_word(&mut out, record.kind);
            push_word(&mut out, record.controls.bits());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let words = words(bytes)?;
        if words.len() < 2 {
            return Err(WireError::MissingHeader);
        }
        let sequence = words[0] as u32 | (words[1] as u32) << 16;
        let body = &words[2..];
        if body.len() % RECORD_WORDS != 0 {
            return Err(WireError::TruncatedRecord(body.len()));
        }
        let records = body
            .chunks_exact(RECORD_WORDS)
            .map(|r| EntityRecord {
                id: r[0],
                x: r[1],
                y: r[2],
                kind: r[3],
                controls: Controls::from_bits(r[4]),
            })
            .collect();
        Ok(Self { sequence, records })
    }
}

impl StateReport {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WORD * REPORT_WORDS);
        push_word(&mut out, self.x);
        push_word(&mut out, self.y);
        push_word(&mut out, self.controls.bits());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let words = words(bytes)?;
        if words.len() != REPORT_WORDS {
            return Err(WireError::ReportLength(words.len()));
        }
        Ok(Self {
            x: words[0],
            y: words[1],
            controls: Controls::from_bits(words[2]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_word_layout() {
        let snapshot = Snapshot {
            sequence: 0x0001_0002,
            records: vec![EntityRecord {
                id: 7,
                x: 100,
                y: 300,
                kind: 2,
                controls: Controls { right: true, up: true, ..Default::default() },
            }],
        };
        let bytes = snapshot.encode();
        assert_eq!(
            bytes,
            vec![2, 0, 1, 0, 7, 0, 100, 0, 0x2C, 0x01, 2, 0, 0b0110, 0]
        );
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_empty_snapshot_is_header_only() {
        let bytes = Snapshot { sequence: 9, records: vec![] }.encode();
        assert_eq!(bytes.len(), 4);
        assert!(Snapshot::decode(&bytes).unwrap().records.is_empty());
    }

    #[test]
    fn test_malformed_snapshots() {
        assert_eq!(Snapshot::decode(&[1, 0, 0]), Err(WireError::OddLength(3)));
        assert_eq!(Snapshot::decode(&[1, 0]), Err(WireError::MissingHeader));
        assert_eq!(
            Snapshot::decode(&[1, 0, 0, 0, 7, 0, 1, 0]),
            Err(WireError::TruncatedRecord(2))
        );
    }

    #[test]
    fn test_state_report_floors_position() {
        let mut entity = Entity::new(3, 120.9, 64.2, 1);
        entity.controls.left = true;
        let report = StateReport::from_entity(&entity);
        assert_eq!((report.x, report.y), (120, 64));
        assert_eq!(report.encode(), vec![120, 0, 64, 0, 1, 0]);
    }

    #[test]
    fn test_state_report_length_checked() {
        assert_eq!(StateReport::decode(&[1, 0, 2, 0]), Err(WireError::ReportLength(2)));
    }

    #[test]
    fn test_to_word_saturates() {
        assert_eq!(to_word(-4.0), 0);
        assert_eq!(to_word(70_000.0), u16::MAX);
        assert_eq!(to_word(12.99), 12);
    }
}
