//! Fact Protocol (`OSFF`)
//!
//! ```text
//! magic[4] | version(1) | flags(1) | sequence(4, BE) | TLV* | [crc32(4, BE)]
//! TLV: kind(1) | length(2, BE) | value(length)
//! ```
//!
//! Decoding is split in two steps so a listener can still answer a frame whose
//! body is bad: [`FactHeader::parse`] only checks length and magic, then
//! [`FactFrame::validate`] checks version and CRC. TLV records are walked lazily
//! by [`TlvRecords`] so the caller decides what to do with records that precede
//! a malformed one.

use std::iter::FusedIterator;

use super::record::{FactValue, RecordId, ValueKind, RECORD_ID_LEN};
use super::{FrameError, ACK_RECORD_MARKER, PROTOCOL_VERSION};

pub const FACT_MAGIC: [u8; 4] = *b"OSFF";
pub const FACT_HEADER_LEN: usize = 10;
pub const FACT_ACK_LEN: usize = 14;

const CRC_LEN: usize = 4;
const TLV_HEADER_LEN: usize = 3;

/// Header flag bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FactFlags(u8);

impl FactFlags {
    pub const ACK_REQUESTED: FactFlags = FactFlags(1);
    pub const HAS_CRC32: FactFlags = FactFlags(1 << 1);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: FactFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: FactFlags) {
        self.0 |= flag.0;
    }
}

/// Acknowledgement status of a fact frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FactStatus {
    Ok = 0,
    UnsupportedVersion = 1,
    CrcMismatch = 2,
    /// One or more TLV records were malformed; earlier records were applied
    MalformedTlv = 3,
    CrcTruncated = 4,
}

impl FactStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FactStatus::Ok),
            1 => Some(FactStatus::UnsupportedVersion),
            2 => Some(FactStatus::CrcMismatch),
            3 => Some(FactStatus::MalformedTlv),
            4 => Some(FactStatus::CrcTruncated),
            _ => None,
        }
    }
}

/// Fixed part of a fact frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactHeader {
    pub version: u8,
    pub flags: FactFlags,
    /// Echoed in the ack, never checked for order or duplicates
    pub sequence: u32,
}

impl FactHeader {
    /// Check length and magic, then read the header fields
    pub fn parse(packet: &[u8]) -> Result<Self, FrameError> {
        if packet.len() < FACT_HEADER_LEN {
            return Err(FrameError::TruncatedHeader { len: packet.len() });
        }
        if packet[..4] != FACT_MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        Ok(Self {
            version: packet[4],
            flags: FactFlags::from_bits(packet[5]),
            sequence: u32::from_be_bytes([packet[6], packet[7], packet[8], packet[9]]),
        })
    }

    pub fn ack_requested(&self) -> bool {
        self.flags.contains(FactFlags::ACK_REQUESTED)
    }
}

/// A fact frame whose header, version and CRC have been validated
#[derive(Debug, Clone, Copy)]
pub struct FactFrame<'a> {
    pub header: FactHeader,
    payload: &'a [u8],
}

impl<'a> FactFrame<'a> {
    /// Validate version and integrity of `packet`, which `header` was parsed from
    pub fn validate(header: FactHeader, packet: &'a [u8]) -> Result<Self, FrameError> {
        if header.version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(header.version));
        }

        let mut end = packet.len();
        if header.flags.contains(FactFlags::HAS_CRC32) {
            if end < FACT_HEADER_LEN + CRC_LEN {
                return Err(FrameError::CrcTruncated { len: end });
            }
            end -= CRC_LEN;
            let expected = u32::from_be_bytes([
                packet[end],
                packet[end + 1],
                packet[end + 2],
                packet[end + 3],
            ]);
            let computed = crc32fast::hash(&packet[..end]);
            if computed != expected {
                return Err(FrameError::CrcMismatch { expected, computed });
            }
        }

        Ok(Self {
            header,
            payload: &packet[FACT_HEADER_LEN..end],
        })
    }

    /// TLV bytes between the header and the CRC (if any)
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn records(&self) -> TlvRecords<'a> {
        TlvRecords {
            payload: self.payload,
            pos: 0,
            failed: false,
        }
    }
}

/// Parse and validate a whole fact frame in one go
pub fn decode_fact_frame(packet: &[u8]) -> Result<FactFrame<'_>, FrameError> {
    let header = FactHeader::parse(packet)?;
    FactFrame::validate(header, packet)
}

/// One well-formed set-value record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactRecord {
    pub id: RecordId,
    pub value: FactValue,
}

/// Iterator over the TLV records of a frame.
///
/// Unknown record kinds are skipped. The first malformed record yields one
/// `Err` and ends the walk; records yielded before it stay valid.
#[derive(Debug, Clone)]
pub struct TlvRecords<'a> {
    payload: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> TlvRecords<'a> {
    fn fail(
        &mut self,
        offset: usize,
        reason: &'static str,
    ) -> Option<Result<FactRecord, FrameError>> {
        self.failed = true;
        Some(Err(FrameError::MalformedTlv {
            offset: FACT_HEADER_LEN + offset,
            reason,
        }))
    }
}

impl<'a> Iterator for TlvRecords<'a> {
    type Item = Result<FactRecord, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed || self.pos >= self.payload.len() {
                return None;
            }

            let start = self.pos;
            if start + TLV_HEADER_LEN > self.payload.len() {
                return self.fail(start, "truncated TLV header");
            }

            let kind = self.payload[start];
            let len =
                u16::from_be_bytes([self.payload[start + 1], self.payload[start + 2]]) as usize;
            let value_start = start + TLV_HEADER_LEN;
            if value_start + len > self.payload.len() {
                return self.fail(start, "truncated TLV value");
            }

            let value = &self.payload[value_start..value_start + len];
            self.pos = value_start + len;

            let Some(value_kind) = ValueKind::from_tlv_kind(kind) else {
                log::trace!("skipping unknown TLV kind {} ({} bytes)", kind, len);
                continue;
            };

            if len != value_kind.tlv_len() {
                return self.fail(start, "invalid TLV length for record kind");
            }

            return Some(Ok(decode_record(value_kind, value)));
        }
    }
}

impl FusedIterator for TlvRecords<'_> {}

/// `value` length has already been checked against the kind
fn decode_record(kind: ValueKind, value: &[u8]) -> FactRecord {
    let mut id = [0u8; RECORD_ID_LEN];
    id.copy_from_slice(&value[..RECORD_ID_LEN]);
    let body = &value[RECORD_ID_LEN..];

    let value = match kind {
        ValueKind::Signed => FactValue::Signed(i64::from_be_bytes(int_bytes(body))),
        ValueKind::Unsigned => FactValue::Unsigned(u64::from_be_bytes(int_bytes(body))),
        ValueKind::Boolean => FactValue::Boolean(body[0] != 0),
    };

    FactRecord {
        id: RecordId::from_bytes(id),
        value,
    }
}

fn int_bytes(body: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&body[..8]);
    raw
}

// =============================================================================
// ACKNOWLEDGEMENTS
// =============================================================================

/// Decoded fact acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactAck {
    pub sequence: u32,
    pub status: FactStatus,
}

pub fn encode_fact_ack(sequence: u32, status: FactStatus) -> [u8; FACT_ACK_LEN] {
    let mut buf = [0u8; FACT_ACK_LEN];
    buf[..4].copy_from_slice(&FACT_MAGIC);
    buf[4] = PROTOCOL_VERSION;
    buf[5] = 0; // flags
    buf[6..10].copy_from_slice(&sequence.to_be_bytes());
    buf[10] = ACK_RECORD_MARKER;
    buf[11..13].copy_from_slice(&1u16.to_be_bytes());
    buf[13] = status as u8;
    buf
}

pub fn decode_fact_ack(packet: &[u8]) -> Result<FactAck, FrameError> {
    let header = FactHeader::parse(packet)?;
    if header.version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(header.version));
    }
    if packet.len() != FACT_ACK_LEN
        || packet[10] != ACK_RECORD_MARKER
        || packet[11..13] != 1u16.to_be_bytes()
    {
        return Err(FrameError::NotAnAck);
    }
    let status = FactStatus::from_byte(packet[13]).ok_or(FrameError::NotAnAck)?;
    Ok(FactAck {
        sequence: header.sequence,
        status,
    })
}

// =============================================================================
// ENCODER
// =============================================================================

/// Builds fact frames, for producers and tests
#[derive(Debug, Clone)]
pub struct FactFrameBuilder {
    sequence: u32,
    flags: FactFlags,
    version: u8,
    body: Vec<u8>,
}

impl FactFrameBuilder {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            flags: FactFlags::default(),
            version: PROTOCOL_VERSION,
            body: Vec::new(),
        }
    }

    pub fn request_ack(mut self) -> Self {
        self.flags.insert(FactFlags::ACK_REQUESTED);
        self
    }

    /// Append a CRC32 trailer when building
    pub fn with_crc32(mut self) -> Self {
        self.flags.insert(FactFlags::HAS_CRC32);
        self
    }

    /// Override the version byte (only useful to exercise rejections)
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn signed(self, id: RecordId, value: i64) -> Self {
        self.record(ValueKind::Signed, id, &value.to_be_bytes())
    }

    pub fn unsigned(self, id: RecordId, value: u64) -> Self {
        self.record(ValueKind::Unsigned, id, &value.to_be_bytes())
    }

    pub fn boolean(self, id: RecordId, value: bool) -> Self {
        self.record(ValueKind::Boolean, id, &[u8::from(value)])
    }

    pub fn value(self, id: RecordId, value: FactValue) -> Self {
        match value {
            FactValue::Signed(v) => self.signed(id, v),
            FactValue::Unsigned(v) => self.unsigned(id, v),
            FactValue::Boolean(v) => self.boolean(id, v),
        }
    }

    fn record(self, kind: ValueKind, id: RecordId, body: &[u8]) -> Self {
        let mut value = Vec::with_capacity(RECORD_ID_LEN + body.len());
        value.extend_from_slice(id.as_bytes());
        value.extend_from_slice(body);
        let len = value.len() as u16;
        self.raw_record(kind as u8, len, &value)
    }

    /// Append a record verbatim; `declared_len` need not match `value`
    pub fn raw_record(mut self, kind: u8, declared_len: u16, value: &[u8]) -> Self {
        self.body.push(kind);
        self.body.extend_from_slice(&declared_len.to_be_bytes());
        self.body.extend_from_slice(value);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FACT_HEADER_LEN + self.body.len() + CRC_LEN);
        buf.extend_from_slice(&FACT_MAGIC);
        buf.push(self.version);
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.body);
        if self.flags.contains(FactFlags::HAS_CRC32) {
            let crc = crc32fast::hash(&buf);
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> RecordId {
        RecordId::new(name).unwrap()
    }

    #[test]
    fn test_decode_stage_example() {
        let mut packet = b"OSFF".to_vec();
        packet.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);
        packet.extend_from_slice(&[0x01, 0x00, 0x10]);
        packet.extend_from_slice(b"STAGE\0\0\0");
        packet.extend_from_slice(&2u64.to_be_bytes());

        let frame = decode_fact_frame(&packet).unwrap();
        assert_eq!(frame.header.sequence, 1);
        assert!(!frame.header.ack_requested());

        let records: Vec<_> = frame.records().collect();
        assert_eq!(
            records,
            vec![Ok(FactRecord {
                id: id("STAGE"),
                value: FactValue::Unsigned(2),
            })]
        );
    }

    #[test]
    fn test_truncation_boundary() {
        let packet = FactFrameBuilder::new(7).build();
        assert_eq!(packet.len(), FACT_HEADER_LEN);

        assert_eq!(
            decode_fact_frame(&packet[..9]).unwrap_err(),
            FrameError::TruncatedHeader { len: 9 }
        );

        let frame = decode_fact_frame(&packet).unwrap();
        assert!(frame.payload().is_empty());
        assert_eq!(frame.records().count(), 0);
    }

    #[test]
    fn test_invalid_magic() {
        let mut packet = FactFrameBuilder::new(0).build();
        packet[3] = b'X';
        assert_eq!(decode_fact_frame(&packet).unwrap_err(), FrameError::InvalidMagic);
    }

    #[test]
    fn test_unsupported_version_keeps_header() {
        let packet = FactFrameBuilder::new(42).request_ack().version(2).build();
        let header = FactHeader::parse(&packet).unwrap();
        assert_eq!(header.sequence, 42);
        assert!(header.ack_requested());

        let err = FactFrame::validate(header, &packet).unwrap_err();
        assert_eq!(err, FrameError::UnsupportedVersion(2));
        assert_eq!(err.fact_status(), Some(FactStatus::UnsupportedVersion));
    }

    #[test]
    fn test_crc_round_trip() {
        let packet = FactFrameBuilder::new(3)
            .with_crc32()
            .signed(id("HP"), -40)
            .boolean(id("BOSS"), true)
            .build();

        let frame = decode_fact_frame(&packet).unwrap();
        let records: Vec<_> = frame.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, FactValue::Signed(-40));
        assert_eq!(records[1].value, FactValue::Boolean(true));
    }

    #[test]
    fn test_crc_detects_any_payload_bit_flip() {
        let packet = FactFrameBuilder::new(3)
            .with_crc32()
            .unsigned(id("STAGE"), 0x0102_0304)
            .build();

        for byte in FACT_HEADER_LEN..packet.len() {
            for bit in 0..8 {
                let mut corrupted = packet.clone();
                corrupted[byte] ^= 1 << bit;
                let err = decode_fact_frame(&corrupted).unwrap_err();
                assert_eq!(
                    err.fact_status(),
                    Some(FactStatus::CrcMismatch),
                    "byte {} bit {}",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_crc_covers_header() {
        let mut packet = FactFrameBuilder::new(3).with_crc32().build();
        packet[7] ^= 0x10; // sequence byte
        assert!(matches!(
            decode_fact_frame(&packet).unwrap_err(),
            FrameError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_crc_flag_on_short_packet() {
        let mut packet = FactFrameBuilder::new(0).build();
        packet[5] = FactFlags::HAS_CRC32.bits();
        packet.extend_from_slice(&[0, 0, 0]);
        assert_eq!(
            decode_fact_frame(&packet).unwrap_err(),
            FrameError::CrcTruncated { len: 13 }
        );
    }

    #[test]
    fn test_unknown_kind_skipped() {
        let packet = FactFrameBuilder::new(0)
            .raw_record(99, 4, &[1, 2, 3, 4])
            .boolean(id("DOOR"), true)
            .build();

        let records: Vec<_> = decode_fact_frame(&packet).unwrap().records().collect();
        assert_eq!(
            records,
            vec![Ok(FactRecord {
                id: id("DOOR"),
                value: FactValue::Boolean(true),
            })]
        );
    }

    #[test]
    fn test_malformed_length_stops_walk() {
        let packet = FactFrameBuilder::new(0)
            .signed(id("A"), 1)
            .raw_record(ValueKind::Signed as u8, 9, &[0; 9])
            .signed(id("B"), 2)
            .build();

        let mut records = decode_fact_frame(&packet).unwrap().records();
        assert!(records.next().unwrap().is_ok());
        let err = records.next().unwrap().unwrap_err();
        assert_eq!(err.fact_status(), Some(FactStatus::MalformedTlv));
        assert!(records.next().is_none());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_length_past_payload_end() {
        let packet = FactFrameBuilder::new(0)
            .raw_record(ValueKind::Boolean as u8, 9, b"SHORT")
            .build();
        let records: Vec<_> = decode_fact_frame(&packet).unwrap().records().collect();
        assert_eq!(
            records,
            vec![Err(FrameError::MalformedTlv {
                offset: FACT_HEADER_LEN,
                reason: "truncated TLV value",
            })]
        );
    }

    #[test]
    fn test_truncated_tlv_header() {
        let mut packet = FactFrameBuilder::new(0).boolean(id("X"), false).build();
        packet.extend_from_slice(&[2, 0]);
        let records: Vec<_> = decode_fact_frame(&packet).unwrap().records().collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(records[1].is_err());
    }

    #[test]
    fn test_crc_trailer_not_parsed_as_tlv() {
        let packet = FactFrameBuilder::new(0).with_crc32().build();
        let frame = decode_fact_frame(&packet).unwrap();
        assert!(frame.payload().is_empty());
        assert_eq!(frame.records().count(), 0);
    }

    #[test]
    fn test_signed_twos_complement() {
        let packet = FactFrameBuilder::new(0).signed(id("NEG"), i64::MIN).build();
        let record = decode_fact_frame(&packet).unwrap().records().next().unwrap().unwrap();
        assert_eq!(record.value, FactValue::Signed(i64::MIN));
    }

    #[test]
    fn test_fact_ack_layout() {
        let ack = encode_fact_ack(0x0102_0304, FactStatus::MalformedTlv);
        assert_eq!(
            ack,
            [b'O', b'S', b'F', b'F', 1, 0, 1, 2, 3, 4, 0x80, 0, 1, 3]
        );
        assert_eq!(
            decode_fact_ack(&ack).unwrap(),
            FactAck {
                sequence: 0x0102_0304,
                status: FactStatus::MalformedTlv,
            }
        );
    }

    #[test]
    fn test_decode_fact_ack_rejects_data_frame() {
        let packet = FactFrameBuilder::new(0).boolean(id("X"), true).build();
        assert_eq!(decode_fact_ack(&packet).unwrap_err(), FrameError::NotAnAck);
    }

    #[test]
    fn test_garbage_never_panics() {
        let mut seed: u32 = 0x1234_5678;
        for len in 0..64 {
            let mut packet: Vec<u8> = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    (seed >> 16) as u8
                })
                .collect();
            if len >= 5 {
                packet[..4].copy_from_slice(&FACT_MAGIC);
                packet[4] = PROTOCOL_VERSION;
            }
            if let Ok(frame) = decode_fact_frame(&packet) {
                for _ in frame.records() {}
            }
        }
    }
}
