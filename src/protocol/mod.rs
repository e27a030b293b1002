//! Wire protocols
//!
//! Two datagram formats share this module:
//!
//! - **Fact Protocol** (`OSFF`): header, TLV records, optional trailing CRC32
//! - **Command Protocol** (`OSRC`): fixed 7-byte frame carrying one command byte
//!
//! Decoding never panics. Every rejection is a [`FrameError`], which knows the
//! acknowledgement status (if any) to send back to the producer.

pub mod command;
pub mod fact;
mod record;

pub use command::{
    decode_command_ack, encode_command_ack, encode_command_frame, CommandAck, CommandFrame,
    CommandStatus, COMMAND_FRAME_LEN, COMMAND_MAGIC,
};
pub use fact::{
    decode_fact_ack, decode_fact_frame, encode_fact_ack, FactAck, FactFlags, FactFrame,
    FactFrameBuilder, FactHeader, FactRecord, FactStatus, TlvRecords, FACT_ACK_LEN, FACT_MAGIC,
    FACT_HEADER_LEN,
};
pub use record::{FactValue, RecordId, ValueKind, RECORD_ID_LEN};

/// Only protocol version understood by both formats
pub const PROTOCOL_VERSION: u8 = 1;

/// Record marker placed in every acknowledgement frame
pub const ACK_RECORD_MARKER: u8 = 0x80;

/// Reasons a datagram (or part of one) was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("truncated header: {len} bytes")]
    TruncatedHeader { len: usize },

    #[error("invalid magic header")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("crc flag set but packet too short: {len} bytes")]
    CrcTruncated { len: usize },

    #[error("CRC mismatch (got {computed:08x}, expected {expected:08x})")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("malformed TLV at offset {offset}: {reason}")]
    MalformedTlv { offset: usize, reason: &'static str },

    #[error("command frame must be {expected} bytes, got {len}")]
    WrongLength { expected: usize, len: usize },

    #[error("not an acknowledgement frame")]
    NotAnAck,
}

impl FrameError {
    /// Fact acknowledgement status for this error.
    ///
    /// `None` means the frame was not trustworthy enough to answer.
    pub fn fact_status(&self) -> Option<FactStatus> {
        match self {
            FrameError::UnsupportedVersion(_) => Some(FactStatus::UnsupportedVersion),
            FrameError::CrcMismatch { .. } => Some(FactStatus::CrcMismatch),
            FrameError::MalformedTlv { .. } => Some(FactStatus::MalformedTlv),
            FrameError::CrcTruncated { .. } => Some(FactStatus::CrcTruncated),
            _ => None,
        }
    }

    /// Command acknowledgement status for this error
    pub fn command_status(&self) -> Option<CommandStatus> {
        match self {
            FrameError::UnsupportedVersion(_) => Some(CommandStatus::UnsupportedVersion),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_status_mapping() {
        assert_eq!(
            FrameError::UnsupportedVersion(2).fact_status(),
            Some(FactStatus::UnsupportedVersion)
        );
        assert_eq!(
            FrameError::CrcMismatch { expected: 0, computed: 1 }.fact_status(),
            Some(FactStatus::CrcMismatch)
        );
        assert_eq!(
            FrameError::CrcTruncated { len: 12 }.fact_status(),
            Some(FactStatus::CrcTruncated)
        );
        assert_eq!(FrameError::InvalidMagic.fact_status(), None);
        assert_eq!(FrameError::TruncatedHeader { len: 3 }.fact_status(), None);
    }

    #[test]
    fn test_command_status_mapping() {
        assert_eq!(
            FrameError::UnsupportedVersion(9).command_status(),
            Some(CommandStatus::UnsupportedVersion)
        );
        assert_eq!(FrameError::WrongLength { expected: 7, len: 6 }.command_status(), None);
    }
}
