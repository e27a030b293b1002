//! Command Protocol (`OSRC`)
//!
//! ```text
//! request: magic[4] | version(1) | ackRequested(1) | command(1)
//! ack:     magic[4] | version(1) | 0x80           | status(1)
//! ```

use super::{FrameError, ACK_RECORD_MARKER, PROTOCOL_VERSION};

pub const COMMAND_MAGIC: [u8; 4] = *b"OSRC";
pub const COMMAND_FRAME_LEN: usize = 7;

/// Acknowledgement status of a command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Ok = 0,
    UnsupportedVersion = 1,
    /// Command unknown, refused, or failed to dispatch
    Rejected = 2,
}

impl CommandStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CommandStatus::Ok),
            1 => Some(CommandStatus::UnsupportedVersion),
            2 => Some(CommandStatus::Rejected),
            _ => None,
        }
    }
}

/// A command frame that passed the length and magic checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub version: u8,
    pub ack_requested: bool,
    pub command: u8,
}

impl CommandFrame {
    /// Check length and magic. The version is checked by [`CommandFrame::validate`]
    /// so a failure ack can still be sent for a bad version.
    pub fn parse(packet: &[u8]) -> Result<Self, FrameError> {
        if packet.len() != COMMAND_FRAME_LEN {
            return Err(FrameError::WrongLength {
                expected: COMMAND_FRAME_LEN,
                len: packet.len(),
            });
        }
        if packet[..4] != COMMAND_MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        Ok(Self {
            version: packet[4],
            ack_requested: packet[5] == 1,
            command: packet[6],
        })
    }

    pub fn validate(self) -> Result<Self, FrameError> {
        if self.version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(self.version));
        }
        Ok(self)
    }
}

pub fn encode_command_frame(command: u8, ack_requested: bool) -> [u8; COMMAND_FRAME_LEN] {
    let mut buf = [0u8; COMMAND_FRAME_LEN];
    buf[..4].copy_from_slice(&COMMAND_MAGIC);
    buf[4] = PROTOCOL_VERSION;
    buf[5] = u8::from(ack_requested);
    buf[6] = command;
    buf
}

/// Decoded command acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub status: CommandStatus,
}

pub fn encode_command_ack(status: CommandStatus) -> [u8; COMMAND_FRAME_LEN] {
    let mut buf = [0u8; COMMAND_FRAME_LEN];
    buf[..4].copy_from_slice(&COMMAND_MAGIC);
    buf[4] = PROTOCOL_VERSION;
    buf[5] = ACK_RECORD_MARKER;
    buf[6] = status as u8;
    buf
}

pub fn decode_command_ack(packet: &[u8]) -> Result<CommandAck, FrameError> {
    let frame = CommandFrame::parse(packet)?.validate()?;
    if packet[5] != ACK_RECORD_MARKER {
        return Err(FrameError::NotAnAck);
    }
    let status = CommandStatus::from_byte(frame.command).ok_or(FrameError::NotAnAck)?;
    Ok(CommandAck { status })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_split_command() {
        let frame = CommandFrame::parse(b"OSRC\x01\x01\x09").unwrap().validate().unwrap();
        assert_eq!(
            frame,
            CommandFrame {
                version: 1,
                ack_requested: true,
                command: 9,
            }
        );
    }

    #[test]
    fn test_length_must_be_exact() {
        assert_eq!(
            CommandFrame::parse(b"OSRC\x01\x01").unwrap_err(),
            FrameError::WrongLength { expected: 7, len: 6 }
        );
        assert!(CommandFrame::parse(b"OSRC\x01\x01\x09\x00").is_err());
        assert!(CommandFrame::parse(b"").is_err());
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(
            CommandFrame::parse(b"OSFF\x01\x01\x09").unwrap_err(),
            FrameError::InvalidMagic
        );
    }

    #[test]
    fn test_bad_version_keeps_ack_flag() {
        let frame = CommandFrame::parse(b"OSRC\x02\x01\x09").unwrap();
        assert!(frame.ack_requested);
        assert_eq!(frame.validate().unwrap_err(), FrameError::UnsupportedVersion(2));
    }

    #[test]
    fn test_ack_flag_only_one() {
        let frame = CommandFrame::parse(b"OSRC\x01\x02\x09").unwrap();
        assert!(!frame.ack_requested);
    }

    #[test]
    fn test_ack_layout() {
        assert_eq!(&encode_command_ack(CommandStatus::Ok), b"OSRC\x01\x80\x00");
        assert_eq!(&encode_command_ack(CommandStatus::Rejected), b"OSRC\x01\x80\x02");
        assert_eq!(
            decode_command_ack(b"OSRC\x01\x80\x01").unwrap().status,
            CommandStatus::UnsupportedVersion
        );
        assert_eq!(
            decode_command_ack(&encode_command_frame(9, true)).unwrap_err(),
            FrameError::NotAnAck
        );
    }
}
