//! Timer command contract
//!
//! The timer/state machine lives outside this crate. It is reached through a
//! [`CommandSink`], which both the command listener and rule scripts use.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Commands understood by the timer state machine. The discriminant is the
/// byte carried by the command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Quit = 0,
    New = 1,
    Load = 2,
    Edit = 3,
    Cancel = 4,
    Submit = 5,
    Close = 6,
    Reset = 7,
    Save = 8,
    Split = 9,
    Undo = 10,
    Skip = 11,
    Pause = 12,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            0 => Command::Quit,
            1 => Command::New,
            2 => Command::Load,
            3 => Command::Edit,
            4 => Command::Cancel,
            5 => Command::Submit,
            6 => Command::Close,
            7 => Command::Reset,
            8 => Command::Save,
            9 => Command::Split,
            10 => Command::Undo,
            11 => Command::Skip,
            12 => Command::Pause,
            _ => return None,
        };
        Some(command)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reply from the timer. A code greater than zero means the command was refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReply {
    pub code: i32,
    pub message: String,
}

impl DispatchReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn refused(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code <= 0
    }
}

/// Receiver of timer commands
pub trait CommandSink: Send + Sync {
    fn dispatch(&self, command: Command, payload: Option<String>) -> Result<DispatchReply>;

    /// A command byte outside [`Command`]. Refused unless the timer knows it.
    fn dispatch_unknown(&self, byte: u8, _payload: Option<String>) -> Result<DispatchReply> {
        Ok(DispatchReply::refused(1, format!("unknown command byte {}", byte)))
    }
}

impl<F> CommandSink for F
where
    F: Fn(Command, Option<String>) -> Result<DispatchReply> + Send + Sync,
{
    fn dispatch(&self, command: Command, payload: Option<String>) -> Result<DispatchReply> {
        self(command, payload)
    }
}
