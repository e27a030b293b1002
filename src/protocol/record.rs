//! Record identifiers and typed fact values

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AutosplitterError, Result};

/// Size of a record id on the wire
pub const RECORD_ID_LEN: usize = 8;

/// 8-byte ASCII fact name, right-padded with NUL or space.
///
/// Compared byte-for-byte, so `"HP\0\0\0\0\0\0"` and `"HP      "` are distinct
/// keys even though both display as `HP`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; RECORD_ID_LEN]);

impl RecordId {
    /// Wrap raw wire bytes
    pub const fn from_bytes(bytes: [u8; RECORD_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an id from a short ASCII name, NUL-padded
    pub fn new(name: &str) -> Result<Self> {
        if name.len() > RECORD_ID_LEN || !name.is_ascii() {
            return Err(AutosplitterError::InvalidRecordId(name.to_string()));
        }
        let mut bytes = [0u8; RECORD_ID_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_ID_LEN] {
        &self.0
    }

    /// Name with trailing NUL/space padding removed
    pub fn name(&self) -> String {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0 && *b != b' ')
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    /// All eight bytes, non-printable ones escaped (`HP\x00\x00\x00\x00\x00\x00`)
    pub fn escaped(&self) -> String {
        self.0.escape_ascii().to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({:?})", self.name())
    }
}

/// Kind of value a fact carries. Discriminants match the TLV record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    Signed = 0,
    Unsigned = 1,
    Boolean = 2,
}

impl ValueKind {
    pub fn from_tlv_kind(kind: u8) -> Option<Self> {
        match kind {
            0 => Some(ValueKind::Signed),
            1 => Some(ValueKind::Unsigned),
            2 => Some(ValueKind::Boolean),
            _ => None,
        }
    }

    /// Required TLV value length for this kind
    pub const fn tlv_len(self) -> usize {
        match self {
            ValueKind::Signed | ValueKind::Unsigned => RECORD_ID_LEN + 8,
            ValueKind::Boolean => RECORD_ID_LEN + 1,
        }
    }
}

/// A decoded fact value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactValue {
    Signed(i64),
    Unsigned(u64),
    Boolean(bool),
}

impl FactValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FactValue::Signed(_) => ValueKind::Signed,
            FactValue::Unsigned(_) => ValueKind::Unsigned,
            FactValue::Boolean(_) => ValueKind::Boolean,
        }
    }
}
