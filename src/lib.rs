//! Fact Autosplitter
//!
//! Ingestion layer that lets an untrusted co-process drive a speedrun timer.
//! Producers report named facts (signed, unsigned or boolean values) over UDP;
//! any process can also send discrete timer commands on a second socket.
//!
//! ```text
//! datagram -> protocol (validate/parse) -> ValueTable (mutate, diff)
//!          -> Vec<ValueChange> -> RuleDispatcher -> RuleEngine callbacks
//! ```
//!
//! The command path is independent: datagram -> protocol -> `CommandSink`.
//!
//! This crate can be used as:
//! - A full service (`AutosplitService`) that binds both sockets on worker threads
//! - A set of building blocks (codec, table, processors) for custom transports

pub mod config;
pub mod dispatcher;
pub mod listener;
pub mod protocol;
pub mod rules;
pub mod service;
pub mod values;

#[cfg(feature = "rhai-scripting")]
pub mod engines;

// Re-export commonly used types
pub use config::{EngineLimits, IngestConfig};
pub use dispatcher::{Command, CommandSink, DispatchReply};
pub use listener::{CommandListener, CommandProcessor, FactListener, FactProcessor, ListenerHandle};
pub use protocol::{FactValue, FrameError, RecordId, ValueKind};
pub use rules::{RuleDispatcher, RuleEngine};
pub use service::AutosplitService;
pub use values::{ValueChange, ValueSnapshot, ValueTable};

#[cfg(feature = "rhai-scripting")]
pub use engines::rhai_engine::RhaiRuleEngine;

/// Errors surfaced by the autosplitter.
///
/// Per-packet problems never show up here while a listener is running; they are
/// answered with an acknowledgement status instead.
#[derive(Debug, thiserror::Error)]
pub enum AutosplitterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid record id: {0:?}")]
    InvalidRecordId(String),

    #[error("Command dispatch failed: {0}")]
    Dispatch(String),

    #[error("Autosplitter is already running")]
    AlreadyRunning,

    #[error("Autosplitter is not running")]
    NotRunning,
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AutosplitterError>;
