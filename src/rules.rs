//! Rule dispatch
//!
//! Classifies value changes and forwards them to a [`RuleEngine`]:
//!
//! - signed/unsigned: `new > old` is rising, anything else is falling
//! - boolean: always an edge carrying the new value

use parking_lot::Mutex;
use std::sync::Arc;

use crate::protocol::FactValue;
use crate::values::ValueChange;

/// User rule logic reacting to fact changes.
///
/// Every callback defaults to a no-op. Implementations must not panic or block
/// for long: they run on the fact listener thread before the next packet is read.
pub trait RuleEngine: Send + Sync {
    fn rising_signed(&self, _id: &str, _old: i64, _new: i64) {}

    fn falling_signed(&self, _id: &str, _old: i64, _new: i64) {}

    fn rising_unsigned(&self, _id: &str, _old: u64, _new: u64) {}

    fn falling_unsigned(&self, _id: &str, _old: u64, _new: u64) {}

    fn edge(&self, _id: &str, _new: bool) {}
}

/// Routes change batches to the rule engine
#[derive(Clone)]
pub struct RuleDispatcher {
    engine: Arc<dyn RuleEngine>,
}

impl RuleDispatcher {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self { engine }
    }

    /// Invoke callbacks for `changes` in arrival order
    pub fn dispatch(&self, changes: &[ValueChange]) {
        for change in changes {
            self.dispatch_one(change);
        }
    }

    fn dispatch_one(&self, change: &ValueChange) {
        let id = change.id.name();
        match (change.old, change.new) {
            (FactValue::Signed(old), FactValue::Signed(new)) => {
                if new > old {
                    self.engine.rising_signed(&id, old, new);
                } else {
                    self.engine.falling_signed(&id, old, new);
                }
            }
            (FactValue::Unsigned(old), FactValue::Unsigned(new)) => {
                if new > old {
                    self.engine.rising_unsigned(&id, old, new);
                } else {
                    self.engine.falling_unsigned(&id, old, new);
                }
            }
            (FactValue::Boolean(_), FactValue::Boolean(new)) => self.engine.edge(&id, new),
            (old, new) => {
                log::error!("change for {} mixes value kinds: {:?} -> {:?}", id, old, new);
            }
        }
    }
}

/// One callback invocation seen by a [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCall {
    RisingSigned { id: String, old: i64, new: i64 },
    FallingSigned { id: String, old: i64, new: i64 },
    RisingUnsigned { id: String, old: u64, new: u64 },
    FallingUnsigned { id: String, old: u64, new: u64 },
    Edge { id: String, new: bool },
}

/// Rule engine that records every invocation. Handy for tests and for
/// embedders that want to inspect what would have fired.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<RuleCall>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RuleCall> {
        self.calls.lock().clone()
    }

    /// Return and clear the recorded calls
    pub fn take(&self) -> Vec<RuleCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: RuleCall) {
        self.calls.lock().push(call);
    }
}

impl RuleEngine for RecordingEngine {
    fn rising_signed(&self, id: &str, old: i64, new: i64) {
        self.record(RuleCall::RisingSigned { id: id.to_string(), old, new });
    }

    fn falling_signed(&self, id: &str, old: i64, new: i64) {
        self.record(RuleCall::FallingSigned { id: id.to_string(), old, new });
    }

    fn rising_unsigned(&self, id: &str, old: u64, new: u64) {
        self.record(RuleCall::RisingUnsigned { id: id.to_string(), old, new });
    }

    fn falling_unsigned(&self, id: &str, old: u64, new: u64) {
        self.record(RuleCall::FallingUnsigned { id: id.to_string(), old, new });
    }

    fn edge(&self, id: &str, new: bool) {
        self.record(RuleCall::Edge { id: id.to_string(), new });
    }
}
