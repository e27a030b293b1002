//! Typed value table
//!
//! Last-known value of every fact, one map per value kind. A record id may hold
//! a value in more than one kind; the maps are independent.
//!
//! All three maps sit behind one lock. A listener applies a whole packet through
//! a single [`ValueBatch`] and must drop it before running any rule callback.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::protocol::{FactValue, RecordId, ValueKind};
use crate::{AutosplitterError, Result};

/// A fact whose stored value changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueChange {
    pub id: RecordId,
    /// Previous value; the zero value of the kind if the fact was never set
    pub old: FactValue,
    pub new: FactValue,
}

impl ValueChange {
    pub fn kind(&self) -> ValueKind {
        self.new.kind()
    }
}

#[derive(Debug, Default)]
struct Stores {
    signed: HashMap<RecordId, i64>,
    unsigned: HashMap<RecordId, u64>,
    boolean: HashMap<RecordId, bool>,
}

impl Stores {
    fn set(&mut self, id: RecordId, value: FactValue) -> Option<ValueChange> {
        let old = match value {
            FactValue::Signed(new) => FactValue::Signed(self.signed.insert(id, new).unwrap_or(0)),
            FactValue::Unsigned(new) => {
                FactValue::Unsigned(self.unsigned.insert(id, new).unwrap_or(0))
            }
            FactValue::Boolean(new) => {
                FactValue::Boolean(self.boolean.insert(id, new).unwrap_or(false))
            }
        };

        if old == value {
            return None;
        }

        log::trace!("fact {} changed: {:?} -> {:?}", id, old, value);
        Some(ValueChange { id, old, new: value })
    }
}

/// Last-known fact values, shared between the fact listener and readers
#[derive(Debug, Default)]
pub struct ValueTable {
    stores: Mutex<Stores>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one value, returning the change if it differs from the current one
    pub fn set_value(&self, id: RecordId, value: FactValue) -> Option<ValueChange> {
        self.stores.lock().set(id, value)
    }

    /// Take the lock for a batch of writes
    pub fn batch(&self) -> ValueBatch<'_> {
        ValueBatch {
            stores: self.stores.lock(),
        }
    }

    pub fn get_signed(&self, id: &RecordId) -> Option<i64> {
        self.stores.lock().signed.get(id).copied()
    }

    pub fn get_unsigned(&self, id: &RecordId) -> Option<u64> {
        self.stores.lock().unsigned.get(id).copied()
    }

    pub fn get_bool(&self, id: &RecordId) -> Option<bool> {
        self.stores.lock().boolean.get(id).copied()
    }

    /// Get a value of the given kind
    pub fn get(&self, id: &RecordId, kind: ValueKind) -> Option<FactValue> {
        let stores = self.stores.lock();
        match kind {
            ValueKind::Signed => stores.signed.get(id).copied().map(FactValue::Signed),
            ValueKind::Unsigned => stores.unsigned.get(id).copied().map(FactValue::Unsigned),
            ValueKind::Boolean => stores.boolean.get(id).copied().map(FactValue::Boolean),
        }
    }

    /// Number of stored values across all kinds
    pub fn len(&self) -> usize {
        let stores = self.stores.lock();
        stores.signed.len() + stores.unsigned.len() + stores.boolean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored value, keyed by display name.
    ///
    /// Ids that share a display name within one kind (`HP` padded with NULs
    /// and `HP` padded with spaces) are keyed by [`RecordId::escaped`] instead.
    pub fn snapshot(&self) -> ValueSnapshot {
        let stores = self.stores.lock();
        ValueSnapshot {
            signed: snapshot_keys(&stores.signed),
            unsigned: snapshot_keys(&stores.unsigned),
            boolean: snapshot_keys(&stores.boolean),
        }
    }
}

fn snapshot_keys<V: Copy>(store: &HashMap<RecordId, V>) -> BTreeMap<String, V> {
    let mut names: HashMap<String, usize> = HashMap::new();
    for id in store.keys() {
        *names.entry(id.name()).or_default() += 1;
    }

    store
        .iter()
        .map(|(id, value)| {
            let name = id.name();
            let key = if names.get(&name).copied().unwrap_or(0) > 1 {
                id.escaped()
            } else {
                name
            };
            (key, *value)
        })
        .collect()
}

/// Holds the table lock while a packet's records are applied
pub struct ValueBatch<'a> {
    stores: MutexGuard<'a, Stores>,
}

impl ValueBatch<'_> {
    pub fn set_value(&mut self, id: RecordId, value: FactValue) -> Option<ValueChange> {
        self.stores.set(id, value)
    }
}

/// Serializable view of the table for diagnostics and UI binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub signed: BTreeMap<String, i64>,
    pub unsigned: BTreeMap<String, u64>,
    pub boolean: BTreeMap<String, bool>,
}

impl ValueSnapshot {
    /// Pretty-printed JSON, as written to debug dumps
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AutosplitterError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> RecordId {
        RecordId::new(name).unwrap()
    }

    #[test]
    fn test_first_write_diffs_against_zero() {
        let table = ValueTable::new();
        let change = table.set_value(id("STAGE"), FactValue::Unsigned(2)).unwrap();
        assert_eq!(change.old, FactValue::Unsigned(0));
        assert_eq!(change.new, FactValue::Unsigned(2));
        assert_eq!(change.kind(), ValueKind::Unsigned);
        assert_eq!(table.get_unsigned(&id("STAGE")), Some(2));
    }

    #[test]
    fn test_first_zero_write_is_stored_without_change() {
        let table = ValueTable::new();
        assert!(table.set_value(id("LIVES"), FactValue::Signed(0)).is_none());
        assert_eq!(table.get_signed(&id("LIVES")), Some(0));
    }

    #[test]
    fn test_identical_write_produces_no_change() {
        let table = ValueTable::new();
        assert!(table.set_value(id("DOOR"), FactValue::Boolean(true)).is_some());
        assert!(table.set_value(id("DOOR"), FactValue::Boolean(true)).is_none());
        let change = table.set_value(id("DOOR"), FactValue::Boolean(false)).unwrap();
        assert_eq!(change.old, FactValue::Boolean(true));
    }

    #[test]
    fn test_kinds_are_independent() {
        let table = ValueTable::new();
        table.set_value(id("X"), FactValue::Signed(-5));
        table.set_value(id("X"), FactValue::Unsigned(5));
        table.set_value(id("X"), FactValue::Boolean(true));

        assert_eq!(table.get_signed(&id("X")), Some(-5));
        assert_eq!(table.get_unsigned(&id("X")), Some(5));
        assert_eq!(table.get_bool(&id("X")), Some(true));
        assert_eq!(table.get(&id("X"), ValueKind::Signed), Some(FactValue::Signed(-5)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_unset_values_absent() {
        let table = ValueTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_bool(&id("NOPE")), None);
        assert_eq!(table.get(&id("NOPE"), ValueKind::Unsigned), None);
    }

    #[test]
    fn test_batch_applies_in_order() {
        let table = ValueTable::new();
        let mut changes = Vec::new();
        {
            let mut batch = table.batch();
            for v in [1, 3, 3, 2] {
                if let Some(change) = batch.set_value(id("HP"), FactValue::Signed(v)) {
                    changes.push(change);
                }
            }
        }

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].old, FactValue::Signed(1));
        assert_eq!(changes[2].new, FactValue::Signed(2));
        assert_eq!(table.get_signed(&id("HP")), Some(2));
    }

    #[test]
    fn test_snapshot_keeps_ids_sharing_a_name() {
        let table = ValueTable::new();
        let nul = RecordId::from_bytes(*b"HP\0\0\0\0\0\0");
        let space = RecordId::from_bytes(*b"HP      ");
        table.set_value(nul, FactValue::Signed(1));
        table.set_value(space, FactValue::Signed(2));
        table.set_value(id("MP"), FactValue::Signed(3));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.signed.len(), table.len());
        assert_eq!(snapshot.signed.get(&nul.escaped()), Some(&1));
        assert_eq!(snapshot.signed.get("HP      "), Some(&2));
        assert_eq!(snapshot.signed.get("MP"), Some(&3));
        assert!(!snapshot.signed.contains_key("HP"));
    }

    #[test]
    fn test_snapshot_collisions_are_per_kind() {
        let table = ValueTable::new();
        table.set_value(RecordId::from_bytes(*b"X       "), FactValue::Signed(1));
        table.set_value(id("X"), FactValue::Unsigned(2));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.signed.get("X"), Some(&1));
        assert_eq!(snapshot.unsigned.get("X"), Some(&2));
    }

    #[test]
    fn test_snapshot_serializes_trimmed_names() {
        let table = ValueTable::new();
        table.set_value(id("STAGE"), FactValue::Unsigned(4));
        table.set_value(RecordId::from_bytes(*b"BOSS    "), FactValue::Boolean(true));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.unsigned.get("STAGE"), Some(&4));
        assert_eq!(snapshot.boolean.get("BOSS"), Some(&true));

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"STAGE\": 4"));
        let parsed: ValueSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
