//! Object identity table: `OID -> weak host object` and the reverse pointer
//! index used to recover an already-assigned OID for an object seen again.
//!
//! Mirrors the spec's "monotone counter plus two tables, `OID -> WeakHandle`,
//! `Identity -> OID` with weak keys" design (see DESIGN.md, grounded on
//! `abp-runtime::registry` for the registry-table shape).

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::host::HostObject;

/// An integer handle identifying a mutable host object across JSON
/// serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

type HostHandle = Arc<RwLock<dyn HostObject>>;

/// `OID -> weak host object` plus a pointer-address index used to find the
/// OID already assigned to an object we're walking again.
#[derive(Default)]
pub struct OidTable {
    next: u64,
    by_oid: HashMap<u64, Weak<RwLock<dyn HostObject>>>,
    by_ptr: HashMap<usize, u64>,
}

fn identity_ptr(obj: &HostHandle) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

impl OidTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the OID for `obj`, allocating one on first sight. A dead
    /// weak entry at a reused address is replaced rather than trusted.
    pub fn oid_for(&mut self, obj: &HostHandle) -> ObjectId {
        let ptr = identity_ptr(obj);
        if let Some(&oid) = self.by_ptr.get(&ptr) {
            if let Some(weak) = self.by_oid.get(&oid) {
                if weak.strong_count() > 0 {
                    return ObjectId(oid);
                }
            }
        }
        let oid = self.next;
        self.next += 1;
        self.by_ptr.insert(ptr, oid);
        self.by_oid.insert(oid, Arc::downgrade(obj));
        ObjectId(oid)
    }

    /// Resolves an OID back to a live host object, or `None` if it is
    /// unknown or its target was collected.
    pub fn resolve(&mut self, oid: ObjectId) -> Option<HostHandle> {
        let weak = self.by_oid.get(&oid.0)?;
        match weak.upgrade() {
            Some(arc) => Some(arc),
            None => {
                self.by_oid.remove(&oid.0);
                None
            }
        }
    }

    /// Drops table entries whose target has been collected. Cheap
    /// maintenance call; not required for correctness since `resolve` and
    /// `oid_for` both self-heal on a dead entry.
    pub fn sweep(&mut self) {
        self.by_oid.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DynMap;

    fn handle() -> HostHandle {
        Arc::new(RwLock::new(DynMap::new()))
    }

    #[test]
    fn same_object_gets_same_oid() {
        let mut table = OidTable::new();
        let obj = handle();
        let a = table.oid_for(&obj);
        let b = table.oid_for(&obj);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_objects_get_distinct_oids() {
        let mut table = OidTable::new();
        let a = table.oid_for(&handle());
        let b = table.oid_for(&handle());
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_finds_live_object() {
        let mut table = OidTable::new();
        let obj = handle();
        let oid = table.oid_for(&obj);
        assert!(table.resolve(oid).is_some());
    }

    #[test]
    fn resolve_fails_after_object_dropped() {
        let mut table = OidTable::new();
        let oid = {
            let obj = handle();
            table.oid_for(&obj)
        };
        assert!(table.resolve(oid).is_none());
    }

    #[test]
    fn unknown_oid_resolves_to_none() {
        let mut table = OidTable::new();
        assert!(table.resolve(ObjectId(9999)).is_none());
    }

    #[test]
    fn sweep_drops_dead_entries() {
        let mut table = OidTable::new();
        {
            let obj = handle();
            table.oid_for(&obj);
        }
        table.sweep();
        assert!(table.is_empty());
    }
}
