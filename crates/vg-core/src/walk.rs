//! Walker / deref (spec §4.3): conversion between host values and their
//! JSON-safe form, and structural equality over host values.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::host::{HostKey, HostKind, HostValue};
use crate::oid::ObjectId;
use crate::VarEnv;

/// Converts a host value into its JSON-safe form. Mutable [`HostValue::Object`]
/// values always become a `{"ref": OID}` record (optionally with `repr`
/// when `env.verbose_refs()` is set); `Tuple`/`Record` walk structurally.
pub fn walk(env: &mut VarEnv, value: &HostValue) -> Value {
    match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Number(n) => Value::Number(n.clone()),
        HostValue::String(s) => Value::String(s.clone()),
        HostValue::Tuple(items) => Value::Array(items.iter().map(|v| walk(env, v)).collect()),
        HostValue::Record(fields) => {
            let mut obj = Map::new();
            for (k, v) in fields {
                obj.insert(k.clone(), walk(env, v));
            }
            Value::Object(obj)
        }
        HostValue::Object(obj) => {
            let oid = env.oids_mut().oid_for(obj);
            if env.verbose_refs() {
                let repr = obj.read().map(|g| g.debug_repr()).unwrap_or_else(|_| "<poisoned>".into());
                json!({ "ref": oid.0, "repr": repr })
            } else {
                json!({ "ref": oid.0 })
            }
        }
        // Callables never occupy a value position directly; if one is
        // reached here it is the result of a misconfigured getter and we
        // degrade to null rather than panic.
        HostValue::Callable(_) => Value::Null,
    }
}

/// Reverses [`walk`]'s ref substitution: recursively converts inbound JSON
/// into host values, resolving any `{"ref": N}` node back to its live host
/// object. A stale or unknown OID resolves to `Null` (spec §6: "unknown/
/// stale OIDs resolve to null").
pub fn deref(env: &mut VarEnv, value: &Value) -> HostValue {
    match value {
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::Number(n.clone()),
        Value::String(s) => HostValue::String(s.clone()),
        Value::Array(items) => HostValue::Tuple(items.iter().map(|v| deref(env, v)).collect()),
        Value::Object(map) => {
            if let Some(resolved) = try_deref_ref(env, map) {
                return resolved;
            }
            HostValue::Record(map.iter().map(|(k, v)| (k.clone(), deref(env, v))).collect())
        }
    }
}

fn try_deref_ref(env: &mut VarEnv, map: &Map<String, Value>) -> Option<HostValue> {
    if map.is_empty() || map.len() > 2 {
        return None;
    }
    if !map.keys().all(|k| k == "ref" || k == "repr") {
        return None;
    }
    let oid = map.get("ref")?.as_u64()?;
    match env.oids_mut().resolve(ObjectId(oid)) {
        Some(obj) => Some(HostValue::Object(obj)),
        None => Some(HostValue::Null),
    }
}

fn identity_ptr(obj: &Arc<std::sync::RwLock<dyn crate::host::HostObject>>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// Structural equality over host values, per spec §4.2. Handles reference
/// cycles via a seen-set keyed on the pointer pair being compared.
pub fn is_same(a: &HostValue, b: &HostValue) -> bool {
    is_same_seen(a, b, &mut HashSet::new())
}

fn is_same_seen(a: &HostValue, b: &HostValue, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (HostValue::Null, HostValue::Null) => true,
        (HostValue::Bool(x), HostValue::Bool(y)) => x == y,
        (HostValue::Number(x), HostValue::Number(y)) => x == y,
        (HostValue::String(x), HostValue::String(y)) => x == y,
        (HostValue::Tuple(x), HostValue::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| is_same_seen(p, q, seen))
        }
        (HostValue::Record(x), HostValue::Record(y)) => {
            if x.len() != y.len() {
                return false;
            }
            x.iter().all(|(k, v)| {
                y.iter()
                    .find(|(k2, _)| k2 == k)
                    .map(|(_, v2)| is_same_seen(v, v2, seen))
                    .unwrap_or(false)
            })
        }
        (HostValue::Object(x), HostValue::Object(y)) => {
            let kx = identity_ptr(x);
            let ky = identity_ptr(y);
            if kx == ky {
                return true;
            }
            let pair = (kx.min(ky), kx.max(ky));
            if !seen.insert(pair) {
                // Already comparing this pair higher up the call stack;
                // treat as equal to let the recursion terminate on a cycle.
                return true;
            }
            let (Ok(xg), Ok(yg)) = (x.read(), y.read()) else {
                return false;
            };
            if xg.kind() != yg.kind() {
                return false;
            }
            let xe = xg.entries();
            let ye = yg.entries();
            if xe.len() != ye.len() {
                return false;
            }
            match xg.kind() {
                HostKind::Array => xe
                    .iter()
                    .zip(ye.iter())
                    .all(|((_, v1), (_, v2))| is_same_seen(v1, v2, seen)),
                HostKind::Dict => xe.iter().all(|(k, v)| match k {
                    HostKey::Name(n) => ye
                        .iter()
                        .find(|(k2, _)| matches!(k2, HostKey::Name(n2) if n2 == n))
                        .map(|(_, v2)| is_same_seen(v, v2, seen))
                        .unwrap_or(false),
                    HostKey::Index(_) => false,
                }),
            }
        }
        (HostValue::Callable(x), HostValue::Callable(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}
