//! Host value model.
//!
//! The spec's "Dynamic host introspection" design note asks for a small
//! capability interface (`get_field`/`set_field`/`call`) standing in for the
//! source language's runtime reflection, with JSON-shaped dicts as the
//! default adapter. `HostObject` is that interface; [`DynMap`] and
//! [`DynList`] are the default adapters.
//!
//! `HostValue` separates immutable composite values (`Tuple`, `Record`,
//! walked element-wise or field-wise) from identity-bearing mutable objects
//! (`Object`, always walked to a `{ref: OID}`) — see DESIGN.md for why the
//! walker dispatches on this distinction rather than on shape.

use std::fmt;
use std::sync::{Arc, RwLock};

use vg_error::{ErrorCode, VgError};

/// A value reachable through the variable graph: either plain data or a
/// handle into live host state.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// An immutable, non-identity-bearing ordered sequence.
    Tuple(Vec<HostValue>),
    /// An immutable, non-identity-bearing keyed record.
    Record(Vec<(String, HostValue)>),
    /// A mutable, identity-bearing host object. Always walks to a ref.
    Object(Arc<RwLock<dyn HostObject>>),
    /// A getter/setter/action callable bound at this path step.
    Callable(Arc<dyn VarCallable>),
}

impl HostValue {
    pub fn string(s: impl Into<String>) -> Self {
        HostValue::String(s.into())
    }

    pub fn number(n: impl Into<serde_json::Number>) -> Self {
        HostValue::Number(n.into())
    }

    pub fn object(obj: impl HostObject + 'static) -> Self {
        HostValue::Object(Arc::new(RwLock::new(obj)))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Number(n) => write!(f, "Number({n})"),
            HostValue::String(s) => write!(f, "String({s:?})"),
            HostValue::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            HostValue::Record(fields) => f.debug_map().entries(fields.iter().map(|(k, v)| (k, v))).finish(),
            HostValue::Object(obj) => match obj.read() {
                Ok(guard) => write!(f, "Object({})", guard.debug_repr()),
                Err(_) => write!(f, "Object(<poisoned>)"),
            },
            HostValue::Callable(_) => write!(f, "Callable(<fn>)"),
        }
    }
}

/// The shape a value's natural JSON-ish kind falls into, used by adapters
/// to answer `entries()` and by `is_same` to decide comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Dict,
    Array,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKey {
    Name(String),
    Index(usize),
}

/// Capability interface standing in for the source runtime's field/index
/// reflection on a mutable host object.
pub trait HostObject: Send + Sync {
    fn kind(&self) -> HostKind;
    fn get_field(&self, name: &str) -> Option<HostValue>;
    fn set_field(&mut self, name: &str, value: HostValue) -> Result<(), VgError>;
    fn get_index(&self, index: usize) -> Option<HostValue>;
    fn set_index(&mut self, index: usize, value: HostValue) -> Result<(), VgError>;
    /// Appends to the end of an array-like object; used when `set_value`
    /// targets index `len + 1`.
    fn push(&mut self, value: HostValue) -> Result<(), VgError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Ordered (name-or-index, value) pairs, used by the walker and by
    /// `is_same` to compare two objects structurally.
    fn entries(&self) -> Vec<(HostKey, HostValue)>;
    fn debug_repr(&self) -> String {
        "<host object>".to_string()
    }
}

/// Default dict adapter over an ordered string-keyed map.
#[derive(Debug, Default)]
pub struct DynMap {
    fields: Vec<(String, HostValue)>,
}

impl DynMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: HostValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: HostValue) -> Self {
        self.insert(name, value);
        self
    }
}

impl HostObject for DynMap {
    fn kind(&self) -> HostKind {
        HostKind::Dict
    }

    fn get_field(&self, name: &str) -> Option<HostValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    fn set_field(&mut self, name: &str, value: HostValue) -> Result<(), VgError> {
        self.insert(name, value);
        Ok(())
    }

    fn get_index(&self, _index: usize) -> Option<HostValue> {
        None
    }

    fn set_index(&mut self, index: usize, _value: HostValue) -> Result<(), VgError> {
        Err(VgError::new(
            ErrorCode::PathStepUnresolved,
            format!("cannot index a dict-like object at [{index}]"),
        ))
    }

    fn push(&mut self, _value: HostValue) -> Result<(), VgError> {
        Err(VgError::new(
            ErrorCode::PathStepUnresolved,
            "cannot append to a dict-like object",
        ))
    }

    fn len(&self) -> usize {
        self.fields.len()
    }

    fn entries(&self) -> Vec<(HostKey, HostValue)> {
        self.fields
            .iter()
            .map(|(k, v)| (HostKey::Name(k.clone()), v.clone()))
            .collect()
    }

    fn debug_repr(&self) -> String {
        format!("DynMap({} fields)", self.fields.len())
    }
}

/// Default array adapter over a `Vec<HostValue>`.
#[derive(Debug, Default)]
pub struct DynList {
    items: Vec<HostValue>,
}

impl DynList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<HostValue>) -> Self {
        Self { items }
    }
}

impl HostObject for DynList {
    fn kind(&self) -> HostKind {
        HostKind::Array
    }

    fn get_field(&self, _name: &str) -> Option<HostValue> {
        None
    }

    fn set_field(&mut self, name: &str, _value: HostValue) -> Result<(), VgError> {
        Err(VgError::new(
            ErrorCode::PathStepUnresolved,
            format!("cannot set field {name:?} on an array-like object"),
        ))
    }

    fn get_index(&self, index: usize) -> Option<HostValue> {
        self.items.get(index).cloned()
    }

    fn set_index(&mut self, index: usize, value: HostValue) -> Result<(), VgError> {
        if index >= self.items.len() {
            return Err(VgError::new(
                ErrorCode::PathStepUnresolved,
                format!("index {index} out of bounds (len {})", self.items.len()),
            ));
        }
        self.items[index] = value;
        Ok(())
    }

    fn push(&mut self, value: HostValue) -> Result<(), VgError> {
        self.items.push(value);
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn entries(&self) -> Vec<(HostKey, HostValue)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, v)| (HostKey::Index(i), v.clone()))
            .collect()
    }

    fn debug_repr(&self) -> String {
        format!("DynList({} items)", self.items.len())
    }
}

/// The call shape a `get`-style invocation (getter or action) is made with.
/// Ordered richest-first per the spec's arity resolution rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    CtxCurParent,
    CtxCur,
    CurParent,
    Cur,
}

/// The call shape a setter invocation is made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetShape {
    CtxCurValue,
    CurValue,
}

/// Ambient context passed to callables, analogous to the "current
/// connection" design note: threaded explicitly, never global.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub connection_name: &'a str,
}

/// A callable bound into a path: may serve as a getter, a setter, or an
/// action depending on which shapes it declares support for.
pub trait VarCallable: Send + Sync {
    /// Shapes this callable accepts for get/action invocation, in the
    /// caller's preferred order is not assumed; the dispatcher filters
    /// this set against what's available and tries richest-first.
    fn supported_get_shapes(&self) -> &'static [CallShape] {
        &[CallShape::Cur]
    }

    fn get(
        &self,
        shape: CallShape,
        ctx: Option<CallContext<'_>>,
        cur: HostValue,
        parent: Option<HostValue>,
    ) -> Result<HostValue, VgError>;

    /// Shapes this callable accepts for setter invocation. Empty means the
    /// callable can't be used as a setter.
    fn supported_set_shapes(&self) -> &'static [SetShape] {
        &[]
    }

    fn set(
        &self,
        _shape: SetShape,
        _ctx: Option<CallContext<'_>>,
        _cur: HostValue,
        _value: HostValue,
    ) -> Result<(), VgError> {
        Err(VgError::new(ErrorCode::PathNoApplicableArity, "callable is not a setter"))
    }
}

/// Picks the richest applicable get/action shape given what's available,
/// in spec order: `(ctx,cur,parent)` -> `(ctx,cur)` -> `(cur,parent)` ->
/// `(cur)`.
pub fn resolve_get_shape(
    supported: &[CallShape],
    has_ctx: bool,
    has_parent: bool,
) -> Option<CallShape> {
    const ORDER: [CallShape; 4] = [
        CallShape::CtxCurParent,
        CallShape::CtxCur,
        CallShape::CurParent,
        CallShape::Cur,
    ];
    for shape in ORDER {
        let needs_ctx = matches!(shape, CallShape::CtxCurParent | CallShape::CtxCur);
        let needs_parent = matches!(shape, CallShape::CtxCurParent | CallShape::CurParent);
        if needs_ctx && !has_ctx {
            continue;
        }
        if needs_parent && !has_parent {
            continue;
        }
        if supported.contains(&shape) {
            return Some(shape);
        }
    }
    None
}

/// Picks the richest applicable setter shape: `(ctx,cur,value)` ->
/// `(cur,value)`.
pub fn resolve_set_shape(supported: &[SetShape], has_ctx: bool) -> Option<SetShape> {
    if has_ctx && supported.contains(&SetShape::CtxCurValue) {
        return Some(SetShape::CtxCurValue);
    }
    if supported.contains(&SetShape::CurValue) {
        return Some(SetShape::CurValue);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyn_map_roundtrips_a_field() {
        let mut m = DynMap::new();
        m.set_field("name", HostValue::string("Herman")).unwrap();
        assert_eq!(m.get_field("name").unwrap().as_str(), Some("Herman"));
    }

    #[test]
    fn dyn_list_append_at_len_succeeds() {
        let mut l = DynList::new();
        l.push(HostValue::string("a")).unwrap();
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn dyn_list_set_index_out_of_bounds_fails() {
        let mut l = DynList::new();
        assert!(l.set_index(0, HostValue::Null).is_err());
    }

    #[test]
    fn get_shape_prefers_richest_when_ctx_and_parent_present() {
        let supported = [CallShape::CtxCurParent, CallShape::Cur];
        assert_eq!(
            resolve_get_shape(&supported, true, true),
            Some(CallShape::CtxCurParent)
        );
    }

    #[test]
    fn get_shape_falls_back_without_parent() {
        let supported = [CallShape::CtxCurParent, CallShape::CtxCur];
        assert_eq!(resolve_get_shape(&supported, true, false), Some(CallShape::CtxCur));
    }

    #[test]
    fn get_shape_none_when_nothing_applies() {
        let supported = [CallShape::CtxCurParent];
        assert_eq!(resolve_get_shape(&supported, false, false), None);
    }

    #[test]
    fn set_shape_prefers_ctx_variant() {
        let supported = [SetShape::CtxCurValue, SetShape::CurValue];
        assert_eq!(resolve_set_shape(&supported, true), Some(SetShape::CtxCurValue));
    }
}
