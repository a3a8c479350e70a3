//! The variable environment (spec §4.2): identity, name indices, roots,
//! OID table, change/error sets, and the `ensure`/`set_value`/`get_path`/
//! `compute_value`/`refresh` operations.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use vg_error::{ErrorCode, VgError, VgErrorDto};

use crate::host::{resolve_get_shape, resolve_set_shape, CallContext, HostValue, VarCallable};
use crate::oid::OidTable;
use crate::path::{parse_full_name, parse_path, PathComponent};
use crate::var::{Var, VarId};
use crate::walk::{is_same, walk};

/// Registry of variables, object-identity table, roots, and change/error
/// sets (spec §3 `VarEnv`).
pub struct VarEnv {
    vars: HashMap<VarId, Var>,
    by_full_name: HashMap<String, VarId>,
    by_name: HashMap<String, Vec<VarId>>,
    roots: HashMap<String, HostValue>,
    oids: OidTable,
    next_vid: VarId,
    changed: BTreeSet<VarId>,
    errors: BTreeMap<VarId, VgErrorDto>,
    verbose_refs: bool,
}

impl Default for VarEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl VarEnv {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            by_full_name: HashMap::new(),
            by_name: HashMap::new(),
            roots: HashMap::new(),
            oids: OidTable::new(),
            next_vid: 1,
            changed: BTreeSet::new(),
            errors: BTreeMap::new(),
            verbose_refs: false,
        }
    }

    // -- roots --

    pub fn set_root(&mut self, name: impl Into<String>, value: HostValue) {
        self.roots.insert(name.into(), value);
    }

    pub fn root(&self, name: &str) -> Option<&HostValue> {
        self.roots.get(name)
    }

    // -- lookups --

    pub fn get(&self, id: VarId) -> Result<&Var, VgError> {
        self.vars
            .get(&id)
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("no such var id {id}")))
    }

    pub fn get_mut(&mut self, id: VarId) -> Result<&mut Var, VgError> {
        self.vars
            .get_mut(&id)
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("no such var id {id}")))
    }

    pub fn by_full_name(&self, full_name: &str) -> Option<VarId> {
        self.by_full_name.get(full_name).copied()
    }

    pub fn by_name(&self, name: &str) -> &[VarId] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn changed(&self) -> &BTreeSet<VarId> {
        &self.changed
    }

    pub fn clear_changed(&mut self, id: VarId) {
        self.changed.remove(&id);
    }

    pub fn errors(&self) -> &BTreeMap<VarId, VgErrorDto> {
        &self.errors
    }

    pub fn oids_mut(&mut self) -> &mut OidTable {
        &mut self.oids
    }

    pub fn verbose_refs(&self) -> bool {
        self.verbose_refs
    }

    pub fn set_verbose_refs(&mut self, on: bool) {
        self.verbose_refs = on;
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    // -- lifecycle --

    /// Parses `full_name`, allocating a new [`Var`] on first sight and
    /// linking it under `parent_id`'s `children`; returns the existing id
    /// unchanged on a repeat call (spec invariant 1).
    pub fn ensure(&mut self, full_name: &str, parent_id: Option<VarId>) -> Result<VarId, VgError> {
        if let Some(&id) = self.by_full_name.get(full_name) {
            self.link_to_parent(id, parent_id);
            return Ok(id);
        }

        let parsed = parse_full_name(full_name)?;
        let short_name = parsed.head.short_name();
        let id = self.next_vid;
        self.next_vid += 1;

        let mut var = Var::new(id, parent_id, full_name.to_string(), short_name.clone());
        for (k, v) in &parsed.metadata {
            var.metadata.insert(k.clone(), v.clone());
        }
        var.path = match parsed.get("path") {
            Some(p) => parse_path(p)?,
            None => parsed.head.default_path(),
        };
        if let Some(action) = parsed.get("action") {
            var.action = action == "true";
        } else {
            var.action = false;
        }
        if let Some(readable) = parsed.get("readable") {
            var.readable = readable != "false";
        }
        if let Some(writeable) = parsed.get("writeable") {
            var.writeable = writeable != "false";
        }
        if let Some(level) = parsed.get("level") {
            var.level = level.parse().unwrap_or(0);
        } else if let Some(pid) = parent_id {
            var.level = self.vars.get(&pid).map(|p| p.level + 1).unwrap_or(0);
        }

        self.vars.insert(id, var);
        self.by_full_name.insert(full_name.to_string(), id);
        self.by_name.entry(short_name).or_default().push(id);
        self.link_to_parent(id, parent_id);

        Ok(id)
    }

    fn link_to_parent(&mut self, id: VarId, parent_id: Option<VarId>) {
        if let Some(pid) = parent_id {
            let name = self.vars.get(&id).map(|v| v.name.clone());
            if let (Some(name), Some(parent)) = (name, self.vars.get_mut(&pid)) {
                parent.children.insert(name, id);
            }
        }
    }

    /// Destroys a var and unlinks it from its parent's `children`.
    pub fn remove(&mut self, id: VarId) {
        let Some(var) = self.vars.remove(&id) else { return };
        if let Some(pid) = var.parent_id {
            if let Some(parent) = self.vars.get_mut(&pid) {
                parent.children.remove(&var.name);
            }
        }
        self.by_full_name.remove(&var.full_name);
        if let Some(ids) = self.by_name.get_mut(&var.name) {
            ids.retain(|&v| v != id);
        }
        self.changed.remove(&id);
        self.errors.remove(&id);
    }

    // -- path evaluation --

    fn base_value(&self, var_id: VarId) -> Result<HostValue, VgError> {
        let var = self.get(var_id)?;
        match var.parent_id {
            Some(pid) => Ok(self.get(pid)?.internal_value.clone().unwrap_or(HostValue::Null)),
            None => Ok(HostValue::Null),
        }
    }

    /// Walks `path` from `base`, returning only the final value. See
    /// [`VarEnv::get_path_stack`] when intermediate ancestors are needed
    /// (callable arity resolution, `set_value`'s containing-object step).
    pub fn get_path(
        &mut self,
        base: HostValue,
        path: &[PathComponent],
        ctx: Option<CallContext<'_>>,
    ) -> Result<HostValue, VgError> {
        Ok(self.get_path_stack(base, path, ctx)?.pop().unwrap())
    }

    fn get_path_stack(
        &mut self,
        base: HostValue,
        path: &[PathComponent],
        ctx: Option<CallContext<'_>>,
    ) -> Result<Vec<HostValue>, VgError> {
        let mut stack = vec![base];
        for step in path {
            let cur = stack.last().unwrap().clone();
            match step {
                PathComponent::Up => {
                    if stack.len() <= 1 {
                        return Err(VgError::new(
                            ErrorCode::PathTraversalPastRoot,
                            "`..` traversal stepped past the root",
                        ));
                    }
                    stack.pop();
                }
                PathComponent::Root(name) => {
                    let v = self.roots.get(name).cloned().ok_or_else(|| {
                        VgError::new(ErrorCode::PathStepUnresolved, format!("unknown root @{name}"))
                    })?;
                    stack.push(v);
                }
                PathComponent::Qualified { module, name } => {
                    let key = format!("{module}.{name}");
                    let v = self.roots.get(&key).cloned().ok_or_else(|| {
                        VgError::new(ErrorCode::PathStepUnresolved, format!("unknown qualified binding {key}"))
                    })?;
                    stack.push(v);
                }
                PathComponent::Field(name) => {
                    stack.push(get_field_any(&cur, name)?);
                }
                PathComponent::Index(idx) => {
                    stack.push(get_index_any(&cur, *idx)?);
                }
                PathComponent::Callable(name) => {
                    let callable = get_field_any(&cur, name)?;
                    let HostValue::Callable(callable) = callable else {
                        return Err(VgError::new(ErrorCode::PathStepUnresolved, format!("{name} is not callable")));
                    };
                    // get_path only supports the two-shape getter form
                    // (ctx,cur) / (cur); the richer 4-shape action form is
                    // reserved for set_value's dispatch on the last step.
                    let shape = resolve_get_shape(callable.supported_get_shapes(), ctx.is_some(), false)
                        .ok_or_else(|| VgError::new(ErrorCode::PathNoApplicableArity, "no applicable getter arity"))?;
                    let result = callable.get(shape, ctx, cur, None)?;
                    stack.push(result);
                }
            }
        }
        Ok(stack)
    }

    /// Sets `v`'s bound value. When `creating`, writes are suppressed for
    /// vars that derive their value from a path, an action, or `create`
    /// metadata (spec §4.2, §9 Open Question 1: initial monitor installs
    /// never mutate host state).
    pub fn set_value(
        &mut self,
        var_id: VarId,
        value: HostValue,
        creating: bool,
        ctx: Option<CallContext<'_>>,
    ) -> Result<(), VgError> {
        let (path, writeable, action, skip) = {
            let v = self.get(var_id)?;
            let skip = creating && (v.has_create_metadata() || v.action || v.has_non_empty_path());
            (v.path.clone(), v.writeable, v.action, skip)
        };
        if skip {
            return Ok(());
        }
        if !writeable {
            let v = self.get(var_id)?;
            return Err(VgError::writeable_error(v.id, &v.full_name));
        }

        if path.is_empty() {
            let json = walk(self, &value);
            let v = self.get_mut(var_id)?;
            v.internal_value = Some(value);
            v.json_value = json;
            return Ok(());
        }

        let base = self.base_value(var_id)?;
        let (container, last_slice) = path.split_at(path.len() - 1);
        let last = &last_slice[0];
        let mut stack = self.get_path_stack(base, container, ctx)?;
        let target = stack.pop().unwrap();
        let parent = stack.pop();

        match last {
            PathComponent::Field(name) => set_field_any(&target, name, value.clone())?,
            PathComponent::Index(idx) => set_index_any(&target, *idx, value.clone())?,
            PathComponent::Callable(name) => {
                let callable_val = get_field_any(&target, name)?;
                let HostValue::Callable(callable) = callable_val else {
                    return Err(VgError::new(ErrorCode::PathStepUnresolved, format!("{name} is not callable")));
                };
                if action {
                    let shape = resolve_get_shape(callable.supported_get_shapes(), ctx.is_some(), parent.is_some())
                        .ok_or_else(|| {
                            VgError::new(ErrorCode::PathNoApplicableArity, "no applicable action arity")
                        })?;
                    callable.get(shape, ctx, target.clone(), parent)?;
                    return Ok(());
                }
                let shape = resolve_set_shape(callable.supported_set_shapes(), ctx.is_some()).ok_or_else(|| {
                    VgError::new(ErrorCode::PathNoApplicableArity, "no applicable setter arity")
                })?;
                callable.set(shape, ctx, target.clone(), value.clone())?;
            }
            PathComponent::Up | PathComponent::Root(_) | PathComponent::Qualified { .. } => {
                return Err(VgError::new(
                    ErrorCode::PathStepUnresolved,
                    "path cannot end in an up-traversal or root/qualified lookup",
                ));
            }
        }

        let v = self.get_mut(var_id)?;
        v.internal_value = Some(value);
        Ok(())
    }

    /// Recomputes `v`'s value from its path; returns whether
    /// `internal_value` changed by [`is_same`] comparison.
    pub fn compute_value(&mut self, var_id: VarId) -> Result<bool, VgError> {
        let (path, readable) = {
            let v = self.get(var_id)?;
            (v.path.clone(), v.readable)
        };
        if path.is_empty() {
            return Ok(false);
        }
        if !readable {
            let v = self.get(var_id)?;
            return Err(VgError::readable_error(v.id, &v.full_name));
        }
        let base = self.base_value(var_id)?;
        let new_value = self.get_path(base, &path, None)?;
        let changed = {
            let v = self.get(var_id)?;
            match &v.internal_value {
                Some(old) => !is_same(old, &new_value),
                None => true,
            }
        };
        let json = walk(self, &new_value);
        let v = self.get_mut(var_id)?;
        v.internal_value = Some(new_value);
        v.json_value = json;
        Ok(changed)
    }

    fn ancestor_chain(&self, id: VarId) -> Vec<VarId> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(cid) = cur {
            chain.push(cid);
            cur = self.vars.get(&cid).and_then(|v| v.parent_id);
        }
        chain.reverse();
        chain
    }

    /// Refreshes every var in `var_ids`, refreshing each one's ancestors
    /// first (outer before inner). Errors are recorded per-var unless
    /// `throw` is set, in which case the first error aborts the pass.
    pub fn refresh(&mut self, var_ids: &[VarId], track: bool, throw: bool) -> Result<(), VgError> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        for &id in var_ids {
            for cid in self.ancestor_chain(id) {
                if seen.insert(cid) {
                    ordered.push(cid);
                }
            }
        }

        for id in ordered {
            match self.compute_value(id) {
                Ok(changed) => {
                    if changed && track {
                        self.changed.insert(id);
                    }
                    if let Ok(v) = self.get_mut(id) {
                        v.error_count = 0;
                        v.refresh_exception = None;
                    }
                    self.errors.remove(&id);
                }
                Err(e) => {
                    if throw {
                        return Err(e);
                    }
                    let dto = VgErrorDto::from(&e);
                    if let Ok(v) = self.get_mut(id) {
                        v.error_count += 1;
                        v.refresh_exception = Some(dto.clone());
                    }
                    self.errors.insert(id, dto);
                }
            }
        }
        Ok(())
    }
}

fn get_field_any(value: &HostValue, name: &str) -> Result<HostValue, VgError> {
    match value {
        HostValue::Record(fields) => fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("no field {name:?}"))),
        HostValue::Object(obj) => obj
            .read()
            .map_err(|_| VgError::new(ErrorCode::PathStepUnresolved, "host object lock poisoned"))?
            .get_field(name)
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("no field {name:?}"))),
        HostValue::Null => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("null container for field {name:?}"))),
        _ => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("{name:?} is not a field of a scalar value"))),
    }
}

fn set_field_any(value: &HostValue, name: &str, new_value: HostValue) -> Result<(), VgError> {
    match value {
        HostValue::Object(obj) => obj
            .write()
            .map_err(|_| VgError::new(ErrorCode::PathStepUnresolved, "host object lock poisoned"))?
            .set_field(name, new_value),
        HostValue::Record(_) => Err(VgError::new(
            ErrorCode::VarNotWriteable,
            format!("cannot set field {name:?} on an immutable record"),
        )),
        _ => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("{name:?} is not settable here"))),
    }
}

fn get_index_any(value: &HostValue, idx: usize) -> Result<HostValue, VgError> {
    match value {
        HostValue::Tuple(items) => items
            .get(idx)
            .cloned()
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("index {idx} out of bounds"))),
        HostValue::Object(obj) => obj
            .read()
            .map_err(|_| VgError::new(ErrorCode::PathStepUnresolved, "host object lock poisoned"))?
            .get_index(idx)
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("index {idx} out of bounds"))),
        HostValue::Null => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("null container for index [{idx}]"))),
        _ => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("[{idx}] is not valid on a scalar value"))),
    }
}

/// Sets an index; an index equal to the current length appends (spec
/// §8 boundary behavior, translated from the source language's 1-based
/// "`len+1` appends" rule to 0-based indexing — see DESIGN.md).
fn set_index_any(value: &HostValue, idx: usize, new_value: HostValue) -> Result<(), VgError> {
    match value {
        HostValue::Object(obj) => {
            let mut guard = obj
                .write()
                .map_err(|_| VgError::new(ErrorCode::PathStepUnresolved, "host object lock poisoned"))?;
            if idx == guard.len() {
                guard.push(new_value)
            } else {
                guard.set_index(idx, new_value)
            }
        }
        HostValue::Tuple(_) => Err(VgError::new(
            ErrorCode::VarNotWriteable,
            format!("cannot set index [{idx}] on an immutable tuple"),
        )),
        _ => Err(VgError::new(ErrorCode::PathStepUnresolved, format!("[{idx}] is not settable here"))),
    }
}
