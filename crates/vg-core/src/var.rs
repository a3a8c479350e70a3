//! The `Var` type (spec §3).

use std::collections::BTreeMap;

use serde_json::Value;
use vg_error::VgErrorDto;

use crate::host::HostValue;
use crate::path::PathComponent;

pub type VarId = u64;

/// A node in the variable graph, bound to a live host value via `path`.
pub struct Var {
    pub id: VarId,
    pub parent_id: Option<VarId>,
    pub name: String,
    pub full_name: String,
    pub metadata: BTreeMap<String, String>,
    pub path: Vec<PathComponent>,
    /// Host-side cached value, set by the most recent successful refresh
    /// or inbound `set_value`.
    pub internal_value: Option<HostValue>,
    /// JSON-form cache; equals `walk(internal_value)` immediately after a
    /// successful refresh (spec invariant).
    pub json_value: Value,
    pub readable: bool,
    pub writeable: bool,
    pub action: bool,
    pub active: bool,
    pub level: u32,
    /// Child name -> child var id.
    pub children: BTreeMap<String, VarId>,
    pub error_count: u32,
    pub refresh_exception: Option<VgErrorDto>,
}

impl Var {
    pub fn new(id: VarId, parent_id: Option<VarId>, full_name: String, name: String) -> Self {
        Self {
            id,
            parent_id,
            name,
            full_name,
            metadata: BTreeMap::new(),
            path: Vec::new(),
            internal_value: None,
            json_value: Value::Null,
            readable: true,
            writeable: true,
            action: false,
            active: true,
            level: 0,
            children: BTreeMap::new(),
            error_count: 0,
            refresh_exception: None,
        }
    }

    /// `create` metadata (see spec §4.2 `set_value` guard on initial
    /// monitor installs).
    pub fn has_create_metadata(&self) -> bool {
        self.metadata.contains_key("create")
    }

    pub fn has_non_empty_path(&self) -> bool {
        !self.path.is_empty()
    }
}
