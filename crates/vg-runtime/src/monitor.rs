//! `MonitorData` and the monitor manager (spec §4.4): lifecycle of monitor
//! blocks, mapping block keys to variables, set/refresh/publish.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use vg_core::{deref, is_same, VarEnv, VarId};
use vg_error::{ErrorCode, VgError};
use vg_protocol::{Block, MONITOR_RESERVED_KEYS};

/// Per-monitor state: root variable, child variables, last emitted JSON,
/// update period, flags, and topics.
#[derive(Debug)]
pub struct MonitorData {
    pub name: String,
    pub root: VarId,
    pub root_path: String,
    pub update: Duration,
    pub quiet: bool,
    pub disabled: bool,
    pub topics: Vec<String>,
    pub update_topics: Vec<String>,
    /// block key -> last applied JSON value.
    pub data: BTreeMap<String, Value>,
    /// `(block_key, var_full_name)` pairs, preserving the inbound block's
    /// key order (spec invariant 7).
    pub data_keys: Vec<(String, String)>,
    /// short var name -> VarId, for vars attached directly under `root`.
    pub vars: BTreeMap<String, VarId>,
    /// last inbound block JSON, verbatim, for non-reserved-key passthrough.
    pub original: Map<String, Value>,
    pub rename: Option<VarId>,
    pub last_check: Option<Instant>,
}

impl MonitorData {
    fn new(name: String, root: VarId, root_path: String) -> Self {
        Self {
            name,
            root,
            root_path,
            update: Duration::from_millis(100),
            quiet: false,
            disabled: false,
            topics: Vec::new(),
            update_topics: Vec::new(),
            data: BTreeMap::new(),
            data_keys: Vec::new(),
            vars: BTreeMap::new(),
            original: Map::new(),
            rename: None,
            last_check: None,
        }
    }

    /// Whether `now` is at or past this monitor's next scheduled tick.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_check {
            None => true,
            Some(last) => now.duration_since(last) >= self.update,
        }
    }
}

/// Looks up or creates the `MonitorData` for `name`, re-rooting it when the
/// block's `root` string differs from what's on file. Returns whether the
/// monitor is newly created and the (possibly new) root var id.
pub fn monitor_from(
    env: &mut VarEnv,
    monitors: &mut BTreeMap<String, MonitorData>,
    name: &str,
    block: &Block,
) -> Result<(bool, VarId), VgError> {
    block.validate_monitor()?;
    let root_path = block
        .root()
        .ok_or_else(|| VgError::new(ErrorCode::ProtocolMonitorIncomplete, "monitor block missing `root`"))?
        .to_string();

    let is_new = !monitors.contains_key(name);
    let root_id = env.ensure(&root_path, None)?;

    let mon = monitors
        .entry(name.to_string())
        .or_insert_with(|| MonitorData::new(name.to_string(), root_id, root_path.clone()));
    mon.root = root_id;
    mon.root_path = root_path;
    mon.quiet = block.quiet();
    if let Some(period) = block.update() {
        mon.update = Duration::from_secs_f64(period.max(0.0));
    }
    mon.topics = block.topics();
    mon.update_topics = block.update_topics();
    mon.original = block.raw.clone();

    Ok((is_new, root_id))
}

/// Parses `block.value`'s keys as variable declarations attached under the
/// monitor's root, dropping vars no longer referenced (unlinking them from
/// `root`'s children without destroying the `Var` itself).
pub fn find_monitor_vars(env: &mut VarEnv, mon: &mut MonitorData, block: &Block) -> Result<(), VgError> {
    if block.disabled() {
        for (_, vid) in std::mem::take(&mut mon.vars) {
            env.remove(vid);
        }
        mon.disabled = true;
        mon.data_keys.clear();
        return Ok(());
    }
    mon.disabled = false;

    let value_obj = match block.value() {
        Some(Value::Object(map)) => map,
        _ => return Err(VgError::new(ErrorCode::ProtocolMonitorIncomplete, "monitor block missing `value` object")),
    };

    let mut stale = std::mem::take(&mut mon.vars);
    let mut data_keys = Vec::with_capacity(value_obj.len());

    for key in value_obj.keys() {
        let var_id = env.ensure(key, Some(mon.root))?;
        let symbol = env.get(var_id)?.name.clone();
        let full_name = env.get(var_id)?.full_name.clone();
        stale.remove(&symbol);
        mon.vars.insert(symbol, var_id);
        data_keys.push((key.clone(), full_name));
    }

    for (symbol, _vid) in stale {
        if let Ok(root_var) = env.get_mut(mon.root) {
            root_var.children.remove(&symbol);
        }
    }
    mon.data_keys = data_keys;

    mon.rename = match block.rename() {
        Some(rename_key) => Some(env.ensure(rename_key, Some(mon.root))?),
        None => None,
    };

    Ok(())
}

/// Ingests a single inbound `monitor` block end to end: derives/reuses
/// monitor state, attaches its vars, and applies any inbound value that
/// actually differs from the current host state — suppressing the echo
/// by clearing those vars from `env.changed` (spec §9 Open Question 1).
/// Initial installs (`is_new`) never mutate host state.
pub fn ingest_monitor_block(env: &mut VarEnv, monitors: &mut BTreeMap<String, MonitorData>, block: &Block) -> Result<(), VgError> {
    let name = block.name()?.to_string();
    let (is_new, _root_id) = monitor_from(env, monitors, &name, block)?;
    {
        let mon = monitors.get_mut(&name).expect("monitor_from just populated this entry");
        find_monitor_vars(env, mon, block)?;
    }

    let value_obj = match block.value() {
        Some(Value::Object(map)) => map.clone(),
        _ => return Err(VgError::new(ErrorCode::ProtocolMonitorIncomplete, "monitor block missing `value` object")),
    };
    let root_id = monitors.get(&name).expect("present").root;

    if monitors.get(&name).expect("present").disabled {
        return Ok(());
    }

    for (key, inbound_json) in value_obj.iter() {
        let var_id = env.ensure(key, Some(root_id))?;
        let inbound_host = deref(env, inbound_json);
        let current = env.get(var_id)?.internal_value.clone();
        let differs = match &current {
            Some(cur) => !is_same(cur, &inbound_host),
            None => true,
        };
        if !differs {
            continue;
        }
        if is_new {
            // First-time install: record the inbound value for dedup
            // comparison only, never write it into the host.
            continue;
        }
        env.set_value(var_id, inbound_host, false, None)?;
        env.clear_changed(var_id);
    }

    Ok(())
}

/// Whether any of `mon`'s vars (or its root) were touched by the last
/// refresh pass.
pub fn monitor_has_changes(env: &VarEnv, mon: &MonitorData) -> bool {
    if env.changed().contains(&mon.root) {
        return true;
    }
    mon.vars.values().any(|vid| env.changed().contains(vid))
}

/// Assembles the outgoing JSON for `mon`: the inbound block's non-reserved
/// keys verbatim, then `root`/`rename`/`update`/`quiet`/`updatetopics` when
/// applicable, and finally `value` ordered by `data_keys` (spec §4.4,
/// invariant 7).
pub fn assemble_outgoing(env: &VarEnv, mon: &MonitorData) -> Result<Value, VgError> {
    let mut out = Map::new();
    for (k, v) in mon.original.iter() {
        if !MONITOR_RESERVED_KEYS.contains(&k.as_str()) {
            out.insert(k.clone(), v.clone());
        }
    }

    out.insert("root".to_string(), Value::String(mon.root_path.clone()));
    if let Some(rename_id) = mon.rename {
        out.insert("rename".to_string(), env.get(rename_id)?.json_value.clone());
    }
    if !mon.update.is_zero() {
        out.insert("update".to_string(), Value::from(mon.update.as_secs_f64()));
    }
    if mon.quiet {
        out.insert("quiet".to_string(), Value::Bool(true));
    }
    if !mon.update_topics.is_empty() {
        out.insert("updatetopics".to_string(), Value::from(mon.update_topics.clone()));
    }

    let mut value = Map::new();
    for (block_key, var_full_name) in &mon.data_keys {
        let var_id = env
            .by_full_name(var_full_name)
            .ok_or_else(|| VgError::new(ErrorCode::PathStepUnresolved, format!("monitor var {var_full_name} vanished")))?;
        value.insert(block_key.clone(), env.get(var_id)?.json_value.clone());
    }
    out.insert("value".to_string(), Value::Object(value));

    Ok(Value::Object(out))
}

/// Union of `topics` and `update_topics`, the outbound publication target
/// set (spec §9 Open Question 2). Empty means "the connection's default
/// output stream".
pub fn outbound_topics(mon: &MonitorData) -> Vec<String> {
    let mut topics = mon.topics.clone();
    for t in &mon.update_topics {
        if !topics.contains(t) {
            topics.push(t.clone());
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vg_core::{DynMap, HostValue};

    fn person_root() -> HostValue {
        let mut map = DynMap::new();
        map.insert("name", HostValue::string("Herman"));
        map.insert("number", HostValue::string("1313"));
        HostValue::object(map)
    }

    fn monitor_block(name: &str, value: Value) -> Block {
        Block::parse(json!({
            "type": "monitor",
            "name": name,
            "root": "@person",
            "value": value,
        }))
        .unwrap()
    }

    #[test]
    fn basic_monitor_install_computes_values_without_mutating_host() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();

        let mut monitors = BTreeMap::new();
        let block = monitor_block("m1", json!({"name": "", "number?path=number": ""}));
        ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();

        let mon = monitors.get("m1").unwrap();
        let var_ids: Vec<VarId> = mon.vars.values().copied().collect();
        env.refresh(&var_ids, true, true).unwrap();

        let out = assemble_outgoing(&env, mon).unwrap();
        assert_eq!(out["value"]["name"], json!("Herman"));
        assert_eq!(out["value"]["number"], json!("1313"));
    }

    #[test]
    fn inbound_set_on_existing_monitor_mutates_host_and_suppresses_echo() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();

        let mut monitors = BTreeMap::new();
        let first = monitor_block("m1", json!({"name": "Herman"}));
        ingest_monitor_block(&mut env, &mut monitors, &first).unwrap();
        let mon_vars: Vec<VarId> = monitors.get("m1").unwrap().vars.values().copied().collect();
        env.refresh(&mon_vars, true, true).unwrap();

        let second = monitor_block("m1", json!({"name": "Freddy"}));
        ingest_monitor_block(&mut env, &mut monitors, &second).unwrap();

        let name_id = *monitors.get("m1").unwrap().vars.get("name").unwrap();
        assert_eq!(env.get(name_id).unwrap().internal_value, Some(HostValue::string("Freddy")));
        assert!(!env.changed().contains(&name_id));
    }

    #[test]
    fn disabled_monitor_removes_its_vars() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let mut monitors = BTreeMap::new();
        let block = monitor_block("m1", json!({"name": ""}));
        ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();
        assert!(!monitors.get("m1").unwrap().vars.is_empty());

        let mut disabled = block.raw.clone();
        disabled.insert("disabled".into(), json!(true));
        let disabled_block = Block::parse(Value::Object(disabled)).unwrap();
        ingest_monitor_block(&mut env, &mut monitors, &disabled_block).unwrap();
        assert!(monitors.get("m1").unwrap().vars.is_empty());
    }

    #[test]
    fn outgoing_preserves_non_reserved_keys_and_data_key_order() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();

        let mut monitors = BTreeMap::new();
        let mut raw = monitor_block("m1", json!({"number?path=number": "", "name": ""})).raw;
        raw.insert("origin".into(), json!("peer1"));
        let block = Block::parse(Value::Object(raw)).unwrap();
        ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();
        let mon = monitors.get("m1").unwrap();
        let var_ids: Vec<VarId> = mon.vars.values().copied().collect();
        env.refresh(&var_ids, true, true).unwrap();

        let out = assemble_outgoing(&env, mon).unwrap();
        assert_eq!(out["origin"], json!("peer1"));
        let keys: Vec<&String> = out["value"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["number", "name"]);
    }

    #[test]
    fn quiet_monitor_still_tracks_changes() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let mut monitors = BTreeMap::new();
        let mut raw = monitor_block("m1", json!({"name": ""})).raw;
        raw.insert("quiet".into(), json!(true));
        let block = Block::parse(Value::Object(raw)).unwrap();
        ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();
        let mon = monitors.get("m1").unwrap();
        assert!(mon.quiet);
        let var_ids: Vec<VarId> = mon.vars.values().copied().collect();
        env.refresh(&var_ids, true, true).unwrap();
        assert!(monitor_has_changes(&env, monitors.get("m1").unwrap()));
    }
}
