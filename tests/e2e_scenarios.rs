//! End-to-end scenarios from the runtime's testable-properties list that
//! aren't already exercised by a crate's own colocated tests: quiet
//! monitors tracking external host mutation without publishing, and a
//! mutable object surviving a walk/deref round-trip through a monitor.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::json;

use vg_core::host::HostObject;
use vg_core::{deref, is_same, walk, DynList, DynMap, HostValue, VarEnv};
use vg_protocol::Block;
use vg_runtime::monitor::{ingest_monitor_block, monitor_has_changes, outbound_topics, MonitorData};

fn monitor_block(name: &str, root: &str, value: serde_json::Value) -> Block {
    Block::parse(json!({
        "type": "monitor",
        "name": name,
        "root": root,
        "value": value,
    }))
    .unwrap()
}

#[test]
fn quiet_monitor_tracks_external_mutation_without_publishing() {
    let person = Arc::new(RwLock::new(DynMap::new().with("number", HostValue::string("1313"))));
    let person = person as Arc<RwLock<dyn HostObject>>;

    let mut env = VarEnv::new();
    env.set_root("person", HostValue::Object(Arc::clone(&person)));
    let root_id = env.ensure("@person", None).unwrap();
    env.compute_value(root_id).unwrap();

    let mut monitors: BTreeMap<String, MonitorData> = BTreeMap::new();
    let mut raw = monitor_block("m1", "@person", json!({"number": ""})).raw;
    raw.insert("quiet".into(), json!(true));
    raw.insert("update".into(), json!(0.05));
    let block = Block::parse(serde_json::Value::Object(raw)).unwrap();
    ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();

    let mon = monitors.get("m1").unwrap();
    let var_ids: Vec<_> = mon.vars.values().copied().collect();
    env.refresh(&var_ids, true, true).unwrap();
    for id in &var_ids {
        env.clear_changed(*id);
    }
    assert!(!monitor_has_changes(&env, mon));

    person.write().unwrap().set_field("number", HostValue::string("42")).unwrap();

    env.refresh(&var_ids, true, true).unwrap();
    let mon = monitors.get("m1").unwrap();
    assert!(monitor_has_changes(&env, mon), "the changed number var must show up in env.changed");
    assert!(mon.quiet, "a quiet monitor never actually enters `outgoing`, even though it tracks changes");
}

#[test]
fn ref_round_trip_resolves_back_to_the_same_host_object() {
    let mut env = VarEnv::new();
    let tags = HostValue::object(DynList::from_vec(vec![HostValue::string("a"), HostValue::string("b")]));
    env.set_root("doc", HostValue::object(DynMap::new().with("tags", tags.clone())));

    let root_id = env.ensure("@doc", None).unwrap();
    env.compute_value(root_id).unwrap();
    let tags_id = env.ensure("tags", Some(root_id)).unwrap();
    env.compute_value(tags_id).unwrap();

    let walked = env.get(tags_id).unwrap().json_value.clone();
    assert!(walked.get("ref").is_some(), "a mutable object must walk to a {{ref: N}} record");

    let round_tripped = deref(&mut env, &walked);
    assert!(is_same(&tags, &round_tripped), "dereferencing the same ref must resolve back to the same host object");

    let reference_json = json!({"ref": walked["ref"].as_u64().unwrap()});
    let resolved_again = deref(&mut env, &reference_json);
    assert!(is_same(&round_tripped, &resolved_again), "echoing the same ref must not duplicate the underlying object");

    let reference_walk_again = walk(&mut env, &round_tripped);
    assert_eq!(reference_walk_again, walked, "walking the same object twice must yield the same OID");
}

#[test]
fn outbound_topics_is_the_union_of_topics_and_update_topics() {
    let mut mon = monitor_via_install();
    mon.topics = vec!["alpha".to_string()];
    mon.update_topics = vec!["alpha".to_string(), "beta".to_string()];
    assert_eq!(outbound_topics(&mon), vec!["alpha".to_string(), "beta".to_string()]);
}

fn monitor_via_install() -> MonitorData {
    let mut env = VarEnv::new();
    env.set_root("person", HostValue::object(DynMap::new().with("name", HostValue::string("Herman"))));
    let mut monitors: BTreeMap<String, MonitorData> = BTreeMap::new();
    let block = monitor_block("m1", "@person", json!({"name": ""}));
    ingest_monitor_block(&mut env, &mut monitors, &block).unwrap();
    monitors.remove("m1").unwrap()
}
