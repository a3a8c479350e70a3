// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Core of the variable graph: identity, paths, metadata, and the
//! walker/deref conversion between live host values and their JSON form.
//!
//! This crate has no notion of blocks, monitors, or connections — it is
//! the leaf layer those build on (see `vg-protocol` and `vg-runtime`).

pub mod env;
pub mod host;
pub mod oid;
pub mod path;
pub mod var;
pub mod walk;

pub use env::VarEnv;
pub use host::{
    resolve_get_shape, resolve_set_shape, CallContext, CallShape, DynList, DynMap, HostKey, HostKind,
    HostObject, HostValue, SetShape, VarCallable,
};
pub use oid::{ObjectId, OidTable};
pub use path::{parse_full_name, parse_path, FullName, HeadTerm, PathComponent};
pub use var::{Var, VarId};
pub use walk::{deref, is_same, walk};

#[cfg(test)]
mod integration_tests {
    use super::*;

    fn person_root() -> HostValue {
        let mut map = DynMap::new();
        map.insert("name", HostValue::string("Herman"));
        map.insert("number", HostValue::string("1313"));
        HostValue::object(map)
    }

    #[test]
    fn ensure_is_idempotent_and_indexed() {
        let mut env = VarEnv::new();
        let id = env.ensure("name", None).unwrap();
        let again = env.ensure("name", None).unwrap();
        assert_eq!(id, again);
        assert_eq!(env.by_full_name("name"), Some(id));
    }

    #[test]
    fn child_links_into_parent_children_map() {
        let mut env = VarEnv::new();
        let root_id = env.ensure("@person", None).unwrap();
        let child_id = env.ensure("name", Some(root_id)).unwrap();
        assert_eq!(env.get(root_id).unwrap().children.get("name"), Some(&child_id));
    }

    #[test]
    fn basic_monitor_scenario_computes_leaf_values() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());

        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();
        let name_id = env.ensure("name", Some(root_id)).unwrap();
        let number_id = env.ensure("number?path=number", Some(root_id)).unwrap();

        env.refresh(&[name_id, number_id], true, true).unwrap();

        assert_eq!(env.get(name_id).unwrap().json_value, serde_json::json!("Herman"));
        assert_eq!(env.get(number_id).unwrap().json_value, serde_json::json!("1313"));
    }

    #[test]
    fn inbound_set_suppresses_echo_on_next_refresh() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();
        let name_id = env.ensure("name", Some(root_id)).unwrap();
        env.refresh(&[name_id], true, true).unwrap();
        env.clear_changed(name_id);

        env.set_value(name_id, HostValue::string("Freddy"), false, None).unwrap();
        env.refresh(&[name_id], true, true).unwrap();
        assert!(!env.changed().contains(&name_id));
    }

    #[test]
    fn creating_set_is_a_no_op_for_pathed_vars() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();
        let name_id = env.ensure("name", Some(root_id)).unwrap();

        env.set_value(name_id, HostValue::string("ignored"), true, None).unwrap();
        env.refresh(&[name_id], true, true).unwrap();
        assert_eq!(env.get(name_id).unwrap().json_value, serde_json::json!("Herman"));
    }

    #[test]
    fn readable_false_fails_compute() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();
        let name_id = env.ensure("name", Some(root_id)).unwrap();
        env.get_mut(name_id).unwrap().readable = false;
        assert!(env.compute_value(name_id).is_err());
    }

    #[test]
    fn writeable_false_fails_set() {
        let mut env = VarEnv::new();
        env.set_root("person", person_root());
        let root_id = env.ensure("@person", None).unwrap();
        env.compute_value(root_id).unwrap();
        let name_id = env.ensure("name", Some(root_id)).unwrap();
        env.get_mut(name_id).unwrap().writeable = false;
        assert!(env.set_value(name_id, HostValue::string("x"), false, None).is_err());
    }

    #[test]
    fn remove_unlinks_from_parent() {
        let mut env = VarEnv::new();
        let root_id = env.ensure("@person", None).unwrap();
        let child_id = env.ensure("name", Some(root_id)).unwrap();
        env.remove(child_id);
        assert!(env.get(root_id).unwrap().children.get("name").is_none());
        assert!(env.get(child_id).is_err());
    }

    #[test]
    fn up_traversal_past_root_fails() {
        let mut env = VarEnv::new();
        let id = env.ensure("x?path=..y", None).unwrap();
        assert!(env.compute_value(id).is_err());
    }

    #[test]
    fn index_append_at_len_succeeds_one_past_fails() {
        let mut env = VarEnv::new();
        env.set_root("items", HostValue::object(DynList::new()));
        let root_id = env.ensure("@items", None).unwrap();
        env.compute_value(root_id).unwrap();
        let slot_id = env.ensure("0?path=[0]", Some(root_id)).unwrap();
        env.set_value(slot_id, HostValue::string("first"), false, None).unwrap();

        let out_of_bounds = env.ensure("2?path=[2]", Some(root_id)).unwrap();
        assert!(env.set_value(out_of_bounds, HostValue::string("nope"), false, None).is_err());
    }
}
