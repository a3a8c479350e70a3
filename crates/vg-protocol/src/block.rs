//! Block JSON schema (spec §4.5, §6): the four block types and the
//! common/reserved fields every block carries.

use serde_json::{Map, Value};
use vg_error::{ErrorCode, VgError};

/// `type` discriminant of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Monitor,
    Code,
    Data,
    Delete,
}

impl BlockType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "monitor" => Some(Self::Monitor),
            "code" => Some(Self::Code),
            "data" => Some(Self::Data),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Code => "code",
            Self::Data => "data",
            Self::Delete => "delete",
        }
    }
}

/// Common fields every block carries, regardless of type (spec §4.5).
pub const COMMON_KEYS: &[&str] = &["type", "name", "origin", "topics", "targets", "tags"];
/// Keys reserved by the `monitor` outgoing-assembly step (spec §4.4); all
/// other inbound keys are preserved verbatim into the outgoing block.
pub const MONITOR_RESERVED_KEYS: &[&str] = &["root", "update", "quiet", "updatetopics", "rename", "value", "disabled"];

/// A block: thin typed view over a raw JSON object. Kept as a raw map
/// (rather than a strongly-typed enum per variant) because the spec
/// requires non-reserved inbound keys to survive into the outgoing block
/// unchanged — an arbitrary passthrough that a closed enum can't express
/// without reintroducing a side map anyway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub raw: Map<String, Value>,
}

impl Block {
    pub fn new(block_type: BlockType, name: impl Into<String>) -> Self {
        let mut raw = Map::new();
        raw.insert("type".into(), Value::String(block_type.as_str().into()));
        raw.insert("name".into(), Value::String(name.into()));
        Self { raw }
    }

    pub fn parse(value: Value) -> Result<Self, VgError> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            _ => Err(VgError::new(ErrorCode::ProtocolMalformedJson, "block is not a JSON object")),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    pub fn block_type(&self) -> Result<BlockType, VgError> {
        let s = self
            .raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| VgError::new(ErrorCode::ProtocolMalformedJson, "block missing `type`"))?;
        BlockType::parse(s)
            .ok_or_else(|| VgError::new(ErrorCode::ProtocolUnknownBlockType, format!("unknown block type {s:?}")))
    }

    pub fn name(&self) -> Result<&str, VgError> {
        self.raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| VgError::new(ErrorCode::ProtocolMalformedJson, "block missing `name`"))
    }

    pub fn origin(&self) -> Option<&str> {
        self.raw.get("origin").and_then(Value::as_str)
    }

    /// Normalizes a `string | array of strings` field to a `Vec<String>`.
    fn string_or_list(&self, key: &str) -> Vec<String> {
        match self.raw.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.string_or_list("topics")
    }

    /// `None` means untargeted (every subscriber consumes it).
    pub fn targets(&self) -> Option<Vec<String>> {
        if !self.raw.contains_key("targets") {
            return None;
        }
        Some(self.string_or_list("targets"))
    }

    pub fn tags(&self) -> Vec<String> {
        self.string_or_list("tags")
    }

    pub fn value(&self) -> Option<&Value> {
        self.raw.get("value")
    }

    // -- monitor-specific --

    pub fn root(&self) -> Option<&str> {
        self.raw.get("root").and_then(Value::as_str)
    }

    pub fn update(&self) -> Option<f64> {
        self.raw.get("update").and_then(Value::as_f64)
    }

    pub fn quiet(&self) -> bool {
        self.raw.get("quiet").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn update_topics(&self) -> Vec<String> {
        self.string_or_list("updatetopics")
    }

    pub fn disabled(&self) -> bool {
        self.raw.get("disabled").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn rename(&self) -> Option<&str> {
        self.raw.get("rename").and_then(Value::as_str)
    }

    /// Validates a `monitor` block has its required `root`/`value` fields
    /// (spec §4.4 step 1, §7 `protocol` taxonomy entry).
    pub fn validate_monitor(&self) -> Result<(), VgError> {
        if self.root().is_none() {
            return Err(VgError::new(ErrorCode::ProtocolMonitorIncomplete, "monitor block missing `root`"));
        }
        if self.value().is_none() {
            return Err(VgError::new(ErrorCode::ProtocolMonitorIncomplete, "monitor block missing `value`"));
        }
        Ok(())
    }

    // -- code-specific --

    pub fn language(&self) -> Option<&str> {
        self.raw.get("language").and_then(Value::as_str)
    }

    pub fn code_returns(&self) -> bool {
        self.raw.get("return").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Keys not reserved by monitor outgoing-assembly, preserved verbatim.
    pub fn non_reserved_entries(&self) -> Vec<(String, Value)> {
        self.raw
            .iter()
            .filter(|(k, _)| !MONITOR_RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// `delete.value`: a name, a list of names, or `{tagged: tag | [tag,...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelector {
    Name(String),
    Names(Vec<String>),
    Tagged(Vec<String>),
}

impl DeleteSelector {
    pub fn parse(value: &Value) -> Result<Self, VgError> {
        match value {
            Value::String(s) => Ok(Self::Name(s.clone())),
            Value::Array(items) => {
                let names: Option<Vec<String>> = items.iter().map(|v| v.as_str().map(String::from)).collect();
                names
                    .map(Self::Names)
                    .ok_or_else(|| VgError::new(ErrorCode::ProtocolIllegalDeleteValue, "delete list contains a non-string"))
            }
            Value::Object(map) if map.len() == 1 && map.contains_key("tagged") => {
                let tagged = map.get("tagged").unwrap();
                match tagged {
                    Value::String(s) => Ok(Self::Tagged(vec![s.clone()])),
                    Value::Array(items) => {
                        let tags: Option<Vec<String>> = items.iter().map(|v| v.as_str().map(String::from)).collect();
                        tags.map(Self::Tagged).ok_or_else(|| {
                            VgError::new(ErrorCode::ProtocolIllegalDeleteValue, "tagged list contains a non-string")
                        })
                    }
                    _ => Err(VgError::new(ErrorCode::ProtocolIllegalDeleteValue, "`tagged` must be a string or array")),
                }
            }
            _ => Err(VgError::new(
                ErrorCode::ProtocolIllegalDeleteValue,
                "delete.value must be a name, array of names, or {tagged}",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_block_type() {
        let b = Block::parse(json!({"type": "monitor", "name": "m1", "root": "@x", "value": {}})).unwrap();
        assert_eq!(b.block_type().unwrap(), BlockType::Monitor);
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let b = Block::parse(json!({"type": "bogus", "name": "m1"})).unwrap();
        assert!(b.block_type().is_err());
    }

    #[test]
    fn monitor_missing_root_fails_validation() {
        let b = Block::parse(json!({"type": "monitor", "name": "m1", "value": {}})).unwrap();
        assert!(b.validate_monitor().is_err());
    }

    #[test]
    fn monitor_missing_value_fails_validation() {
        let b = Block::parse(json!({"type": "monitor", "name": "m1", "root": "@x"})).unwrap();
        assert!(b.validate_monitor().is_err());
    }

    #[test]
    fn topics_normalizes_string_to_single_element_list() {
        let b = Block::parse(json!({"type": "data", "name": "d1", "topics": "a"})).unwrap();
        assert_eq!(b.topics(), vec!["a".to_string()]);
    }

    #[test]
    fn topics_normalizes_array() {
        let b = Block::parse(json!({"type": "data", "name": "d1", "topics": ["a", "b"]})).unwrap();
        assert_eq!(b.topics(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn targets_absent_is_none() {
        let b = Block::parse(json!({"type": "data", "name": "d1"})).unwrap();
        assert_eq!(b.targets(), None);
    }

    #[test]
    fn delete_selector_single_name() {
        let sel = DeleteSelector::parse(&json!("m1")).unwrap();
        assert_eq!(sel, DeleteSelector::Name("m1".into()));
    }

    #[test]
    fn delete_selector_name_list() {
        let sel = DeleteSelector::parse(&json!(["m1", "m2"])).unwrap();
        assert_eq!(sel, DeleteSelector::Names(vec!["m1".into(), "m2".into()]));
    }

    #[test]
    fn delete_selector_tagged_single() {
        let sel = DeleteSelector::parse(&json!({"tagged": "t1"})).unwrap();
        assert_eq!(sel, DeleteSelector::Tagged(vec!["t1".into()]));
    }

    #[test]
    fn delete_selector_tagged_list() {
        let sel = DeleteSelector::parse(&json!({"tagged": ["t1", "t2"]})).unwrap();
        assert_eq!(sel, DeleteSelector::Tagged(vec!["t1".into(), "t2".into()]));
    }

    #[test]
    fn delete_selector_illegal_value_errors() {
        assert!(DeleteSelector::parse(&json!(42)).is_err());
    }

    #[test]
    fn non_reserved_entries_excludes_monitor_reserved_keys() {
        let b = Block::parse(json!({
            "type": "monitor", "name": "m1", "root": "@x", "update": 1.0,
            "quiet": true, "value": {}, "origin": "peer1"
        }))
        .unwrap();
        let keys: Vec<String> = b.non_reserved_entries().into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&"type".to_string()));
        assert!(keys.contains(&"name".to_string()));
        assert!(keys.contains(&"origin".to_string()));
        assert!(!keys.contains(&"root".to_string()));
        assert!(!keys.contains(&"update".to_string()));
        assert!(!keys.contains(&"quiet".to_string()));
        assert!(!keys.contains(&"value".to_string()));
    }
}
