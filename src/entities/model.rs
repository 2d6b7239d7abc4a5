//! Stored form of entities and the shared options handle.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graphics::element::RawProperty;

/// Raw option values of one entity.
pub type Options = IndexMap<String, Value>;

/// Partial button style contributed by a feedback.
pub type StyleMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Action,
    Feedback,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Action => write!(f, "action"),
            EntityKind::Feedback => write!(f, "feedback"),
        }
    }
}

/// Feedback override of one property of one layer element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStyleOverride {
    pub override_id: String,
    pub element_id: String,
    pub element_property: String,
    #[serde(rename = "override")]
    pub value: RawProperty,
}

/// Serialized entity, including nested child groups.
///
/// `is_inverted`, `style` and `style_overrides` are only meaningful for feedbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityModel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub definition_id: String,
    pub connection_id: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default)]
    pub options: Options,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_inverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_overrides: Vec<FeedbackStyleOverride>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub children: IndexMap<String, Vec<EntityModel>>,
}

impl EntityModel {
    pub fn new(id: impl Into<String>, kind: EntityKind, connection_id: &str, definition_id: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            definition_id: definition_id.to_string(),
            connection_id: connection_id.to_string(),
            disabled: false,
            headline: None,
            options: Options::new(),
            is_inverted: false,
            style: None,
            style_overrides: Vec::new(),
            children: IndexMap::new(),
        }
    }
}

/// Options handed out by reference.
///
/// Clones share the same storage: mutation through any clone is visible to all.
/// Use [`SharedOptions::snapshot`] for an isolated copy.
#[derive(Debug, Clone, Default)]
pub struct SharedOptions(Arc<RwLock<Options>>);

impl SharedOptions {
    pub fn new(options: Options) -> Self {
        Self(Arc::new(RwLock::new(options)))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.0.write().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), value);
    }

    /// Replace all values in place.
    pub fn replace(&self, options: Options) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = options;
    }

    /// Merge values in place, keeping keys not present in `options`.
    pub fn merge(&self, options: Options) {
        self.0.write().unwrap_or_else(|e| e.into_inner()).extend(options);
    }

    pub fn snapshot(&self) -> Options {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ptr_eq(&self, other: &SharedOptions) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shared_options_alias() {
        let options = SharedOptions::new(Options::from([("a".to_string(), json!(1))]));
        let alias = options.clone();
        alias.set("a", json!(2));
        assert_eq!(options.get("a"), Some(json!(2)));
        assert!(options.ptr_eq(&alias));

        let snapshot = options.snapshot();
        options.set("a", json!(3));
        assert_eq!(snapshot.get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_model_serde_shape() {
        let model: EntityModel = serde_json::from_value(json!({
            "id": "f1",
            "type": "feedback",
            "definitionId": "logic_and",
            "connectionId": "internal",
            "isInverted": true,
            "children": {"children": [
                {"id": "f2", "type": "feedback", "definitionId": "on_air", "connectionId": "conn"}
            ]}
        }))
        .unwrap();
        assert_eq!(model.kind, EntityKind::Feedback);
        assert!(model.is_inverted);
        assert_eq!(model.children["children"][0].id, "f2");

        let out = serde_json::to_value(&model.children["children"][0]).unwrap();
        assert!(out.get("isInverted").is_none());
        assert!(out.get("children").is_none());
    }
}
