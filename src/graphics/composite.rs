//! Connection-provided composite element definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::element::SomeButtonGraphicsElement;

/// An option field a composite instance can override (`opt:<id>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeOptionField {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub default: Value,
}

/// Reusable bundle of layer elements defined by a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeElementDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: Vec<CompositeOptionField>,
    #[serde(default)]
    pub elements: Vec<SomeButtonGraphicsElement>,
}

/// Key used for reference tracking and type invalidation: `connectionId:elementId`.
pub fn composite_type_key(connection_id: &str, element_id: &str) -> String {
    format!("{}:{}", connection_id, element_id)
}

/// Lookup of composite definitions.
pub trait CompositeElementStore {
    fn get_composite_element_definition(
        &self,
        connection_id: &str,
        element_id: &str,
    ) -> Option<&CompositeElementDefinition>;
}

/// Composite definitions held in memory, keyed by connection then element id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeDefinitions {
    by_connection: HashMap<String, HashMap<String, CompositeElementDefinition>>,
}

impl CompositeDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition. Returns its type key for invalidation.
    pub fn insert(&mut self, connection_id: &str, definition: CompositeElementDefinition) -> String {
        let key = composite_type_key(connection_id, &definition.id);
        self.by_connection
            .entry(connection_id.to_string())
            .or_default()
            .insert(definition.id.clone(), definition);
        key
    }

    pub fn remove(&mut self, connection_id: &str, element_id: &str) -> Option<CompositeElementDefinition> {
        self.by_connection.get_mut(connection_id)?.remove(element_id)
    }

    /// Drop all definitions of a connection, returning the affected type keys.
    pub fn remove_connection(&mut self, connection_id: &str) -> Vec<String> {
        self.by_connection
            .remove(connection_id)
            .map(|defs| defs.keys().map(|id| composite_type_key(connection_id, id)).collect())
            .unwrap_or_default()
    }
}

impl CompositeElementStore for CompositeDefinitions {
    fn get_composite_element_definition(
        &self,
        connection_id: &str,
        element_id: &str,
    ) -> Option<&CompositeElementDefinition> {
        self.by_connection.get(connection_id)?.get(element_id)
    }
}
