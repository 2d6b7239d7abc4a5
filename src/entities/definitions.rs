//! Entity definitions: what a connection declares about each action/feedback type.
//!
//! Definitions are looked up by `(kind, connection_id, definition_id)` through
//! [`DefinitionStore`]. The built-in `internal` definitions (logic operators and
//! grouping actions) are registered in every [`DefinitionRegistry`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::keys::*;
use super::model::{EntityKind, Options};

/// Subtype of a feedback definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    /// Produces true/false; applies its style while true
    Boolean,
    /// Produces a partial style object directly
    Advanced,
    /// Produces a plain value for use in expressions
    Value,
}

/// A child group an internal definition supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildGroupDefinition {
    pub group_id: String,
    pub entity_kind: EntityKind,
    /// Only boolean feedbacks may be added
    #[serde(default)]
    pub boolean_only: bool,
}

impl ChildGroupDefinition {
    pub fn new(group_id: &str, entity_kind: EntityKind, boolean_only: bool) -> Self {
        Self { group_id: group_id.to_string(), entity_kind, boolean_only }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub kind: EntityKind,
    pub connection_id: String,
    pub definition_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub feedback_type: Option<FeedbackType>,
    /// Whether `is_inverted` is honored
    #[serde(default)]
    pub show_invert: bool,
    #[serde(default)]
    pub has_learn: bool,
    /// Overrides the configured default learn timeout
    #[serde(default)]
    pub learn_timeout_ms: Option<u64>,
    /// Actions are only subscribed when the connection asks for lifecycle calls
    #[serde(default)]
    pub has_lifecycle_functions: bool,
    #[serde(default)]
    pub supports_child_groups: Vec<ChildGroupDefinition>,
    #[serde(default)]
    pub option_defaults: Options,
}

impl EntityDefinition {
    pub fn new(kind: EntityKind, connection_id: &str, definition_id: &str) -> Self {
        Self {
            kind,
            connection_id: connection_id.to_string(),
            definition_id: definition_id.to_string(),
            label: definition_id.to_string(),
            feedback_type: None,
            show_invert: false,
            has_learn: false,
            learn_timeout_ms: None,
            has_lifecycle_functions: false,
            supports_child_groups: Vec::new(),
            option_defaults: Options::new(),
        }
    }

    pub fn boolean_feedback(connection_id: &str, definition_id: &str) -> Self {
        Self {
            feedback_type: Some(FeedbackType::Boolean),
            show_invert: true,
            ..Self::new(EntityKind::Feedback, connection_id, definition_id)
        }
    }

    pub fn is_boolean_feedback(&self) -> bool {
        self.kind == EntityKind::Feedback && self.feedback_type == Some(FeedbackType::Boolean)
    }

    pub fn child_group(&self, group_id: &str) -> Option<&ChildGroupDefinition> {
        self.supports_child_groups.iter().find(|g| g.group_id == group_id)
    }
}

/// Lookup of entity definitions.
pub trait DefinitionStore: Send + Sync {
    fn get_entity_definition(
        &self,
        kind: EntityKind,
        connection_id: &str,
        definition_id: &str,
    ) -> Option<Arc<EntityDefinition>>;
}

static INTERNAL_DEFINITIONS: Lazy<Vec<Arc<EntityDefinition>>> = Lazy::new(|| {
    let boolean_children = || vec![ChildGroupDefinition::new(GROUP_CHILDREN, EntityKind::Feedback, true)];
    let logic = |id: &str, label: &str| EntityDefinition {
        label: label.to_string(),
        supports_child_groups: boolean_children(),
        ..EntityDefinition::boolean_feedback(CONNECTION_INTERNAL, id)
    };

    let mut wait = EntityDefinition::new(EntityKind::Action, CONNECTION_INTERNAL, ACTION_WAIT);
    wait.label = "Wait".to_string();
    wait.option_defaults.insert("time".to_string(), json!(1000));

    vec![
        logic(LOGIC_AND, "Logic: AND"),
        logic(LOGIC_OR, "Logic: OR"),
        logic(LOGIC_XOR, "Logic: XOR"),
        EntityDefinition {
            label: "Logic: Conditionalise existing feedbacks".to_string(),
            feedback_type: Some(FeedbackType::Advanced),
            supports_child_groups: vec![
                ChildGroupDefinition::new(GROUP_CHILDREN, EntityKind::Feedback, true),
                ChildGroupDefinition::new(GROUP_ADVANCED_CHILDREN, EntityKind::Feedback, false),
            ],
            ..EntityDefinition::new(EntityKind::Feedback, CONNECTION_INTERNAL, LOGIC_CONDITIONALISE_ADVANCED)
        },
        wait,
        EntityDefinition {
            label: "Action Group".to_string(),
            supports_child_groups: vec![ChildGroupDefinition::new(GROUP_ACTIONS, EntityKind::Action, false)],
            ..EntityDefinition::new(EntityKind::Action, CONNECTION_INTERNAL, ACTION_GROUP)
        },
        EntityDefinition {
            label: "Logic: If".to_string(),
            supports_child_groups: vec![
                ChildGroupDefinition::new(GROUP_CHILDREN, EntityKind::Feedback, true),
                ChildGroupDefinition::new(GROUP_ACTIONS, EntityKind::Action, false),
            ],
            ..EntityDefinition::new(EntityKind::Action, CONNECTION_INTERNAL, ACTION_IF)
        },
    ]
    .into_iter()
    .map(Arc::new)
    .collect()
});

type DefinitionKey = (EntityKind, String, String);

/// In-memory definition registry, pre-populated with the internal definitions.
#[derive(Debug)]
pub struct DefinitionRegistry {
    definitions: RwLock<HashMap<DefinitionKey, Arc<EntityDefinition>>>,
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        let registry = Self { definitions: RwLock::new(HashMap::new()) };
        for def in INTERNAL_DEFINITIONS.iter() {
            registry.register_arc(Arc::clone(def));
        }
        registry
    }

    pub fn register(&self, definition: EntityDefinition) {
        self.register_arc(Arc::new(definition));
    }

    fn register_arc(&self, definition: Arc<EntityDefinition>) {
        let key = (definition.kind, definition.connection_id.clone(), definition.definition_id.clone());
        self.definitions.write().unwrap_or_else(|e| e.into_inner()).insert(key, definition);
    }

    /// Drop every definition of a connection (internal ones cannot be removed).
    pub fn remove_connection(&self, connection_id: &str) -> usize {
        if connection_id == CONNECTION_INTERNAL {
            return 0;
        }
        let mut defs = self.definitions.write().unwrap_or_else(|e| e.into_inner());
        let before = defs.len();
        defs.retain(|(_, conn, _), _| conn != connection_id);
        before - defs.len()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DefinitionStore for DefinitionRegistry {
    fn get_entity_definition(
        &self,
        kind: EntityKind,
        connection_id: &str,
        definition_id: &str,
    ) -> Option<Arc<EntityDefinition>> {
        let key = (kind, connection_id.to_string(), definition_id.to_string());
        self.definitions.read().unwrap_or_else(|e| e.into_inner()).get(&key).cloned()
    }
}
