//! A single action or feedback instance and its nested child groups.
//!
//! Entities form an owned tree: an [`Entity`] owns its child [`EntityList`]s,
//! which own their entities. Moving an entity between parents pops it out of
//! one list and pushes it into another; there are no back references.
//! Collaborators (definitions, connection notifications) are reached through
//! the shared [`EntityServices`].
//!
//! Only entities of the `internal` connection may have children.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::{trace, warn};
use serde_json::Value;
use uuid::Uuid;

use super::definitions::{DefinitionStore, EntityDefinition, FeedbackType};
use super::entity_list::{EntityList, EntityOwner, ListConstraint};
use super::keys::*;
use super::model::*;
use super::style::FeedbackStyleBuilder;
use crate::core::notify::{ConnectionHost, ConnectionRequest, NotificationQueue};

/// Collaborators shared by every entity of one control.
pub struct EntityServices {
    pub control_id: String,
    pub definitions: Arc<dyn DefinitionStore>,
    pub connections: Arc<dyn ConnectionHost>,
    pub notifier: NotificationQueue,
    /// Used when a definition has no learn timeout of its own
    pub default_learn_timeout: Duration,
}

impl EntityServices {
    pub fn new(
        control_id: impl Into<String>,
        definitions: Arc<dyn DefinitionStore>,
        connections: Arc<dyn ConnectionHost>,
        notifier: NotificationQueue,
    ) -> Arc<Self> {
        Arc::new(Self {
            control_id: control_id.into(),
            definitions,
            connections,
            notifier,
            default_learn_timeout: Duration::from_millis(DEFAULT_LEARN_TIMEOUT_MS),
        })
    }

    pub fn with_learn_timeout(
        control_id: impl Into<String>,
        definitions: Arc<dyn DefinitionStore>,
        connections: Arc<dyn ConnectionHost>,
        notifier: NotificationQueue,
        default_learn_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            control_id: control_id.into(),
            definitions,
            connections,
            notifier,
            default_learn_timeout,
        })
    }
}

impl std::fmt::Debug for EntityServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityServices")
            .field("control_id", &self.control_id)
            .field("pending_notifications", &self.notifier.len())
            .finish()
    }
}

/// Everything needed to ask a connection to learn option values.
#[derive(Debug, Clone)]
pub struct LearnRequest {
    pub entity_id: String,
    pub connection_id: String,
    pub model: EntityModel,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct Entity {
    id: String,
    kind: EntityKind,
    definition_id: String,
    connection_id: String,
    disabled: bool,
    headline: Option<String>,
    options: SharedOptions,
    is_inverted: bool,
    style: Option<StyleMap>,
    style_overrides: Vec<FeedbackStyleOverride>,
    /// Live value reported by the connection (feedbacks only, never persisted)
    cached_value: Option<Value>,
    children: IndexMap<String, EntityList>,
    services: Arc<EntityServices>,
}

impl Entity {
    /// Build from a stored model. With `is_cloned`, this entity and every
    /// descendant gets a fresh id.
    ///
    /// Nothing is subscribed; call [`Entity::subscribe`] once the entity is placed.
    pub fn from_model(model: EntityModel, services: &Arc<EntityServices>, is_cloned: bool) -> Self {
        let id = if is_cloned { Uuid::new_v4().to_string() } else { model.id };

        let mut entity = Self {
            id,
            kind: model.kind,
            definition_id: model.definition_id,
            connection_id: model.connection_id,
            disabled: model.disabled,
            headline: model.headline,
            options: SharedOptions::new(model.options),
            is_inverted: model.is_inverted,
            style: model.style,
            style_overrides: model.style_overrides,
            cached_value: None,
            children: IndexMap::new(),
            services: Arc::clone(services),
        };

        if !model.children.is_empty() {
            let definition = entity.definition();
            for (group_id, models) in model.children {
                let group = definition
                    .as_ref()
                    .filter(|_| entity.is_internal())
                    .and_then(|d| d.child_group(&group_id));
                let Some(group) = group else {
                    warn!("Dropping unsupported child group '{}' of {}", group_id, entity.id);
                    continue;
                };
                let owner = EntityOwner { parent_id: entity.id.clone(), child_group: group_id.clone() };
                let mut list = EntityList::new(Some(owner), ListConstraint::from(group), services);
                list.load_storage(models, true, is_cloned);
                entity.children.insert(group_id, list);
            }
        }

        entity
    }

    /// Deep copy with fresh ids, not yet subscribed.
    pub fn duplicate(&self) -> Entity {
        Entity::from_model(self.to_model(), &self.services, true)
    }

    // ========== Accessors ==========

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_internal(&self) -> bool {
        self.connection_id == CONNECTION_INTERNAL
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn headline(&self) -> Option<&str> {
        self.headline.as_deref()
    }

    /// Shared handle to the raw options; mutations are visible to all holders.
    pub fn options(&self) -> &SharedOptions {
        &self.options
    }

    pub fn is_inverted(&self) -> bool {
        self.is_inverted
    }

    pub fn style(&self) -> Option<&StyleMap> {
        self.style.as_ref()
    }

    pub fn style_overrides(&self) -> &[FeedbackStyleOverride] {
        &self.style_overrides
    }

    pub fn cached_value(&self) -> Option<&Value> {
        self.cached_value.as_ref()
    }

    pub fn definition(&self) -> Option<Arc<EntityDefinition>> {
        self.services
            .definitions
            .get_entity_definition(self.kind, &self.connection_id, &self.definition_id)
    }

    pub fn child_list(&self, group_id: &str) -> Option<&EntityList> {
        self.children.get(group_id)
    }

    pub fn child_lists(&self) -> impl Iterator<Item = (&String, &EntityList)> {
        self.children.iter()
    }

    // ========== Serialization ==========

    fn to_model_shallow(&self) -> EntityModel {
        EntityModel {
            id: self.id.clone(),
            kind: self.kind,
            definition_id: self.definition_id.clone(),
            connection_id: self.connection_id.clone(),
            disabled: self.disabled,
            headline: self.headline.clone(),
            options: self.options.snapshot(),
            is_inverted: self.is_inverted,
            style: self.style.clone(),
            style_overrides: self.style_overrides.clone(),
            children: IndexMap::new(),
        }
    }

    pub fn to_model(&self) -> EntityModel {
        let mut model = self.to_model_shallow();
        model.children = self
            .children
            .iter()
            .map(|(group, list)| (group.clone(), list.to_models()))
            .collect();
        model
    }

    // ========== Connection lifecycle ==========

    /// Tell the owning connection about this entity (and optionally its children).
    pub fn subscribe(&self, recursive: bool) {
        if self.disabled {
            return;
        }
        if !self.is_internal() {
            let wants_lifecycle = match self.kind {
                EntityKind::Feedback => true,
                EntityKind::Action => self.definition().is_some_and(|d| d.has_lifecycle_functions),
            };
            if wants_lifecycle {
                self.services.notifier.push(ConnectionRequest::Update {
                    connection_id: self.connection_id.clone(),
                    control_id: self.services.control_id.clone(),
                    entity: self.to_model_shallow(),
                });
            }
        }
        if recursive {
            for list in self.children.values() {
                list.subscribe_all(true);
            }
        }
    }

    /// Tell the owning connection this entity (and all children) is going away.
    pub fn cleanup(&mut self) {
        for list in self.children.values_mut() {
            list.cleanup_all();
        }
        if !self.is_internal() {
            self.services.notifier.push(ConnectionRequest::Delete {
                connection_id: self.connection_id.clone(),
                control_id: self.services.control_id.clone(),
                entity: self.to_model_shallow(),
            });
        }
        self.cached_value = None;
    }

    // ========== Mutation ==========

    /// Returns false when already in the requested state.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.disabled != enabled {
            return false;
        }
        self.cached_value = None;
        if enabled {
            self.disabled = false;
            self.subscribe(true);
        } else {
            self.cleanup();
            self.disabled = true;
        }
        true
    }

    pub fn set_option(&mut self, key: &str, value: Value) {
        self.options.set(key, value);
        self.cached_value = None;
        self.subscribe(false);
    }

    pub fn set_options(&mut self, options: Options) {
        self.options.replace(options);
        self.cached_value = None;
        self.subscribe(false);
    }

    /// Merge learned values over the current options.
    pub fn apply_learned_options(&mut self, options: Options) {
        self.options.merge(options);
        self.cached_value = None;
        self.subscribe(false);
    }

    /// Move to another connection: clean up on the old one, then subscribe on the new one.
    pub fn set_connection_id(&mut self, connection_id: &str) -> bool {
        if self.connection_id == connection_id {
            return false;
        }
        self.cleanup();
        self.connection_id = connection_id.to_string();
        self.subscribe(true);
        true
    }

    pub fn set_inverted(&mut self, is_inverted: bool) -> bool {
        if self.kind != EntityKind::Feedback || self.is_inverted == is_inverted {
            return false;
        }
        self.is_inverted = is_inverted;
        true
    }

    pub fn set_headline(&mut self, headline: Option<String>) -> bool {
        let headline = headline.filter(|h| !h.is_empty());
        if self.headline == headline {
            return false;
        }
        self.headline = headline;
        true
    }

    /// Set one key of a boolean feedback's style. `Null` removes the key.
    pub fn set_style_value(&mut self, key: &str, value: Value) -> bool {
        if !self.definition().is_some_and(|d| d.is_boolean_feedback()) {
            return false;
        }
        let style = self.style.get_or_insert_with(StyleMap::new);
        if value.is_null() {
            style.remove(key);
        } else {
            style.insert(key.to_string(), value);
        }
        true
    }

    pub fn set_style_overrides(&mut self, overrides: Vec<FeedbackStyleOverride>) -> bool {
        if self.kind != EntityKind::Feedback {
            return false;
        }
        self.style_overrides = overrides;
        true
    }

    /// Store a live value. Returns whether it changed.
    pub fn update_feedback_value(&mut self, value: Value) -> bool {
        if self.kind != EntityKind::Feedback {
            return false;
        }
        if self.cached_value.as_ref() == Some(&value) {
            return false;
        }
        trace!("Feedback {} value -> {}", self.id, value);
        self.cached_value = Some(value);
        true
    }

    pub fn clear_cached_value(&mut self) {
        self.cached_value = None;
    }

    /// Build a learn request, if the definition supports learning.
    pub fn learn_request(&self) -> Option<LearnRequest> {
        if self.is_internal() || self.disabled {
            return None;
        }
        let definition = self.definition().filter(|d| d.has_learn)?;
        let timeout = definition
            .learn_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.services.default_learn_timeout);
        Some(LearnRequest {
            entity_id: self.id.clone(),
            connection_id: self.connection_id.clone(),
            model: self.to_model_shallow(),
            timeout,
        })
    }

    // ========== Values ==========

    /// Current boolean value. Disabled entities, non-boolean feedbacks and
    /// missing values all read as false.
    pub fn get_boolean_feedback_value(&self) -> bool {
        if self.disabled || self.kind != EntityKind::Feedback {
            return false;
        }
        let Some(definition) = self.definition() else {
            return false;
        };
        if definition.feedback_type != Some(FeedbackType::Boolean) {
            return false;
        }

        let raw = if self.is_internal() {
            match self.definition_id.as_str() {
                LOGIC_AND | LOGIC_OR | LOGIC_XOR => self.logic_value(),
                _ => self.cached_bool(),
            }
        } else {
            self.cached_bool()
        };

        if definition.show_invert && self.is_inverted { !raw } else { raw }
    }

    fn cached_bool(&self) -> bool {
        self.cached_value.as_ref().and_then(Value::as_bool).unwrap_or(false)
    }

    fn logic_value(&self) -> bool {
        let values: Vec<bool> = self
            .children
            .get(GROUP_CHILDREN)
            .map(|list| {
                list.entities()
                    .iter()
                    .filter(|e| !e.disabled())
                    .map(|e| e.get_boolean_feedback_value())
                    .collect()
            })
            .unwrap_or_default();

        match self.definition_id.as_str() {
            LOGIC_AND => !values.is_empty() && values.iter().all(|v| *v),
            LOGIC_OR => values.iter().any(|v| *v),
            LOGIC_XOR => values.iter().filter(|v| **v).count() == 1,
            _ => false,
        }
    }

    /// Contribute this feedback's output to `builder`.
    pub fn build_feedback_style(&self, builder: &mut FeedbackStyleBuilder) {
        if self.disabled || self.kind != EntityKind::Feedback {
            return;
        }

        if self.is_internal() && self.definition_id == LOGIC_CONDITIONALISE_ADVANCED {
            let conditions_hold = self.children.get(GROUP_CHILDREN).is_none_or(|l| l.get_boolean_feedback_value());
            if conditions_hold {
                if let Some(list) = self.children.get(GROUP_ADVANCED_CHILDREN) {
                    list.build_feedback_style(builder);
                }
            }
            return;
        }

        let Some(definition) = self.definition() else {
            return;
        };
        match definition.feedback_type {
            Some(FeedbackType::Boolean) => {
                if self.get_boolean_feedback_value() {
                    builder.apply_simple_style(self.style.as_ref());
                    builder.apply_overrides(&self.style_overrides);
                }
            }
            Some(FeedbackType::Advanced) => {
                if let Some(value) = &self.cached_value {
                    builder.apply_complex_style(value);
                }
            }
            Some(FeedbackType::Value) | None => {}
        }
    }

    // ========== Children ==========

    fn child_list_mut(&mut self, group_id: &str) -> Result<&mut EntityList> {
        if !self.is_internal() {
            bail!("Cannot add children to {} '{}' of connection '{}'", self.kind, self.id, self.connection_id);
        }
        let definition = self
            .definition()
            .with_context(|| format!("Unknown definition '{}' for {}", self.definition_id, self.id))?;
        let Some(group) = definition.child_group(group_id) else {
            bail!("Definition '{}' has no child group '{}'", self.definition_id, group_id);
        };

        let constraint = ListConstraint::from(group);
        let owner = EntityOwner { parent_id: self.id.clone(), child_group: group_id.to_string() };
        let services = Arc::clone(&self.services);
        Ok(self
            .children
            .entry(group_id.to_string())
            .or_insert_with(|| EntityList::new(Some(owner), constraint, &services)))
    }

    /// Check that `entity` could be pushed into `group_id` without pushing it.
    pub fn check_child_accepts(&self, group_id: &str, entity: &Entity) -> Result<()> {
        if !self.is_internal() {
            bail!("Cannot add children to {} '{}' of connection '{}'", self.kind, self.id, self.connection_id);
        }
        let definition = self
            .definition()
            .with_context(|| format!("Unknown definition '{}' for {}", self.definition_id, self.id))?;
        let group = definition
            .child_group(group_id)
            .with_context(|| format!("Definition '{}' has no child group '{}'", self.definition_id, group_id))?;
        if !ListConstraint::from(group).accepts(entity) {
            bail!("Group '{}' of {} cannot hold {} '{}'", group_id, self.id, entity.kind, entity.id);
        }
        Ok(())
    }

    /// Subscribe and append a new child.
    pub fn add_child(&mut self, group_id: &str, entity: Entity) -> Result<&Entity> {
        self.child_list_mut(group_id)?.add_entity(entity)
    }

    /// Insert an already subscribed child (used when moving).
    pub fn push_child(&mut self, group_id: &str, entity: Entity, index: usize) -> Result<()> {
        self.child_list_mut(group_id)?.push_entity(entity, index)
    }

    /// Remove and clean up a descendant.
    pub fn remove_child(&mut self, id: &str) -> bool {
        self.children.values_mut().any(|list| list.remove_entity(id))
    }

    /// Detach a descendant without cleaning it up.
    pub fn pop_child(&mut self, id: &str) -> Option<Entity> {
        self.children.values_mut().find_map(|list| list.pop_entity(id))
    }

    /// Duplicate a descendant next to itself. Returns the copy's id.
    pub fn duplicate_child(&mut self, id: &str) -> Option<String> {
        self.children.values_mut().find_map(|list| list.duplicate_entity(id))
    }

    pub fn find_child_by_id(&self, id: &str) -> Option<&Entity> {
        self.children.values().find_map(|list| list.find_by_id(id))
    }

    pub fn find_child_by_id_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.children.values_mut().find_map(|list| list.find_by_id_mut(id))
    }

    /// The child list directly holding descendant `id`, with its index there.
    pub fn find_parent_and_index(&mut self, id: &str) -> Option<(&mut EntityList, usize)> {
        for list in self.children.values_mut() {
            if let Some(found) = list.find_list_containing_mut(id) {
                return Some(found);
            }
        }
        None
    }

    // ========== Connection-wide helpers (recursive) ==========

    pub(crate) fn update_feedback_values(&mut self, connection_id: &str, values: &HashMap<String, Value>) -> bool {
        let mut changed = false;
        if self.connection_id == connection_id {
            if let Some(value) = values.get(&self.id) {
                changed |= self.update_feedback_value(value.clone());
            }
        }
        for list in self.children.values_mut() {
            changed |= list.update_feedback_values(connection_id, values);
        }
        changed
    }

    pub(crate) fn clear_cached_values(&mut self, connection_id: &str) {
        if self.connection_id == connection_id {
            self.cached_value = None;
        }
        for list in self.children.values_mut() {
            list.clear_cached_values(connection_id);
        }
    }

    pub(crate) fn retain_connections(&mut self, keep: &dyn Fn(&str) -> bool) -> bool {
        self.children.values_mut().fold(false, |changed, list| list.retain_connections(keep) || changed)
    }

    pub(crate) fn collect_enabled_connection_ids(&self, out: &mut HashSet<String>) {
        if self.disabled {
            return;
        }
        out.insert(self.connection_id.clone());
        for list in self.children.values() {
            list.collect_enabled_connection_ids(out);
        }
    }

    pub(crate) fn collect_entities<'a>(&'a self, out: &mut Vec<&'a Entity>) {
        out.push(self);
        for list in self.children.values() {
            list.collect_entities(out);
        }
    }
}
