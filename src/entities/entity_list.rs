//! Ordered list of entities: a control's feedbacks, an action set, or a child group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, warn};
use serde_json::Value;

use super::definitions::ChildGroupDefinition;
use super::entity::{Entity, EntityServices};
use super::model::{EntityKind, EntityModel};
use super::style::FeedbackStyleBuilder;

/// Parent entity and child group of a nested list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOwner {
    pub parent_id: String,
    pub child_group: String,
}

/// What a list may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListConstraint {
    pub kind: EntityKind,
    pub boolean_only: bool,
}

impl ListConstraint {
    pub fn actions() -> Self {
        Self { kind: EntityKind::Action, boolean_only: false }
    }

    pub fn feedbacks() -> Self {
        Self { kind: EntityKind::Feedback, boolean_only: false }
    }

    pub fn boolean_feedbacks() -> Self {
        Self { kind: EntityKind::Feedback, boolean_only: true }
    }

    pub fn accepts(&self, entity: &Entity) -> bool {
        if entity.kind() != self.kind {
            return false;
        }
        !self.boolean_only || entity.definition().is_some_and(|d| d.is_boolean_feedback())
    }
}

impl From<&ChildGroupDefinition> for ListConstraint {
    fn from(group: &ChildGroupDefinition) -> Self {
        Self { kind: group.entity_kind, boolean_only: group.boolean_only }
    }
}

#[derive(Debug)]
pub struct EntityList {
    owner: Option<EntityOwner>,
    constraint: ListConstraint,
    entities: Vec<Entity>,
    services: Arc<EntityServices>,
}

impl EntityList {
    pub fn new(owner: Option<EntityOwner>, constraint: ListConstraint, services: &Arc<EntityServices>) -> Self {
        Self { owner, constraint, entities: Vec::new(), services: Arc::clone(services) }
    }

    pub fn owner(&self) -> Option<&EntityOwner> {
        self.owner.as_ref()
    }

    pub fn constraint(&self) -> ListConstraint {
        self.constraint
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Replace the contents from stored models, cleaning up the old entities first.
    /// Models the list constraint rejects are dropped before anything subscribes.
    pub fn load_storage(&mut self, models: Vec<EntityModel>, skip_subscribe: bool, is_cloned: bool) {
        self.cleanup_all();
        let constraint = self.constraint;
        self.entities = models
            .into_iter()
            .map(|model| Entity::from_model(model, &self.services, is_cloned))
            .filter(|entity| {
                let accepted = constraint.accepts(entity);
                if !accepted {
                    warn!(
                        "Dropping stored {} '{}' ({}/{}): list cannot hold it",
                        entity.kind(),
                        entity.id(),
                        entity.connection_id(),
                        entity.definition_id()
                    );
                }
                accepted
            })
            .collect();
        if !skip_subscribe {
            self.subscribe_all(true);
        }
    }

    pub fn can_accept_entity(&self, entity: &Entity) -> bool {
        self.constraint.accepts(entity)
    }

    /// Append and subscribe a new entity.
    pub fn add_entity(&mut self, entity: Entity) -> Result<&Entity> {
        if !self.can_accept_entity(&entity) {
            bail!(
                "List cannot hold {} '{}' ({}/{})",
                entity.kind(),
                entity.id(),
                entity.connection_id(),
                entity.definition_id()
            );
        }
        entity.subscribe(true);
        self.entities.push(entity);
        let index = self.entities.len() - 1;
        Ok(&self.entities[index])
    }

    /// Insert an entity that is already subscribed (the target of a move).
    /// The index is clamped to the list bounds.
    pub fn push_entity(&mut self, entity: Entity, index: usize) -> Result<()> {
        if !self.can_accept_entity(&entity) {
            bail!("List cannot hold {} '{}'", entity.kind(), entity.id());
        }
        let index = index.min(self.entities.len());
        self.entities.insert(index, entity);
        Ok(())
    }

    /// Detach an entity anywhere in this subtree, without cleanup.
    pub fn pop_entity(&mut self, id: &str) -> Option<Entity> {
        if let Some(index) = self.entities.iter().position(|e| e.id() == id) {
            return Some(self.entities.remove(index));
        }
        self.entities.iter_mut().find_map(|e| e.pop_child(id))
    }

    /// Remove and clean up an entity anywhere in this subtree.
    pub fn remove_entity(&mut self, id: &str) -> bool {
        match self.pop_entity(id) {
            Some(mut entity) => {
                entity.cleanup();
                debug!("Removed entity {}", id);
                true
            }
            None => false,
        }
    }

    /// Duplicate an entity anywhere in this subtree and insert the copy after it.
    pub fn duplicate_entity(&mut self, id: &str) -> Option<String> {
        if let Some(index) = self.entities.iter().position(|e| e.id() == id) {
            let copy = self.entities[index].duplicate();
            copy.subscribe(true);
            let new_id = copy.id().to_string();
            self.entities.insert(index + 1, copy);
            return Some(new_id);
        }
        self.entities.iter_mut().find_map(|e| e.duplicate_child(id))
    }

    /// Reorder within this list. The target index is clamped.
    pub fn move_entity(&mut self, old_index: usize, new_index: usize) -> bool {
        if old_index >= self.entities.len() {
            return false;
        }
        let entity = self.entities.remove(old_index);
        let new_index = new_index.min(self.entities.len());
        self.entities.insert(new_index, entity);
        true
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find_map(|e| if e.id() == id { Some(e) } else { e.find_child_by_id(id) })
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Entity> {
        for entity in self.entities.iter_mut() {
            if entity.id() == id {
                return Some(entity);
            }
            if let Some(found) = entity.find_child_by_id_mut(id) {
                return Some(found);
            }
        }
        None
    }

    /// The list (this one or a nested one) directly holding `id`, and its index.
    pub fn find_list_containing_mut(&mut self, id: &str) -> Option<(&mut EntityList, usize)> {
        if let Some(index) = self.entities.iter().position(|e| e.id() == id) {
            return Some((self, index));
        }
        for entity in self.entities.iter_mut() {
            if let Some(found) = entity.find_parent_and_index(id) {
                return Some(found);
            }
        }
        None
    }

    /// AND over the enabled entities. Empty (or all disabled) reads as true.
    pub fn get_boolean_feedback_value(&self) -> bool {
        self.entities
            .iter()
            .filter(|e| !e.disabled())
            .all(|e| e.get_boolean_feedback_value())
    }

    pub fn build_feedback_style(&self, builder: &mut FeedbackStyleBuilder) {
        for entity in &self.entities {
            entity.build_feedback_style(builder);
        }
    }

    /// Apply new values keyed by entity id. Returns whether anything changed.
    pub fn update_feedback_values(&mut self, connection_id: &str, values: &HashMap<String, Value>) -> bool {
        self.entities
            .iter_mut()
            .fold(false, |changed, e| e.update_feedback_values(connection_id, values) || changed)
    }

    pub fn clear_cached_values(&mut self, connection_id: &str) {
        for entity in self.entities.iter_mut() {
            entity.clear_cached_values(connection_id);
        }
    }

    /// Drop every entity of a deleted connection, recursively. No cleanup is
    /// sent since the connection is gone.
    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        self.retain_connections(&|conn| conn != connection_id)
    }

    /// Drop entities whose connection is not in `known` (internal is always kept).
    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        self.retain_connections(&|conn| conn == super::keys::CONNECTION_INTERNAL || known.contains(conn))
    }

    pub(crate) fn retain_connections(&mut self, keep: &dyn Fn(&str) -> bool) -> bool {
        let before = self.entities.len();
        self.entities.retain(|e| keep(e.connection_id()));
        let mut changed = self.entities.len() != before;
        for entity in self.entities.iter_mut() {
            changed |= entity.retain_connections(keep);
        }
        changed
    }

    pub fn get_all_enabled_connection_ids(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_enabled_connection_ids(&mut out);
        out
    }

    pub(crate) fn collect_enabled_connection_ids(&self, out: &mut HashSet<String>) {
        for entity in &self.entities {
            entity.collect_enabled_connection_ids(out);
        }
    }

    pub fn to_models(&self) -> Vec<EntityModel> {
        self.entities.iter().map(Entity::to_model).collect()
    }

    /// Every entity in this subtree, depth first.
    pub fn get_all_entities(&self) -> Vec<&Entity> {
        let mut out = Vec::new();
        self.collect_entities(&mut out);
        out
    }

    pub(crate) fn collect_entities<'a>(&'a self, out: &mut Vec<&'a Entity>) {
        for entity in &self.entities {
            entity.collect_entities(out);
        }
    }

    pub fn subscribe_all(&self, recursive: bool) {
        for entity in &self.entities {
            entity.subscribe(recursive);
        }
    }

    pub fn cleanup_all(&mut self) {
        for entity in self.entities.iter_mut() {
            entity.cleanup();
        }
    }
}
