//! Per-control collection of top-level entity lists and the mutation API.
//!
//! A button pool holds `feedbacks` plus four action sets per step; a trigger
//! pool holds boolean-only `feedbacks` (its conditions) plus `trigger_actions`.
//! Every successful mutation emits a [`ControlChangedEvent`] on the event bus.
//!
//! Endpoints resolve `(list_id, entity_id)` and soft-fail with `false`/`None`
//! when either is unknown. Inserting something a list cannot hold is an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::entity::{Entity, EntityServices};
use super::entity_list::{EntityList, EntityOwner, ListConstraint};
use super::events::ControlChangedEvent;
use super::keys::*;
use super::model::{EntityModel, FeedbackStyleOverride, Options};
use super::style::FeedbackStyleBuilder;
use crate::core::event_bus::EventBus;

/// Address of a top-level list within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListId {
    Feedbacks,
    TriggerActions,
    #[serde(rename_all = "camelCase")]
    ActionSet { step_id: String, set_id: String },
}

impl ListId {
    pub fn action_set(step_id: &str, set_id: &str) -> Self {
        ListId::ActionSet { step_id: step_id.to_string(), set_id: set_id.to_string() }
    }
}

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListId::Feedbacks => write!(f, "{}", LIST_FEEDBACKS),
            ListId::TriggerActions => write!(f, "{}", LIST_TRIGGER_ACTIONS),
            ListId::ActionSet { step_id, set_id } => write!(f, "step:{}:{}", step_id, set_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Button,
    Trigger,
}

/// In-flight learn request. Carries ids only; the entity is looked up again
/// when the answer arrives.
#[derive(Debug)]
pub struct PendingLearn {
    pub list_id: ListId,
    pub entity_id: String,
    timeout: Duration,
    receiver: Receiver<Result<Option<Options>>>,
}

impl PendingLearn {
    /// Block for the connection's answer. Failures and timeouts yield `None`.
    pub fn wait(&self) -> Option<Options> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(Ok(options)) => options,
            Ok(Err(e)) => {
                warn!("Learn for {} failed: {:#}", self.entity_id, e);
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Learn for {} timed out after {:?}", self.entity_id, self.timeout);
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Learn worker for {} went away", self.entity_id);
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct EntityListPool {
    kind: PoolKind,
    services: Arc<EntityServices>,
    events: EventBus,
    lists: IndexMap<ListId, EntityList>,
}

impl EntityListPool {
    /// Button pool with feedbacks and one initial step.
    pub fn new_button(services: Arc<EntityServices>, events: EventBus) -> Self {
        let mut lists = IndexMap::new();
        lists.insert(ListId::Feedbacks, EntityList::new(None, ListConstraint::feedbacks(), &services));
        let mut pool = Self { kind: PoolKind::Button, services, events, lists };
        pool.insert_step(&Uuid::new_v4().to_string());
        pool
    }

    pub fn new_trigger(services: Arc<EntityServices>, events: EventBus) -> Self {
        let mut lists = IndexMap::new();
        lists.insert(ListId::Feedbacks, EntityList::new(None, ListConstraint::boolean_feedbacks(), &services));
        lists.insert(ListId::TriggerActions, EntityList::new(None, ListConstraint::actions(), &services));
        Self { kind: PoolKind::Trigger, services, events, lists }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn control_id(&self) -> &str {
        &self.services.control_id
    }

    pub fn get_entity_list(&self, list_id: &ListId) -> Option<&EntityList> {
        self.lists.get(list_id)
    }

    pub fn list_ids(&self) -> impl Iterator<Item = &ListId> {
        self.lists.keys()
    }

    fn changed(&self, redraw: bool) {
        self.events.emit(ControlChangedEvent { control_id: self.services.control_id.clone(), redraw });
    }

    /// Run `f` on one entity; emit when it reports a change.
    fn with_entity<F>(&mut self, list_id: &ListId, entity_id: &str, redraw: bool, f: F) -> bool
    where
        F: FnOnce(&mut Entity) -> bool,
    {
        let Some(entity) = self.lists.get_mut(list_id).and_then(|l| l.find_by_id_mut(entity_id)) else {
            trace!("No entity {} in {}", entity_id, list_id);
            return false;
        };
        let changed = f(entity);
        if changed {
            self.changed(redraw);
        }
        changed
    }

    // ========== Steps ==========

    fn insert_step(&mut self, step_id: &str) {
        for set_id in STEP_ACTION_SETS {
            let list = EntityList::new(None, ListConstraint::actions(), &self.services);
            self.lists.insert(ListId::action_set(step_id, set_id), list);
        }
    }

    /// Ids of the steps, in creation order.
    pub fn step_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for list_id in self.lists.keys() {
            if let ListId::ActionSet { step_id, .. } = list_id {
                if !ids.contains(step_id) {
                    ids.push(step_id.clone());
                }
            }
        }
        ids
    }

    /// Add a step with empty action sets. Triggers have no steps.
    pub fn step_add(&mut self) -> Option<String> {
        if self.kind != PoolKind::Button {
            return None;
        }
        let step_id = Uuid::new_v4().to_string();
        self.insert_step(&step_id);
        debug!("Control {} added step {}", self.services.control_id, step_id);
        self.changed(true);
        Some(step_id)
    }

    /// Remove a step and clean up its actions. The last step cannot be removed.
    pub fn step_remove(&mut self, step_id: &str) -> bool {
        let steps = self.step_ids();
        if steps.len() <= 1 || !steps.iter().any(|s| s == step_id) {
            return false;
        }
        for set_id in STEP_ACTION_SETS {
            if let Some(mut list) = self.lists.shift_remove(&ListId::action_set(step_id, set_id)) {
                list.cleanup_all();
            }
        }
        self.changed(true);
        true
    }

    // ========== Entity endpoints ==========

    /// Replace a list's contents from storage.
    pub fn load_list(&mut self, list_id: &ListId, models: Vec<EntityModel>, is_cloned: bool) -> bool {
        let Some(list) = self.lists.get_mut(list_id) else {
            return false;
        };
        list.load_storage(models, false, is_cloned);
        self.changed(true);
        true
    }

    /// Add an entity at the top of a list or into a child group of `owner`.
    /// Returns the new entity's id.
    pub fn entity_add(
        &mut self,
        list_id: &ListId,
        owner: Option<&EntityOwner>,
        model: EntityModel,
        is_cloned: bool,
    ) -> Result<Option<String>> {
        let Some(list) = self.lists.get_mut(list_id) else {
            return Ok(None);
        };
        let entity = Entity::from_model(model, &self.services, is_cloned);
        let id = match owner {
            Some(owner) => {
                let Some(parent) = list.find_by_id_mut(&owner.parent_id) else {
                    return Ok(None);
                };
                parent.add_child(&owner.child_group, entity)?.id().to_string()
            }
            None => list.add_entity(entity)?.id().to_string(),
        };
        debug!("Control {} added entity {} to {}", self.services.control_id, id, list_id);
        self.changed(true);
        Ok(Some(id))
    }

    pub fn entity_remove(&mut self, list_id: &ListId, entity_id: &str) -> bool {
        let removed = self.lists.get_mut(list_id).is_some_and(|l| l.remove_entity(entity_id));
        if removed {
            self.changed(true);
        }
        removed
    }

    /// Duplicate next to the original. Returns the copy's id.
    pub fn entity_duplicate(&mut self, list_id: &ListId, entity_id: &str) -> Option<String> {
        let new_id = self.lists.get_mut(list_id)?.duplicate_entity(entity_id)?;
        self.changed(true);
        Some(new_id)
    }

    pub fn entity_enabled(&mut self, list_id: &ListId, entity_id: &str, enabled: bool) -> bool {
        self.with_entity(list_id, entity_id, true, |e| e.set_enabled(enabled))
    }

    /// Headline is metadata only; no redraw.
    pub fn entity_headline(&mut self, list_id: &ListId, entity_id: &str, headline: Option<String>) -> bool {
        self.with_entity(list_id, entity_id, false, |e| e.set_headline(headline))
    }

    pub fn entity_set_options(&mut self, list_id: &ListId, entity_id: &str, options: Options) -> bool {
        self.with_entity(list_id, entity_id, true, |e| {
            e.set_options(options);
            true
        })
    }

    pub fn entity_set_option(&mut self, list_id: &ListId, entity_id: &str, key: &str, value: Value) -> bool {
        self.with_entity(list_id, entity_id, true, |e| {
            e.set_option(key, value);
            true
        })
    }

    pub fn entity_set_connection(&mut self, list_id: &ListId, entity_id: &str, connection_id: &str) -> bool {
        self.with_entity(list_id, entity_id, true, |e| e.set_connection_id(connection_id))
    }

    pub fn entity_set_inverted(&mut self, list_id: &ListId, entity_id: &str, is_inverted: bool) -> bool {
        self.with_entity(list_id, entity_id, true, |e| e.set_inverted(is_inverted))
    }

    pub fn entity_set_style_value(&mut self, list_id: &ListId, entity_id: &str, key: &str, value: Value) -> bool {
        self.with_entity(list_id, entity_id, true, |e| e.set_style_value(key, value))
    }

    pub fn entity_set_style_overrides(
        &mut self,
        list_id: &ListId,
        entity_id: &str,
        overrides: Vec<FeedbackStyleOverride>,
    ) -> bool {
        self.with_entity(list_id, entity_id, true, |e| e.set_style_overrides(overrides))
    }

    /// Move an entity to another position, parent or list.
    ///
    /// Acceptance is checked before anything is detached, so a rejected move
    /// leaves the tree untouched. Moving an entity into itself or one of its
    /// descendants is rejected.
    pub fn entity_move_to(
        &mut self,
        list_id: &ListId,
        entity_id: &str,
        target_list_id: &ListId,
        target_owner: Option<&EntityOwner>,
        index: usize,
    ) -> Result<bool> {
        let Some(entity) = self.lists.get(list_id).and_then(|l| l.find_by_id(entity_id)) else {
            return Ok(false);
        };
        let Some(target_list) = self.lists.get(target_list_id) else {
            return Ok(false);
        };

        match target_owner {
            Some(owner) => {
                if owner.parent_id == entity_id || entity.find_child_by_id(&owner.parent_id).is_some() {
                    bail!("Cannot move {} into itself", entity_id);
                }
                let Some(parent) = target_list.find_by_id(&owner.parent_id) else {
                    return Ok(false);
                };
                parent.check_child_accepts(&owner.child_group, entity)?;
            }
            None => {
                if !target_list.can_accept_entity(entity) {
                    bail!("{} cannot hold {} '{}'", target_list_id, entity.kind(), entity_id);
                }
            }
        }

        let Some(entity) = self.lists.get_mut(list_id).and_then(|l| l.pop_entity(entity_id)) else {
            return Ok(false);
        };
        let Some(target_list) = self.lists.get_mut(target_list_id) else {
            return Ok(false);
        };
        match target_owner {
            Some(owner) => match target_list.find_by_id_mut(&owner.parent_id) {
                Some(parent) => parent.push_child(&owner.child_group, entity, index)?,
                None => bail!("Move target {} disappeared", owner.parent_id),
            },
            None => target_list.push_entity(entity, index)?,
        }

        self.changed(true);
        Ok(true)
    }

    // ========== Learn ==========

    /// Ask the owning connection for option values. Returns a handle to wait on,
    /// or `None` when the entity is unknown or its definition cannot learn.
    pub fn begin_learn(&self, list_id: &ListId, entity_id: &str) -> Option<PendingLearn> {
        let request = self.lists.get(list_id)?.find_by_id(entity_id)?.learn_request()?;
        let timeout = request.timeout;

        let (sender, receiver) = bounded(1);
        let connections = Arc::clone(&self.services.connections);
        let control_id = self.services.control_id.clone();
        let spawned = thread::Builder::new().name("buttonface-learn".to_string()).spawn(move || {
            let result = connections.learn_values(&request.connection_id, &control_id, &request.model);
            // Receiver is gone when the caller stopped waiting
            let _ = sender.send(result);
        });
        if let Err(e) = spawned {
            warn!("Failed to spawn learn worker: {}", e);
            return None;
        }

        Some(PendingLearn {
            list_id: list_id.clone(),
            entity_id: entity_id.to_string(),
            timeout,
            receiver,
        })
    }

    /// Wait for a learn answer and merge it into the entity, if it still exists.
    pub fn finish_learn(&mut self, pending: PendingLearn) -> bool {
        let Some(options) = pending.wait() else {
            return false;
        };
        let applied = self.with_entity(&pending.list_id, &pending.entity_id, true, |e| {
            e.apply_learned_options(options);
            true
        });
        if !applied {
            debug!("Learned values for {} discarded, entity is gone", pending.entity_id);
        }
        applied
    }

    /// Learn and apply in one call.
    pub fn entity_learn(&mut self, list_id: &ListId, entity_id: &str) -> bool {
        match self.begin_learn(list_id, entity_id) {
            Some(pending) => self.finish_learn(pending),
            None => false,
        }
    }

    // ========== Feedback values ==========

    /// Store values reported by a connection, keyed by entity id.
    pub fn update_feedback_values(&mut self, connection_id: &str, values: &HashMap<String, Value>) -> bool {
        let changed = self
            .lists
            .values_mut()
            .fold(false, |changed, list| list.update_feedback_values(connection_id, values) || changed);
        if changed {
            self.changed(true);
        }
        changed
    }

    pub fn clear_cached_values(&mut self, connection_id: &str) {
        for list in self.lists.values_mut() {
            list.clear_cached_values(connection_id);
        }
        self.changed(true);
    }

    /// Drop every entity of a deleted connection.
    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        let changed = self
            .lists
            .values_mut()
            .fold(false, |changed, list| list.forget_connection(connection_id) || changed);
        if changed {
            self.changed(true);
        }
        changed
    }

    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        let changed = self
            .lists
            .values_mut()
            .fold(false, |changed, list| list.verify_connection_ids(known) || changed);
        if changed {
            self.changed(true);
        }
        changed
    }

    pub fn get_all_enabled_connection_ids(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        for list in self.lists.values() {
            list.collect_enabled_connection_ids(&mut out);
        }
        out
    }

    /// AND over the feedbacks list.
    pub fn get_boolean_feedback_value(&self) -> bool {
        self.lists.get(&ListId::Feedbacks).is_none_or(|l| l.get_boolean_feedback_value())
    }

    /// Trigger conditions: true when every enabled condition holds.
    pub fn check_conditions(&self) -> bool {
        self.get_boolean_feedback_value()
    }

    /// Collect style and element overrides from the feedbacks list, in order.
    pub fn build_feedback_style(&self) -> FeedbackStyleBuilder {
        let mut builder = FeedbackStyleBuilder::new();
        if let Some(list) = self.lists.get(&ListId::Feedbacks) {
            list.build_feedback_style(&mut builder);
        }
        builder
    }

    // ========== Lifecycle ==========

    pub fn get_all_entities(&self) -> Vec<&Entity> {
        let mut out = Vec::new();
        for list in self.lists.values() {
            list.collect_entities(&mut out);
        }
        out
    }

    pub fn to_models(&self) -> IndexMap<ListId, Vec<EntityModel>> {
        self.lists.iter().map(|(id, list)| (id.clone(), list.to_models())).collect()
    }

    /// Clean up every entity. The pool stays usable but empty.
    pub fn destroy(&mut self) {
        for list in self.lists.values_mut() {
            // Cleans up the previous contents
            list.load_storage(Vec::new(), true, false);
        }
        debug!("Control {} entities destroyed", self.services.control_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::test_support::*;
    use serde_json::json;

    fn button(env: &TestEnv) -> (EntityListPool, EventBus) {
        let bus = EventBus::new();
        (EntityListPool::new_button(env.services.clone(), bus.clone()), bus)
    }

    fn logic_owner(parent: &str) -> EntityOwner {
        EntityOwner { parent_id: parent.to_string(), child_group: GROUP_CHILDREN.to_string() }
    }

    #[test]
    fn test_button_steps() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        let first = pool.step_ids();
        assert_eq!(first.len(), 1);
        assert!(pool.get_entity_list(&ListId::action_set(&first[0], SET_ROTATE_LEFT)).is_some());

        let second = pool.step_add().unwrap();
        assert_eq!(pool.step_ids().len(), 2);
        assert!(pool.step_remove(&first[0]));
        assert!(!pool.step_remove(&second));
        assert_eq!(pool.step_ids(), vec![second]);
    }

    #[test]
    fn test_headline_does_not_redraw() {
        let env = TestEnv::new();
        let (mut pool, bus) = button(&env);
        let id = pool
            .entity_add(&ListId::Feedbacks, None, feedback_model("a", "conn", "invertible"), false)
            .unwrap()
            .unwrap();
        assert!(pool.entity_headline(&ListId::Feedbacks, &id, Some("Note".into())));
        assert!(!pool.entity_headline(&ListId::Feedbacks, &id, Some("Note".into())));

        let events = bus.poll_of::<ControlChangedEvent>();
        let redraws: Vec<bool> = events.iter().map(|e| e.redraw).collect();
        assert_eq!(redraws, vec![true, false]);
        assert_eq!(events[0].control_id, "control1");
    }

    #[test]
    fn test_unknown_targets_soft_fail() {
        let env = TestEnv::new();
        let (mut pool, bus) = button(&env);
        assert!(!pool.entity_remove(&ListId::Feedbacks, "missing"));
        assert!(!pool.entity_enabled(&ListId::TriggerActions, "missing", false));
        assert_eq!(
            pool.entity_add(&ListId::TriggerActions, None, action_model("x", "conn", "press"), false)
                .unwrap(),
            None
        );
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_trigger_conditions() {
        let env = TestEnv::new();
        let mut pool = EntityListPool::new_trigger(env.services.clone(), EventBus::new());
        assert!(pool.check_conditions());

        assert!(pool
            .entity_add(&ListId::Feedbacks, None, feedback_model("v", "conn", "advanced"), false)
            .is_err());
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("a", "conn", "invertible"), false)
            .unwrap();
        assert!(!pool.check_conditions());

        let values = HashMap::from([("a".to_string(), json!(true))]);
        assert!(pool.update_feedback_values("conn", &values));
        assert!(pool.check_conditions());
        assert!(pool.entity_set_inverted(&ListId::Feedbacks, "a", true));
        assert!(!pool.check_conditions());
    }

    #[test]
    fn test_nested_add_and_style() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("or", CONNECTION_INTERNAL, LOGIC_OR), false)
            .unwrap();
        let child = pool
            .entity_add(&ListId::Feedbacks, Some(&logic_owner("or")), feedback_model("c", "conn", "invertible"), false)
            .unwrap();
        assert_eq!(child.as_deref(), Some("c"));

        assert!(pool.entity_set_style_value(&ListId::Feedbacks, "or", "bgcolor", json!(7)));
        assert!(pool.build_feedback_style().style().is_empty());

        pool.update_feedback_values("conn", &HashMap::from([("c".to_string(), json!(true))]));
        assert_eq!(pool.build_feedback_style().style().get("bgcolor"), Some(&json!(7)));
        assert_eq!(pool.get_all_entities().len(), 2);
    }

    #[test]
    fn test_move_to_checks_before_detaching() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        let step = pool.step_ids().remove(0);
        let down = ListId::action_set(&step, SET_DOWN);

        pool.entity_add(&ListId::Feedbacks, None, feedback_model("and", CONNECTION_INTERNAL, LOGIC_AND), false)
            .unwrap();
        pool.entity_add(&ListId::Feedbacks, Some(&logic_owner("and")), feedback_model("c", "conn", "invertible"), false)
            .unwrap();
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("v", "conn", "advanced"), false)
            .unwrap();

        // Feedback into an action set
        assert!(pool.entity_move_to(&ListId::Feedbacks, "c", &down, None, 0).is_err());
        // Non-boolean feedback into a boolean-only group
        assert!(pool
            .entity_move_to(&ListId::Feedbacks, "v", &ListId::Feedbacks, Some(&logic_owner("and")), 0)
            .is_err());
        // Into itself
        assert!(pool
            .entity_move_to(&ListId::Feedbacks, "and", &ListId::Feedbacks, Some(&logic_owner("and")), 0)
            .is_err());
        assert!(pool.get_entity_list(&ListId::Feedbacks).unwrap().find_by_id("c").is_some());
        assert!(pool.get_entity_list(&ListId::Feedbacks).unwrap().find_by_id("v").is_some());

        // Out of the logic group to the top
        assert!(pool.entity_move_to(&ListId::Feedbacks, "c", &ListId::Feedbacks, None, 0).unwrap());
        let list = pool.get_entity_list(&ListId::Feedbacks).unwrap();
        let ids: Vec<&str> = list.entities().iter().map(Entity::id).collect();
        assert_eq!(ids, vec!["c", "and", "v"]);
        assert!(list.find_by_id("and").unwrap().child_list(GROUP_CHILDREN).unwrap().is_empty());
    }

    #[test]
    fn test_learn_applies_to_live_entity() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("l", "conn", "learnable"), false)
            .unwrap();
        *env.host.learned.lock().unwrap() = Some(Options::from([("channel".to_string(), json!(4))]));

        assert!(pool.entity_learn(&ListId::Feedbacks, "l"));
        let entity = pool.get_entity_list(&ListId::Feedbacks).unwrap().find_by_id("l").unwrap();
        assert_eq!(entity.options().get("channel"), Some(json!(4)));

        // Definitions without learn support never start a request
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("p", "conn", "invertible"), false)
            .unwrap();
        assert!(pool.begin_learn(&ListId::Feedbacks, "p").is_none());
    }

    #[test]
    fn test_learn_discarded_after_removal() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("l", "conn", "learnable"), false)
            .unwrap();
        *env.host.learned.lock().unwrap() = Some(Options::from([("channel".to_string(), json!(4))]));

        let pending = pool.begin_learn(&ListId::Feedbacks, "l").unwrap();
        assert!(pool.entity_remove(&ListId::Feedbacks, "l"));
        assert!(!pool.finish_learn(pending));
    }

    #[test]
    fn test_learn_timeout_is_noop() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("l", "conn", "learnable"), false)
            .unwrap();
        *env.host.learned.lock().unwrap() = Some(Options::from([("channel".to_string(), json!(4))]));
        *env.host.learn_delay.lock().unwrap() = Duration::from_millis(400);

        assert!(!pool.entity_learn(&ListId::Feedbacks, "l"));
        let entity = pool.get_entity_list(&ListId::Feedbacks).unwrap().find_by_id("l").unwrap();
        assert_eq!(entity.options().get("channel"), None);
    }

    #[test]
    fn test_destroy_cleans_up_everything() {
        let env = TestEnv::new();
        let (mut pool, _) = button(&env);
        let step = pool.step_ids().remove(0);
        pool.entity_add(&ListId::Feedbacks, None, feedback_model("a", "conn", "invertible"), false)
            .unwrap();
        pool.entity_add(&ListId::action_set(&step, SET_UP), None, action_model("b", "conn", "press"), false)
            .unwrap();
        env.notifier.drain();

        pool.destroy();
        let mut drained = env.drained();
        drained.sort();
        assert_eq!(drained, vec!["delete:conn:a", "delete:conn:b"]);
        assert!(pool.get_all_entities().is_empty());
    }
}
