//! Shared fixtures for entity tests: a recording connection host and a
//! definition registry with a handful of `conn` definitions.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use super::definitions::{DefinitionRegistry, EntityDefinition, FeedbackType};
use super::entity::{Entity, EntityServices};
use super::model::{EntityKind, EntityModel, Options};
use crate::core::notify::{ConnectionHost, ConnectionRequest, NotificationQueue};

#[derive(Default)]
pub(crate) struct RecordingHost {
    pub calls: Mutex<Vec<String>>,
    pub learned: Mutex<Option<Options>>,
    pub learn_delay: Mutex<Duration>,
}

impl ConnectionHost for RecordingHost {
    fn entity_update(&self, connection_id: &str, _control_id: &str, entity: &EntityModel) -> Result<()> {
        self.calls.lock().unwrap().push(format!("update:{}:{}", connection_id, entity.id));
        Ok(())
    }

    fn entity_delete(&self, connection_id: &str, _control_id: &str, entity: &EntityModel) -> Result<()> {
        self.calls.lock().unwrap().push(format!("delete:{}:{}", connection_id, entity.id));
        Ok(())
    }

    fn learn_values(&self, connection_id: &str, _control_id: &str, entity: &EntityModel) -> Result<Option<Options>> {
        self.calls.lock().unwrap().push(format!("learn:{}:{}", connection_id, entity.id));
        let delay = *self.learn_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(self.learned.lock().unwrap().clone())
    }
}

pub(crate) struct TestEnv {
    pub registry: Arc<DefinitionRegistry>,
    pub host: Arc<RecordingHost>,
    pub notifier: NotificationQueue,
    pub services: Arc<EntityServices>,
}

impl TestEnv {
    pub fn new() -> Self {
        let registry = Arc::new(DefinitionRegistry::new());
        registry.register(EntityDefinition::boolean_feedback("conn", "invertible"));
        registry.register(EntityDefinition {
            show_invert: false,
            ..EntityDefinition::boolean_feedback("conn", "no_invert")
        });
        registry.register(EntityDefinition {
            feedback_type: Some(FeedbackType::Advanced),
            ..EntityDefinition::new(EntityKind::Feedback, "conn", "advanced")
        });
        registry.register(EntityDefinition::new(EntityKind::Action, "conn", "press"));
        registry.register(EntityDefinition {
            has_learn: true,
            learn_timeout_ms: Some(100),
            ..EntityDefinition::boolean_feedback("conn", "learnable")
        });

        let host = Arc::new(RecordingHost::default());
        let notifier = NotificationQueue::new(256);
        let services = EntityServices::with_learn_timeout(
            "control1",
            registry.clone(),
            host.clone(),
            notifier.clone(),
            Duration::from_millis(500),
        );
        Self { registry, host, notifier, services }
    }

    /// Build an entity without subscribing it.
    pub fn entity(&self, model: EntityModel) -> Entity {
        Entity::from_model(model, &self.services, false)
    }

    /// Drain queued notifications as `update:<conn>:<id>` / `delete:<conn>:<id>`.
    pub fn drained(&self) -> Vec<String> {
        self.notifier
            .drain()
            .into_iter()
            .map(|request| match request {
                ConnectionRequest::Update { connection_id, entity, .. } => {
                    format!("update:{}:{}", connection_id, entity.id)
                }
                ConnectionRequest::Delete { connection_id, entity, .. } => {
                    format!("delete:{}:{}", connection_id, entity.id)
                }
            })
            .collect()
    }
}

pub(crate) fn feedback_model(id: &str, connection_id: &str, definition_id: &str) -> EntityModel {
    EntityModel::new(id, EntityKind::Feedback, connection_id, definition_id)
}

pub(crate) fn action_model(id: &str, connection_id: &str, definition_id: &str) -> EntityModel {
    EntityModel::new(id, EntityKind::Action, connection_id, definition_id)
}
