//! Entities module - actions and feedbacks attached to a control
//!
//! - [`Entity`]: one action/feedback instance with its options and child groups
//! - [`EntityList`]: ordered, constrained list of entities
//! - [`EntityListPool`]: a control's top-level lists and the mutation API
//!
//! Feedback values flow out of this module only as a style plus per-element
//! overrides ([`FeedbackStyleBuilder`]).

pub mod definitions;
pub mod entity;
pub mod entity_list;
pub mod events;
pub mod keys;
pub mod model;
pub mod pool;
pub mod style;

#[cfg(test)]
pub(crate) mod test_support;

pub use definitions::{ChildGroupDefinition, DefinitionRegistry, DefinitionStore, EntityDefinition, FeedbackType};
pub use entity::{Entity, EntityServices, LearnRequest};
pub use entity_list::{EntityList, EntityOwner, ListConstraint};
pub use events::ControlChangedEvent;
pub use model::{EntityKind, EntityModel, FeedbackStyleOverride, Options, SharedOptions, StyleMap};
pub use pool::{EntityListPool, ListId, PendingLearn, PoolKind};
pub use style::FeedbackStyleBuilder;
