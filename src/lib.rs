//! buttonface - entity trees and cached layer conversion for control surface buttons
//!
//! Re-exports all modules for use by the binary target.

// Core engine (element cache, events, connection notifications)
pub mod core;

// Domain modules
pub mod control;
pub mod entities;
pub mod graphics;
pub mod variables;

// App modules
pub mod cli;
pub mod config;
pub mod paths;

// Re-export commonly used types
pub use control::{ButtonControl, RenderOutput};
pub use core::element_cache::ElementConversionCache;
pub use core::event_bus::{downcast_event, BoxedEvent, EventBus};
pub use entities::{Entity, EntityList, EntityListPool, EntityModel, EntityServices};
pub use graphics::{ConversionContext, ConvertResult, DrawElement, SomeButtonGraphicsElement};
pub use variables::{VariableStore, VariablesParser};
