//! Core engine modules - element cache, events, connection notifications
//!
//! These modules know nothing about how a control is edited or drawn.

pub mod element_cache;
pub mod event_bus;
pub mod notify;

pub use element_cache::{CacheStats, CompositeCacheInfo, ElementCacheEntry, ElementConversionCache};
pub use event_bus::{downcast_event, BoxedEvent, EventBus};
pub use notify::{ConnectionHost, ConnectionRequest, NotificationQueue, NullConnectionHost};
