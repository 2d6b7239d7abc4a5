//! Pub/Sub event bus for control change notifications.
//!
//! - Subscribers register per event type and are invoked synchronously on emit()
//! - Every emitted event is also queued for batch processing via poll()
//!
//! Callback order: FIFO within one event type. No ordering across types.
//!
//! Entity pools emit [`ControlChangedEvent`](crate::entities::ControlChangedEvent)
//! after each mutation; the owner of the control polls or subscribes to decide
//! whether a redraw is due.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

/// Maximum events in queue before the oldest half is evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;
type Subscribers = Arc<RwLock<HashMap<TypeId, Vec<Callback>>>>;
type Queue = Arc<Mutex<Vec<BoxedEvent>>>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Event bus shared by every pool of an application. Cloning shares state.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Subscribers,
    queue: Queue,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type E. The callback runs inside emit().
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Invoke subscribers, then queue the event for poll().
    pub fn emit<E: Event + Clone>(&self, event: E) {
        if let Some(cbs) = self.subscribers.read().unwrap_or_else(|e| e.into_inner()).get(&TypeId::of::<E>()) {
            for cb in cbs {
                cb(&event);
            }
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }

    /// Take all queued events.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Take queued events of type E, leaving others queued.
    pub fn poll_of<E: Event + Clone>(&self) -> Vec<E> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut taken = Vec::new();
        queue.retain(|event| match downcast_event::<E>(event) {
            Some(e) => {
                taken.push(e.clone());
                false
            }
            None => true,
        });
        taken
    }

    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).remove(&TypeId::of::<E>());
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop all subscribers and queued events.
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Downcast a queued event to its concrete type.
///
/// Derefs to `dyn Event` first; calling `as_any()` on the box itself would hit
/// the blanket impl for `Box<dyn Event>` and never match.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Clone, Debug)]
    struct TestEvent {
        value: i32,
    }

    #[derive(Clone, Debug)]
    struct OtherEvent;

    #[test]
    fn test_subscribe_emit_immediate() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        bus.emit(TestEvent { value: 5 });
        assert_eq!(counter.load(Ordering::SeqCst), 15);
        assert!(bus.has_subscribers::<TestEvent>());
        assert!(!bus.has_subscribers::<OtherEvent>());
    }

    #[test]
    fn test_poll_of_keeps_other_types() {
        let bus = EventBus::new();
        bus.emit(TestEvent { value: 1 });
        bus.emit(OtherEvent);
        bus.emit(TestEvent { value: 2 });

        let tests = bus.poll_of::<TestEvent>();
        assert_eq!(tests.iter().map(|e| e.value).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(bus.queue_len(), 1);

        let rest = bus.poll();
        assert!(downcast_event::<OtherEvent>(&rest[0]).is_some());
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_unsubscribe_still_queues() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });
        bus.unsubscribe_all::<TestEvent>();

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.poll().len(), 1);
    }

    #[test]
    fn test_queue_eviction() {
        let bus = EventBus::new();
        for value in 0..(MAX_QUEUE_SIZE as i32 + 1) {
            bus.emit(TestEvent { value });
        }
        let events = bus.poll_of::<TestEvent>();
        assert_eq!(events.len(), MAX_QUEUE_SIZE / 2 + 1);
        assert_eq!(events.last().map(|e| e.value), Some(MAX_QUEUE_SIZE as i32));
    }
}
