//! Best-effort notifications to the connections that own entities.
//!
//! Entity lifecycle changes (subscribe, cleanup) are pushed onto a bounded
//! queue and delivered later, either by a dispatcher thread or by draining the
//! queue synchronously. Delivery failures are logged and dropped: local state
//! is the source of truth, the connection is told on a best-effort basis.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, trace, warn};

use crate::entities::model::{EntityModel, Options};

/// Connection host that receives entity lifecycle calls.
pub trait ConnectionHost: Send + Sync {
    /// Entity created, enabled, or its options/connection changed.
    fn entity_update(&self, connection_id: &str, control_id: &str, entity: &EntityModel) -> Result<()>;

    /// Entity removed or disabled.
    fn entity_delete(&self, connection_id: &str, control_id: &str, entity: &EntityModel) -> Result<()>;

    /// Ask the connection for option values matching current device state.
    fn learn_values(&self, connection_id: &str, control_id: &str, entity: &EntityModel) -> Result<Option<Options>>;
}

/// Host that accepts everything and learns nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConnectionHost;

impl ConnectionHost for NullConnectionHost {
    fn entity_update(&self, _connection_id: &str, _control_id: &str, _entity: &EntityModel) -> Result<()> {
        Ok(())
    }

    fn entity_delete(&self, _connection_id: &str, _control_id: &str, _entity: &EntityModel) -> Result<()> {
        Ok(())
    }

    fn learn_values(&self, _connection_id: &str, _control_id: &str, _entity: &EntityModel) -> Result<Option<Options>> {
        Ok(None)
    }
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionRequest {
    Update { connection_id: String, control_id: String, entity: EntityModel },
    Delete { connection_id: String, control_id: String, entity: EntityModel },
}

impl ConnectionRequest {
    pub fn connection_id(&self) -> &str {
        match self {
            ConnectionRequest::Update { connection_id, .. } | ConnectionRequest::Delete { connection_id, .. } => {
                connection_id
            }
        }
    }

    fn deliver(&self, host: &dyn ConnectionHost) -> Result<()> {
        match self {
            ConnectionRequest::Update { connection_id, control_id, entity } => {
                host.entity_update(connection_id, control_id, entity)
            }
            ConnectionRequest::Delete { connection_id, control_id, entity } => {
                host.entity_delete(connection_id, control_id, entity)
            }
        }
    }
}

/// Bounded multi-producer queue of [`ConnectionRequest`]s. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: Sender<ConnectionRequest>,
    receiver: Receiver<ConnectionRequest>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Enqueue without blocking. Overflow is dropped with a warning.
    pub fn push(&self, request: ConnectionRequest) {
        trace!("Queue notification for {}", request.connection_id());
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                warn!("Notification queue full, dropping request for {}", request.connection_id());
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Notification queue closed, dropping request");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Take everything queued without delivering it.
    pub fn drain(&self) -> Vec<ConnectionRequest> {
        self.receiver.try_iter().collect()
    }

    /// Deliver everything queued on the calling thread. Returns the number delivered.
    pub fn dispatch_pending(&self, host: &dyn ConnectionHost) -> usize {
        let mut delivered = 0;
        for request in self.receiver.try_iter() {
            deliver_logged(&request, host);
            delivered += 1;
        }
        delivered
    }

    /// Deliver on a background thread until every queue handle is dropped.
    pub fn spawn_dispatcher(&self, host: Arc<dyn ConnectionHost>) -> Result<thread::JoinHandle<()>> {
        let receiver = self.receiver.clone();
        thread::Builder::new()
            .name("buttonface-notify".to_string())
            .spawn(move || {
                trace!("Notification dispatcher started");
                for request in receiver.iter() {
                    deliver_logged(&request, host.as_ref());
                }
                trace!("Notification dispatcher stopped");
            })
            .context("Failed to spawn notification dispatcher")
    }
}

fn deliver_logged(request: &ConnectionRequest, host: &dyn ConnectionHost) {
    if let Err(e) = request.deliver(host) {
        warn!("Connection {} notification failed: {:#}", request.connection_id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::model::EntityKind;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FailingHost {
        calls: Mutex<Vec<String>>,
    }

    impl ConnectionHost for FailingHost {
        fn entity_update(&self, connection_id: &str, _control_id: &str, entity: &EntityModel) -> Result<()> {
            self.calls.lock().unwrap().push(format!("update:{}:{}", connection_id, entity.id));
            bail!("connection offline")
        }

        fn entity_delete(&self, connection_id: &str, _control_id: &str, entity: &EntityModel) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete:{}:{}", connection_id, entity.id));
            Ok(())
        }

        fn learn_values(&self, _: &str, _: &str, _: &EntityModel) -> Result<Option<Options>> {
            Ok(None)
        }
    }

    fn make_request(update: bool, id: &str) -> ConnectionRequest {
        let entity = EntityModel::new(id, EntityKind::Feedback, "conn", "def");
        if update {
            ConnectionRequest::Update { connection_id: "conn".into(), control_id: "c1".into(), entity }
        } else {
            ConnectionRequest::Delete { connection_id: "conn".into(), control_id: "c1".into(), entity }
        }
    }

    #[test]
    fn test_overflow_is_dropped() {
        let queue = NotificationQueue::new(2);
        for i in 0..5 {
            queue.push(make_request(true, &format!("e{}", i)));
        }
        assert_eq!(queue.len(), 2);
        let ids: Vec<String> = queue
            .drain()
            .into_iter()
            .map(|r| match r {
                ConnectionRequest::Update { entity, .. } | ConnectionRequest::Delete { entity, .. } => entity.id,
            })
            .collect();
        assert_eq!(ids, vec!["e0", "e1"]);
    }

    #[test]
    fn test_dispatch_continues_after_failure() {
        let queue = NotificationQueue::new(8);
        queue.push(make_request(true, "a"));
        queue.push(make_request(false, "a"));

        let host = FailingHost::default();
        assert_eq!(queue.dispatch_pending(&host), 2);
        assert_eq!(*host.calls.lock().unwrap(), vec!["update:conn:a", "delete:conn:a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dispatcher_thread_delivers() {
        let host = Arc::new(FailingHost::default());
        let handle = {
            let queue = NotificationQueue::new(8);
            let handle = queue.spawn_dispatcher(host.clone()).unwrap();
            queue.push(make_request(false, "x"));
            handle
        };
        // Dropping the last queue handle ends the dispatcher
        handle.join().unwrap();
        assert_eq!(*host.calls.lock().unwrap(), vec!["delete:conn:x"]);
    }
}
