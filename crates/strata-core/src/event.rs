//! Entity lifecycle events and listener dispatch.

use crate::error::{PersistenceError, Result};
use crate::value::Record;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Point in an entity manager operation at which listeners run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrePersist => "pre-persist",
            Self::PostPersist => "post-persist",
            Self::PreUpdate => "pre-update",
            Self::PostUpdate => "post-update",
            Self::PreRemove => "pre-remove",
            Self::PostRemove => "post-remove",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callbacks around entity manager operations on a head entity.
///
/// Every method defaults to a no-op. Returning an error from a `pre_*`
/// method aborts the operation before anything is written.
pub trait EntityListener: Send + Sync {
    fn pre_persist(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn post_persist(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn pre_update(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn post_update(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn pre_remove(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn post_remove(&self, _record: &Record) -> Result<()> {
        Ok(())
    }
}

/// Routes lifecycle events to listeners registered for all entity types or
/// for one entity type.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    global: Vec<Arc<dyn EntityListener>>,
    by_entity: HashMap<String, Vec<Arc<dyn EntityListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to every entity type.
    pub fn register(&mut self, listener: Arc<dyn EntityListener>) {
        self.global.push(listener);
    }

    /// Listen to one entity type.
    pub fn register_for(&mut self, entity: impl Into<String>, listener: Arc<dyn EntityListener>) {
        self.by_entity.entry(entity.into()).or_default().push(listener);
    }

    /// Run `event` on every listener for the record's entity type, global
    /// listeners first. Stops at the first failure.
    pub fn fire(&self, event: LifecycleEvent, record: &Record) -> Result<()> {
        let scoped = self
            .by_entity
            .get(record.entity())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for listener in self.global.iter().chain(scoped) {
            let outcome = match event {
                LifecycleEvent::PrePersist => listener.pre_persist(record),
                LifecycleEvent::PostPersist => listener.post_persist(record),
                LifecycleEvent::PreUpdate => listener.pre_update(record),
                LifecycleEvent::PostUpdate => listener.post_update(record),
                LifecycleEvent::PreRemove => listener.pre_remove(record),
                LifecycleEvent::PostRemove => listener.post_remove(record),
            };
            outcome.map_err(|e| match e {
                e @ PersistenceError::Listener { .. } => e,
                other => PersistenceError::listener(event, record.entity(), other.to_string()),
            })?;
        }
        trace!("Fired {} for {}", event, record.entity());
        Ok(())
    }

    /// Total number of registered listeners.
    pub fn len(&self) -> usize {
        self.global.len() + self.by_entity.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("global", &self.global.len())
            .field("entities", &self.by_entity.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Journal {
        seen: Mutex<Vec<String>>,
    }

    impl EntityListener for Journal {
        fn pre_persist(&self, record: &Record) -> Result<()> {
            self.seen.lock().push(format!("pre-persist {}", record.entity()));
            Ok(())
        }

        fn post_remove(&self, record: &Record) -> Result<()> {
            self.seen.lock().push(format!("post-remove {}", record.entity()));
            Ok(())
        }
    }

    struct Veto;

    impl EntityListener for Veto {
        fn pre_remove(&self, _record: &Record) -> Result<()> {
            Err(PersistenceError::listener(
                LifecycleEvent::PreRemove,
                "Person",
                "people are forever",
            ))
        }
    }

    #[test]
    fn test_scoped_listener_only_sees_its_entity() {
        let journal = Arc::new(Journal::default());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_for("Person", journal.clone());

        dispatcher
            .fire(LifecycleEvent::PrePersist, &Record::new("Person"))
            .unwrap();
        dispatcher
            .fire(LifecycleEvent::PrePersist, &Record::new("Address"))
            .unwrap();
        dispatcher
            .fire(LifecycleEvent::PostRemove, &Record::new("Person"))
            .unwrap();

        assert_eq!(
            *journal.seen.lock(),
            vec!["pre-persist Person".to_string(), "post-remove Person".to_string()]
        );
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_listener_error_aborts() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Arc::new(Veto));

        let err = dispatcher
            .fire(LifecycleEvent::PreRemove, &Record::new("Person"))
            .unwrap_err();

        assert!(matches!(
            err,
            PersistenceError::Listener {
                event: LifecycleEvent::PreRemove,
                ..
            }
        ));
        assert!(err.to_string().contains("people are forever"));
        assert!(dispatcher
            .fire(LifecycleEvent::PrePersist, &Record::new("Person"))
            .is_ok());
    }
}
