//! # View Observers
//!
//! In-process change notification. Callers register callbacks and get
//! told when indexing changes rows, so dependent caches and chained
//! views refresh without polling.
//!
//! Callbacks run synchronously on the mutating thread, after the view
//! has released its locks. A callback may query the view and may
//! unsubscribe (itself included); it must not block for long.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use uuid::Uuid;

use crate::connection::UpdateSequence;

/// What changed in a view's index.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChangeEvent {
    /// The whole index was replaced or dropped (bulk load, checkpoint
    /// restore, clear).
    Reset { update_sequence: UpdateSequence },

    /// One document was (re)indexed or removed.
    DocumentIndexed {
        doc_id: String,
        /// Keys the document previously had in the index.
        removed_keys: Vec<Value>,
        /// Keys the document has now.
        added_keys: Vec<Value>,
        update_sequence: UpdateSequence,
    },
}

impl ViewChangeEvent {
    pub fn update_sequence(&self) -> &UpdateSequence {
        match self {
            ViewChangeEvent::Reset { update_sequence } => update_sequence,
            ViewChangeEvent::DocumentIndexed { update_sequence, .. } => update_sequence,
        }
    }
}

/// Observer callback.
pub type ObserverFn = Box<dyn Fn(&ViewChangeEvent) + Send + Sync>;

/// Registry of active observers for one view.
#[derive(Default)]
pub struct ViewObserverRegistry {
    observers: RwLock<HashMap<String, Arc<ObserverFn>>>,
}

impl ViewObserverRegistry {
    pub fn new() -> Self {
        ViewObserverRegistry::default()
    }

    /// Register a callback; returns its observer id.
    pub fn subscribe(&self, observer: impl Fn(&ViewChangeEvent) + Send + Sync + 'static) -> String {
        let id = Uuid::new_v4().to_string();
        if let Ok(mut observers) = self.observers.write() {
            observers.insert(id.clone(), Arc::new(Box::new(observer)));
        }
        id
    }

    /// Remove one observer. Returns whether it existed.
    pub fn unsubscribe(&self, observer_id: &str) -> bool {
        match self.observers.write() {
            Ok(mut observers) => observers.remove(observer_id).is_some(),
            Err(_) => false,
        }
    }

    /// Remove every observer.
    pub fn unsubscribe_all(&self) {
        if let Ok(mut observers) = self.observers.write() {
            observers.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer. Callbacks are collected
    /// first and invoked with no lock held, so they may touch the
    /// registry.
    pub fn notify(&self, event: &ViewChangeEvent) {
        let handlers: Vec<Arc<ObserverFn>> = match self.observers.read() {
            Ok(observers) => observers.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl std::fmt::Debug for ViewObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
