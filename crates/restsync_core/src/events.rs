//! Change notifications for models and collections.
//!
//! Subscribers receive events over a channel after each mutation; there is
//! no need to poll. Disconnected receivers are dropped on the next emit.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, Sender};

/// A mutation of a model's attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Working attributes changed under these keys.
    Changed {
        /// Keys that were written.
        keys: Vec<String>,
    },
    /// Working attributes were replaced wholesale.
    Replaced,
    /// Working attributes were committed.
    Committed,
}

/// A mutation of a collection's model list.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    /// Models were appended.
    Added {
        /// Ids of the new models.
        ids: Vec<Value>,
    },
    /// Models were removed.
    Removed {
        /// Ids of the removed models.
        ids: Vec<Value>,
    },
    /// The list was replaced.
    Reset {
        /// New length.
        len: usize,
    },
}

/// Fan-out of events to subscribers.
pub(crate) struct Observers<E> {
    subscribers: RwLock<Vec<Sender<E>>>,
}

impl<E: Clone> Observers<E> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.write();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
