//! In-process association store. Contents are lost on restart.
//!
//! Holds at most `capacity` associations; the oldest are evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::common::error::AssociationResult;

use super::{AssociatedMessage, AssociationStore, MessageAssociation};

/// Associations kept by default.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<AssociatedMessage, Arc<MessageAssociation>>,
    /// Insertion order, oldest first.
    order: VecDeque<Arc<MessageAssociation>>,
}

impl Entries {
    /// Remove every key still pointing at `record`.
    fn unlink(&mut self, record: &Arc<MessageAssociation>) -> usize {
        let mut removed = 0;
        for message in &record.messages {
            if self
                .by_key
                .get(message)
                .is_some_and(|current| Arc::ptr_eq(current, record))
            {
                self.by_key.remove(message);
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    capacity: usize,
    entries: RwLock<Entries>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Number of indexed copies.
    pub fn len(&self) -> usize {
        self.entries.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().by_key.is_empty()
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn start(&self) -> AssociationResult<()> {
        Ok(())
    }

    async fn stop(&self) -> AssociationResult<()> {
        if !self.is_empty() {
            debug!(copies = self.len(), "Dropping in-memory message associations");
        }
        Ok(())
    }

    async fn get(
        &self,
        client: &str,
        chat_id: &str,
        message_id: &str,
    ) -> AssociationResult<Option<MessageAssociation>> {
        let key = AssociatedMessage::new(client, chat_id, message_id);
        Ok(self.entries.read().by_key.get(&key).map(|a| a.as_ref().clone()))
    }

    async fn set(&self, association: &MessageAssociation) -> AssociationResult<()> {
        if association.is_empty() {
            return Ok(());
        }
        let shared = Arc::new(association.clone());
        let mut entries = self.entries.write();

        // Records losing a key lose all of their keys
        let superseded: Vec<_> = association
            .messages
            .iter()
            .filter_map(|m| entries.by_key.get(m).cloned())
            .collect();
        for old in &superseded {
            entries.unlink(old);
        }

        for message in &association.messages {
            entries.by_key.insert(message.clone(), shared.clone());
        }
        entries.order.push_back(shared);

        let mut evicted = 0;
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                evicted += entries.unlink(&oldest);
            }
        }
        if evicted > 0 {
            debug!(evicted, "Evicted oldest message associations");
        }
        Ok(())
    }
}
