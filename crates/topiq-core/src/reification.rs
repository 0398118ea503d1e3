//! # Reification Store
//!
//! The 1:1 relation between a reifiable construct and the topic that
//! reifies it, held bidirectionally so both directions are O(log n).

use crate::types::{ConstructId, EngineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bidirectional reifiable ↔ reifier mapping for one map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReificationStore {
    /// Reifiable construct -> reifying topic.
    reifier_of: BTreeMap<ConstructId, ConstructId>,
    /// Reifying topic -> reified construct.
    reifies: BTreeMap<ConstructId, ConstructId>,
}

impl ReificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The topic reifying a construct, if any.
    #[must_use]
    pub fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId> {
        self.reifier_of.get(&reifiable).copied()
    }

    /// The construct a topic reifies, if any.
    #[must_use]
    pub fn reified_by(&self, topic: ConstructId) -> Option<ConstructId> {
        self.reifies.get(&topic).copied()
    }

    /// Establish the pair. Rejects double reification in either direction;
    /// re-establishing the existing pair is a no-op.
    pub fn set(&mut self, reifiable: ConstructId, topic: ConstructId) -> Result<(), EngineError> {
        if self.reifier_of.get(&reifiable) == Some(&topic) {
            return Ok(());
        }
        if self.reifier_of.contains_key(&reifiable) {
            return Err(EngineError::ModelConstraint(format!(
                "construct {reifiable:?} is already reified"
            )));
        }
        if self.reifies.contains_key(&topic) {
            return Err(EngineError::ModelConstraint(format!(
                "topic {topic:?} already reifies another construct"
            )));
        }
        self.reifier_of.insert(reifiable, topic);
        self.reifies.insert(topic, reifiable);
        Ok(())
    }

    /// Clear by reifiable side; returns the topic that reified it.
    pub fn clear_by_reifiable(&mut self, reifiable: ConstructId) -> Option<ConstructId> {
        let topic = self.reifier_of.remove(&reifiable)?;
        self.reifies.remove(&topic);
        Some(topic)
    }

    /// Clear by topic side; returns the construct it reified.
    pub fn clear_by_topic(&mut self, topic: ConstructId) -> Option<ConstructId> {
        let reifiable = self.reifies.remove(&topic)?;
        self.reifier_of.remove(&reifiable);
        Some(reifiable)
    }
}

// =============================================================================
// TESTS
// =============================================================================
