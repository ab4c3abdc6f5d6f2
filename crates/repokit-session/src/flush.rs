//! Pending writes and their translation into store statements.
//!
//! Unlike a table-batched flush, operations are written strictly in the
//! order they were buffered. A failed operation stays at the head of the
//! queue together with everything after it.

use std::collections::VecDeque;

use repokit_core::{EntityRef, Result, Value, entity};
use repokit_query::{QueryBuilder, WriteStatement};

use crate::identity_map::EntityKey;

/// A pending store write.
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// Insert a newly persisted instance.
    Insert {
        key: EntityKey,
        entity: EntityRef,
    },
    /// Write the current fields of a tracked instance.
    Update {
        key: EntityKey,
        entity: EntityRef,
    },
    /// Delete by identity.
    Delete {
        key: EntityKey,
        identity: Value,
    },
}

impl PendingOp {
    pub fn key(&self) -> &EntityKey {
        match self {
            PendingOp::Insert { key, .. }
            | PendingOp::Update { key, .. }
            | PendingOp::Delete { key, .. } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingOp::Insert { .. } => "insert",
            PendingOp::Update { .. } => "update",
            PendingOp::Delete { .. } => "delete",
        }
    }

    /// Build the validated statement for this operation from the
    /// instance's current state.
    pub fn statement(&self, builder: &QueryBuilder) -> Result<WriteStatement> {
        match self {
            PendingOp::Insert { key, entity } => {
                let guard = entity::read(entity);
                builder.insert(&key.entity, guard.values())
            }
            PendingOp::Update { key, entity } => {
                let guard = entity::read(entity);
                builder.update(&key.entity, &Value::from(key.key.clone()), guard.values())
            }
            PendingOp::Delete { key, identity } => builder.delete(&key.entity, identity),
        }
    }
}

/// Number of buffered operations by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Ordered buffer of pending writes.
#[derive(Debug, Default)]
pub struct PendingOps {
    ops: VecDeque<PendingOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PendingOp) {
        tracing::trace!(op = op.kind(), entity = %op.key(), "Buffered write");
        self.ops.push_back(op);
    }

    /// Next operation to write.
    pub fn front(&self) -> Option<&PendingOp> {
        self.ops.front()
    }

    /// Drop the head after it was written.
    pub fn pop_front(&mut self) -> Option<PendingOp> {
        self.ops.pop_front()
    }

    pub fn has_insert(&self, key: &EntityKey) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PendingOp::Insert { key: k, .. } if k == key))
    }

    pub fn has_update(&self, key: &EntityKey) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PendingOp::Update { key: k, .. } if k == key))
    }

    pub fn has_delete(&self, key: &EntityKey) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PendingOp::Delete { key: k, .. } if k == key))
    }

    /// Drop the pending insert and updates of `key`. Returns true if an
    /// insert was cancelled.
    pub fn cancel(&mut self, key: &EntityKey) -> bool {
        let had_insert = self.has_insert(key);
        self.ops.retain(|op| {
            !(op.key() == key && matches!(op, PendingOp::Insert { .. } | PendingOp::Update { .. }))
        });
        had_insert
    }

    pub fn counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for op in &self.ops {
            match op {
                PendingOp::Insert { .. } => counts.inserts += 1,
                PendingOp::Update { .. } => counts.updates += 1,
                PendingOp::Delete { .. } => counts.deletes += 1,
            }
        }
        counts
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
