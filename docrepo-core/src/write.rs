//! Write models submitted to a backend as one multi-operation write.

use bson::Bson;

use crate::{query::Expr, update::UpdateDoc};

/// A single operation inside a multi-operation write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Inserts a new document with the given store identifier.
    InsertOne { id: Bson, document: Bson },
    /// Replaces the first document matching `filter`.
    ReplaceOne { filter: Expr, id: Bson, document: Bson, upsert: bool },
    /// Applies `update` to the first document matching `filter`.
    UpdateOne { filter: Expr, update: UpdateDoc },
    /// Applies `update` to every document matching `filter`.
    UpdateMany { filter: Expr, update: UpdateDoc },
    /// Deletes the first document matching `filter`.
    DeleteOne { filter: Expr },
    /// Deletes every document matching `filter`.
    DeleteMany { filter: Expr },
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::InsertOne { .. } => "insert_one",
            WriteOp::ReplaceOne { .. } => "replace_one",
            WriteOp::UpdateOne { .. } => "update_one",
            WriteOp::UpdateMany { .. } => "update_many",
            WriteOp::DeleteOne { .. } => "delete_one",
            WriteOp::DeleteMany { .. } => "delete_many",
        }
    }
}

/// Options for a multi-operation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkWriteOptions {
    /// Stop at the first failing operation. When `false`, every operation is
    /// attempted and all failures are reported together.
    pub ordered: bool,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self { ordered: true }
    }
}

impl BulkWriteOptions {
    pub fn unordered() -> Self {
        Self { ordered: false }
    }
}

/// Outcome counters of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Whether the store acknowledged the write. Counters are meaningless
    /// when this is `false`.
    pub acknowledged: bool,
    pub inserted: u64,
    /// Documents selected by update and replace filters.
    pub matched: u64,
    /// Matched documents whose content actually changed.
    pub modified: u64,
    pub deleted: u64,
    /// Replacements that inserted because nothing matched.
    pub upserted: u64,
}

impl WriteResult {
    pub fn acknowledged() -> Self {
        Self { acknowledged: true, ..Self::default() }
    }

    /// Adds the counters of `other`; acknowledgement holds only if both did.
    pub fn merge(&mut self, other: WriteResult) {
        self.acknowledged &= other.acknowledged;
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_counters() {
        let mut total = WriteResult::acknowledged();
        total.merge(WriteResult { inserted: 2, ..WriteResult::acknowledged() });
        total.merge(WriteResult { matched: 3, modified: 1, deleted: 4, ..WriteResult::acknowledged() });

        assert_eq!(
            total,
            WriteResult { acknowledged: true, inserted: 2, matched: 3, modified: 1, deleted: 4, upserted: 0 }
        );
    }

    #[test]
    fn merge_with_unacknowledged_write_is_unacknowledged() {
        let mut total = WriteResult::acknowledged();
        total.merge(WriteResult { upserted: 1, ..WriteResult::default() });

        assert!(!total.acknowledged);
        assert_eq!(total.upserted, 1);
    }
}
