//! Error types and result types for repository and context operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`].
//! Backends map their native failures into [`DocumentStoreError::Backend`].

use bson::error::Error as BsonError;
use thiserror::Error;

/// A single failed operation inside a multi-operation write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the failed operation in the submitted list.
    pub index: usize,
    /// Backend-provided failure message.
    pub message: String,
}

/// Represents all possible errors that can occur when working with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between entities and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// No identity generator exists for the key type.
    #[error("Unsupported key kind: {0}")]
    UnsupportedKeyKind(String),
    /// A collection name override was empty or whitespace.
    #[error("Invalid collection name for {0}")]
    InvalidCollectionName(String),
    /// A transaction was started while another one is held by the context.
    #[error("A transaction is already active on this context")]
    TransactionAlreadyActive,
    /// Commit or rollback was requested with no transaction held.
    #[error("No active transaction on this context")]
    NoActiveTransaction,
    /// A session handle could not be used by this backend.
    #[error("Invalid session: {0}")]
    InvalidSession(String),
    /// Bulk mode was entered while a batch is already open.
    #[error("A bulk operation is already active on this repository")]
    BulkOperationAlreadyActive,
    /// A batch was submitted while no batch is open.
    #[error("No active bulk operation on this repository")]
    NoActiveBulkOperation,
    /// The store did not acknowledge a write.
    #[error("Write not acknowledged: {0}")]
    WriteNotAcknowledged(String),
    /// A targeted delete removed fewer documents than expected.
    #[error("Partial delete: expected {expected} deleted {deleted}")]
    PartialDelete {
        /// Number of documents the caller targeted.
        expected: u64,
        /// Number of documents the store reported deleted.
        deleted: u64,
    },
    /// A read that requires a match found none.
    #[error("No matching document in collection {0}")]
    NoMatchingDocument(String),
    /// A read that requires a single match found more than one.
    #[error("More than one matching document in collection {0}")]
    MultipleMatchingDocuments(String),
    /// One or more operations of a multi-operation write failed.
    #[error("Bulk write failed for {} operation(s)", .0.len())]
    BulkWrite(Vec<WriteFailure>),
    /// The named index does not exist on the collection.
    /// The first argument is the index name, the second is the collection name.
    #[error("Index {0} not found in collection {1}")]
    IndexNotFound(String, String),
    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_delete_reports_both_counts() {
        let err = DocumentStoreError::PartialDelete { expected: 3, deleted: 1 };

        assert_eq!(err.to_string(), "Partial delete: expected 3 deleted 1");
    }

    #[test]
    fn bulk_write_reports_failure_count() {
        let err = DocumentStoreError::BulkWrite(vec![
            WriteFailure { index: 0, message: "dup".into() },
            WriteFailure { index: 4, message: "dup".into() },
        ]);

        assert_eq!(err.to_string(), "Bulk write failed for 2 operation(s)");
    }
}
