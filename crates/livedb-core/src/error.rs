//! Error taxonomy surfaced to callers.
//!
//! Every variant here is a distinct, user-facing failure rather than
//! an internal classification the caller has to decode, so this is
//! one flat `thiserror` enum rather than a `{class, origin, message}`
//! triple — there is no internal/external boundary to hide here.

use thiserror::Error;

///
/// CollectionError
///
/// Stable, matchable error type returned by every fallible collection,
/// mutation, transaction, and query operation.
///
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    #[error("collection configuration error: {0}")]
    CollectionConfiguration(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("schema validators must be synchronous")]
    SchemaMustBeSynchronous,

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("collection is in an error state")]
    CollectionInErrorState,

    #[error("invalid collection status transition: {from:?} -> {to:?}")]
    InvalidCollectionStatusTransition {
        from: crate::collection::Status,
        to: crate::collection::Status,
    },

    #[error("duplicate key")]
    DuplicateKey,

    #[error("duplicate key during sync (non-deep-equal value)")]
    DuplicateKeySync,

    #[error("key is undefined")]
    UndefinedKey,

    #[error("update callback is required")]
    MissingUpdateArgument,

    #[error("no keys passed to update")]
    NoKeysPassedToUpdate,

    #[error("no keys passed to delete")]
    NoKeysPassedToDelete,

    #[error("key not found for update")]
    UpdateKeyNotFound,

    #[error("update is not allowed to change the key")]
    KeyUpdateNotAllowed,

    #[error("key not found for delete")]
    DeleteKeyNotFound,

    #[error("no insert handler configured")]
    MissingInsertHandler,

    #[error("no update handler configured")]
    MissingUpdateHandler,

    #[error("no delete handler configured")]
    MissingDeleteHandler,

    #[error("transaction has no mutation function configured")]
    MissingMutationFunction,

    #[error("transaction is not pending: mutate() requires a pending transaction")]
    TransactionNotPendingMutate,

    #[error("transaction is not pending: commit() requires a pending transaction")]
    TransactionNotPendingCommit,

    #[error("transaction is not pending: rollback() requires a pending transaction")]
    TransactionNotPendingRollback,

    #[error("sync transaction already committed")]
    SyncTransactionAlreadyCommitted,

    #[error("no pending sync transaction")]
    NoPendingSyncTransaction,

    #[error("unknown expression type")]
    UnknownExpressionType,

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("reference path must not be empty")]
    EmptyReferencePath,

    #[error("sync cleanup failed: {0}")]
    SyncCleanup(String),

    #[error("scheduler detected unresolved dependencies")]
    SchedulerUnresolvedDependencies,

    #[error("operation timed out")]
    Timeout,

    #[error("mutation failed: {0}")]
    MutationFailed(String),
}

pub type Result<T> = std::result::Result<T, CollectionError>;
