//! Collaborator contracts: actor-id resolution and the caller-owned storage handle.
//!
//! The engine never executes SQL for reads. It only touches storage through
//! these traits: to resolve actor ids while building write values and
//! predicates, and to upsert the temp-table row of a [`DeferredWrite`].
//!
//! [`DeferredWrite`]: crate::core::write::DeferredWrite

use crate::core::error::MigrationError;
use crate::core::sql::SqlValue;
use crate::core::user::{ActorId, UserIdentity};
use std::sync::Arc;

/// Caller-owned database handle passed into write and predicate operations.
pub trait StorageHandle {
    /// Identifier of the database/wiki the handle points at. Actor ids are
    /// only meaningful within one domain.
    fn domain_id(&self) -> &str;

    /// Insert `row`, or on a conflict on `unique_key` update the existing row
    /// with `set`.
    fn upsert(
        &self,
        table: &str,
        unique_key: &str,
        row: &[(String, SqlValue)],
        set: &[(String, SqlValue)],
    ) -> Result<(), MigrationError>;
}

/// Maps users to actor ids within one storage domain.
pub trait ActorNormalization: Send + Sync {
    /// Read-only lookup. `None` when the user has no actor row yet.
    fn find_actor_id(
        &self,
        user: &UserIdentity,
        db: &dyn StorageHandle,
    ) -> Result<Option<ActorId>, MigrationError>;

    /// Return the user's actor id, creating the actor row when absent.
    /// Repeated and concurrent calls for the same user converge on one id.
    fn acquire_actor_id(
        &self,
        user: &UserIdentity,
        db: &dyn StorageHandle,
    ) -> Result<ActorId, MigrationError>;
}

pub trait ActorStoreFactory: Send + Sync {
    fn actor_normalization(
        &self,
        domain_id: &str,
    ) -> Result<Arc<dyn ActorNormalization>, MigrationError>;
}
