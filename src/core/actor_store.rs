//! SQLite implementation of the actor-id contract.
//!
//! Each storage domain has its own `actor` table; [`SqliteActorStoreFactory`]
//! hands out the store registered for a domain. Lookups go through the
//! store's own [`SqliteDb`], never through the handle passed by the caller, so
//! a caller cannot accidentally resolve ids against another domain's table.

use crate::core::actor::{ActorNormalization, ActorStoreFactory, StorageHandle};
use crate::core::db::SqliteDb;
use crate::core::error::MigrationError;
use crate::core::user::{ActorId, UserIdentity};
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};

pub struct SqliteActorStore {
    db: Arc<SqliteDb>,
}

impl SqliteActorStore {
    /// Wrap `db`, creating its `actor` table when missing.
    pub fn new(db: Arc<SqliteDb>) -> Result<Self, MigrationError> {
        db.initialize_actor_table()?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Arc<SqliteDb> {
        &self.db
    }

    fn check_domain(&self, db: &dyn StorageHandle) -> Result<(), MigrationError> {
        if db.domain_id() != self.db.domain_id() {
            return Err(MigrationError::UsageError(format!(
                "actor store for '{}' used with a handle for '{}'",
                self.db.domain_id(),
                db.domain_id()
            )));
        }
        Ok(())
    }
}

/// Name as stored in `actor_name`: anonymous actors are keyed by their
/// canonical IP form.
fn actor_name(user: &UserIdentity) -> Result<String, MigrationError> {
    let name = user.canonical_name();
    if name.is_empty() {
        return Err(MigrationError::UsageError(
            "cannot resolve an actor for an empty user name".to_string(),
        ));
    }
    Ok(name)
}

/// The `actor` row owned by `user`: registered users are keyed by
/// `actor_user`, anonymous users by `actor_name`.
fn lookup(
    conn: &Connection,
    user_id: Option<i64>,
    name: &str,
) -> Result<Option<(ActorId, Option<i64>, String)>, MigrationError> {
    let row = match user_id {
        Some(id) => conn
            .query_row(
                "SELECT actor_id, actor_user, actor_name FROM actor WHERE actor_user = ?1",
                params![id],
                |r| Ok((ActorId(r.get(0)?), r.get(1)?, r.get(2)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT actor_id, actor_user, actor_name FROM actor WHERE actor_name = ?1",
                params![name],
                |r| Ok((ActorId(r.get(0)?), r.get(1)?, r.get(2)?)),
            )
            .optional()?,
    };
    Ok(row)
}

/// Fails unless the stored row describes exactly `(user_id, name)`.
fn check_identity(
    row: (ActorId, Option<i64>, String),
    user_id: Option<i64>,
    name: &str,
) -> Result<ActorId, MigrationError> {
    let (actor, stored_user, stored_name) = row;
    if stored_user != user_id || stored_name != name {
        return Err(MigrationError::UsageError(format!(
            "actor {actor} belongs to (user {}, '{stored_name}'), not (user {}, '{name}')",
            stored_user.unwrap_or(0),
            user_id.unwrap_or(0),
        )));
    }
    Ok(actor)
}

fn user_key(user: &UserIdentity) -> Result<Option<i64>, MigrationError> {
    if user.is_registered() {
        Ok(Some(user.sql_id()?))
    } else {
        Ok(None)
    }
}

impl ActorNormalization for SqliteActorStore {
    fn find_actor_id(
        &self,
        user: &UserIdentity,
        db: &dyn StorageHandle,
    ) -> Result<Option<ActorId>, MigrationError> {
        self.check_domain(db)?;
        let name = actor_name(user)?;
        let user_id = user_key(user)?;
        self.db.with_conn(|conn| {
            lookup(conn, user_id, &name)?
                .map(|row| check_identity(row, user_id, &name))
                .transpose()
        })
    }

    fn acquire_actor_id(
        &self,
        user: &UserIdentity,
        db: &dyn StorageHandle,
    ) -> Result<ActorId, MigrationError> {
        self.check_domain(db)?;
        let name = actor_name(user)?;
        let user_id = user_key(user)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO actor (actor_user, actor_name) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
                params![user_id, name],
            )?;
            match lookup(conn, user_id, &name)? {
                Some(row) => check_identity(row, user_id, &name),
                // The insert lost to another user's row holding this name.
                None => {
                    let owner: Option<i64> = conn
                        .query_row(
                            "SELECT actor_user FROM actor WHERE actor_name = ?1",
                            params![name],
                            |r| r.get(0),
                        )
                        .optional()?
                        .flatten();
                    Err(MigrationError::UsageError(format!(
                        "cannot create actor for (user {}, '{name}'): name held by user {}",
                        user_id.unwrap_or(0),
                        owner.unwrap_or(0),
                    )))
                }
            }
        })
    }
}

#[derive(Default)]
pub struct SqliteActorStoreFactory {
    stores: RwLock<FxHashMap<String, Arc<SqliteActorStore>>>,
}

impl SqliteActorStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `db` as the actor storage of its domain, replacing any earlier
    /// registration for that domain.
    pub fn register(&self, db: Arc<SqliteDb>) -> Result<Arc<SqliteActorStore>, MigrationError> {
        let domain = db.domain_id().to_string();
        let store = Arc::new(SqliteActorStore::new(db)?);
        self.stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain, Arc::clone(&store));
        Ok(store)
    }
}

impl ActorStoreFactory for SqliteActorStoreFactory {
    fn actor_normalization(
        &self,
        domain_id: &str,
    ) -> Result<Arc<dyn ActorNormalization>, MigrationError> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        match stores.get(domain_id) {
            Some(store) => Ok(Arc::clone(store) as Arc<dyn ActorNormalization>),
            None => Err(MigrationError::NotFound(format!(
                "no actor store registered for domain '{domain_id}'"
            ))),
        }
    }
}
