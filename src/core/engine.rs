//! The schema migration engine.
//!
//! Mediates every read and write of a user-reference field while its storage
//! moves from inline `(user id, user name)` columns to an `actor` reference.
//! The engine only builds SQL fragments and value sets; executing them is the
//! caller's job. Storage is touched solely through the collaborators in
//! [`crate::core::actor`]: actor-id resolution, and the temp-table upsert a
//! [`DeferredWrite`] performs when completed.
//!
//! Every public operation first resolves the field and runs the deprecation
//! gate: removed fields fail with [`MigrationError::FieldRemoved`] whatever the
//! stage, deprecated fields emit a [`DeprecationNotice`] and carry on.

use crate::core::actor::{ActorNormalization, ActorStoreFactory, StorageHandle};
use crate::core::error::MigrationError;
use crate::core::field::{FieldRegistry, FieldSpec, ResolvedField};
use crate::core::join::{self, JoinCache, JoinDescriptor};
use crate::core::predicate::{WhereAlternative, WhereDescriptor};
use crate::core::sql::{self, SqlValue};
use crate::core::stage::MigrationStage;
use crate::core::trace::{DeprecationNotice, SignalSink, StderrSink};
use crate::core::user::{UserIdentity, UserSelection};
use crate::core::write::{DeferredWrite, RowValues};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_COMPONENT: &str = "core";

pub struct EngineOptions {
    /// Unknown field keys fall back to default column names instead of failing.
    pub allow_unknown: bool,
    /// Component reported for fields that do not name their own.
    pub default_component: String,
    pub sink: Arc<dyn SignalSink>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            allow_unknown: true,
            default_component: DEFAULT_COMPONENT.to_string(),
            sink: Arc::new(StderrSink),
        }
    }
}

pub struct SchemaMigrationEngine {
    registry: FieldRegistry,
    stage: MigrationStage,
    actor_stores: Arc<dyn ActorStoreFactory>,
    sink: Arc<dyn SignalSink>,
    default_component: String,
    join_cache: JoinCache,
}

impl SchemaMigrationEngine {
    pub fn new(
        specs: BTreeMap<String, FieldSpec>,
        stage: MigrationStage,
        actor_stores: Arc<dyn ActorStoreFactory>,
        options: EngineOptions,
    ) -> Result<Self, MigrationError> {
        Ok(Self {
            registry: FieldRegistry::new(specs, options.allow_unknown)?,
            stage,
            actor_stores,
            sink: options.sink,
            default_component: options.default_component,
            join_cache: JoinCache::new(),
        })
    }

    /// Construct from a legacy stage bitmask; invalid combinations are rejected
    /// here rather than on first use.
    pub fn from_bits(
        specs: BTreeMap<String, FieldSpec>,
        stage_bits: u32,
        actor_stores: Arc<dyn ActorStoreFactory>,
        options: EngineOptions,
    ) -> Result<Self, MigrationError> {
        let stage = MigrationStage::from_bits(stage_bits)?;
        Self::new(specs, stage, actor_stores, options)
    }

    pub fn stage(&self) -> MigrationStage {
        self.stage
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn cached_joins(&self) -> usize {
        self.join_cache.len()
    }

    /// SELECT fields and joins reading the user reference `key`.
    pub fn build_join(&self, key: &str) -> Result<Arc<JoinDescriptor>, MigrationError> {
        let field = self.checked_field(key)?;
        self.join_cache.get_or_try_insert(key, || {
            Ok(if self.stage.reads_new() {
                join::build_new(&field)
            } else {
                join::build_old(&field)
            })
        })
    }

    /// Values to set on the owning row for a field without a temp table.
    /// Under write-new this acquires (creating if needed) the user's actor id.
    pub fn build_insert_values(
        &self,
        db: &dyn StorageHandle,
        key: &str,
        user: &UserIdentity,
    ) -> Result<RowValues, MigrationError> {
        let field = self.checked_field(key)?;
        if field.temp_table().is_some() {
            return Err(MigrationError::UsageError(format!(
                "Must use build_insert_values_with_temp_table() for '{key}'"
            )));
        }

        let mut values = self.old_values(&field, user)?;
        if self.stage.writes_new() {
            let actor = self.actor_normalization(db)?.acquire_actor_id(user, db)?;
            values.insert(field.actor_column.clone(), SqlValue::Int(actor.0));
        }
        Ok(values)
    }

    /// Values for the owning row plus the [`DeferredWrite`] to complete once the
    /// row's primary key is known. The deferred write must always be completed,
    /// even when it has nothing to store.
    pub fn build_insert_values_with_temp_table(
        &self,
        db: &dyn StorageHandle,
        key: &str,
        user: &UserIdentity,
    ) -> Result<(RowValues, DeferredWrite), MigrationError> {
        let field = self.checked_field(key)?;
        let temp_table = field.temp_table().cloned();
        if temp_table.is_none() {
            match &field.spec.former_temp_table {
                Some(version) => self.emit(
                    format!("build_insert_values_with_temp_table for '{key}'"),
                    version,
                    &field,
                ),
                None => {
                    return Err(MigrationError::UsageError(format!(
                        "Must use build_insert_values() for '{key}'"
                    )));
                }
            }
        }

        let mut values = self.old_values(&field, user)?;
        let deferred = if self.stage.writes_new() {
            let actor = self.actor_normalization(db)?.acquire_actor_id(user, db)?;
            match temp_table {
                Some(table) => DeferredWrite::upsert(key, table, actor),
                None => {
                    values.insert(field.actor_column.clone(), SqlValue::Int(actor.0));
                    DeferredWrite::nothing(key)
                }
            }
        } else {
            match temp_table {
                Some(table) => DeferredWrite::check_extras(key, table),
                None => DeferredWrite::nothing(key),
            }
        };
        Ok((values, deferred))
    }

    /// Condition matching rows whose `key` refers to any of `users`.
    ///
    /// With `include_id_match` false, registered users are matched by name
    /// instead of id; use it when the table only indexes the name column.
    pub fn build_where<'u>(
        &self,
        db: &dyn StorageHandle,
        key: &str,
        users: impl Into<UserSelection<'u>>,
        include_id_match: bool,
    ) -> Result<WhereDescriptor, MigrationError> {
        let field = self.checked_field(key)?;
        let selection: UserSelection<'u> = users.into();
        let users = selection.as_slice();

        let mut ids = Vec::new();
        let mut names = Vec::new();
        let mut actors = Vec::new();
        let actor_store = if self.stage.reads_new() && !users.is_empty() {
            Some(self.actor_normalization(db)?)
        } else {
            None
        };
        for user in users {
            if include_id_match && user.is_registered() {
                ids.push(SqlValue::Int(user.sql_id()?));
            } else {
                names.push(SqlValue::Text(user.canonical_name()));
            }
            if let Some(store) = &actor_store {
                if let Some(actor) = store.find_actor_id(user, db)? {
                    actors.push(SqlValue::Int(actor.0));
                }
            }
        }

        let mut tables = Vec::new();
        let mut alternatives = BTreeMap::new();
        if self.stage.reads_new() {
            if !actors.is_empty() {
                let (joins, join_field) = join::actor_source(&field);
                tables = joins;
                if let Some(cond) = sql::in_list(&join_field, &actors) {
                    alternatives.insert(WhereAlternative::NewActor, cond);
                }
            }
        } else {
            if let Some(cond) = sql::in_list(field.key, &ids) {
                alternatives.insert(WhereAlternative::UserId, cond);
            }
            if let Some(cond) = sql::in_list(&field.text_column, &names) {
                alternatives.insert(WhereAlternative::UserName, cond);
            }
        }

        let conds = sql::or_list(&alternatives.values().collect::<Vec<_>>());
        Ok(WhereDescriptor {
            tables,
            conds,
            alternatives,
        })
    }

    /// Condition true when the user-id expression `field` refers to an
    /// anonymous user. Pass the `user_id` expression from [`build_join`].
    ///
    /// [`build_join`]: Self::build_join
    pub fn is_anon(&self, field: &str) -> String {
        if self.stage.reads_new() {
            format!("{field} IS NULL")
        } else {
            format!("{field} = 0")
        }
    }

    pub fn is_not_anon(&self, field: &str) -> String {
        if self.stage.reads_new() {
            format!("{field} IS NOT NULL")
        } else {
            format!("{field} != 0")
        }
    }

    fn checked_field<'a>(&'a self, key: &'a str) -> Result<ResolvedField<'a>, MigrationError> {
        let field = self.registry.resolve(key)?;
        if let Some(version) = &field.spec.removed_version {
            return Err(MigrationError::FieldRemoved {
                key: key.to_string(),
                version: version.clone(),
                component: self.component(&field).to_string(),
            });
        }
        if let Some(version) = &field.spec.deprecated_version {
            self.emit(format!("actor migration for '{key}'"), version, &field);
        }
        Ok(field)
    }

    fn component<'a>(&'a self, field: &'a ResolvedField<'_>) -> &'a str {
        field
            .spec
            .component
            .as_deref()
            .unwrap_or(&self.default_component)
    }

    fn emit(&self, subject: String, version: &str, field: &ResolvedField<'_>) {
        let notice = DeprecationNotice::new(subject, version, self.component(field));
        self.sink.emit(&notice);
    }

    fn old_values(
        &self,
        field: &ResolvedField<'_>,
        user: &UserIdentity,
    ) -> Result<RowValues, MigrationError> {
        let mut values = RowValues::new();
        if self.stage.writes_old() {
            values.insert(field.key.to_string(), SqlValue::Int(user.sql_id()?));
            values.insert(field.text_column.clone(), SqlValue::Text(user.canonical_name()));
        }
        Ok(values)
    }

    fn actor_normalization(
        &self,
        db: &dyn StorageHandle,
    ) -> Result<Arc<dyn ActorNormalization>, MigrationError> {
        self.actor_stores.actor_normalization(db.domain_id())
    }
}
