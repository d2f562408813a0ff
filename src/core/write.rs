//! Write-path values and the deferred temp-table write.

use crate::core::actor::StorageHandle;
use crate::core::error::MigrationError;
use crate::core::field::TempTableSpec;
use crate::core::sql::SqlValue;
use crate::core::user::ActorId;
use std::collections::BTreeMap;

/// Column -> value set for the owning row.
pub type RowValues = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    /// Upsert the actor id (and extras) into the temp table.
    Upsert { table: TempTableSpec, actor: ActorId },
    /// Nothing to write, but the extras contract is still enforced.
    CheckExtras { table: TempTableSpec },
    Nothing,
}

/// Second phase of a temp-table write, completed once the owning row's primary
/// key is known.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a deferred write does nothing until completed"]
pub struct DeferredWrite {
    key: String,
    pending: Pending,
}

impl DeferredWrite {
    pub(crate) fn upsert(key: &str, table: TempTableSpec, actor: ActorId) -> Self {
        Self {
            key: key.to_string(),
            pending: Pending::Upsert { table, actor },
        }
    }

    pub(crate) fn check_extras(key: &str, table: TempTableSpec) -> Self {
        Self {
            key: key.to_string(),
            pending: Pending::CheckExtras { table },
        }
    }

    pub(crate) fn nothing(key: &str) -> Self {
        Self {
            key: key.to_string(),
            pending: Pending::Nothing,
        }
    }

    pub fn field_key(&self) -> &str {
        &self.key
    }

    /// True when completing this write touches storage.
    pub fn writes(&self) -> bool {
        matches!(self.pending, Pending::Upsert { .. })
    }

    /// Columns of the owning table that must be present in the extras map.
    pub fn required_extras(&self) -> Vec<&str> {
        match &self.pending {
            Pending::Upsert { table, .. } | Pending::CheckExtras { table } => {
                table.extra.values().map(String::as_str).collect()
            }
            Pending::Nothing => Vec::new(),
        }
    }

    /// Run the deferred write for the owning row `primary_key`. `extras` maps
    /// owning-table column names to the values copied into the temp table.
    /// Every configured extra must be present; otherwise nothing is written.
    pub fn complete(
        &self,
        db: &dyn StorageHandle,
        primary_key: impl Into<SqlValue>,
        extras: &BTreeMap<String, SqlValue>,
    ) -> Result<(), MigrationError> {
        match &self.pending {
            Pending::Nothing => Ok(()),
            Pending::CheckExtras { table } => {
                self.collect_extras(table, extras)?;
                Ok(())
            }
            Pending::Upsert { table, actor } => {
                let mut set = vec![(table.field.clone(), SqlValue::Int(actor.0))];
                set.extend(self.collect_extras(table, extras)?);

                let mut row = Vec::with_capacity(set.len() + 1);
                row.push((table.pk.clone(), primary_key.into()));
                row.extend(set.iter().cloned());

                db.upsert(&table.table, &table.pk, &row, &set)
            }
        }
    }

    fn collect_extras(
        &self,
        table: &TempTableSpec,
        extras: &BTreeMap<String, SqlValue>,
    ) -> Result<Vec<(String, SqlValue)>, MigrationError> {
        table
            .extra
            .iter()
            .map(|(to, from)| {
                extras
                    .get(from)
                    .map(|v| (to.clone(), v.clone()))
                    .ok_or_else(|| {
                        MigrationError::UsageError(format!(
                            "deferred write for '{}': extra value '{}' is not provided",
                            self.key, from
                        ))
                    })
            })
            .collect()
    }
}
