//! Read-path fragments and their per-engine memoization.

use crate::core::error::MigrationError;
use crate::core::field::ResolvedField;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

pub const ACTOR_TABLE: &str = "actor";

/// One table added to FROM with an inner join condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableJoin {
    pub alias: String,
    pub table: String,
    pub on: String,
}

impl TableJoin {
    pub fn clause(&self) -> String {
        format!("JOIN {} {} ON ({})", self.table, self.alias, self.on)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectField {
    /// Output column name (the legacy column name for the sub-field).
    pub alias: String,
    pub expr: String,
}

impl SelectField {
    fn new(alias: &str, expr: impl Into<String>) -> Self {
        Self {
            alias: alias.to_string(),
            expr: expr.into(),
        }
    }

    pub fn render(&self) -> String {
        if self.alias == self.expr {
            self.expr.clone()
        } else {
            format!("{} AS {}", self.expr, self.alias)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinFields {
    pub user_id: SelectField,
    pub user_name: SelectField,
    pub actor: SelectField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDescriptor {
    pub tables: Vec<TableJoin>,
    pub fields: JoinFields,
}

impl JoinDescriptor {
    /// Comma-separated select list: user id, user name, actor.
    pub fn select_list(&self) -> String {
        [&self.fields.user_id, &self.fields.user_name, &self.fields.actor]
            .iter()
            .map(|f| f.render())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JOIN clauses in dependency order, space separated. Empty when reading
    /// the old schema.
    pub fn join_clause(&self) -> String {
        join_clauses(&self.tables)
    }
}

pub fn join_clauses(tables: &[TableJoin]) -> String {
    tables
        .iter()
        .map(TableJoin::clause)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Column expression supplying the actor id for a field under the new schema,
/// plus the temp-table join needed to reach it. Aliases are namespaced by the
/// field key.
pub(crate) fn actor_source(field: &ResolvedField<'_>) -> (Vec<TableJoin>, String) {
    match field.temp_table() {
        Some(t) => {
            let alias = format!("temp_{}", field.key);
            let join_field = format!("{}.{}", alias, t.field);
            let join = TableJoin {
                on: format!("{}.{} = {}", alias, t.pk, t.join_pk),
                alias,
                table: t.table.clone(),
            };
            (vec![join], join_field)
        }
        None => (Vec::new(), field.actor_column.clone()),
    }
}

pub(crate) fn build_old(field: &ResolvedField<'_>) -> JoinDescriptor {
    JoinDescriptor {
        tables: Vec::new(),
        fields: JoinFields {
            user_id: SelectField::new(field.key, field.key),
            user_name: SelectField::new(&field.text_column, field.text_column.clone()),
            actor: SelectField::new(&field.actor_column, "NULL"),
        },
    }
}

pub(crate) fn build_new(field: &ResolvedField<'_>) -> JoinDescriptor {
    let (mut tables, join_field) = actor_source(field);
    let alias = format!("actor_{}", field.key);
    tables.push(TableJoin {
        on: format!("{alias}.actor_id = {join_field}"),
        alias: alias.clone(),
        table: ACTOR_TABLE.to_string(),
    });
    JoinDescriptor {
        tables,
        fields: JoinFields {
            user_id: SelectField::new(field.key, format!("{alias}.actor_user")),
            user_name: SelectField::new(&field.text_column, format!("{alias}.actor_name")),
            actor: SelectField::new(&field.actor_column, join_field),
        },
    }
}

/// Field key -> join descriptor. Entries are never invalidated: the
/// descriptor is a pure function of key, stage and field spec, all fixed for
/// the owning engine's lifetime.
#[derive(Debug, Default)]
pub struct JoinCache {
    entries: RwLock<FxHashMap<String, Arc<JoinDescriptor>>>,
}

impl JoinCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached descriptor for `key`, computing it with `build` on a
    /// miss. Concurrent misses may each run `build`; the first insert wins and
    /// every caller gets that entry.
    pub fn get_or_try_insert<F>(&self, key: &str, build: F) -> Result<Arc<JoinDescriptor>, MigrationError>
    where
        F: FnOnce() -> Result<JoinDescriptor, MigrationError>,
    {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = entries.get(key) {
                return Ok(Arc::clone(hit));
            }
        }

        let built = Arc::new(build()?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            entries.entry(key.to_string()).or_insert(built),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
