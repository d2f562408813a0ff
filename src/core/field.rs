//! Per-field metadata: column names, temp-table indirection, lifecycle markers.
//!
//! A [`FieldRegistry`] is built once from a map of field key -> [`FieldSpec`]
//! and is immutable afterwards. Every engine operation resolves its key through
//! [`FieldRegistry::lookup`], which either returns the configured spec, a default
//! spec (unknown keys allowed), or a rejection.

use crate::core::error::MigrationError;
use crate::core::sql;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Bridging table used when the owning row's primary key is only known after
/// the row is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TempTableSpec {
    /// Temp table name.
    pub table: String,
    /// Temp table column holding the owning row's primary key.
    pub pk: String,
    /// Temp table column holding the actor id.
    pub field: String,
    /// Owning table's primary key expression the temp table joins against.
    pub join_pk: String,
    /// Indexed copy columns: temp table column -> source column on the owning
    /// table (the key callers use in the extras map).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Legacy name column. Defaults to `{key}_text`.
    #[serde(default)]
    pub text_field: Option<String>,
    /// Actor id column. Defaults to the key with `_user` replaced by `_actor`.
    #[serde(default)]
    pub actor_field: Option<String>,
    #[serde(default)]
    pub temp_table: Option<TempTableSpec>,
    /// Version in which the temp table for this field was dropped.
    #[serde(default)]
    pub former_temp_table: Option<String>,
    #[serde(default)]
    pub deprecated_version: Option<String>,
    #[serde(default)]
    pub removed_version: Option<String>,
    /// Component owning the field, reported in deprecation/removal messages.
    #[serde(default)]
    pub component: Option<String>,
}

/// Result of resolving a field key against the registry.
#[derive(Debug)]
pub enum FieldLookup<'a> {
    Known(&'a FieldSpec),
    UnknownAllowed(FieldSpec),
    UnknownRejected(String),
}

impl<'a> FieldLookup<'a> {
    pub fn into_spec(self) -> Result<Cow<'a, FieldSpec>, MigrationError> {
        match self {
            FieldLookup::Known(spec) => Ok(Cow::Borrowed(spec)),
            FieldLookup::UnknownAllowed(spec) => Ok(Cow::Owned(spec)),
            FieldLookup::UnknownRejected(key) => Err(MigrationError::UsageError(format!(
                "unknown field key '{key}'"
            ))),
        }
    }
}

/// A field spec with its column names filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField<'a> {
    pub key: &'a str,
    pub text_column: String,
    pub actor_column: String,
    pub spec: Cow<'a, FieldSpec>,
}

impl ResolvedField<'_> {
    pub fn temp_table(&self) -> Option<&TempTableSpec> {
        self.spec.temp_table.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    specs: BTreeMap<String, FieldSpec>,
    allow_unknown: bool,
}

impl FieldRegistry {
    /// Build a registry, checking every configured name is a plain SQL
    /// identifier (names are interpolated into SQL text).
    pub fn new(
        specs: BTreeMap<String, FieldSpec>,
        allow_unknown: bool,
    ) -> Result<Self, MigrationError> {
        for (key, spec) in &specs {
            validate_spec(key, spec)?;
        }
        Ok(Self {
            specs,
            allow_unknown,
        })
    }

    pub fn allow_unknown(&self) -> bool {
        self.allow_unknown
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn lookup(&self, key: &str) -> FieldLookup<'_> {
        match self.specs.get(key) {
            Some(spec) => FieldLookup::Known(spec),
            None if self.allow_unknown => FieldLookup::UnknownAllowed(FieldSpec::default()),
            None => FieldLookup::UnknownRejected(key.to_string()),
        }
    }

    pub fn resolve<'a>(&'a self, key: &'a str) -> Result<ResolvedField<'a>, MigrationError> {
        let spec = self.lookup(key).into_spec()?;
        if !sql::is_identifier(key) {
            return Err(MigrationError::UsageError(format!(
                "field key '{key}' is not a valid SQL identifier"
            )));
        }
        Ok(ResolvedField {
            key,
            text_column: spec
                .text_field
                .clone()
                .unwrap_or_else(|| default_text_column(key)),
            actor_column: spec
                .actor_field
                .clone()
                .unwrap_or_else(|| default_actor_column(key)),
            spec,
        })
    }
}

pub fn default_text_column(key: &str) -> String {
    format!("{key}_text")
}

/// `rev_user` -> `rev_actor`. Keys without the `_user` suffix get `_actor`
/// appended instead.
pub fn default_actor_column(key: &str) -> String {
    let stem = key.strip_suffix("_user").unwrap_or(key);
    format!("{stem}_actor")
}

fn validate_spec(key: &str, spec: &FieldSpec) -> Result<(), MigrationError> {
    sql::check_identifier(key, "Field key")?;
    if let Some(text) = &spec.text_field {
        sql::check_identifier(text, &format!("Text field of '{key}'"))?;
    }
    if let Some(actor) = &spec.actor_field {
        sql::check_identifier(actor, &format!("Actor field of '{key}'"))?;
    }
    if let Some(t) = &spec.temp_table {
        sql::check_identifier(&t.table, &format!("Temp table of '{key}'"))?;
        sql::check_identifier(&t.pk, &format!("Temp table pk of '{key}'"))?;
        sql::check_identifier(&t.field, &format!("Temp table field of '{key}'"))?;
        sql::check_identifier(&t.join_pk, &format!("Temp table join pk of '{key}'"))?;
        for (to, from) in &t.extra {
            sql::check_identifier(to, &format!("Temp table extra column of '{key}'"))?;
            sql::check_identifier(from, &format!("Temp table extra source of '{key}'"))?;
        }
    }
    Ok(())
}
