//! Actor migration: stage-aware SQL fragments for user-reference fields.
//!
//! A table column that references a user can be stored two ways:
//!
//! - **old schema**: inline `{key}` (user id) and `{key}_text` (user name) columns
//! - **new schema**: a `{stem}_actor` column, or a row in a bridging temp table,
//!   pointing at the normalized `actor` table
//!
//! During a migration both representations coexist. [`SchemaMigrationEngine`]
//! decides, for the configured [`MigrationStage`], which columns to read and
//! write, and builds the matching fragments:
//!
//! - [`build_join`](SchemaMigrationEngine::build_join): SELECT fields and joins
//! - [`build_insert_values`](SchemaMigrationEngine::build_insert_values): row values
//! - [`build_insert_values_with_temp_table`](SchemaMigrationEngine::build_insert_values_with_temp_table):
//!   row values plus a [`DeferredWrite`] completed once the row's key exists
//! - [`build_where`](SchemaMigrationEngine::build_where): membership predicate
//!
//! The engine never runs read queries. Actor ids come from an
//! [`ActorNormalization`] per storage domain; `core::actor_store` provides a
//! SQLite implementation.
//!
//! # Example
//!
//! ```no_run
//! use actor_migration::core::actor_store::SqliteActorStoreFactory;
//! use actor_migration::core::db::SqliteDb;
//! use actor_migration::{EngineOptions, MigrationStage, SchemaMigrationEngine, UserIdentity};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let db = Arc::new(SqliteDb::open_in_memory("enwiki")?);
//! let factory = Arc::new(SqliteActorStoreFactory::new());
//! factory.register(Arc::clone(&db))?;
//!
//! let engine = SchemaMigrationEngine::new(
//!     BTreeMap::new(),
//!     MigrationStage::WRITE_BOTH_READ_OLD,
//!     factory,
//!     EngineOptions::default(),
//! )?;
//! let values = engine.build_insert_values(db.as_ref(), "rev_user", &UserIdentity::new(7, "Alice"))?;
//! assert_eq!(values.len(), 3);
//! # Ok::<(), actor_migration::MigrationError>(())
//! ```

pub mod core;
mod cli;

pub use crate::core::actor::{ActorNormalization, ActorStoreFactory, StorageHandle};
pub use crate::core::engine::{EngineOptions, SchemaMigrationEngine};
pub use crate::core::error::MigrationError;
pub use crate::core::field::{FieldSpec, TempTableSpec};
pub use crate::core::join::JoinDescriptor;
pub use crate::core::predicate::{WhereAlternative, WhereDescriptor};
pub use crate::core::sql::SqlValue;
pub use crate::core::stage::{MigrationStage, ReadMode, WriteMode};
pub use crate::core::user::{ActorId, UserIdentity, UserSelection};
pub use crate::core::write::{DeferredWrite, RowValues};

use crate::core::actor_store::SqliteActorStoreFactory;
use crate::core::config::EngineConfig;
use crate::core::db::SqliteDb;
use crate::core::trace::{JsonlSink, SignalSink};
use clap::Parser;
use cli::{Cli, Command, ConfigArgs};
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

pub fn run() -> Result<(), MigrationError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => {
            let (config, _) = load(&args)?;
            let fields: Vec<String> = config.fields.keys().cloned().collect();
            let stage = config.stage;
            let allow_unknown = config.allow_unknown;
            let engine = config.into_engine(Arc::new(SqliteActorStoreFactory::new()), None)?;

            println!(
                "{} stage {} ({:#x})",
                "✓".bright_green(),
                stage.to_string().bright_white().bold(),
                stage.bits()
            );
            println!(
                "  unknown fields: {}",
                if allow_unknown { "allowed" } else { "rejected" }
            );
            for key in fields {
                let spec = engine.registry().resolve(&key)?;
                let mut notes = Vec::new();
                if let Some(t) = spec.temp_table() {
                    notes.push(format!("temp table {}", t.table));
                }
                if let Some(v) = &spec.spec.deprecated_version {
                    notes.push(format!("deprecated {v}"));
                }
                if let Some(v) = &spec.spec.removed_version {
                    notes.push(format!("removed {v}"));
                }
                println!(
                    "  {} {} -> {}, {} {}",
                    "●".bright_cyan(),
                    key.bright_white(),
                    spec.text_column,
                    spec.actor_column,
                    notes.join(", ").dimmed()
                );
            }
            Ok(())
        }
        Command::Join(args) => {
            let (config, sink) = load(&args.config)?;
            let engine = config.into_engine(Arc::new(SqliteActorStoreFactory::new()), sink)?;
            let join = engine.build_join(&args.field)?;
            print_json(join.as_ref())
        }
        Command::Where(args) => {
            let (config, sink) = load(&args.config)?;
            let users = args
                .users
                .iter()
                .map(|raw| parse_user(raw))
                .collect::<Result<Vec<_>, _>>()?;

            let db = Arc::new(SqliteDb::open(&args.db, &args.domain)?);
            let factory = Arc::new(SqliteActorStoreFactory::new());
            factory.register(Arc::clone(&db))?;
            let engine = config.into_engine(factory, sink)?;
            let predicate = engine.build_where(db.as_ref(), &args.field, &users, !args.no_id_match)?;
            print_json(&predicate)
        }
        Command::Stages => {
            for (name, stage) in MigrationStage::PRESETS {
                println!("{:<22} {:#06x}  {}", name, stage.bits(), stage);
            }
            Ok(())
        }
    }
}

fn load(args: &ConfigArgs) -> Result<(EngineConfig, Option<Arc<dyn SignalSink>>), MigrationError> {
    let config = EngineConfig::load(&args.config)?;
    let sink = args
        .notices
        .as_ref()
        .map(|path| Arc::new(JsonlSink::new(path)) as Arc<dyn SignalSink>);
    Ok((config, sink))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), MigrationError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| MigrationError::ConfigurationError(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

/// `<id>:<name>`. Only the first colon separates, so IPv6 names survive.
pub(crate) fn parse_user(raw: &str) -> Result<UserIdentity, MigrationError> {
    let (id, name) = raw.split_once(':').ok_or_else(|| {
        MigrationError::UsageError(format!("user '{raw}' must be written as <id>:<name>"))
    })?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| MigrationError::UsageError(format!("user '{raw}': bad id: {e}")))?;
    Ok(UserIdentity::new(id, name))
}
