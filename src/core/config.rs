//! `migration.toml` loading.
//!
//! ```toml
//! stage = "write-both+read-old"
//! allow_unknown = true
//!
//! [fields.rev_user]
//! deprecated_version = "1.31"
//!
//! [fields.ar_user.temp_table]
//! table = "archive_actor_temp"
//! pk = "aractor_id"
//! field = "aractor_actor"
//! join_pk = "ar_id"
//! extra = { aractor_timestamp = "ar_timestamp" }
//! ```

use crate::core::actor::ActorStoreFactory;
use crate::core::engine::{DEFAULT_COMPONENT, EngineOptions, SchemaMigrationEngine};
use crate::core::error::MigrationError;
use crate::core::field::FieldSpec;
use crate::core::stage::MigrationStage;
use crate::core::trace::SignalSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub const CONFIG_FILE_NAME: &str = "migration.toml";

fn default_allow_unknown() -> bool {
    true
}

fn default_component() -> String {
    DEFAULT_COMPONENT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub stage: MigrationStage,
    #[serde(default = "default_allow_unknown")]
    pub allow_unknown: bool,
    #[serde(default = "default_component")]
    pub default_component: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl EngineConfig {
    pub fn parse(content: &str) -> Result<Self, MigrationError> {
        toml::from_str(content).map_err(|e| MigrationError::ConfigurationError(e.to_string()))
    }

    /// Load a config file. When `path` is a directory, `migration.toml` inside
    /// it is read.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let path = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !path.exists() {
            return Err(MigrationError::ConfigurationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn into_engine(
        self,
        actor_stores: Arc<dyn ActorStoreFactory>,
        sink: Option<Arc<dyn SignalSink>>,
    ) -> Result<SchemaMigrationEngine, MigrationError> {
        let mut options = EngineOptions {
            allow_unknown: self.allow_unknown,
            default_component: self.default_component,
            ..EngineOptions::default()
        };
        if let Some(sink) = sink {
            options.sink = sink;
        }
        SchemaMigrationEngine::new(self.fields, self.stage, actor_stores, options)
    }
}
