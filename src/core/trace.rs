//! Deprecation notices.
//!
//! Using a field that is scheduled for removal never fails; instead a
//! [`DeprecationNotice`] is handed to the engine's [`SignalSink`]. The default
//! sink prints a warning to stderr; [`JsonlSink`] appends notices to a
//! JSON-lines file and [`MemorySink`] keeps them for inspection.

use crate::core::error::MigrationError;
use crate::core::time;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecationNotice {
    pub ts: String,
    pub event_id: String,
    /// What was used, e.g. `actor migration for 'rev_user'`.
    pub subject: String,
    pub version: String,
    pub component: String,
}

impl DeprecationNotice {
    pub fn new(subject: String, version: &str, component: &str) -> Self {
        Self {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            subject,
            version: version.to_string(),
            component: component.to_string(),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Use of {} was deprecated in {} {}.",
            self.subject, self.component, self.version
        )
    }
}

pub trait SignalSink: Send + Sync {
    fn emit(&self, notice: &DeprecationNotice);
}

#[derive(Debug, Default)]
pub struct StderrSink;

impl SignalSink for StderrSink {
    fn emit(&self, notice: &DeprecationNotice) {
        eprintln!("{} {}", "Warning:".bright_yellow().bold(), notice.message());
    }
}

/// Appends each notice as one JSON object per line. Write failures are
/// reported on stderr; a notice must never turn into an operation failure.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, notice: &DeprecationNotice) -> Result<(), MigrationError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(notice)
            .map_err(|e| MigrationError::ConfigurationError(e.to_string()))?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

impl SignalSink for JsonlSink {
    fn emit(&self, notice: &DeprecationNotice) {
        if let Err(e) = self.append(notice) {
            eprintln!("Warning: failed to record deprecation notice: {}", e);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    notices: Mutex<Vec<DeprecationNotice>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<DeprecationNotice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SignalSink for MemorySink {
    fn emit(&self, notice: &DeprecationNotice) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
    }
}

/// Read back the notices recorded by a [`JsonlSink`].
pub fn read_notices(path: &Path) -> Result<Vec<DeprecationNotice>, MigrationError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| MigrationError::ConfigurationError(format!("bad notice line: {e}")))
        })
        .collect()
}
