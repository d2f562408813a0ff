//! Migration stage: which representation(s) are written and which one is read.
//!
//! A stage is a pair of [`WriteMode`] and [`ReadMode`]. The pair is validated when
//! it is built, so an engine never holds a stage that reads a representation it
//! does not also write.
//!
//! The legacy integer form is still accepted (config files, older callers):
//!
//! | bit | meaning |
//! |---|---|
//! | `0x01` | write old |
//! | `0x02` | read old |
//! | `0x10` | write new |
//! | `0x20` | read new |

use crate::core::error::MigrationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const WRITE_OLD: u32 = 0x01;
pub const READ_OLD: u32 = 0x02;
pub const WRITE_NEW: u32 = 0x10;
pub const READ_NEW: u32 = 0x20;
pub const WRITE_MASK: u32 = WRITE_OLD | WRITE_NEW;
pub const READ_MASK: u32 = READ_OLD | READ_NEW;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    Old,
    New,
    Both,
}

impl WriteMode {
    pub fn writes_old(self) -> bool {
        matches!(self, WriteMode::Old | WriteMode::Both)
    }

    pub fn writes_new(self) -> bool {
        matches!(self, WriteMode::New | WriteMode::Both)
    }

    fn as_str(self) -> &'static str {
        match self {
            WriteMode::Old => "old",
            WriteMode::New => "new",
            WriteMode::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadMode {
    Old,
    New,
}

impl ReadMode {
    fn as_str(self) -> &'static str {
        match self {
            ReadMode::Old => "old",
            ReadMode::New => "new",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MigrationStage {
    write: WriteMode,
    read: ReadMode,
}

impl MigrationStage {
    /// Old schema only.
    pub const OLD: MigrationStage = MigrationStage {
        write: WriteMode::Old,
        read: ReadMode::Old,
    };
    /// Dual write, still reading the old schema.
    pub const WRITE_BOTH_READ_OLD: MigrationStage = MigrationStage {
        write: WriteMode::Both,
        read: ReadMode::Old,
    };
    /// Dual write, reading the new schema.
    pub const WRITE_BOTH_READ_NEW: MigrationStage = MigrationStage {
        write: WriteMode::Both,
        read: ReadMode::New,
    };
    /// New schema only.
    pub const NEW: MigrationStage = MigrationStage {
        write: WriteMode::New,
        read: ReadMode::New,
    };

    pub const PRESETS: [(&'static str, MigrationStage); 4] = [
        ("old", MigrationStage::OLD),
        ("write-both+read-old", MigrationStage::WRITE_BOTH_READ_OLD),
        ("write-both+read-new", MigrationStage::WRITE_BOTH_READ_NEW),
        ("new", MigrationStage::NEW),
    ];

    pub fn new(write: WriteMode, read: ReadMode) -> Result<Self, MigrationError> {
        match (write, read) {
            (WriteMode::New, ReadMode::Old) => Err(MigrationError::ConfigurationError(
                "Cannot read the old schema without also writing it".to_string(),
            )),
            (WriteMode::Old, ReadMode::New) => Err(MigrationError::ConfigurationError(
                "Cannot read the new schema without also writing it".to_string(),
            )),
            _ => Ok(Self { write, read }),
        }
    }

    /// Decode the legacy bitmask. Bits outside the four known flags are ignored.
    pub fn from_bits(bits: u32) -> Result<Self, MigrationError> {
        let write = match bits & WRITE_MASK {
            0 => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Stage {bits:#x} must include a write mode"
                )));
            }
            WRITE_OLD => WriteMode::Old,
            WRITE_NEW => WriteMode::New,
            _ => WriteMode::Both,
        };
        let read = match bits & READ_MASK {
            0 => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Stage {bits:#x} must include a read mode"
                )));
            }
            READ_OLD => ReadMode::Old,
            READ_NEW => ReadMode::New,
            _ => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Stage {bits:#x} cannot read both schemas"
                )));
            }
        };
        Self::new(write, read)
    }

    pub fn bits(self) -> u32 {
        let write = match self.write {
            WriteMode::Old => WRITE_OLD,
            WriteMode::New => WRITE_NEW,
            WriteMode::Both => WRITE_MASK,
        };
        let read = match self.read {
            ReadMode::Old => READ_OLD,
            ReadMode::New => READ_NEW,
        };
        write | read
    }

    pub fn write(self) -> WriteMode {
        self.write
    }

    pub fn read(self) -> ReadMode {
        self.read
    }

    pub fn writes_old(self) -> bool {
        self.write.writes_old()
    }

    pub fn writes_new(self) -> bool {
        self.write.writes_new()
    }

    pub fn reads_new(self) -> bool {
        self.read == ReadMode::New
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write-{}+read-{}", self.write.as_str(), self.read.as_str())
    }
}

impl FromStr for MigrationStage {
    type Err = MigrationError;

    /// Accepts a preset name, `write-<old|new|both>+read-<old|new>`, or an integer
    /// bitmask in decimal or `0x` hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((_, stage)) = Self::PRESETS.iter().find(|(name, _)| *name == s) {
            return Ok(*stage);
        }
        if let Some(hex) = s.strip_prefix("0x") {
            let bits = u32::from_str_radix(hex, 16).map_err(|e| {
                MigrationError::ConfigurationError(format!("Invalid stage bitmask '{s}': {e}"))
            })?;
            return Self::from_bits(bits);
        }
        if let Ok(bits) = s.parse::<u32>() {
            return Self::from_bits(bits);
        }

        let (write, read) = s.split_once('+').ok_or_else(|| {
            MigrationError::ConfigurationError(format!(
                "Invalid stage '{s}': expected write-<mode>+read-<mode>"
            ))
        })?;
        let write = match write.strip_prefix("write-") {
            Some("old") => WriteMode::Old,
            Some("new") => WriteMode::New,
            Some("both") => WriteMode::Both,
            _ => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Invalid write mode in stage '{s}'"
                )));
            }
        };
        let read = match read.strip_prefix("read-") {
            Some("old") => ReadMode::Old,
            Some("new") => ReadMode::New,
            Some("both") => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Stage '{s}' cannot read both schemas"
                )));
            }
            _ => {
                return Err(MigrationError::ConfigurationError(format!(
                    "Invalid read mode in stage '{s}'"
                )));
            }
        };
        Self::new(write, read)
    }
}

impl Serialize for MigrationStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MigrationStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bits(u32),
            Text(String),
        }

        let stage = match Raw::deserialize(deserializer)? {
            Raw::Bits(bits) => MigrationStage::from_bits(bits),
            Raw::Text(text) => text.parse(),
        };
        stage.map_err(serde::de::Error::custom)
    }
}
