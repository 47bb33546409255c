//! Layered option resolution
//!
//! Values are resolved from three sources in strict priority order:
//! environment constants, the persisted option tree and computed defaults.

pub mod environment;
pub mod fields;
pub mod resolver;
pub mod secret;
pub mod store;

pub use environment::EnvironmentOverrides;
pub use fields::{FieldKind, FieldSpec, BUILTIN_MAILER};
pub use resolver::ConfigResolver;
pub use secret::SecretBox;
pub use store::{MemoryStore, OptionStore, TomlFileStore};

use serde_json::Value;
use thiserror::Error;

/// Option tree: `group -> key -> value`
pub type OptionTree = serde_json::Map<String, Value>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse options: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize options: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which layer produced a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Environment,
    Stored,
    Default,
}

/// A value together with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: Value,
    pub source: ValueSource,
}

impl ResolvedValue {
    /// Fields set from the environment are read-only for writers
    pub fn is_read_only(&self) -> bool {
        self.source == ValueSource::Environment
    }
}
