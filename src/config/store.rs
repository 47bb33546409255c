//! Persistence backends for option trees

use super::{ConfigError, ConfigResult, OptionTree};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where option trees are persisted, one tree per namespace
pub trait OptionStore: Send + Sync {
    /// Load the stored tree, `None` when nothing was ever saved
    fn load(&self, namespace: &str) -> ConfigResult<Option<OptionTree>>;

    /// Replace the stored tree
    fn save(&self, namespace: &str, tree: &OptionTree) -> ConfigResult<()>;
}

/// Volatile store, mostly useful in tests and embedded setups
#[derive(Debug, Default)]
pub struct MemoryStore {
    trees: Mutex<HashMap<String, OptionTree>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionStore for MemoryStore {
    fn load(&self, namespace: &str) -> ConfigResult<Option<OptionTree>> {
        Ok(self.trees.lock().get(namespace).cloned())
    }

    fn save(&self, namespace: &str, tree: &OptionTree) -> ConfigResult<()> {
        self.trees.lock().insert(namespace.to_string(), tree.clone());
        Ok(())
    }
}

/// Store that keeps one TOML file per namespace in a directory
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    dir: PathBuf,
}

impl TomlFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> ConfigResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default location under the user's configuration directory
    pub fn default_dir() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("mailgate"))
            .ok_or_else(|| ConfigError::Store("No configuration directory available".to_string()))
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", namespace))
    }
}

impl OptionStore for TomlFileStore {
    fn load(&self, namespace: &str) -> ConfigResult<Option<OptionTree>> {
        let path = self.path_for(namespace);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let value: Value = toml::from_str(&content)?;
        debug!("Loaded options from {}", path.display());

        match value {
            Value::Object(tree) => Ok(Some(tree)),
            _ => Err(ConfigError::Store(format!(
                "{} does not contain a table",
                path.display()
            ))),
        }
    }

    fn save(&self, namespace: &str, tree: &OptionTree) -> ConfigResult<()> {
        let path = self.path_for(namespace);
        // TOML has no null, so absent values are simply not written
        let content = toml::to_string_pretty(&strip_nulls(tree))?;
        fs::write(&path, content)?;

        debug!("Saved options to {}", path.display());
        Ok(())
    }
}

fn strip_nulls(tree: &OptionTree) -> OptionTree {
    tree.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::Object(inner) => Value::Object(strip_nulls(inner)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> OptionTree {
        match json!({
            "mail": { "mailer": "smtp", "from_email": "a@example.com", "unset": null },
            "smtp": { "port": 465, "auth": true }
        }) {
            Value::Object(tree) => tree,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_memory_store_namespaces() {
        let store = MemoryStore::new();
        store.save("primary", &sample()).unwrap();

        assert!(store.load("primary").unwrap().is_some());
        assert!(store.load("connection.backup").unwrap().is_none());
    }

    #[test]
    fn test_toml_store_roundtrip_drops_nulls() {
        let temp_dir = tempdir().unwrap();
        let store = TomlFileStore::new(temp_dir.path()).unwrap();

        assert!(store.load("primary").unwrap().is_none());
        store.save("primary", &sample()).unwrap();

        let loaded = store.load("primary").unwrap().unwrap();
        assert_eq!(loaded["mail"]["mailer"], json!("smtp"));
        assert_eq!(loaded["smtp"]["port"], json!(465));
        assert!(loaded["mail"].get("unset").is_none());
        assert!(temp_dir.path().join("primary.toml").exists());
    }
}
