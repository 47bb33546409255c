use super::fields::{self, FieldKind, FieldSpec, BUILTIN_MAILER};
use super::secret::{self, SecretBox};
use super::{
    ConfigResult, EnvironmentOverrides, OptionStore, OptionTree, ResolvedValue, ValueSource,
};
use crate::mailer::catalog;
use crate::message::address::is_valid_email;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves option values for one namespace
///
/// Clones share the same cache, so a `set` through any clone is observed by
/// all of them as soon as it returns.
#[derive(Clone)]
pub struct ConfigResolver {
    namespace: String,
    store: Arc<dyn OptionStore>,
    cache: Arc<RwLock<OptionTree>>,
    env: Arc<EnvironmentOverrides>,
    secrets: Option<SecretBox>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("namespace", &self.namespace)
            .field("env_enabled", &self.env.is_enabled())
            .field("encrypts_secrets", &self.secrets.is_some())
            .finish()
    }
}

impl ConfigResolver {
    /// Create a resolver and load the stored tree for `namespace`
    pub fn new(
        store: Arc<dyn OptionStore>,
        namespace: impl Into<String>,
        env: EnvironmentOverrides,
        secrets: Option<SecretBox>,
    ) -> ConfigResult<Self> {
        let namespace = namespace.into();
        let tree = store.load(&namespace)?.unwrap_or_default();

        Ok(Self {
            namespace,
            store,
            cache: Arc::new(RwLock::new(tree)),
            env: Arc::new(env),
            secrets,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Re-read the persisted tree, picking up writes made by other processes
    pub fn reload(&self) -> ConfigResult<()> {
        let tree = self.store.load(&self.namespace)?.unwrap_or_default();
        *self.cache.write() = tree;
        Ok(())
    }

    fn stored(&self, group: &str, key: &str) -> Option<Value> {
        self.cache
            .read()
            .get(group)
            .and_then(Value::as_object)
            .and_then(|fields| fields.get(key))
            .filter(|value| !value.is_null())
            .cloned()
    }

    fn reveal(&self, value: Value) -> Value {
        if let (Some(secrets), Some(sealed)) = (&self.secrets, value.as_str()) {
            if secret::is_encrypted(sealed) {
                // A corrupted secret degrades to the raw stored value
                if let Ok(plain) = secrets.decrypt(sealed) {
                    return Value::String(plain);
                }
            }
        }
        value
    }

    /// Resolve a value and report where it came from
    pub fn resolve(&self, group: &str, key: &str) -> Option<ResolvedValue> {
        let spec = fields::find(group, key);

        if let Some(value) = spec.and_then(|spec| self.env.value_for(spec)) {
            return Some(ResolvedValue {
                value,
                source: ValueSource::Environment,
            });
        }

        if let Some(value) = self.stored(group, key) {
            let value = match spec {
                Some(spec) if spec.kind == FieldKind::Secret => self.reveal(value),
                _ => value,
            };
            return Some(ResolvedValue {
                value,
                source: ValueSource::Stored,
            });
        }

        spec.map(|spec| ResolvedValue {
            value: spec.default.to_value(),
            source: ValueSource::Default,
        })
    }

    /// Effective value, `Value::Null` when the field is unknown and unset
    pub fn get(&self, group: &str, key: &str) -> Value {
        self.resolve(group, key)
            .map(|resolved| resolved.value)
            .unwrap_or(Value::Null)
    }

    pub fn get_str(&self, group: &str, key: &str) -> String {
        match self.get(group, key) {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn get_bool(&self, group: &str, key: &str) -> bool {
        fields::coerce_bool(&self.get(group, key))
    }

    pub fn get_int(&self, group: &str, key: &str) -> Option<i64> {
        fields::coerce_int(&self.get(group, key))
    }

    /// Comma separated field split into trimmed items
    pub fn get_list(&self, group: &str, key: &str) -> Vec<String> {
        fields::split_list(&self.get_str(group, key))
    }

    /// Whether an environment constant currently overrides the field
    pub fn is_const_defined(&self, group: &str, key: &str) -> bool {
        fields::find(group, key)
            .map(|spec| self.env.is_defined(spec))
            .unwrap_or(false)
    }

    /// Effective tree: stored values with secrets opened and constants applied
    pub fn get_all(&self) -> OptionTree {
        let mut tree = self.cache.read().clone();

        for (group, fields_value) in tree.iter_mut() {
            if let Value::Object(group_fields) = fields_value {
                for (key, value) in group_fields.iter_mut() {
                    if let Some(spec) = fields::find(group, key) {
                        if spec.kind == FieldKind::Secret {
                            *value = self.reveal(value.clone());
                        }
                    }
                }
            }
        }

        for spec in fields::FIELDS {
            if let Some(value) = self.env.value_for(spec) {
                let group = tree
                    .entry(spec.group.to_string())
                    .or_insert_with(|| Value::Object(OptionTree::new()));
                if let Value::Object(group_fields) = group {
                    group_fields.insert(spec.key.to_string(), value);
                }
            }
        }

        tree
    }

    /// Write options
    ///
    /// With `once` the write only happens when nothing is stored yet. With
    /// `overwrite` the stored tree is replaced, otherwise the new values are
    /// merged into it leaf by leaf.
    pub fn set(&self, values: OptionTree, once: bool, overwrite: bool) -> ConfigResult<()> {
        let mut cache = self.cache.write();

        if once && !cache.is_empty() {
            debug!("Options for {} already exist, skipping initial write", self.namespace);
            return Ok(());
        }

        let incoming = self.sanitize(values)?;
        let mut tree = if overwrite {
            incoming
        } else {
            let mut merged = cache.clone();
            merge(&mut merged, incoming);
            merged
        };
        validate(&mut tree);

        self.store.save(&self.namespace, &tree)?;
        *cache = tree;

        debug!("Options for {} updated", self.namespace);
        Ok(())
    }

    fn sanitize(&self, values: OptionTree) -> ConfigResult<OptionTree> {
        let mut sanitized = OptionTree::new();

        for (group, fields_value) in values {
            let group_fields = match fields_value {
                Value::Object(group_fields) => group_fields,
                other => {
                    sanitized.insert(group, other);
                    continue;
                }
            };

            let mut clean = OptionTree::new();
            for (key, value) in group_fields {
                match fields::find(&group, &key) {
                    Some(spec) => {
                        if let Some(value) = self.sanitize_field(spec, value)? {
                            clean.insert(key, value);
                        }
                    }
                    None => {
                        clean.insert(key, value);
                    }
                }
            }
            sanitized.insert(group, Value::Object(clean));
        }

        Ok(sanitized)
    }

    fn sanitize_field(&self, spec: &FieldSpec, value: Value) -> ConfigResult<Option<Value>> {
        if value.is_null() {
            return Ok(Some(value));
        }

        let text = || match &value {
            Value::String(text) => text.trim().to_string(),
            other => other.to_string(),
        };

        let clean = match spec.kind {
            FieldKind::Text => Value::String(text()),
            FieldKind::Mailer => Value::String(text().to_ascii_lowercase()),
            FieldKind::Email => {
                let email = text();
                if !email.is_empty() && !is_valid_email(&email) {
                    warn!("Ignoring invalid address for {}.{}: {}", spec.group, spec.key, email);
                    return Ok(None);
                }
                Value::String(email)
            }
            FieldKind::Bool => Value::Bool(fields::coerce_bool(&value)),
            FieldKind::Int => match fields::coerce_int(&value) {
                Some(number) => Value::from(number),
                None => {
                    warn!("Ignoring non-numeric value for {}.{}", spec.group, spec.key);
                    return Ok(None);
                }
            },
            FieldKind::Encryption => Value::String(fields::coerce_encryption(&value).to_string()),
            FieldKind::List => {
                let items = match &value {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .flat_map(fields::split_list)
                        .collect(),
                    _ => fields::split_list(&text()),
                };
                Value::String(items.join(", "))
            }
            FieldKind::Secret => {
                let plain = text();
                match &self.secrets {
                    Some(secrets) if !plain.is_empty() && !secret::is_encrypted(&plain) => {
                        Value::String(secrets.encrypt(&plain)?)
                    }
                    _ => Value::String(plain),
                }
            }
        };

        Ok(Some(clean))
    }
}

/// Recursive merge: objects merge by key, arrays by index, scalars are replaced
fn merge(target: &mut OptionTree, incoming: OptionTree) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

fn merge_value(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(update)) => merge(existing, update),
        (Value::Array(existing), Value::Array(update)) => {
            for (index, item) in update.into_iter().enumerate() {
                match existing.get_mut(index) {
                    Some(slot) => merge_value(slot, item),
                    None => existing.push(item),
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

/// Whole-tree invariants applied before persisting
fn validate(tree: &mut OptionTree) {
    let Some(Value::Object(mail)) = tree.get_mut("mail") else {
        return;
    };

    let unknown = match mail.get("mailer") {
        Some(Value::String(slug)) if !catalog::is_known_slug(slug) => Some(slug.clone()),
        _ => None,
    };

    if let Some(slug) = unknown {
        warn!("Unknown mailer '{}' replaced with '{}'", slug, BUILTIN_MAILER);
        mail.insert("mailer".to_string(), Value::String(BUILTIN_MAILER.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use serde_json::json;

    fn tree(value: Value) -> OptionTree {
        match value {
            Value::Object(tree) => tree,
            _ => panic!("expected an object"),
        }
    }

    fn resolver(env: EnvironmentOverrides) -> ConfigResolver {
        ConfigResolver::new(Arc::new(MemoryStore::new()), "primary", env, None).unwrap()
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let options = resolver(EnvironmentOverrides::disabled());

        assert_eq!(options.get_str("mail", "mailer"), "mail");
        assert_eq!(options.get_str("smtp", "encryption"), "none");
        assert!(options.get_bool("smtp", "autotls"));
        assert!(!options.get_bool("smtp", "auth"));
        assert_eq!(options.get("custom", "unknown"), Value::Null);
        assert!(options.resolve("custom", "unknown").is_none());
    }

    #[test]
    fn test_merge_keeps_untouched_leaves() {
        let options = resolver(EnvironmentOverrides::disabled());
        options
            .set(tree(json!({"mail": {"from_email": "a@example.com", "from_name": "A"}})), false, false)
            .unwrap();
        options
            .set(tree(json!({"mail": {"from_name": "B"}, "smtp": {"host": "mx.example.com"}})), false, false)
            .unwrap();

        assert_eq!(options.get_str("mail", "from_email"), "a@example.com");
        assert_eq!(options.get_str("mail", "from_name"), "B");
        assert_eq!(options.get_str("smtp", "host"), "mx.example.com");
    }

    #[test]
    fn test_merge_arrays_by_index() {
        let options = resolver(EnvironmentOverrides::disabled());
        options
            .set(tree(json!({"relay": {"hosts": ["a.example.com", "b.example.com", "c.example.com"]}})), false, false)
            .unwrap();
        options
            .set(tree(json!({"relay": {"hosts": ["x.example.com"]}})), false, false)
            .unwrap();

        assert_eq!(
            options.get_all()["relay"]["hosts"],
            json!(["x.example.com", "b.example.com", "c.example.com"])
        );
    }

    #[test]
    fn test_overwrite_replaces_tree() {
        let options = resolver(EnvironmentOverrides::disabled());
        options
            .set(tree(json!({"mail": {"from_name": "A"}, "smtp": {"host": "h"}})), false, false)
            .unwrap();
        options.set(tree(json!({"mail": {"from_name": "B"}})), false, true).unwrap();

        assert_eq!(options.get_str("mail", "from_name"), "B");
        assert_eq!(options.resolve("smtp", "host").unwrap().source, ValueSource::Default);
    }

    #[test]
    fn test_once_only_writes_when_empty() {
        let options = resolver(EnvironmentOverrides::disabled());
        options.set(tree(json!({"mail": {"from_name": "First"}})), true, false).unwrap();
        options.set(tree(json!({"mail": {"from_name": "Second"}})), true, false).unwrap();

        assert_eq!(options.get_str("mail", "from_name"), "First");
    }

    #[test]
    fn test_sanitizes_values() {
        let options = resolver(EnvironmentOverrides::disabled());
        options
            .set(
                tree(json!({
                    "mail": {"from_email": "not-an-address", "bcc_emails": ["a@x.com, b@y.com", "c@z.com"]},
                    "smtp": {"port": "465", "auth": "yes", "encryption": "STARTTLS"}
                })),
                false,
                false,
            )
            .unwrap();

        assert_eq!(options.resolve("mail", "from_email").unwrap().source, ValueSource::Default);
        assert_eq!(options.get_str("mail", "bcc_emails"), "a@x.com, b@y.com, c@z.com");
        assert_eq!(options.get_int("smtp", "port"), Some(465));
        assert!(options.get_bool("smtp", "auth"));
        assert_eq!(options.get_str("smtp", "encryption"), "none");
    }

    #[test]
    fn test_clones_share_cache() {
        let writer = resolver(EnvironmentOverrides::disabled());
        let reader = writer.clone();

        writer.set(tree(json!({"smtp": {"host": "smtp.example.com"}})), false, false).unwrap();

        assert_eq!(reader.get_str("smtp", "host"), "smtp.example.com");
    }

    #[test]
    fn test_secret_encrypted_at_rest() {
        let store = Arc::new(MemoryStore::new());
        let options = ConfigResolver::new(
            store.clone(),
            "primary",
            EnvironmentOverrides::disabled(),
            Some(SecretBox::from_passphrase("key")),
        )
        .unwrap();

        options.set(tree(json!({"smtp": {"pass": "hunter2"}})), false, false).unwrap();

        let raw = store.load("primary").unwrap().unwrap();
        let stored = raw["smtp"]["pass"].as_str().unwrap();
        assert!(secret::is_encrypted(stored));
        assert_eq!(options.get_str("smtp", "pass"), "hunter2");
        assert_eq!(options.get_all()["smtp"]["pass"], json!("hunter2"));
    }

    #[test]
    fn test_corrupted_secret_returns_raw_value() {
        let store = Arc::new(MemoryStore::new());
        store
            .save("primary", &tree(json!({"smtp": {"pass": "enc:not-base64!"}})))
            .unwrap();
        let options = ConfigResolver::new(
            store,
            "primary",
            EnvironmentOverrides::disabled(),
            Some(SecretBox::from_passphrase("key")),
        )
        .unwrap();

        assert_eq!(options.get_str("smtp", "pass"), "enc:not-base64!");
    }

    #[test]
    fn test_constant_overrides_stored_value() {
        let options = resolver(EnvironmentOverrides::from_pairs([
            ("MAILGATE_ON", "1"),
            ("MAILGATE_SMTP_HOST", "const.example.com"),
        ]));
        options.set(tree(json!({"smtp": {"host": "stored.example.com"}})), false, false).unwrap();

        let resolved = options.resolve("smtp", "host").unwrap();
        assert_eq!(resolved.value, json!("const.example.com"));
        assert!(resolved.is_read_only());
        assert!(options.is_const_defined("smtp", "host"));
        assert!(!options.is_const_defined("smtp", "user"));
        assert_eq!(options.get_all()["smtp"]["host"], json!("const.example.com"));
    }

    #[test]
    fn test_unknown_mailer_coerced_on_next_set() {
        let store = Arc::new(MemoryStore::new());
        store
            .save("primary", &tree(json!({"mail": {"mailer": "not-a-real-mailer"}})))
            .unwrap();
        let options =
            ConfigResolver::new(store.clone(), "primary", EnvironmentOverrides::disabled(), None)
                .unwrap();
        assert_eq!(options.get_str("mail", "mailer"), "not-a-real-mailer");

        options.set(tree(json!({"mail": {"from_name": "Site"}})), false, false).unwrap();

        assert_eq!(options.get_str("mail", "mailer"), "mail");
        let raw = store.load("primary").unwrap().unwrap();
        assert_eq!(raw["mail"]["mailer"], json!("mail"));
    }
}
