//! Environment constants that override stored options

use super::fields::{self, FieldKind, FieldSpec};
use crate::mailer::catalog;
use serde_json::Value;
use std::collections::HashMap;

/// Switch that activates constant overrides
pub const OVERRIDE_SWITCH: &str = "MAILGATE_ON";

/// Prefix shared by every recognized constant
pub const CONSTANT_PREFIX: &str = "MAILGATE_";

/// Snapshot of the environment constants defined for this process
///
/// Constants are captured once and never change afterwards, which makes the
/// fields they cover read-only for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
    enabled: bool,
    constants: HashMap<String, String>,
}

impl EnvironmentOverrides {
    /// No overrides at all (used for non-primary connections)
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Capture `MAILGATE_*` variables from the process environment
    pub fn from_env() -> Self {
        Self::from_pairs(
            std::env::vars().filter(|(name, _)| name.starts_with(CONSTANT_PREFIX)),
        )
    }

    /// Build from explicit name/value pairs; the switch is read from the pairs too
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let constants: HashMap<String, String> = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let enabled = constants
            .get(OVERRIDE_SWITCH)
            .map(|value| fields::parse_bool(value))
            .unwrap_or(false);

        Self { enabled, constants }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the field is overridden right now
    pub fn is_defined(&self, spec: &FieldSpec) -> bool {
        self.enabled
            && spec
                .constant
                .map(|name| self.constants.contains_key(name))
                .unwrap_or(false)
    }

    /// Coerced constant value for the field, if it is overridden
    pub fn value_for(&self, spec: &FieldSpec) -> Option<Value> {
        if !self.is_defined(spec) {
            return None;
        }

        let raw = self.constants.get(spec.constant?)?;
        let value = match spec.kind {
            FieldKind::Bool => Value::Bool(fields::parse_bool(raw)),
            FieldKind::Int => match raw.trim().parse::<i64>() {
                Ok(number) => Value::from(number),
                Err(_) => spec.default.to_value(),
            },
            FieldKind::Encryption => {
                Value::String(fields::coerce_encryption(&Value::String(raw.clone())).to_string())
            }
            FieldKind::Mailer => {
                let slug = raw.trim().to_ascii_lowercase();
                if catalog::is_known_slug(&slug) {
                    Value::String(slug)
                } else {
                    Value::String(fields::BUILTIN_MAILER.to_string())
                }
            }
            FieldKind::Text | FieldKind::Email | FieldKind::Secret | FieldKind::List => {
                Value::String(raw.trim().to_string())
            }
        };

        Some(value)
    }
}
