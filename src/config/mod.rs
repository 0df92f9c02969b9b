//! Layered execution-target configuration.
//!
//! Per-target settings are merged from four ordered sources into one
//! effective configuration per dispatch call:
//!
//! 1. the named base layer
//! 2. an optional variant layer (`base.variant`), inheriting from the base
//! 3. declaration-time overrides, fixed when the callable was defined
//! 4. call-time overrides, highest precedence
//!
//! All keys merge last-write-wins except the two accumulation keys
//! (`worker_init` and `scheduler_options`): those are initialization-command
//! fields, so every layer that defines them contributes its own segment in
//! ascending precedence order instead of being overwritten.
//!
//! Layers originate in a script's inline TOML metadata; parsing that
//! metadata block out of the script text is the loader's job, so this
//! module only accepts already-parsed TOML tables.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

mod resolver;
#[cfg(test)]
mod tests;

pub use resolver::resolve;

/// Key whose segments form the worker pre-flight command block.
///
/// The resolver appends [`UV_BOOTSTRAP_LINE`] to this key so the
/// provisioning tool is available even if no layer installs it.
pub const WORKER_INIT_KEY: &str = "worker_init";

/// Key whose segments form the accumulated scheduler directives.
pub const SCHEDULER_OPTIONS_KEY: &str = "scheduler_options";

/// Fixed bootstrap line guaranteeing the provisioning tool exists in the
/// worker environment.
pub const UV_BOOTSTRAP_LINE: &str = "pip show -qq uv || pip install uv";

const ACCUMULATION_KEYS: [&str; 2] = [WORKER_INIT_KEY, SCHEDULER_OPTIONS_KEY];

/// A single configuration value: a scalar or a list of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl ConfigValue {
    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Render the value as the text segment used by accumulation keys.
    fn render(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::Str(s) => s.clone(),
            ConfigValue::List(items) => items.join("\n"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::List(value)
    }
}

impl TryFrom<&toml::Value> for ConfigValue {
    type Error = DispatchError;

    fn try_from(value: &toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(s) => Ok(ConfigValue::Str(s.clone())),
            toml::Value::Integer(i) => Ok(ConfigValue::Int(*i)),
            toml::Value::Float(f) => Ok(ConfigValue::Float(*f)),
            toml::Value::Boolean(b) => Ok(ConfigValue::Bool(*b)),
            toml::Value::Array(items) => {
                let strings = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            DispatchError::Configuration(
                                "config lists may only contain strings".to_string(),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConfigValue::List(strings))
            }
            other => Err(DispatchError::Configuration(format!(
                "unsupported config value type: {}",
                other.type_str()
            ))),
        }
    }
}

/// One key→value configuration table.
pub type ConfigLayer = BTreeMap<String, ConfigValue>;

/// A base layer plus its variant layers.
#[derive(Debug, Clone, Default)]
pub struct TargetLayer {
    /// The base layer's own keys.
    pub values: ConfigLayer,
    /// Variant layers keyed by variant name. Variants inherit every
    /// non-overridden base key at resolution time.
    pub variants: BTreeMap<String, ConfigLayer>,
}

/// The full set of named target layers available to a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    targets: BTreeMap<String, TargetLayer>,
}

impl LayerSet {
    /// An empty layer set (callables then resolve against declaration and
    /// call-time overrides only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a named base layer.
    pub fn insert(&mut self, name: impl Into<String>, layer: TargetLayer) {
        self.targets.insert(name.into(), layer);
    }

    /// Build a layer set from an already-parsed TOML table.
    ///
    /// Each top-level key names a base layer; nested tables inside a base
    /// become its variants. Deeper nesting is rejected.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut set = Self::new();
        for (name, value) in table {
            let base = value.as_table().ok_or_else(|| {
                DispatchError::Configuration(format!(
                    "target '{}' must be a table, got {}",
                    name,
                    value.type_str()
                ))
            })?;

            let mut target = TargetLayer::default();
            for (key, entry) in base {
                if let Some(variant) = entry.as_table() {
                    let mut layer = ConfigLayer::new();
                    for (vkey, ventry) in variant {
                        if ventry.is_table() {
                            return Err(DispatchError::Configuration(format!(
                                "variant '{}.{}' may not contain nested tables",
                                name, key
                            )));
                        }
                        layer.insert(vkey.clone(), ConfigValue::try_from(ventry)?);
                    }
                    target.variants.insert(key.clone(), layer);
                } else {
                    target.values.insert(key.clone(), ConfigValue::try_from(entry)?);
                }
            }
            set.targets.insert(name.clone(), target);
        }
        Ok(set)
    }

    /// Names of all base layers, for diagnostics.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub(crate) fn get(&self, base: &str) -> Option<&TargetLayer> {
        self.targets.get(base)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// The fully merged settings for one dispatch call.
///
/// Built fresh per call by [`resolve`]; never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl EffectiveConfig {
    pub(crate) fn from_values(values: BTreeMap<String, ConfigValue>) -> Self {
        Self { values }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Look up a string value by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(ConfigValue::as_str)
    }

    /// The remote endpoint identity carried by the layers, if any.
    ///
    /// Layers use this to map a friendly target name to the opaque id the
    /// remote execution service expects.
    pub fn endpoint(&self) -> Option<&str> {
        self.get_str("endpoint")
    }

    /// The resolved walltime, if any layer set one.
    ///
    /// Accepts either an integer number of seconds or an `HH:MM:SS` string.
    pub fn walltime(&self) -> Option<Duration> {
        match self.values.get("walltime")? {
            ConfigValue::Int(secs) if *secs > 0 => Some(Duration::from_secs(*secs as u64)),
            ConfigValue::Str(text) => parse_walltime(text),
            _ => None,
        }
    }

    /// Iterate over all resolved key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of resolved keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys were resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON view of the configuration, as handed to the remote execution
    /// service and recorded in the event log.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or_default()
    }
}

/// Parse a walltime given as `HH:MM:SS` (or plain seconds).
fn parse_walltime(text: &str) -> Option<Duration> {
    if let Ok(secs) = text.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }
    let mut parts = text.split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let total =
        h.parse::<u64>().ok()? * 3600 + m.parse::<u64>().ok()? * 60 + s.parse::<u64>().ok()?;
    (total > 0).then(|| Duration::from_secs(total))
}
