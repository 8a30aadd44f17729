//! Versioned experiment configuration records.
//!
//! Every experiment reads its tunables (frequencies, gains, pulse lengths, delays,
//! channel indices) from an [`ExperimentConfig`]. The record is never mutated in place:
//! [`ExperimentConfig::with`] returns a new record with a bumped version, so a sweep that
//! changes `pulse_freq` point by point cannot leak that change into the next sweep unless
//! the caller explicitly keeps the returned record.
//!
//! Layered defaults (`base | trans | qubit | expt` in the lab scripts) are expressed with
//! [`ConfigBuilder`], which applies named layers in the order they were declared and can
//! report which layer supplied a key.
//!
//! # Example
//!
//! ```
//! use qubit_daq::params::{ConfigBuilder, ExperimentConfig, ParamValue};
//!
//! let base = ExperimentConfig::new()
//!     .with("reps", 1000)
//!     .with("pulse_freq", 6962.0);
//! let trans = ExperimentConfig::new().with("reps", 20);
//!
//! let built = ConfigBuilder::new(base).layer("trans", trans).build();
//! assert_eq!(built.get_i64("reps").unwrap(), 20);
//! assert_eq!(built.get_f64("pulse_freq").unwrap(), 6962.0);
//! ```

use crate::error::{AppResult, SweepError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single configuration value.
///
/// Mirrors the value kinds that appear in the lab configuration dictionaries: numbers,
/// flags, strings, lists (channel/gain tables) and nested maps (`pulse_expt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value (DAC gains, repetition counts, channel indices)
    Int(i64),
    /// Floating point value (frequencies in MHz, lengths in us)
    Float(f64),
    /// Free-form string (pulse style, device address)
    Str(String),
    /// Ordered list
    List(Vec<ParamValue>),
    /// Nested map
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::List(_) => "list",
            ParamValue::Map(_) => "map",
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Convert a TOML value. Datetimes are kept as their string form.
    pub fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::Boolean(b) => ParamValue::Bool(b),
            toml::Value::Integer(i) => ParamValue::Int(i),
            toml::Value::Float(f) => ParamValue::Float(f),
            toml::Value::String(s) => ParamValue::Str(s),
            toml::Value::Datetime(d) => ParamValue::Str(d.to_string()),
            toml::Value::Array(items) => {
                ParamValue::List(items.into_iter().map(ParamValue::from_toml).collect())
            }
            toml::Value::Table(table) => ParamValue::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, ParamValue::from_toml(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::List(_) | ParamValue::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(value: Vec<T>) -> Self {
        ParamValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<ExperimentConfig> for ParamValue {
    fn from(value: ExperimentConfig) -> Self {
        ParamValue::Map(value.values)
    }
}

/// Flat (optionally nested) key to value record with a version counter.
///
/// Keys may be dotted paths (`pulse_expt.check_12`) which address nested maps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(rename = "config_version", default)]
    version: u64,
    #[serde(flatten)]
    values: BTreeMap<String, ParamValue>,
}

impl ExperimentConfig {
    /// Empty record at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record built from an existing map.
    pub fn from_map(values: BTreeMap<String, ParamValue>) -> Self {
        Self { version: 0, values }
    }

    /// Record built from a parsed TOML table (experiment parameter files).
    pub fn from_toml_table(table: toml::Table) -> Self {
        Self::from_map(
            table
                .into_iter()
                .map(|(k, v)| (k, ParamValue::from_toml(v)))
                .collect(),
        )
    }

    /// Parse a TOML document into a record.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| SweepError::Configuration(e.to_string()))?;
        Ok(Self::from_toml_table(table))
    }

    /// Number of derivations since the record was created.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Top-level entries.
    pub fn values(&self) -> &BTreeMap<String, ParamValue> {
        &self.values
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no key is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether `path` resolves to a value.
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    fn lookup(&self, path: &str) -> Option<&ParamValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            match current {
                ParamValue::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Raw value at `path`.
    pub fn get(&self, path: &str) -> AppResult<&ParamValue> {
        self.lookup(path)
            .ok_or_else(|| SweepError::MissingKey(path.to_string()))
    }

    fn wrong_type(path: &str, expected: &'static str, found: &ParamValue) -> SweepError {
        SweepError::WrongType {
            key: path.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Numeric value at `path`.
    pub fn get_f64(&self, path: &str) -> AppResult<f64> {
        let value = self.get(path)?;
        value
            .as_f64()
            .ok_or_else(|| Self::wrong_type(path, "float", value))
    }

    /// Integer value at `path`.
    pub fn get_i64(&self, path: &str) -> AppResult<i64> {
        let value = self.get(path)?;
        value
            .as_i64()
            .ok_or_else(|| Self::wrong_type(path, "integer", value))
    }

    /// Non-negative integer value at `path`, for counts.
    pub fn get_usize(&self, path: &str) -> AppResult<usize> {
        let value = self.get_i64(path)?;
        usize::try_from(value).map_err(|_| {
            SweepError::Configuration(format!("'{path}' must be non-negative, got {value}"))
        })
    }

    /// Boolean value at `path`.
    pub fn get_bool(&self, path: &str) -> AppResult<bool> {
        match self.get(path)? {
            ParamValue::Bool(b) => Ok(*b),
            other => Err(Self::wrong_type(path, "bool", other)),
        }
    }

    /// Boolean at `path`, `default` when unset.
    pub fn get_bool_or(&self, path: &str, default: bool) -> AppResult<bool> {
        if self.contains(path) {
            self.get_bool(path)
        } else {
            Ok(default)
        }
    }

    /// String value at `path`.
    pub fn get_str(&self, path: &str) -> AppResult<&str> {
        match self.get(path)? {
            ParamValue::Str(s) => Ok(s.as_str()),
            other => Err(Self::wrong_type(path, "string", other)),
        }
    }

    /// List at `path`.
    pub fn get_list(&self, path: &str) -> AppResult<&[ParamValue]> {
        match self.get(path)? {
            ParamValue::List(items) => Ok(items.as_slice()),
            other => Err(Self::wrong_type(path, "list", other)),
        }
    }

    /// Numeric list at `path`.
    pub fn get_f64_list(&self, path: &str) -> AppResult<Vec<f64>> {
        self.get_list(path)?
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| Self::wrong_type(path, "list of floats", item))
            })
            .collect()
    }

    /// Integer list at `path`.
    pub fn get_i64_list(&self, path: &str) -> AppResult<Vec<i64>> {
        self.get_list(path)?
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| Self::wrong_type(path, "list of integers", item))
            })
            .collect()
    }

    /// New record with `path` set to `value` and the version bumped.
    ///
    /// Intermediate maps along a dotted path are created when missing; a non-map value
    /// in the way is replaced by a map.
    pub fn with(&self, path: &str, value: impl Into<ParamValue>) -> Self {
        let mut next = self.clone();
        next.insert(path, value.into());
        next.version = self.version + 1;
        next
    }

    /// New record with every `(path, value)` pair applied, one version bump in total.
    pub fn with_many<I, K, V>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ParamValue>,
    {
        let mut next = self.clone();
        for (k, v) in entries {
            next.insert(k.as_ref(), v.into());
        }
        next.version = self.version + 1;
        next
    }

    fn insert(&mut self, path: &str, value: ParamValue) {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut map = &mut self.values;
        for segment in parents {
            let entry = map
                .entry((*segment).to_string())
                .or_insert_with(|| ParamValue::Map(BTreeMap::new()));
            if !matches!(entry, ParamValue::Map(_)) {
                *entry = ParamValue::Map(BTreeMap::new());
            }
            let ParamValue::Map(inner) = entry else {
                return;
            };
            map = inner;
        }
        map.insert((*last).to_string(), value);
    }

    /// Shallow merge, right-hand side wins (`self | other`).
    pub fn merged(&self, other: &ExperimentConfig) -> Self {
        let mut next = self.clone();
        for (k, v) in &other.values {
            next.values.insert(k.clone(), v.clone());
        }
        next.version = self.version.max(other.version) + 1;
        next
    }

    /// JSON view of the record, used by the storage writers.
    pub fn to_json(&self) -> AppResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Applies named configuration layers in a fixed, declared order.
///
/// Layers are shallow-merged onto the base in the order of the `layer` calls, so the
/// last declared layer wins for any key it sets.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    base: ExperimentConfig,
    layers: Vec<(String, ExperimentConfig)>,
}

impl ConfigBuilder {
    /// Start from a base record.
    pub fn new(base: ExperimentConfig) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Append a named override layer.
    pub fn layer(mut self, name: &str, layer: ExperimentConfig) -> Self {
        self.layers.push((name.to_string(), layer));
        self
    }

    /// Layer names in application order.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Name of the layer that supplies the final value of a top-level `key`
    /// (`"base"` when no layer overrides it, `None` when the key is unset).
    pub fn source_of(&self, key: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find(|(_, layer)| layer.values.contains_key(key))
            .map(|(name, _)| name.as_str())
            .or_else(|| self.base.values.contains_key(key).then_some("base"))
    }

    /// Apply every layer and return the merged record.
    pub fn build(&self) -> ExperimentConfig {
        let merged = self
            .layers
            .iter()
            .fold(self.base.clone(), |acc, (name, layer)| {
                tracing::trace!(layer = %name, keys = layer.len(), "Applying config layer");
                acc.merged(layer)
            });
        tracing::debug!(
            layers = ?self.layer_names(),
            version = merged.version(),
            "Configuration built"
        );
        merged
    }
}

/// Fast-flux gain tables for the auxiliary bias channels.
///
/// Programs that bias the qubits during the experiment and readout windows undo both
/// biases afterwards by playing the negated gains. That step is kept exactly as the
/// measurement scripts perform it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastFlux {
    /// Fast-flux generator channels
    pub channels: Vec<i64>,
    /// Gains applied during the readout window
    pub readout_gains: Vec<i64>,
    /// Gains applied during the experiment window
    pub expt_gains: Vec<i64>,
}

impl FastFlux {
    /// Read `FF_list_readout` and `FF_list_exp`, each a list of `[channel, gain]` pairs.
    pub fn from_config(config: &ExperimentConfig) -> AppResult<Self> {
        let readout = Self::pairs(config, "FF_list_readout")?;
        let expt = Self::pairs(config, "FF_list_exp")?;
        if readout.len() != expt.len() {
            return Err(SweepError::Configuration(format!(
                "FF_list_readout has {} channels but FF_list_exp has {}",
                readout.len(),
                expt.len()
            )));
        }
        Ok(Self {
            channels: readout.iter().map(|(ch, _)| *ch).collect(),
            readout_gains: readout.iter().map(|(_, g)| *g).collect(),
            expt_gains: expt.iter().map(|(_, g)| *g).collect(),
        })
    }

    fn pairs(config: &ExperimentConfig, key: &str) -> AppResult<Vec<(i64, i64)>> {
        config
            .get_list(key)?
            .iter()
            .map(|entry| match entry {
                ParamValue::List(pair) if pair.len() == 2 => {
                    match (pair[0].as_i64(), pair[1].as_i64()) {
                        (Some(ch), Some(gain)) => Ok((ch, gain)),
                        _ => Err(SweepError::Configuration(format!(
                            "'{key}' entries must be [channel, gain] integers"
                        ))),
                    }
                }
                other => Err(SweepError::WrongType {
                    key: key.to_string(),
                    expected: "[channel, gain] pair",
                    found: other.kind(),
                }),
            })
            .collect()
    }

    /// `-1 * gains`.
    pub fn compensation(gains: &[i64]) -> Vec<i64> {
        gains.iter().map(|g| -g).collect()
    }

    /// Gain tables in play order: experiment, readout, then both negated.
    pub fn schedule(&self) -> Vec<Vec<i64>> {
        vec![
            self.expt_gains.clone(),
            self.readout_gains.clone(),
            Self::compensation(&self.expt_gains),
            Self::compensation(&self.readout_gains),
        ]
    }
}
