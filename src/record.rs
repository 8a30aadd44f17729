//! Data records produced by completed sweeps.
//!
//! A [`DataRecord`] pairs the configuration of the final sweep iteration with the named
//! datasets that were accumulated. It is assembled once through [`DataRecordBuilder`]
//! and exposes no mutating API afterwards.

use crate::error::{AppResult, SweepError};
use crate::params::ExperimentConfig;
use chrono::{DateTime, Utc};
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A dense `f64` array stored row-major with its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    shape: Vec<usize>,
    #[serde(with = "values_serde")]
    values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
}

impl Dataset {
    /// Copy any ndarray into a dataset (logical row-major order).
    pub fn from_array<S, D>(array: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        Self {
            shape: array.shape().to_vec(),
            values: array.iter().copied().collect(),
            unit: None,
        }
    }

    /// One-dimensional dataset.
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
            unit: None,
        }
    }

    /// Zero-dimensional dataset.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            values: vec![value],
            unit: None,
        }
    }

    /// Attach a physical unit.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Array shape, empty for a scalar.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Physical unit, if one was attached.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Rebuild the n-dimensional array.
    pub fn to_array(&self) -> AppResult<ArrayD<f64>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())
            .map_err(|e| SweepError::Shape(e.to_string()))
    }
}

/// Serde helper for dataset values.
///
/// JSON has no token for non-finite numbers, so NaN and the infinities are written as
/// the strings `"NaN"`, `"Infinity"` and `"-Infinity"`. A bare `null` reads back as NaN.
mod values_serde {
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for &v in values {
            if v.is_finite() {
                seq.serialize_element(&v)?;
            } else if v.is_nan() {
                seq.serialize_element("NaN")?;
            } else if v > 0.0 {
                seq.serialize_element("Infinity")?;
            } else {
                seq.serialize_element("-Infinity")?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Option<Value>>::deserialize(deserializer)?
            .into_iter()
            .map(|v| match v {
                Some(Value::Number(n)) => Ok(n),
                None => Ok(f64::NAN),
                Some(Value::Text(text)) => match text.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "Infinity" => Ok(f64::INFINITY),
                    "-Infinity" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("invalid dataset value '{other}'"))),
                },
            })
            .collect()
    }
}

/// Configuration plus results of one completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    run_id: Uuid,
    experiment: String,
    created: DateTime<Utc>,
    config: ExperimentConfig,
    data: BTreeMap<String, Dataset>,
}

impl DataRecord {
    /// Start assembling a record for `experiment`.
    pub fn builder(experiment: &str, config: ExperimentConfig) -> DataRecordBuilder {
        DataRecordBuilder {
            experiment: experiment.to_string(),
            config,
            data: BTreeMap::new(),
        }
    }

    /// Unique id of the sweep that produced this record.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Experiment that produced the record.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// When the record was sealed.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Configuration at the final iteration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Every dataset by name.
    pub fn data(&self) -> &BTreeMap<String, Dataset> {
        &self.data
    }

    /// Dataset `name`.
    pub fn dataset(&self, name: &str) -> AppResult<&Dataset> {
        self.data
            .get(name)
            .ok_or_else(|| SweepError::Storage(format!("record has no dataset '{name}'")))
    }
}

/// Collects datasets before the record is sealed.
#[derive(Debug)]
pub struct DataRecordBuilder {
    experiment: String,
    config: ExperimentConfig,
    data: BTreeMap<String, Dataset>,
}

impl DataRecordBuilder {
    /// Add (or replace) dataset `name`.
    pub fn dataset(mut self, name: &str, dataset: Dataset) -> Self {
        self.data.insert(name.to_string(), dataset);
        self
    }

    /// Seal the record with a fresh run id and timestamp.
    pub fn build(self) -> DataRecord {
        DataRecord {
            run_id: Uuid::new_v4(),
            experiment: self.experiment,
            created: Utc::now(),
            config: self.config,
            data: self.data,
        }
    }
}
