//! Data record writers.
//!
//! - [`JsonWriter`]: always available, writes the record as pretty JSON.
//! - [`Hdf5Writer`]: one dataset per result array plus string attributes for the
//!   configuration (`storage_hdf5` feature).
//!
//! [`Persister`] wraps a writer and guarantees that each sweep is written exactly once.
//! File paths come from [`DataFileNamer`].

use crate::error::{AppResult, SweepError};
use crate::params::ExperimentConfig;
use crate::record::DataRecord;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// A writer for completed data records.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Write `record` to `path`, creating parent directories.
    async fn write(&self, record: &DataRecord, path: &Path) -> AppResult<()>;
}

async fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// A writer for JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWriter;

impl JsonWriter {
    /// JSON writer.
    pub fn new() -> Self {
        Self
    }

    /// Load a record previously written by this writer.
    pub async fn read(path: &Path) -> AppResult<DataRecord> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RecordWriter for JsonWriter {
    fn extension(&self) -> &'static str {
        "json"
    }

    async fn write(&self, record: &DataRecord, path: &Path) -> AppResult<()> {
        ensure_parent(path).await?;
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), datasets = record.data().len(), "JSON record written");
        Ok(())
    }
}

/// A writer for HDF5 files.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hdf5Writer;

impl Hdf5Writer {
    /// HDF5 writer.
    pub fn new() -> Self {
        Self
    }

    #[cfg(feature = "storage_hdf5")]
    fn write_blocking(record: &DataRecord, path: &Path) -> AppResult<()> {
        let file = hdf5::File::create(path).map_err(storage_err)?;

        write_string_attr(&file, "run_id", &record.run_id().to_string())?;
        write_string_attr(&file, "experiment", record.experiment())?;
        write_string_attr(&file, "created", &record.created().to_rfc3339())?;
        write_string_attr(&file, "config", &serde_json::to_string(record.config())?)?;

        for (name, dataset) in record.data() {
            let ds = file
                .new_dataset::<f64>()
                .shape(dataset.shape().to_vec())
                .create(name.as_str())
                .map_err(storage_err)?;
            ds.write_raw(dataset.values()).map_err(storage_err)?;
            if let Some(unit) = dataset.unit() {
                write_string_attr(&ds, "unit", unit)?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "storage_hdf5")]
fn storage_err(err: hdf5::Error) -> SweepError {
    SweepError::Storage(err.to_string())
}

#[cfg(feature = "storage_hdf5")]
fn write_string_attr(location: &hdf5::Location, name: &str, value: &str) -> AppResult<()> {
    use hdf5::types::VarLenUnicode;
    let value = value
        .parse::<VarLenUnicode>()
        .map_err(|e| SweepError::Storage(format!("attribute '{name}': {e}")))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)
        .map_err(storage_err)?
        .write_scalar(&value)
        .map_err(storage_err)
}

#[async_trait]
impl RecordWriter for Hdf5Writer {
    fn extension(&self) -> &'static str {
        "h5"
    }

    #[cfg(feature = "storage_hdf5")]
    async fn write(&self, record: &DataRecord, path: &Path) -> AppResult<()> {
        ensure_parent(path).await?;
        let record = record.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_blocking(&record, &path))
            .await
            .map_err(|e| SweepError::Storage(format!("HDF5 writer task failed: {e}")))?
    }

    #[cfg(not(feature = "storage_hdf5"))]
    async fn write(&self, _record: &DataRecord, _path: &Path) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

/// Writer for a configured backend name (`json` or `hdf5`).
pub fn writer_for(backend: &str) -> AppResult<Box<dyn RecordWriter>> {
    match backend {
        "json" => Ok(Box::new(JsonWriter::new())),
        "hdf5" | "h5" => Ok(Box::new(Hdf5Writer::new())),
        other => Err(SweepError::Configuration(format!(
            "unknown storage backend '{other}' (expected json or hdf5)"
        ))),
    }
}

/// Paths for one saved sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileNames {
    /// Dated directory holding both files
    pub folder: PathBuf,
    /// Data file
    pub data: PathBuf,
    /// Plot image next to the data file
    pub image: PathBuf,
}

/// Builds `outer/path/YYYY_MM_DD/path_YYYY_MM_DD_HH_MM_SS.<ext>` file names.
#[derive(Debug, Clone)]
pub struct DataFileNamer {
    outer_folder: PathBuf,
    path: String,
}

impl DataFileNamer {
    /// `path` is the experiment folder name, reused as the file stem prefix.
    pub fn new(outer_folder: impl Into<PathBuf>, path: &str) -> Self {
        Self {
            outer_folder: outer_folder.into(),
            path: path.to_string(),
        }
    }

    /// Names for a sweep started at `time`.
    pub fn names_at(&self, time: DateTime<Local>, extension: &str) -> DataFileNames {
        let folder = self
            .outer_folder
            .join(&self.path)
            .join(time.format("%Y_%m_%d").to_string());
        let stem = format!("{}_{}", self.path, time.format("%Y_%m_%d_%H_%M_%S"));
        DataFileNames {
            data: folder.join(format!("{stem}.{extension}")),
            image: folder.join(format!("{stem}.svg")),
            folder,
        }
    }

    /// Names for a sweep starting now.
    pub fn names(&self, extension: &str) -> DataFileNames {
        self.names_at(Local::now(), extension)
    }
}

/// Write the configuration alone as pretty JSON.
pub async fn save_config(config: &ExperimentConfig, path: &Path) -> AppResult<()> {
    ensure_parent(path).await?;
    tokio::fs::write(path, serde_json::to_vec_pretty(config)?).await?;
    info!(path = %path.display(), version = config.version(), "Configuration saved");
    Ok(())
}

/// Writes each completed sweep exactly once.
pub struct Persister {
    writer: Box<dyn RecordWriter>,
    written: HashSet<Uuid>,
}

impl Persister {
    /// Persister delegating to `writer`.
    pub fn new(writer: Box<dyn RecordWriter>) -> Self {
        Self {
            writer,
            written: HashSet::new(),
        }
    }

    /// Extension of the underlying writer.
    pub fn extension(&self) -> &'static str {
        self.writer.extension()
    }

    /// Whether the sweep `run_id` has been written.
    pub fn is_persisted(&self, run_id: Uuid) -> bool {
        self.written.contains(&run_id)
    }

    /// Write `record` to `path` and print the confirmation line.
    ///
    /// A second call for the same record fails with [`SweepError::AlreadyPersisted`]
    /// without touching the file system.
    pub async fn persist(&mut self, record: &DataRecord, path: &Path) -> AppResult<PathBuf> {
        if self.written.contains(&record.run_id()) {
            return Err(SweepError::AlreadyPersisted(record.run_id().to_string()));
        }
        println!("Saving {}", path.display());
        self.writer.write(record, path).await?;
        self.written.insert(record.run_id());
        info!(
            run_id = %record.run_id(),
            experiment = record.experiment(),
            path = %path.display(),
            "Data record persisted"
        );
        Ok(path.to_path_buf())
    }
}
