use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::catalog::SourceDescription;
use crate::constants::CellId;

/// What went wrong while reading a catalog source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAccessKind {
    /// The file behind the source could not be opened or its metadata could not be parsed.
    Open(String),
    /// A requested field is not part of the source.
    FieldNotFound(String),
    /// The file was opened but decoding the requested rows failed.
    Read(String),
}

impl fmt::Display for DataAccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAccessKind::Open(reason) => write!(f, "unable to open source ({reason})"),
            DataAccessKind::FieldNotFound(field) => write!(f, "field '{field}' not found"),
            DataAccessKind::Read(reason) => write!(f, "read failed ({reason})"),
        }
    }
}

/// Failure to read fields from a catalog source, with the full diagnostic context.
///
/// The message names the file, the source kind and key, the requested field list
/// and, once known, the cell being processed.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAccessError {
    pub kind: DataAccessKind,
    pub source: SourceDescription,
    pub fields: Vec<String>,
    pub cell: Option<CellId>,
}

impl DataAccessError {
    pub fn new(kind: DataAccessKind, source: SourceDescription, fields: &[String]) -> Self {
        DataAccessError {
            kind,
            source,
            fields: fields.to_vec(),
            cell: None,
        }
    }

    /// Attach the cell being loaded when the error surfaced.
    pub fn in_cell(mut self, cell: CellId) -> Self {
        self.cell = Some(cell);
        self
    }
}

impl fmt::Display for DataAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [file: {}, format: {}, key: {}, fields: {:?}",
            self.kind,
            self.source.path,
            self.source.kind,
            self.source.key.as_deref().unwrap_or("-"),
            self.fields
        )?;
        match self.cell {
            Some(cell) => write!(f, ", cell: {cell}]"),
            None => write!(f, "]"),
        }
    }
}

impl std::error::Error for DataAccessError {}

#[derive(Error, Debug)]
pub enum HaloError {
    #[error("Unsupported catalog source kind: {0}")]
    UnsupportedSourceKind(String),

    #[error("Hierarchical source {0} requires a group key")]
    MissingSourceKey(Utf8PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to read configuration file {path}: {reason}")]
    ConfigFile { path: Utf8PathBuf, reason: String },

    #[error("Data access error: {0}")]
    DataAccess(#[from] DataAccessError),

    #[error("Row alignment error: {0}")]
    Alignment(String),

    #[error("Field '{0}' already present in the primary table")]
    DuplicateField(String),

    #[error("Cell membership has {membership} entries but the source has {source_rows} rows")]
    MembershipLengthMismatch {
        membership: usize,
        source_rows: usize,
    },

    #[error("Cell membership cache was built with {found}, expected {expected}")]
    MembershipResolutionMismatch { expected: String, found: String },

    #[error("Invalid sky coordinate at row {row}: lon={lon}, lat={lat}")]
    InvalidCoordinate { row: usize, lon: f64, lat: f64 },

    #[error("Coordinate arrays have different lengths ({lon} vs {lat})")]
    CoordinateLengthMismatch { lon: usize, lat: usize },

    #[error("Field '{field}' has unsupported type {data_type}")]
    UnsupportedFieldType { field: String, data_type: String },

    #[error("Processing of cell {cell} failed: {source}")]
    Cell {
        cell: CellId,
        #[source]
        source: Box<HaloError>,
    },

    #[error("Output file already exists: {0}")]
    OutputExists(Utf8PathBuf),

    #[error("Unable to write {path}: {reason}")]
    OutputWrite { path: Utf8PathBuf, reason: String },

    #[error("Unable to build the worker pool: {0}")]
    WorkerPool(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),
}

impl HaloError {
    /// Wrap a per-cell failure so the orchestrator reports which cell aborted the run.
    pub fn in_cell(self, cell: CellId) -> Self {
        match self {
            HaloError::DataAccess(err) if err.cell.is_none() => HaloError::Cell {
                cell,
                source: Box::new(HaloError::DataAccess(err.in_cell(cell))),
            },
            HaloError::Cell { .. } => self,
            other => HaloError::Cell {
                cell,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping the per-cell wrapper.
    pub fn root(&self) -> &HaloError {
        match self {
            HaloError::Cell { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.root(),
            HaloError::UnsupportedSourceKind(_)
                | HaloError::MissingSourceKey(_)
                | HaloError::InvalidConfig(_)
                | HaloError::ConfigFile { .. }
        )
    }

    pub fn is_data_access_error(&self) -> bool {
        matches!(self.root(), HaloError::DataAccess(_))
    }
}
