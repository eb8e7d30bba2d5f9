//! # Catalog sources
//!
//! Uniform access to the on-disk catalogs read by the pipeline. Every encoding is
//! exposed through the [`CatalogSource`] trait, whose single read operation answers
//! "give me these fields for the rows selected by this mask".
//!
//! ## Encodings
//! -----------------
//! * [`SourceKind::Parquet`] – flat binary table, one implicit group
//!   ([`ParquetCatalog`](crate::catalog::parquet_source::ParquetCatalog)).
//! * [`SourceKind::Hdf5`] – hierarchical file, fields stored under
//!   `catalog/<key>/<field>` (feature `hdf5`).
//! * [`SourceKind::Fits`] – binary table extension in HDU 1 (feature `fits`).
//! * [`SourceKind::Memory`] – an in-memory Arrow batch
//!   ([`MemoryCatalog`](crate::catalog::memory_source::MemoryCatalog)).
//!
//! ## Contract
//! -----------------
//! * Returned batches contain **exactly** the requested fields, in request order.
//! * Fields that were not requested are never decoded.
//! * A mask, when given, must have one entry per source row; only rows where it is
//!   `true` are returned, in source order.
//! * Missing fields are reported before any row is decoded.
//! * Sources reopen their file on each read, so concurrent tasks never share a handle.
use std::{fmt, str::FromStr, sync::Arc};

use arrow_array::{BooleanArray, RecordBatch};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::halo_errors::{DataAccessError, DataAccessKind, HaloError};

#[cfg(feature = "fits")]
pub mod fits_source;
#[cfg(feature = "hdf5")]
pub mod hdf5_source;
pub mod memory_source;
pub mod parquet_source;

pub use memory_source::MemoryCatalog;
pub use parquet_source::ParquetCatalog;

/// Container encoding of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Parquet,
    Hdf5,
    Fits,
    #[serde(skip)]
    Memory,
}

impl SourceKind {
    /// Whether fields live under a named group, which then must be given as a key.
    pub fn is_hierarchical(&self) -> bool {
        matches!(self, SourceKind::Hdf5)
    }

    /// Whether support for this encoding was compiled in.
    pub fn is_enabled(&self) -> bool {
        match self {
            SourceKind::Parquet | SourceKind::Memory => true,
            SourceKind::Hdf5 => cfg!(feature = "hdf5"),
            SourceKind::Fits => cfg!(feature = "fits"),
        }
    }

    /// Fail with a configuration error if this encoding cannot be read by this build.
    pub fn ensure_enabled(&self) -> Result<(), HaloError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(HaloError::UnsupportedSourceKind(format!(
                "{self} (enable the '{self}' cargo feature)"
            )))
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Parquet => "parquet",
            SourceKind::Hdf5 => "hdf5",
            SourceKind::Fits => "fits",
            SourceKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceKind {
    type Err = HaloError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" | "pq" => Ok(SourceKind::Parquet),
            "hdf5" | "h5" => Ok(SourceKind::Hdf5),
            "fits" | "fit" => Ok(SourceKind::Fits),
            _ => Err(HaloError::UnsupportedSourceKind(s.to_string())),
        }
    }
}

/// Identity of a source, carried into every data access error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub path: Utf8PathBuf,
    pub kind: SourceKind,
    pub key: Option<String>,
}

/// A named, keyed tabular data source.
pub trait CatalogSource: Send + Sync {
    fn describe(&self) -> SourceDescription;

    /// Number of records in the source.
    fn num_rows(&self) -> Result<usize, HaloError>;

    /// Names of the fields available in the source.
    fn field_names(&self) -> Result<Vec<String>, HaloError>;

    /// Read `fields` for the rows selected by `mask` (all rows when `None`).
    fn read_fields(
        &self,
        fields: &[String],
        mask: Option<&BooleanArray>,
    ) -> Result<RecordBatch, HaloError>;

    /// Fail with [`DataAccessKind::FieldNotFound`] on the first of `fields` the source
    /// does not hold, without reading any record.
    fn ensure_fields(&self, fields: &[String]) -> Result<(), HaloError> {
        let available = self.field_names()?;
        match fields.iter().find(|name| !available.contains(name)) {
            Some(missing) => Err(DataAccessError::new(
                DataAccessKind::FieldNotFound(missing.clone()),
                self.describe(),
                fields,
            )
            .into()),
            None => Ok(()),
        }
    }
}

/// Where a catalog lives and how it is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLocation {
    pub kind: SourceKind,
    pub path: Utf8PathBuf,
    pub key: Option<String>,
}

impl CatalogLocation {
    pub fn new(kind: SourceKind, path: impl AsRef<Utf8Path>, key: Option<&str>) -> Self {
        CatalogLocation {
            kind,
            path: path.as_ref().to_path_buf(),
            key: key.map(str::to_string),
        }
    }
}

/// Open a catalog for reading.
///
/// No file is touched here: sources open their file lazily on each read. The call
/// only checks that the encoding is supported by this build and that hierarchical
/// sources carry a group key.
///
/// Return
/// ----------
/// * A shareable source handle, or [`HaloError::UnsupportedSourceKind`] /
///   [`HaloError::MissingSourceKey`].
pub fn open_catalog(location: &CatalogLocation) -> Result<Arc<dyn CatalogSource>, HaloError> {
    location.kind.ensure_enabled()?;
    if location.kind.is_hierarchical() && location.key.is_none() {
        return Err(HaloError::MissingSourceKey(location.path.clone()));
    }

    match location.kind {
        SourceKind::Parquet => Ok(Arc::new(ParquetCatalog::new(&location.path))),
        #[cfg(feature = "hdf5")]
        SourceKind::Hdf5 => Ok(Arc::new(hdf5_source::Hdf5Catalog::new(
            &location.path,
            location.key.as_deref().unwrap_or_default(),
        ))),
        #[cfg(feature = "fits")]
        SourceKind::Fits => Ok(Arc::new(fits_source::FitsCatalog::new(&location.path))),
        other => Err(HaloError::UnsupportedSourceKind(format!(
            "{other} cannot be opened from a path"
        ))),
    }
}

/// Reorder and restrict `batch` to `fields`, failing on the first missing one.
pub(crate) fn select_fields(
    batch: &RecordBatch,
    fields: &[String],
    description: &SourceDescription,
) -> Result<RecordBatch, HaloError> {
    let schema = batch.schema();
    let indices = fields
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                DataAccessError::new(
                    DataAccessKind::FieldNotFound(name.clone()),
                    description.clone(),
                    fields,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(batch.project(&indices)?)
}

/// Reject empty field lists before any I/O.
pub(crate) fn ensure_fields_requested(
    fields: &[String],
    description: &SourceDescription,
) -> Result<(), HaloError> {
    if fields.is_empty() {
        return Err(HaloError::InvalidConfig(format!(
            "no field requested from {}",
            description.path
        )));
    }
    Ok(())
}

/// Check the membership-mask/source length invariant.
pub(crate) fn check_mask_len(mask: &BooleanArray, source_rows: usize) -> Result<(), HaloError> {
    if mask.len() != source_rows {
        return Err(HaloError::MembershipLengthMismatch {
            membership: mask.len(),
            source_rows,
        });
    }
    Ok(())
}
