//! # Cell membership table
//!
//! Per-record cell lookup for the reference catalog. The table is built once by
//! scanning the catalog's coordinate columns through the spatial indexer, then
//! shared read-only by every per-cell task to answer "which rows belong to cell X"
//! without touching the catalog again.
//!
//! ## Invariants
//! -----------------
//! * `len()` equals the row count of the catalog it was built from, and entry `i`
//!   is the cell of row `i`. Every masked read re-checks the length against the
//!   source being read.
//! * [`CellMembership::unique_cells`] is ascending and de-duplicated; it is the
//!   iteration domain of the parallel run.
//!
//! ## Persistence
//! -----------------
//! Building the table is the one full-catalog scan of a run. [`CellMembership::save`]
//! stores it as a single-column Parquet file (`cell_id: UInt64`) tagged with the
//! tessellation description; [`CellMembership::load`] refuses a file built with a
//! different resolution or ordering.
use std::{collections::HashMap, fs::File, sync::Arc};

use arrow_array::{Array, BooleanArray, Float64Array, RecordBatch, UInt64Array};
use arrow_buffer::BooleanBuffer;
use arrow_cast::cast;
use arrow_schema::{DataType, Field, Schema};
use camino::Utf8Path;
use itertools::Itertools;
use log::{debug, info, log_enabled, warn, Level};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    file::{metadata::KeyValue, properties::WriterProperties},
};

use crate::{
    catalog::CatalogSource,
    constants::{CellId, FastHashMap, MEMBERSHIP_COLUMN},
    halo_errors::HaloError,
    tessellation::{compute_cell_ids, Tessellation},
};

/// Metadata key holding [`Tessellation::describe`] in persisted tables.
const TESSELLATION_METADATA_KEY: &str = "halopix.tessellation";

/// Cell identifier of every record of the reference catalog, in catalog order.
#[derive(Debug, Clone)]
pub struct CellMembership {
    cells: Arc<[CellId]>,
    unique: Vec<CellId>,
}

impl CellMembership {
    /// Wrap an existing per-record cell array.
    pub fn from_cells(cells: Vec<CellId>) -> Self {
        let unique = cells.iter().copied().sorted_unstable().dedup().collect();
        CellMembership {
            cells: cells.into(),
            unique,
        }
    }

    /// Scan the coordinate fields of `source` once and index every record.
    ///
    /// Arguments
    /// -----------------
    /// * `source`: the reference catalog.
    /// * `tessellation`: the partitioning scheme.
    /// * `coordinate_fields`: `[longitude, latitude]` field names, in degrees.
    ///
    /// Return
    /// ----------
    /// * The membership table, or the first data access / coordinate error.
    pub fn build<T: Tessellation + ?Sized>(
        source: &dyn CatalogSource,
        tessellation: &T,
        coordinate_fields: &[String; 2],
    ) -> Result<Self, HaloError> {
        info!(
            "Indexing {} with {} over fields {:?}",
            source.describe().path,
            tessellation.describe(),
            coordinate_fields
        );
        let coords = source.read_fields(coordinate_fields, None)?;
        let lon = float_column(&coords, 0, &coordinate_fields[0])?;
        let lat = float_column(&coords, 1, &coordinate_fields[1])?;
        drop(coords);

        let cells = compute_cell_ids(tessellation, lon.values(), lat.values())?;
        let membership = Self::from_cells(cells);
        info!(
            "Indexed {} records into {} cells",
            membership.len(),
            membership.unique_cells().len()
        );
        if log_enabled!(Level::Debug) {
            membership.log_cell_counts();
        }
        Ok(membership)
    }

    fn log_cell_counts(&self) {
        let counts = self.cell_counts();
        if let Some((densest, most)) = counts.iter().max_by_key(|&(cell, n)| (*n, *cell)) {
            let fewest = counts.values().min().copied().unwrap_or_default();
            debug!(
                "Records per cell: min {fewest}, max {most} (cell {densest}), mean {:.1}",
                self.len() as f64 / counts.len() as f64
            );
        }
    }

    /// Load a persisted table, or build and persist it.
    ///
    /// When `reuse` is set and `cache` exists, the table is read back from disk. A cache
    /// built with another tessellation, or whose length differs from the source's row
    /// count, is discarded with a warning and rebuilt.
    pub fn load_or_build<T: Tessellation + ?Sized>(
        source: &dyn CatalogSource,
        tessellation: &T,
        coordinate_fields: &[String; 2],
        cache: &Utf8Path,
        reuse: bool,
    ) -> Result<Self, HaloError> {
        if reuse && cache.exists() {
            match Self::load(cache, tessellation) {
                Ok(membership) if membership.len() == source.num_rows()? => {
                    info!("Reusing cell membership from {cache}");
                    return Ok(membership);
                }
                Ok(membership) => warn!(
                    "Cell membership cache {cache} has {} entries, source has a different row count; rebuilding",
                    membership.len()
                ),
                Err(err) => warn!("Ignoring cell membership cache {cache}: {err}"),
            }
        }

        let membership = Self::build(source, tessellation, coordinate_fields)?;
        membership.save(cache, tessellation)?;
        Ok(membership)
    }

    /// Persist the table as a single-column Parquet file, overwriting `path`.
    pub fn save<T: Tessellation + ?Sized>(
        &self,
        path: &Utf8Path,
        tessellation: &T,
    ) -> Result<(), HaloError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let schema = Arc::new(Schema::new(vec![Field::new(
            MEMBERSHIP_COLUMN,
            DataType::UInt64,
            false,
        )]));
        let column = UInt64Array::from_iter_values(self.cells.iter().copied());
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(column)])?;

        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new(
                TESSELLATION_METADATA_KEY.to_string(),
                tessellation.describe(),
            )]))
            .build();
        let mut writer = ArrowWriter::try_new(File::create(path)?, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        info!("Saved cell membership ({} records) to {path}", self.len());
        Ok(())
    }

    /// Read a table written by [`CellMembership::save`] for the same tessellation.
    pub fn load<T: Tessellation + ?Sized>(
        path: &Utf8Path,
        tessellation: &T,
    ) -> Result<Self, HaloError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;

        let found = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| {
                kv.iter()
                    .find(|entry| entry.key == TESSELLATION_METADATA_KEY)
                    .and_then(|entry| entry.value.clone())
            })
            .unwrap_or_else(|| "unknown tessellation".to_string());
        let expected = tessellation.describe();
        if found != expected {
            return Err(HaloError::MembershipResolutionMismatch { expected, found });
        }

        let mut cells = Vec::with_capacity(builder.metadata().file_metadata().num_rows() as usize);
        for batch in builder.build()? {
            let batch = batch?;
            let column = batch
                .column_by_name(MEMBERSHIP_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_else(|| {
                    HaloError::InvalidConfig(format!(
                        "{path} has no UInt64 '{MEMBERSHIP_COLUMN}' column"
                    ))
                })?;
            cells.extend_from_slice(column.values());
        }
        Ok(Self::from_cells(cells))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Per-record cells, in catalog order.
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    /// Ascending, de-duplicated cells observed in the catalog.
    pub fn unique_cells(&self) -> &[CellId] {
        &self.unique
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.unique.binary_search(&cell).is_ok()
    }

    /// Row mask selecting the records of `cell`.
    ///
    /// The mask never carries a validity buffer.
    pub fn mask_for(&self, cell: CellId) -> BooleanArray {
        let selected: BooleanBuffer = self.cells.iter().map(|&c| c == cell).collect();
        BooleanArray::new(selected, None)
    }

    pub fn count_in(&self, cell: CellId) -> usize {
        self.cells.iter().filter(|&&c| c == cell).count()
    }

    /// Number of records per observed cell.
    pub fn cell_counts(&self) -> FastHashMap<CellId, usize> {
        let mut counts: FastHashMap<CellId, usize> = HashMap::default();
        for &c in self.cells.iter() {
            *counts.entry(c).or_default() += 1;
        }
        counts
    }
}

/// Column `index` of `batch` as `Float64`, casting integer or `Float32` storage.
fn float_column(batch: &RecordBatch, index: usize, name: &str) -> Result<Float64Array, HaloError> {
    let column = cast(batch.column(index), &DataType::Float64).map_err(|_| {
        HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: batch.column(index).data_type().to_string(),
        }
    })?;
    let values = column
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: column.data_type().to_string(),
        })?;
    if values.null_count() > 0 {
        return Err(HaloError::InvalidConfig(format!(
            "coordinate field '{name}' contains null values"
        )));
    }
    Ok(values)
}
