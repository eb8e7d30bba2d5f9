//! # Per-cell filter & reducer
//!
//! Applies the halo selection to the joined rows of one cell, and concatenates
//! the per-cell tables into the result table.
//!
//! A row is kept when its structural field is exactly zero (a central halo,
//! `rhalo == 0`) **and** its mass field is strictly positive (`m200 > 0`).
//! Both fields may use any integer or floating point storage; they are compared
//! as `f64`. Null values never pass the selection.
use arrow_array::{Array, BooleanArray, Float64Array, RecordBatch};
use arrow_cast::cast;
use arrow_schema::{DataType, SchemaRef};
use arrow_select::{concat::concat_batches, filter::filter_record_batch};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_MASS_FIELD, DEFAULT_STRUCTURAL_FIELD},
    halo_errors::HaloError,
};

/// Row selection predicate: `structural == 0 && mass > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaloSelection {
    pub structural_field: String,
    pub mass_field: String,
}

impl Default for HaloSelection {
    fn default() -> Self {
        HaloSelection {
            structural_field: DEFAULT_STRUCTURAL_FIELD.to_string(),
            mass_field: DEFAULT_MASS_FIELD.to_string(),
        }
    }
}

impl HaloSelection {
    pub fn new(structural_field: impl Into<String>, mass_field: impl Into<String>) -> Self {
        HaloSelection {
            structural_field: structural_field.into(),
            mass_field: mass_field.into(),
        }
    }

    /// Boolean mask of the rows of `batch` passing the selection.
    pub fn mask(&self, batch: &RecordBatch) -> Result<BooleanArray, HaloError> {
        let structural = numeric_column(batch, &self.structural_field)?;
        let mass = numeric_column(batch, &self.mass_field)?;

        Ok(structural
            .iter()
            .zip(mass.iter())
            .map(|(s, m)| match (s, m) {
                (Some(s), Some(m)) => Some(s == 0.0 && m > 0.0),
                _ => Some(false),
            })
            .collect())
    }
}

/// Keep the rows of `batch` passing `selection`.
///
/// The input batch is consumed so the unfiltered rows are released as soon as the
/// selected ones are materialized. No match yields an empty batch with the same
/// schema.
pub fn select_rows(batch: RecordBatch, selection: &HaloSelection) -> Result<RecordBatch, HaloError> {
    let mask = selection.mask(&batch)?;
    Ok(filter_record_batch(&batch, &mask)?)
}

/// Concatenate per-cell tables in the given order.
pub fn concat_cell_tables(
    schema: &SchemaRef,
    tables: &[RecordBatch],
) -> Result<RecordBatch, HaloError> {
    Ok(concat_batches(schema, tables)?)
}

fn numeric_column(batch: &RecordBatch, name: &str) -> Result<Float64Array, HaloError> {
    let column = batch.column_by_name(name).ok_or_else(|| {
        HaloError::InvalidConfig(format!("selection field '{name}' is not loaded"))
    })?;
    if !column.data_type().is_numeric() {
        return Err(HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: column.data_type().to_string(),
        });
    }
    let values = cast(column, &DataType::Float64)?;
    values
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: column.data_type().to_string(),
        })
}
