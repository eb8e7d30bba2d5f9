//! # Result table writer
//!
//! Persists the concatenated halo table as one file, in the encoding named by the
//! output extension:
//!
//! * `.fits` / `.fit`: a FITS binary table in extension HDU `HALOS` (feature `fits`).
//!   Integer and boolean fields are stored as 64-bit integers, floating point fields
//!   as doubles.
//! * anything else: Parquet, Snappy compressed.
//!
//! The file is written in a single pass after every cell has succeeded, so a failed
//! run never leaves a partial output behind.
use std::fs::{self, File};

use arrow_array::RecordBatch;
use camino::Utf8Path;
use log::info;
use parquet::{
    arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties,
};

use crate::{catalog::SourceKind, halo_errors::HaloError};

/// Extension name of the FITS table holding the result.
pub const FITS_TABLE_NAME: &str = "HALOS";

/// Encoding of the result file at `path`, from its extension.
pub fn output_kind(path: &Utf8Path) -> SourceKind {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("fits" | "fit") => SourceKind::Fits,
        _ => SourceKind::Parquet,
    }
}

/// Write `batch` to `path`.
///
/// Arguments
/// -----------------
/// * `path`: destination file; missing parent directories are created.
/// * `batch`: the result table.
/// * `overwrite`: replace an existing file instead of failing.
///
/// Return
/// ----------
/// * `Ok(())`, or [`HaloError::OutputExists`] when `path` exists and `overwrite` is unset.
pub fn write_result_table(
    path: &Utf8Path,
    batch: &RecordBatch,
    overwrite: bool,
) -> Result<(), HaloError> {
    let kind = output_kind(path);
    kind.ensure_enabled()?;
    if path.exists() && !overwrite {
        return Err(HaloError::OutputExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match kind {
        #[cfg(feature = "fits")]
        SourceKind::Fits => fits_table::write(path, batch)?,
        _ => write_parquet(path, batch)?,
    }

    info!(
        "Wrote {} rows x {} fields to {path} ({kind})",
        batch.num_rows(),
        batch.num_columns()
    );
    Ok(())
}

fn write_parquet(path: &Utf8Path, batch: &RecordBatch) -> Result<(), HaloError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(feature = "fits")]
mod fits_table {
    use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch};
    use arrow_cast::cast;
    use arrow_schema::DataType;
    use camino::Utf8Path;
    use fitsio::{
        tables::{ColumnDataType, ColumnDescription},
        FitsFile,
    };

    use super::FITS_TABLE_NAME;
    use crate::halo_errors::HaloError;

    enum Column {
        Int(Int64Array),
        Double(Float64Array),
    }

    fn column(name: &str, array: &ArrayRef) -> Result<Column, HaloError> {
        let unsupported = || HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: array.data_type().to_string(),
        };
        if array.null_count() > 0 {
            return Err(HaloError::UnsupportedFieldType {
                field: name.to_string(),
                data_type: format!("{} with nulls", array.data_type()),
            });
        }
        let data_type = array.data_type();
        if data_type.is_integer() || *data_type == DataType::Boolean {
            let values = cast(array, &DataType::Int64).map_err(|_| unsupported())?;
            let values = values.as_any().downcast_ref::<Int64Array>().ok_or_else(unsupported)?;
            Ok(Column::Int(values.clone()))
        } else if data_type.is_floating() {
            let values = cast(array, &DataType::Float64).map_err(|_| unsupported())?;
            let values = values.as_any().downcast_ref::<Float64Array>().ok_or_else(unsupported)?;
            Ok(Column::Double(values.clone()))
        } else {
            Err(unsupported())
        }
    }

    pub(super) fn write(path: &Utf8Path, batch: &RecordBatch) -> Result<(), HaloError> {
        let schema = batch.schema();
        let columns = schema
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| column(field.name(), array).map(|c| (field.name().as_str(), c)))
            .collect::<Result<Vec<_>, _>>()?;

        let fits_err = |e: fitsio::errors::Error| HaloError::OutputWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let descriptions = columns
            .iter()
            .map(|(name, values)| {
                let typ = match values {
                    Column::Int(_) => ColumnDataType::LongLong,
                    Column::Double(_) => ColumnDataType::Double,
                };
                ColumnDescription::new(*name).with_type(typ).create()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(fits_err)?;

        let mut fptr = FitsFile::create(path).overwrite().open().map_err(fits_err)?;
        let hdu = fptr
            .create_table(FITS_TABLE_NAME, &descriptions)
            .map_err(fits_err)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }
        for (name, values) in &columns {
            match values {
                Column::Int(v) => hdu.write_col(&mut fptr, *name, &v.values()[..]),
                Column::Double(v) => hdu.write_col(&mut fptr, *name, &v.values()[..]),
            }
            .map_err(fits_err)?;
        }
        Ok(())
    }
}
