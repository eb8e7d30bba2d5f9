//! Hierarchical catalog source (HDF5).
//!
//! Fields are one-dimensional datasets stored under `catalog/<key>/<field>`, one
//! group per catalog (e.g. `catalog/gold/ra`, `catalog/bpz/redshift_cos`). All
//! requested datasets are located before any of them is read.
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, UInt64Array,
};
use arrow_schema::{Field, Schema};
use arrow_select::filter::filter_record_batch;
use camino::{Utf8Path, Utf8PathBuf};
use hdf5::types::TypeDescriptor;

use crate::{
    catalog::{check_mask_len, ensure_fields_requested, CatalogSource, SourceDescription, SourceKind},
    constants::HIERARCHICAL_ROOT_GROUP,
    halo_errors::{DataAccessError, DataAccessKind, HaloError},
};

#[derive(Debug, Clone)]
pub struct Hdf5Catalog {
    path: Utf8PathBuf,
    key: String,
}

impl Hdf5Catalog {
    pub fn new(path: &Utf8Path, key: &str) -> Self {
        Hdf5Catalog {
            path: path.to_path_buf(),
            key: key.to_string(),
        }
    }

    fn group_path(&self) -> String {
        format!("{HIERARCHICAL_ROOT_GROUP}/{}", self.key)
    }

    fn access_error(&self, kind: DataAccessKind, fields: &[String]) -> HaloError {
        DataAccessError::new(kind, self.describe(), fields).into()
    }

    fn open_group(&self, fields: &[String]) -> Result<hdf5::Group, HaloError> {
        let file = hdf5::File::open(&self.path)
            .map_err(|e| self.access_error(DataAccessKind::Open(e.to_string()), fields))?;
        file.group(&self.group_path())
            .map_err(|e| self.access_error(DataAccessKind::Open(e.to_string()), fields))
    }

    fn read_dataset(
        &self,
        dataset: &hdf5::Dataset,
        field: &str,
        fields: &[String],
    ) -> Result<ArrayRef, HaloError> {
        let read_err = |e: hdf5::Error| self.access_error(DataAccessKind::Read(e.to_string()), fields);
        let descriptor = dataset
            .dtype()
            .and_then(|dtype| dtype.to_descriptor())
            .map_err(read_err)?;

        let array: ArrayRef = match descriptor {
            TypeDescriptor::Float(_) => {
                Arc::new(Float64Array::from(dataset.read_raw::<f64>().map_err(read_err)?))
            }
            TypeDescriptor::Integer(_) => {
                Arc::new(Int64Array::from(dataset.read_raw::<i64>().map_err(read_err)?))
            }
            TypeDescriptor::Unsigned(_) => {
                Arc::new(UInt64Array::from(dataset.read_raw::<u64>().map_err(read_err)?))
            }
            TypeDescriptor::Boolean => {
                Arc::new(BooleanArray::from(dataset.read_raw::<bool>().map_err(read_err)?))
            }
            other => {
                return Err(HaloError::UnsupportedFieldType {
                    field: field.to_string(),
                    data_type: format!("{other:?}"),
                })
            }
        };
        Ok(array)
    }
}

impl CatalogSource for Hdf5Catalog {
    fn describe(&self) -> SourceDescription {
        SourceDescription {
            path: self.path.clone(),
            kind: SourceKind::Hdf5,
            key: Some(self.key.clone()),
        }
    }

    fn num_rows(&self) -> Result<usize, HaloError> {
        let group = self.open_group(&[])?;
        let datasets = group
            .datasets()
            .map_err(|e| self.access_error(DataAccessKind::Read(e.to_string()), &[]))?;
        Ok(datasets.first().map(|d| d.size()).unwrap_or(0))
    }

    fn field_names(&self) -> Result<Vec<String>, HaloError> {
        let group = self.open_group(&[])?;
        group
            .member_names()
            .map_err(|e| self.access_error(DataAccessKind::Read(e.to_string()), &[]))
    }

    fn read_fields(
        &self,
        fields: &[String],
        mask: Option<&BooleanArray>,
    ) -> Result<RecordBatch, HaloError> {
        ensure_fields_requested(fields, &self.describe())?;
        let group = self.open_group(fields)?;

        let datasets = fields
            .iter()
            .map(|name| {
                group.dataset(name).map_err(|_| {
                    self.access_error(DataAccessKind::FieldNotFound(name.clone()), fields)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut schema_fields = Vec::with_capacity(fields.len());
        let mut columns = Vec::with_capacity(fields.len());
        for (name, dataset) in fields.iter().zip(&datasets) {
            let column = self.read_dataset(dataset, name, fields)?;
            schema_fields.push(Field::new(name, column.data_type().clone(), false));
            columns.push(column);
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(schema_fields)), columns)?;

        match mask {
            Some(mask) => {
                check_mask_len(mask, batch.num_rows())?;
                Ok(filter_record_batch(&batch, mask)?)
            }
            None => Ok(batch),
        }
    }
}
