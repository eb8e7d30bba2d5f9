//! FITS binary table source (first extension HDU).
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch};
use arrow_schema::{Field, Schema};
use arrow_select::filter::filter_record_batch;
use camino::{Utf8Path, Utf8PathBuf};
use fitsio::{
    hdu::HduInfo,
    tables::{ColumnDataType, ConcreteColumnDescription},
    FitsFile,
};

use crate::{
    catalog::{check_mask_len, ensure_fields_requested, CatalogSource, SourceDescription, SourceKind},
    halo_errors::{DataAccessError, DataAccessKind, HaloError},
};

const TABLE_HDU: usize = 1;

#[derive(Debug, Clone)]
pub struct FitsCatalog {
    path: Utf8PathBuf,
}

impl FitsCatalog {
    pub fn new(path: &Utf8Path) -> Self {
        FitsCatalog {
            path: path.to_path_buf(),
        }
    }

    fn access_error(&self, kind: DataAccessKind, fields: &[String]) -> HaloError {
        DataAccessError::new(kind, self.describe(), fields).into()
    }

    fn open_table(
        &self,
        fields: &[String],
    ) -> Result<(FitsFile, fitsio::hdu::FitsHdu, Vec<ConcreteColumnDescription>, usize), HaloError>
    {
        let open_err = |e: fitsio::errors::Error| {
            self.access_error(DataAccessKind::Open(e.to_string()), fields)
        };
        let mut fptr = FitsFile::open(&self.path).map_err(open_err)?;
        let hdu = fptr.hdu(TABLE_HDU).map_err(open_err)?;
        let table = match &hdu.info {
            HduInfo::TableInfo {
                column_descriptions,
                num_rows,
            } => Some((column_descriptions.clone(), *num_rows)),
            _ => None,
        };
        match table {
            Some((columns, rows)) => Ok((fptr, hdu, columns, rows)),
            None => Err(self.access_error(
                DataAccessKind::Open(format!("HDU {TABLE_HDU} is not a binary table")),
                fields,
            )),
        }
    }
}

impl CatalogSource for FitsCatalog {
    fn describe(&self) -> SourceDescription {
        SourceDescription {
            path: self.path.clone(),
            kind: SourceKind::Fits,
            key: None,
        }
    }

    fn num_rows(&self) -> Result<usize, HaloError> {
        let (_, _, _, rows) = self.open_table(&[])?;
        Ok(rows)
    }

    fn field_names(&self) -> Result<Vec<String>, HaloError> {
        let (_, _, columns, _) = self.open_table(&[])?;
        Ok(columns.into_iter().map(|c| c.name).collect())
    }

    fn read_fields(
        &self,
        fields: &[String],
        mask: Option<&BooleanArray>,
    ) -> Result<RecordBatch, HaloError> {
        ensure_fields_requested(fields, &self.describe())?;
        let (mut fptr, hdu, columns, rows) = self.open_table(fields)?;
        if let Some(mask) = mask {
            check_mask_len(mask, rows)?;
        }

        let types = fields
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.data_type.typ.clone())
                    .ok_or_else(|| {
                        self.access_error(DataAccessKind::FieldNotFound(name.clone()), fields)
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let read_err = |e: fitsio::errors::Error| {
            self.access_error(DataAccessKind::Read(e.to_string()), fields)
        };
        let mut schema_fields = Vec::with_capacity(fields.len());
        let mut arrays = Vec::with_capacity(fields.len());
        for (name, typ) in fields.iter().zip(types) {
            let array: ArrayRef = match typ {
                ColumnDataType::Float | ColumnDataType::Double => Arc::new(Float64Array::from(
                    hdu.read_col::<f64>(&mut fptr, name).map_err(read_err)?,
                )),
                ColumnDataType::String => {
                    return Err(HaloError::UnsupportedFieldType {
                        field: name.clone(),
                        data_type: "string".into(),
                    })
                }
                _ => Arc::new(Int64Array::from(
                    hdu.read_col::<i64>(&mut fptr, name).map_err(read_err)?,
                )),
            };
            schema_fields.push(Field::new(name, array.data_type().clone(), false));
            arrays.push(array);
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(schema_fields)), arrays)?;

        match mask {
            Some(mask) => Ok(filter_record_batch(&batch, mask)?),
            None => Ok(batch),
        }
    }
}
