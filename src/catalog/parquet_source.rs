//! # Parquet catalog source
//!
//! Flat binary table access through the Arrow/Parquet reader. Reads are
//! **projection-first** (only requested columns are decoded) and, when a row mask
//! is given, the mask is turned into a [`RowSelection`] so pages holding only
//! unselected rows are skipped instead of decoded and filtered afterwards.
use std::fs::File;

use arrow_array::{BooleanArray, RecordBatch, RecordBatchReader};
use arrow_schema::{ArrowError, SchemaRef};
use arrow_select::concat::concat_batches;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::{
    arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection},
    ProjectionMask,
};

use crate::{
    catalog::{
        check_mask_len, ensure_fields_requested, select_fields, CatalogSource, SourceDescription,
        SourceKind,
    },
    constants::DEFAULT_BATCH_SIZE,
    halo_errors::{DataAccessError, DataAccessKind, HaloError},
};

/// A catalog stored as a single Parquet file.
#[derive(Debug, Clone)]
pub struct ParquetCatalog {
    path: Utf8PathBuf,
    batch_size: usize,
}

impl ParquetCatalog {
    pub fn new(path: &Utf8Path) -> Self {
        ParquetCatalog {
            path: path.to_path_buf(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the Arrow reader batch size (default 8192 rows).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn access_error(&self, kind: DataAccessKind, fields: &[String]) -> HaloError {
        DataAccessError::new(kind, self.describe(), fields).into()
    }

    fn open_builder(
        &self,
        fields: &[String],
    ) -> Result<ParquetRecordBatchReaderBuilder<File>, HaloError> {
        let file = File::open(&self.path)
            .map_err(|e| self.access_error(DataAccessKind::Open(e.to_string()), fields))?;
        ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| self.access_error(DataAccessKind::Open(e.to_string()), fields))
    }
}

impl CatalogSource for ParquetCatalog {
    fn describe(&self) -> SourceDescription {
        SourceDescription {
            path: self.path.clone(),
            kind: SourceKind::Parquet,
            key: None,
        }
    }

    fn num_rows(&self) -> Result<usize, HaloError> {
        let builder = self.open_builder(&[])?;
        Ok(builder.metadata().file_metadata().num_rows() as usize)
    }

    fn field_names(&self) -> Result<Vec<String>, HaloError> {
        let builder = self.open_builder(&[])?;
        Ok(builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    fn read_fields(
        &self,
        fields: &[String],
        mask: Option<&BooleanArray>,
    ) -> Result<RecordBatch, HaloError> {
        let description = self.describe();
        ensure_fields_requested(fields, &description)?;

        let builder = self.open_builder(fields)?;
        let total_rows = builder.metadata().file_metadata().num_rows() as usize;
        if let Some(mask) = mask {
            check_mask_len(mask, total_rows)?;
        }

        // Root indices of the requested fields; resolving every name first means a
        // missing field fails before a single page is decoded.
        let file_schema = builder.schema().clone();
        let roots = fields
            .iter()
            .map(|name| {
                file_schema.index_of(name).map_err(|_| {
                    self.access_error(DataAccessKind::FieldNotFound(name.clone()), fields)
                })
            })
            .collect::<Result<Vec<usize>, _>>()?;
        let projection = ProjectionMask::roots(builder.parquet_schema(), roots);

        let mut builder = builder
            .with_projection(projection)
            .with_batch_size(self.batch_size);
        if let Some(mask) = mask {
            builder = builder.with_row_selection(RowSelection::from_filters(&[mask.clone()]));
        }

        let reader = builder
            .build()
            .map_err(|e| self.access_error(DataAccessKind::Read(e.to_string()), fields))?;
        let projected_schema: SchemaRef = reader.schema();
        let batches = reader
            .collect::<Result<Vec<_>, ArrowError>>()
            .map_err(|e| self.access_error(DataAccessKind::Read(e.to_string()), fields))?;

        // The projection keeps file order; restore request order.
        let batch = concat_batches(&projected_schema, &batches)?;
        select_fields(&batch, fields, &description)
    }
}

#[cfg(test)]
mod parquet_source_test {
    use std::sync::Arc;

    use arrow_array::{Array, Float64Array, Int64Array};
    use arrow_schema::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    use super::*;

    fn write_fixture(dir: &tempfile::TempDir) -> Utf8PathBuf {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ra", DataType::Float64, false),
            Field::new("dec", DataType::Float64, false),
            Field::new("haloid", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(vec![10.0, 20.0, 30.0, 40.0, 50.0])),
                Arc::new(Float64Array::from(vec![-1.0, -2.0, -3.0, -4.0, -5.0])),
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
            ],
        )
        .unwrap();

        let path = Utf8PathBuf::from_path_buf(dir.path().join("gold.parquet")).unwrap();
        let file = File::create(&path).unwrap();
        // Small row groups so the row selection spans several of them.
        let props = WriterProperties::builder()
            .set_max_row_group_size(2)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        path
    }

    fn names(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_projection_in_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ParquetCatalog::new(&write_fixture(&dir));

        assert_eq!(catalog.num_rows().unwrap(), 5);
        assert_eq!(catalog.field_names().unwrap(), names(&["ra", "dec", "haloid"]));

        let batch = catalog.read_fields(&names(&["haloid", "ra"]), None).unwrap();
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.schema().field(0).name(), "haloid");
        assert_eq!(batch.schema().field(1).name(), "ra");
    }

    #[test]
    fn test_read_with_mask() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ParquetCatalog::new(&write_fixture(&dir)).with_batch_size(1);

        let mask = BooleanArray::from(vec![false, true, false, true, true]);
        let batch = catalog.read_fields(&names(&["haloid"]), Some(&mask)).unwrap();
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.values().to_vec(), vec![2, 4, 5]);

        let none = BooleanArray::from(vec![false; 5]);
        let empty = catalog.read_fields(&names(&["ra", "dec"]), Some(&none)).unwrap();
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 2);
    }

    #[test]
    fn test_missing_field_is_data_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ParquetCatalog::new(&write_fixture(&dir));

        let err = catalog.read_fields(&names(&["ra", "m200"]), None).unwrap_err();
        match err {
            HaloError::DataAccess(inner) => {
                assert_eq!(inner.kind, DataAccessKind::FieldNotFound("m200".into()));
                assert_eq!(inner.fields, names(&["ra", "m200"]));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mask_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ParquetCatalog::new(&write_fixture(&dir));
        let mask = BooleanArray::from(vec![true; 3]);
        assert!(matches!(
            catalog.read_fields(&names(&["ra"]), Some(&mask)),
            Err(HaloError::MembershipLengthMismatch {
                membership: 3,
                source_rows: 5
            })
        ));
    }

    #[test]
    fn test_unopenable_file() {
        let catalog = ParquetCatalog::new(Utf8Path::new("/nonexistent/bpz.parquet"));
        let err = catalog.read_fields(&names(&["redshift_cos"]), None).unwrap_err();
        match err {
            HaloError::DataAccess(inner) => {
                assert!(matches!(inner.kind, DataAccessKind::Open(_)));
                assert_eq!(inner.source.kind, SourceKind::Parquet);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
