use arrow_array::{BooleanArray, RecordBatch};
use arrow_select::filter::filter_record_batch;
use camino::Utf8PathBuf;

use crate::{
    catalog::{
        check_mask_len, ensure_fields_requested, select_fields, CatalogSource, SourceDescription,
        SourceKind,
    },
    halo_errors::HaloError,
};

/// A catalog already held in memory as one Arrow batch.
///
/// Useful to embed the pipeline behind another loader, and for tests.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    name: String,
    batch: RecordBatch,
}

impl MemoryCatalog {
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        MemoryCatalog {
            name: name.into(),
            batch,
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

impl CatalogSource for MemoryCatalog {
    fn describe(&self) -> SourceDescription {
        SourceDescription {
            path: Utf8PathBuf::from(&self.name),
            kind: SourceKind::Memory,
            key: None,
        }
    }

    fn num_rows(&self) -> Result<usize, HaloError> {
        Ok(self.batch.num_rows())
    }

    fn field_names(&self) -> Result<Vec<String>, HaloError> {
        Ok(self
            .batch
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
        let projected = select_fields(&self.batch, fields, &description)?;
        match mask {
            Some(mask) => {
                check_mask_len(mask, self.batch.num_rows())?;
                Ok(filter_record_batch(&projected, mask)?)
            }
            None => Ok(projected),
        }
    }
}
