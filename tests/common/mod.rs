#![allow(dead_code)]

use std::{fs::File, sync::Arc};

use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch};
use arrow_select::concat::concat_batches;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    file::properties::WriterProperties,
};

/// Number of records of the synthetic catalogs.
pub const N_RECORDS: usize = 500;

pub fn ra_of(i: usize) -> f64 {
    (i as f64 * 37.7) % 360.0
}

pub fn dec_of(i: usize) -> f64 {
    -80.0 + (i as f64 * 13.3) % 160.0
}

pub fn redshift_of(i: usize) -> f64 {
    0.01 + i as f64 * 0.001
}

/// Central halos are every third record, massless ones every fifth.
pub fn is_central_halo(i: usize) -> bool {
    i % 3 == 0 && i % 5 != 0
}

/// Synthetic gold catalog with the ten default reference fields.
pub fn gold_batch(n: usize) -> RecordBatch {
    let floats = |f: &dyn Fn(usize) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from_iter_values((0..n).map(f)))
    };
    RecordBatch::try_from_iter(vec![
        ("ra", floats(&ra_of)),
        ("dec", floats(&dec_of)),
        (
            "coadd_object_id",
            Arc::new(Int64Array::from_iter_values((0..n as i64).map(|i| 1_000 + i))) as ArrayRef,
        ),
        ("haloid", Arc::new(Int64Array::from_iter_values(0..n as i64)) as ArrayRef),
        ("rhalo", floats(&|i: usize| if i % 3 == 0 { 0.0 } else { 0.4 })),
        ("r200", floats(&|i: usize| 0.5 + (i % 7) as f64 * 0.1)),
        ("m200", floats(&|i: usize| if i % 5 == 0 { 0.0 } else { 1e12 + i as f64 })),
        ("px", floats(&|i: usize| i as f64)),
        ("py", floats(&|i: usize| -(i as f64))),
        ("pz", floats(&|i: usize| (i % 11) as f64)),
        ("mag_r", floats(&|i: usize| 20.0 + (i % 4) as f64)),
    ])
    .unwrap()
}

/// Synthetic bpz catalog, row `i` describing the same object as gold row `i`.
pub fn bpz_batch(n: usize) -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        (
            "coadd_object_id",
            Arc::new(Int64Array::from_iter_values((0..n as i64).map(|i| 1_000 + i))) as ArrayRef,
        ),
        (
            "redshift_cos",
            Arc::new(Float64Array::from_iter_values((0..n).map(redshift_of))) as ArrayRef,
        ),
        (
            "redshift_true",
            Arc::new(Float64Array::from_iter_values((0..n).map(|i| redshift_of(i) + 1e-4))) as ArrayRef,
        ),
    ])
    .unwrap()
}

pub fn write_parquet(path: &Utf8Path, batch: &RecordBatch) {
    let props = WriterProperties::builder()
        .set_max_row_group_size(64)
        .build();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

pub fn read_parquet(path: &Utf8Path) -> RecordBatch {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
    let schema = builder.schema().clone();
    let reader = builder.build().unwrap();
    let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
    concat_batches(&schema, &batches).unwrap()
}

/// Temporary directory holding `gold.parquet` and `bpz.parquet`.
pub struct CatalogFixture {
    _dir: tempfile::TempDir,
    pub base: Utf8PathBuf,
}

impl CatalogFixture {
    pub fn new(gold: &RecordBatch, bpz: &RecordBatch) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        write_parquet(&base.join("gold.parquet"), gold);
        write_parquet(&base.join("bpz.parquet"), bpz);
        CatalogFixture { _dir: dir, base }
    }

    pub fn standard() -> Self {
        Self::new(&gold_batch(N_RECORDS), &bpz_batch(N_RECORDS))
    }
}

pub fn i64_values(batch: &RecordBatch, name: &str) -> Vec<i64> {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

pub fn f64_values(batch: &RecordBatch, name: &str) -> Vec<f64> {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap()
        .values()
        .to_vec()
}
