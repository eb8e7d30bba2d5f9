//! # Parallel halo extraction
//!
//! [`HaloPipeline`] drives a whole run: it owns the configuration, the tessellation
//! and the two catalog handles, and maps every populated cell of the reference
//! catalog through the per-cell stages on a `rayon` worker pool.
//!
//! ## Per-cell stages
//! -----------------
//! For one cell `c` ([`HaloPipeline::process_cell`]):
//!
//! 1. The cell list is `[c]`, or `[c, populated neighbours…]` when
//!    [`HaloConfig::include_neighbours`] is set.
//! 2. The reference fields of those cells are loaded, then the secondary fields of the
//!    **same** cells through the same membership table, so both batches have the
//!    same rows in the same order.
//! 3. The secondary fields are attached ([`attach_fields`]) and the halo selection is
//!    applied ([`select_rows`]).
//!
//! Every intermediate batch is moved into the next stage, so only the per-cell result
//! outlives the task.
//!
//! ## Scheduling
//! -----------------
//! * One independent task per unique cell; tasks share the catalogs and the membership
//!   table read-only and never communicate.
//! * Results are gathered with an indexed parallel collect: the output is the per-cell
//!   tables concatenated in ascending cell order, whatever the completion order.
//! * Fail-fast: the first failing cell aborts the run with a [`HaloError::Cell`]
//!   naming it; no result table is produced and nothing is written.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use camino::Utf8Path;
//! use halopix::config::HaloConfig;
//! use halopix::pipeline::HaloPipeline;
//!
//! let config = HaloConfig::from_json_file(Utf8Path::new("halo.json")).unwrap();
//! let summary = HaloPipeline::from_config(config).unwrap().execute().unwrap();
//! println!("{} halos written to {}", summary.rows, summary.output);
//! ```
use std::sync::Arc;

use arrow_array::{BooleanArray, RecordBatch};
use camino::Utf8PathBuf;
use log::{debug, info};
use rayon::prelude::*;

#[cfg(feature = "progress")]
use crate::progress_bar::CellProgress;
use crate::{
    catalog::{open_catalog, CatalogSource},
    config::HaloConfig,
    constants::CellId,
    halo_errors::HaloError,
    join::attach_fields,
    membership::CellMembership,
    pixel_loader::{cell_with_neighbours, load_cells},
    reducer::{concat_cell_tables, select_rows},
    tessellation::Tessellation,
    writer::write_result_table,
};

/// Outcome of [`HaloPipeline::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Populated cells processed.
    pub cells: usize,
    /// Rows of the result table.
    pub rows: usize,
    pub output: Utf8PathBuf,
}

pub struct HaloPipeline {
    config: HaloConfig,
    tessellation: Arc<dyn Tessellation>,
    reference: Arc<dyn CatalogSource>,
    secondary: Arc<dyn CatalogSource>,
}

impl HaloPipeline {
    /// Assemble a pipeline from already opened parts.
    ///
    /// `config` is trusted as given; its catalog locations and tessellation settings
    /// are ignored in favour of `tessellation`, `reference` and `secondary`.
    pub fn new(
        config: HaloConfig,
        tessellation: Arc<dyn Tessellation>,
        reference: Arc<dyn CatalogSource>,
        secondary: Arc<dyn CatalogSource>,
    ) -> Self {
        HaloPipeline {
            config,
            tessellation,
            reference,
            secondary,
        }
    }

    /// Validate `config`, build its HEALPix tessellation and open both catalogs.
    ///
    /// All configuration errors surface here, before any record is read.
    pub fn from_config(config: HaloConfig) -> Result<Self, HaloError> {
        config.validate()?;
        let tessellation = Arc::new(config.tessellation()?);
        let reference = open_catalog(&config.reference_location())?;
        let secondary = open_catalog(&config.secondary_location())?;
        info!(
            "Pipeline ready: reference {}, secondary {}, {}",
            reference.describe().path,
            secondary.describe().path,
            tessellation.describe()
        );
        Ok(Self::new(config, tessellation, reference, secondary))
    }

    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    /// Load the cached membership of the reference catalog, or build and cache it.
    pub fn membership(&self) -> Result<CellMembership, HaloError> {
        CellMembership::load_or_build(
            self.reference.as_ref(),
            self.tessellation.as_ref(),
            &self.config.coordinate_fields,
            &self.config.membership_cache_path(),
            self.config.reuse_membership,
        )
    }

    /// Check that both catalogs hold every field a cell task will read.
    ///
    /// Only the field lists are inspected, so a misspelt field is reported before the
    /// membership scan rather than from the first failing cell.
    pub fn check_fields(&self) -> Result<(), HaloError> {
        self.reference
            .ensure_fields(&self.config.reference_load_fields())?;
        self.secondary
            .ensure_fields(&self.config.secondary_load_fields())
    }

    /// Cells whose records are loaded for the task of `cell`, in load order.
    pub fn cells_for(&self, cell: CellId, membership: &CellMembership) -> Vec<CellId> {
        if self.config.include_neighbours {
            cell_with_neighbours(self.tessellation.as_ref(), cell, membership)
        } else {
            vec![cell]
        }
    }

    /// Selected, joined rows of one cell.
    ///
    /// Return
    /// ----------
    /// * The per-cell table (possibly empty), or the stage error wrapped in
    ///   [`HaloError::Cell`].
    pub fn process_cell(
        &self,
        cell: CellId,
        membership: &CellMembership,
    ) -> Result<RecordBatch, HaloError> {
        let cells = self.cells_for(cell, membership);
        self.extract(&cells, membership)
            .map_err(|err| err.in_cell(cell))
    }

    fn extract(
        &self,
        cells: &[CellId],
        membership: &CellMembership,
    ) -> Result<RecordBatch, HaloError> {
        let primary = load_cells(
            self.reference.as_ref(),
            cells,
            &self.config.reference_load_fields(),
            membership,
        )?;
        let secondary = load_cells(
            self.secondary.as_ref(),
            cells,
            &self.config.secondary_load_fields(),
            membership,
        )?;
        self.join_and_select(primary, secondary)
    }

    fn join_and_select(
        &self,
        primary: RecordBatch,
        secondary: RecordBatch,
    ) -> Result<RecordBatch, HaloError> {
        let loaded = primary.num_rows();
        let joined = attach_fields(
            primary,
            secondary,
            &self.config.secondary_aliases,
            &self.config.join,
        )?;
        let selected = select_rows(joined, &self.config.selection)?;
        let output_fields: Vec<&str> = self
            .config
            .reference_fields
            .iter()
            .map(String::as_str)
            .chain(self.config.secondary_aliases.iter().map(|a| a.to.as_str()))
            .collect();
        let selected = if selected.num_columns() > output_fields.len() {
            // drop a join key that was only loaded for matching
            let schema = selected.schema();
            let indices = output_fields
                .iter()
                .map(|name| schema.index_of(name))
                .collect::<Result<Vec<_>, _>>()?;
            selected.project(&indices)?
        } else {
            selected
        };
        debug!("{} of {loaded} rows selected", selected.num_rows());
        Ok(selected)
    }

    /// Zero-row result with the output schema, for catalogs without any record.
    fn empty_result(&self, membership: &CellMembership) -> Result<RecordBatch, HaloError> {
        let nothing = BooleanArray::from(vec![false; membership.len()]);
        let primary = self
            .reference
            .read_fields(&self.config.reference_load_fields(), Some(&nothing))?;
        let secondary = self
            .secondary
            .read_fields(&self.config.secondary_load_fields(), Some(&nothing))?;
        self.join_and_select(primary, secondary)
    }

    /// Process every populated cell of `membership` in parallel.
    ///
    /// The worker pool holds [`HaloConfig::worker_threads`] threads (all cores for
    /// `n_jobs = -1`). Per-cell tables are concatenated in ascending cell order.
    pub fn run(&self, membership: &CellMembership) -> Result<RecordBatch, HaloError> {
        let cells = membership.unique_cells();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads())
            .build()
            .map_err(|e| HaloError::WorkerPool(e.to_string()))?;
        info!(
            "Processing {} cells ({} records) on {} workers",
            cells.len(),
            membership.len(),
            pool.current_num_threads()
        );

        #[cfg(feature = "progress")]
        let progress = CellProgress::new(cells.len());

        let tables = pool.install(|| {
            cells
                .par_iter()
                .map(|&cell| {
                    let table = self.process_cell(cell, membership);
                    #[cfg(feature = "progress")]
                    progress.cell_done();
                    table
                })
                .collect::<Result<Vec<_>, _>>()
        });

        #[cfg(feature = "progress")]
        progress.finish();

        let tables = tables?;
        let result = match tables.first() {
            Some(first) => concat_cell_tables(&first.schema(), &tables)?,
            None => self.empty_result(membership)?,
        };
        info!("Selected {} halos over {} cells", result.num_rows(), cells.len());
        Ok(result)
    }

    /// Full run: field check, membership, per-cell extraction, then the output file.
    ///
    /// An existing output is rejected up front when overwriting is disabled, so no work
    /// is done for a run that could not be saved.
    pub fn execute(&self) -> Result<RunSummary, HaloError> {
        let output = self.config.output_path();
        if output.exists() && !self.config.overwrite {
            return Err(HaloError::OutputExists(output));
        }
        self.check_fields()?;

        let membership = self.membership()?;
        let table = self.run(&membership)?;
        write_result_table(&output, &table, self.config.overwrite)?;

        Ok(RunSummary {
            cells: membership.unique_cells().len(),
            rows: table.num_rows(),
            output,
        })
    }
}

#[cfg(test)]
mod pipeline_test {
    use arrow_array::{Array, ArrayRef, Float64Array, Int64Array};
    use camino::Utf8Path;

    use super::*;
    use crate::{
        catalog::{MemoryCatalog, SourceKind},
        config::CatalogConfig,
        conversion::SkyCoord,
        halo_errors::DataAccessKind,
        join::JoinStrategy,
    };

    /// Ten-degree longitude bands: cell `k` covers `[10k, 10k + 10)`.
    struct Bands;

    impl Tessellation for Bands {
        fn cell_of(&self, coord: &SkyCoord) -> CellId {
            (coord.longitude.to_degrees() / 10.0) as CellId
        }

        fn raw_neighbours(&self, cell: CellId) -> [Option<CellId>; 8] {
            let mut out = [None; 8];
            out[1] = cell.checked_sub(1);
            out[5] = Some(cell + 1).filter(|&c| c < 36);
            out
        }

        fn n_cells(&self) -> u64 {
            36
        }

        fn describe(&self) -> String {
            "bands".into()
        }
    }

    fn floats(v: Vec<f64>) -> ArrayRef {
        Arc::new(Float64Array::from(v))
    }

    fn gold(ra: Vec<f64>, rhalo: Vec<f64>, m200: Vec<f64>) -> MemoryCatalog {
        let n = ra.len() as i64;
        let batch = RecordBatch::try_from_iter(vec![
            ("ra", floats(ra)),
            ("dec", floats(vec![0.0; n as usize])),
            ("haloid", Arc::new(Int64Array::from_iter_values(0..n)) as ArrayRef),
            ("coadd_object_id", Arc::new(Int64Array::from_iter_values(100..100 + n)) as ArrayRef),
            ("rhalo", floats(rhalo)),
            ("m200", floats(m200)),
        ])
        .unwrap();
        MemoryCatalog::new("gold", batch)
    }

    fn bpz(redshift: Vec<f64>) -> MemoryCatalog {
        let n = redshift.len() as i64;
        let batch = RecordBatch::try_from_iter(vec![
            ("redshift_cos", floats(redshift)),
            ("coadd_object_id", Arc::new(Int64Array::from_iter_values(100..100 + n)) as ArrayRef),
        ])
        .unwrap();
        MemoryCatalog::new("bpz", batch)
    }

    fn config(dir: &Utf8Path) -> HaloConfig {
        HaloConfig::builder()
            .base_path(dir)
            .reference(CatalogConfig::new("gold.parquet", SourceKind::Parquet, None))
            .secondary(CatalogConfig::new("bpz.parquet", SourceKind::Parquet, None))
            .reference_fields(&["ra", "dec", "haloid", "rhalo", "m200"])
            .n_jobs(2)
            .build()
            .unwrap()
    }

    fn pipeline(config: HaloConfig, gold: MemoryCatalog, bpz: MemoryCatalog) -> HaloPipeline {
        HaloPipeline::new(config, Arc::new(Bands), Arc::new(gold), Arc::new(bpz))
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> &'a T {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<T>()
            .unwrap()
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_two_records_two_cells() {
        let (_guard, dir) = tempdir();
        // A lands in cell 5, B in cell 9; B is a satellite.
        let p = pipeline(
            config(&dir),
            gold(vec![55.0, 95.0], vec![0.0, 0.5], vec![1e14, 1e14]),
            bpz(vec![0.3, 0.7]),
        );
        let membership = p.membership().unwrap();
        assert_eq!(membership.unique_cells(), &[5, 9]);

        let out = p.run(&membership).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.num_columns(), 6);
        assert_eq!(out.schema().field(5).name(), "z");
        assert_eq!(column::<Int64Array>(&out, "haloid").value(0), 0);
        approx::assert_abs_diff_eq!(column::<Float64Array>(&out, "z").value(0), 0.3);
    }

    #[test]
    fn test_output_in_ascending_cell_order() {
        let (_guard, dir) = tempdir();
        // Records scattered over cells in reverse catalog order.
        let ra: Vec<f64> = (0..40).map(|i| 354.5 - 9.0 * i as f64).collect();
        let p = pipeline(
            config(&dir),
            gold(ra, vec![0.0; 40], vec![1.0; 40]),
            bpz(vec![0.5; 40]),
        );
        let membership = p.membership().unwrap();
        let out = p.run(&membership).unwrap();
        assert_eq!(out.num_rows(), 40);

        let out_ra = column::<Float64Array>(&out, "ra");
        let cells: Vec<u64> = out_ra.values().iter().map(|ra| (ra / 10.0) as u64).collect();
        assert!(cells.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_run_is_idempotent() {
        let (_guard, dir) = tempdir();
        let ra: Vec<f64> = (0..30).map(|i| i as f64 * 11.7 % 360.0).collect();
        let rhalo: Vec<f64> = (0..30).map(|i| (i % 3) as f64).collect();
        let m200: Vec<f64> = (0..30).map(|i| (i % 4) as f64).collect();
        let p = pipeline(config(&dir), gold(ra, rhalo, m200), bpz(vec![0.1; 30]));
        let membership = p.membership().unwrap();

        let first = p.run(&membership).unwrap();
        let second = p.run(&membership).unwrap();
        assert_eq!(first, second);
        for i in 0..first.num_rows() {
            assert_eq!(column::<Float64Array>(&first, "rhalo").value(i), 0.0);
            assert!(column::<Float64Array>(&first, "m200").value(i) > 0.0);
        }
    }

    #[test]
    fn test_neighbours_and_key_join() {
        let (_guard, dir) = tempdir();
        let config = HaloConfig {
            include_neighbours: true,
            join: JoinStrategy::ByKey {
                primary: "coadd_object_id".into(),
                secondary: "coadd_object_id".into(),
            },
            ..config(&dir)
        };
        let p = pipeline(
            config,
            gold(vec![5.0, 15.0, 25.0], vec![0.0; 3], vec![1.0; 3]),
            bpz(vec![0.1, 0.2, 0.3]),
        );
        let membership = p.membership().unwrap();
        assert_eq!(p.cells_for(1, &membership), vec![1, 0, 2]);

        let cell = p.process_cell(1, &membership).unwrap();
        assert_eq!(column::<Int64Array>(&cell, "haloid").values().to_vec(), vec![1, 0, 2]);
        assert_eq!(column::<Float64Array>(&cell, "z").values().to_vec(), vec![0.2, 0.1, 0.3]);
        // join key is dropped from the output
        assert!(cell.column_by_name("coadd_object_id").is_none());

        // every record is emitted once per cell whose neighbourhood contains it
        let out = p.run(&membership).unwrap();
        assert_eq!(out.num_rows(), 7);
    }

    #[test]
    fn test_missing_field_fails_before_output() {
        let (_guard, dir) = tempdir();
        let broken = MemoryCatalog::new(
            "bpz",
            RecordBatch::try_from_iter(vec![("redshift_true", floats(vec![0.3, 0.7]))]).unwrap(),
        );
        let p = pipeline(
            config(&dir),
            gold(vec![55.0, 95.0], vec![0.0, 0.0], vec![1.0, 1.0]),
            broken,
        );

        // execute stops at the field check, before any cell is processed
        let err = p.execute().unwrap_err();
        match &err {
            HaloError::DataAccess(inner) => {
                assert_eq!(inner.kind, DataAccessKind::FieldNotFound("redshift_cos".into()));
                assert_eq!(inner.cell, None);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!p.config().output_path().exists());
        assert!(!p.config().membership_cache_path().exists());

        // a direct run reports the failing cell
        let membership = p.membership().unwrap();
        let err = p.run(&membership).unwrap_err();
        assert!(matches!(err, HaloError::Cell { cell: 5 | 9, .. }));
        assert!(err.is_data_access_error());
    }

    #[test]
    fn test_check_fields_covers_join_key() {
        let (_guard, dir) = tempdir();
        let keyed = |primary: &str| HaloConfig {
            join: JoinStrategy::ByKey {
                primary: primary.into(),
                secondary: "coadd_object_id".into(),
            },
            ..config(&dir)
        };
        let make = |config| {
            pipeline(
                config,
                gold(vec![55.0], vec![0.0], vec![1.0]),
                bpz(vec![0.3]),
            )
        };

        assert!(make(config(&dir)).check_fields().is_ok());
        assert!(make(keyed("coadd_object_id")).check_fields().is_ok());

        let err = make(keyed("object_id")).check_fields().unwrap_err();
        assert!(err.is_data_access_error());
        assert!(err.to_string().contains("object_id"), "{err}");
    }

    #[test]
    fn test_execute_writes_output_and_honours_overwrite() {
        let (_guard, dir) = tempdir();
        let make = |overwrite| {
            let config = HaloConfig {
                overwrite,
                ..config(&dir)
            };
            pipeline(
                config,
                gold(vec![55.0, 95.0], vec![0.0, 0.0], vec![1.0, 1.0]),
                bpz(vec![0.3, 0.7]),
            )
        };

        let summary = make(true).execute().unwrap();
        assert_eq!(summary.cells, 2);
        assert_eq!(summary.rows, 2);
        assert!(summary.output.exists());
        assert!(dir.join("gold_pixels_nside8.parquet").exists());

        assert!(matches!(
            make(false).execute(),
            Err(HaloError::OutputExists(_))
        ));
    }

    #[test]
    fn test_empty_catalog_gives_empty_table() {
        let (_guard, dir) = tempdir();
        let p = pipeline(config(&dir), gold(vec![], vec![], vec![]), bpz(vec![]));
        let out = p.run(&CellMembership::from_cells(vec![])).unwrap();
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.num_columns(), 6);
    }

    #[test]
    fn test_from_config_rejects_disabled_or_keyless_sources() {
        let config = HaloConfig {
            reference: CatalogConfig::new("gold.fits", SourceKind::Fits, None),
            secondary: CatalogConfig::new("bpz.parquet", SourceKind::Parquet, None),
            ..HaloConfig::default()
        };
        let result = HaloPipeline::from_config(config);
        if cfg!(feature = "fits") {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(HaloError::UnsupportedSourceKind(_))));
        }

        let keyless = HaloConfig {
            secondary: CatalogConfig::new("bpz.h5", SourceKind::Hdf5, None),
            ..HaloConfig::default()
        };
        assert!(HaloPipeline::from_config(keyless)
            .err()
            .is_some_and(|e| e.is_configuration_error()));
    }
}
