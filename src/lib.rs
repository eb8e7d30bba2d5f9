//! # halopix
//!
//! Spatially partitioned extraction of central dark-matter halos from large sky
//! catalogs.
//!
//! A run partitions the reference catalog into HEALPix cells, then processes every
//! populated cell independently on a worker pool: load the requested fields of the
//! cell's records, attach fields from a secondary catalog (e.g. the cosmological
//! redshift), keep the rows with `rhalo == 0 && m200 > 0`, and concatenate the
//! per-cell tables into one result file.
//!
//! Entry points
//! -----------------
//! * [`config::HaloConfig`] – everything a run needs, built with a validating builder
//!   or read from JSON.
//! * [`pipeline::HaloPipeline`] – the orchestrator (`from_config`, `run`, `execute`).
//! * [`membership::CellMembership`] – per-record cell table, cached on disk between runs.
//! * [`catalog::CatalogSource`] – the seam for tabular sources (Parquet, HDF5 and FITS
//!   behind the `hdf5` / `fits` features).
pub mod catalog;
pub mod config;
pub mod constants;
pub mod conversion;
pub mod halo_errors;
pub mod join;
pub mod membership;
pub mod neighbours;
pub mod pipeline;
pub mod pixel_loader;
#[cfg(feature = "progress")]
pub mod progress_bar;
pub mod reducer;
pub mod tessellation;
pub mod writer;

pub mod prelude {
    pub use crate::catalog::{open_catalog, CatalogLocation, CatalogSource, SourceKind};
    pub use crate::config::{CatalogConfig, HaloConfig, HaloConfigBuilder};
    pub use crate::constants::CellId;
    pub use crate::halo_errors::HaloError;
    pub use crate::join::{FieldAlias, JoinStrategy};
    pub use crate::membership::CellMembership;
    pub use crate::pipeline::{HaloPipeline, RunSummary};
    pub use crate::reducer::HaloSelection;
    pub use crate::tessellation::{
        healpix::{Healpix, PixelOrdering},
        Tessellation,
    };
}
