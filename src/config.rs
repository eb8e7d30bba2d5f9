//! # Run configuration
//!
//! [`HaloConfig`] is the single, immutable description of an extraction run: where
//! the catalogs live and how they are encoded, the tessellation resolution, the
//! field lists, the halo selection, the join rule, the worker pool size and the
//! output location. It is built once at startup and passed by reference to every
//! component; nothing in the crate reads process-wide settings.
//!
//! ## Construction
//!
//! ```rust,no_run
//! use halopix::config::{CatalogConfig, HaloConfig};
//! use halopix::catalog::SourceKind;
//!
//! let config = HaloConfig::builder()
//!     .base_path("/data/Cardinalv3")
//!     .reference(CatalogConfig::new("gold.parquet", SourceKind::Parquet, None))
//!     .secondary(CatalogConfig::new("bpz.parquet", SourceKind::Parquet, None))
//!     .nside(8)
//!     .n_jobs(-1)
//!     .build()
//!     .unwrap();
//! ```
//!
//! A configuration can also be read from JSON with [`HaloConfig::from_json_file`];
//! missing keys take their default values and the result goes through the same
//! validation as [`HaloConfigBuilder::build`].
//!
//! ## Defaults
//!
//! The defaults reproduce the Cardinal halo extraction: HDF5 gold/bpz catalogs
//! keyed `gold`/`bpz`, `nside = 8` in RING ordering, positional join attaching
//! `redshift_cos` as `z`, selection `rhalo == 0 && m200 > 0`, every core in use,
//! membership cached in `gold_pixels_nside8.parquet`, output to
//! `halo_data_all.parquet` (overwritten).
use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{CatalogLocation, SourceKind},
    constants::{
        ALL_CORES, DEFAULT_COORDINATE_FIELDS, DEFAULT_NSIDE, DEFAULT_REFERENCE_FIELDS,
        DEFAULT_SECONDARY_ALIAS, MAX_NSIDE,
    },
    halo_errors::HaloError,
    join::{FieldAlias, JoinStrategy},
    reducer::HaloSelection,
    tessellation::healpix::{Healpix, PixelOrdering},
    writer::output_kind,
};

/// One catalog file, relative to [`HaloConfig::base_path`] unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub file: Utf8PathBuf,
    pub kind: SourceKind,
    #[serde(default)]
    pub key: Option<String>,
}

impl CatalogConfig {
    pub fn new(file: impl Into<Utf8PathBuf>, kind: SourceKind, key: Option<&str>) -> Self {
        CatalogConfig {
            file: file.into(),
            kind,
            key: key.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    pub base_path: Utf8PathBuf,
    pub reference: CatalogConfig,
    pub secondary: CatalogConfig,

    // --- Tessellation ---
    pub nside: u32,
    pub ordering: PixelOrdering,
    /// `[longitude, latitude]` fields of the reference catalog, in degrees.
    pub coordinate_fields: [String; 2],

    // --- Fields, join and selection ---
    pub reference_fields: Vec<String>,
    pub secondary_aliases: Vec<FieldAlias>,
    pub join: JoinStrategy,
    pub selection: HaloSelection,
    /// Also load the populated neighbours of every cell (both catalogs).
    pub include_neighbours: bool,

    // --- Execution ---
    /// Worker threads; `-1` or `0` uses every available core.
    pub n_jobs: i32,
    pub membership_cache: Utf8PathBuf,
    pub reuse_membership: bool,

    // --- Output ---
    pub output: Utf8PathBuf,
    pub overwrite: bool,
}

impl Default for HaloConfig {
    fn default() -> Self {
        HaloConfig {
            base_path: Utf8PathBuf::from("."),
            reference: CatalogConfig::new(
                "Cardinal-3_v2.0_Y6a_gold.h5",
                SourceKind::Hdf5,
                Some("gold"),
            ),
            secondary: CatalogConfig::new(
                "Cardinal-3_v2.0_Y6a_bpz.h5",
                SourceKind::Hdf5,
                Some("bpz"),
            ),

            nside: DEFAULT_NSIDE,
            ordering: PixelOrdering::Ring,
            coordinate_fields: DEFAULT_COORDINATE_FIELDS.map(str::to_string),

            reference_fields: DEFAULT_REFERENCE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            secondary_aliases: vec![FieldAlias::new(
                DEFAULT_SECONDARY_ALIAS.0,
                DEFAULT_SECONDARY_ALIAS.1,
            )],
            join: JoinStrategy::Positional,
            selection: HaloSelection::default(),
            include_neighbours: false,

            n_jobs: ALL_CORES,
            membership_cache: Utf8PathBuf::from(format!("gold_pixels_nside{DEFAULT_NSIDE}.parquet")),
            reuse_membership: true,

            output: Utf8PathBuf::from("halo_data_all.parquet"),
            overwrite: true,
        }
    }
}

impl HaloConfig {
    pub fn builder() -> HaloConfigBuilder {
        HaloConfigBuilder::new()
    }

    /// Read and validate a JSON configuration.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, HaloError> {
        let text = std::fs::read_to_string(path).map_err(|e| HaloError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: HaloConfig =
            serde_json::from_str(&text).map_err(|e| HaloError::ConfigFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// `path` relative to `base_path`, unless already absolute.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    pub fn reference_location(&self) -> CatalogLocation {
        CatalogLocation::new(
            self.reference.kind,
            self.resolve(&self.reference.file),
            self.reference.key.as_deref(),
        )
    }

    pub fn secondary_location(&self) -> CatalogLocation {
        CatalogLocation::new(
            self.secondary.kind,
            self.resolve(&self.secondary.file),
            self.secondary.key.as_deref(),
        )
    }

    pub fn membership_cache_path(&self) -> Utf8PathBuf {
        self.resolve(&self.membership_cache)
    }

    pub fn output_path(&self) -> Utf8PathBuf {
        self.resolve(&self.output)
    }

    pub fn tessellation(&self) -> Result<Healpix, HaloError> {
        Healpix::new(self.nside, self.ordering)
    }

    /// Thread count handed to the worker pool, `0` meaning "all cores".
    pub fn worker_threads(&self) -> usize {
        if self.n_jobs <= 0 {
            0
        } else {
            self.n_jobs as usize
        }
    }

    /// Fields to load from the reference catalog, join key included.
    pub fn reference_load_fields(&self) -> Vec<String> {
        let mut fields = self.reference_fields.clone();
        if let Some(key) = self.join.primary_key() {
            if !fields.iter().any(|f| f == key) {
                fields.push(key.to_string());
            }
        }
        fields
    }

    /// Fields to load from the secondary catalog, join key included.
    pub fn secondary_load_fields(&self) -> Vec<String> {
        self.join.secondary_fields(&self.secondary_aliases)
    }

    /// Check the consistency rules listed on [`HaloConfigBuilder::build`].
    pub fn validate(&self) -> Result<(), HaloError> {
        let invalid = |msg: String| Err(HaloError::InvalidConfig(msg));

        if !self.nside.is_power_of_two() || self.nside > MAX_NSIDE {
            return invalid(format!(
                "nside must be a power of two between 1 and {MAX_NSIDE}, got {}",
                self.nside
            ));
        }
        if self.n_jobs < ALL_CORES {
            return invalid(format!("n_jobs must be >= -1, got {}", self.n_jobs));
        }
        if self.reference_fields.is_empty() {
            return invalid("reference_fields must not be empty".into());
        }
        if self.secondary_aliases.is_empty() {
            return invalid("secondary_aliases must not be empty".into());
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.reference_fields.iter().find(|f| !seen.insert(f.as_str())) {
            return invalid(format!("reference field '{dup}' listed twice"));
        }
        for field in &self.coordinate_fields {
            if !seen.contains(field.as_str()) {
                return invalid(format!(
                    "coordinate field '{field}' must be part of reference_fields"
                ));
            }
        }
        for alias in &self.secondary_aliases {
            if !seen.insert(alias.to.as_str()) {
                return invalid(format!(
                    "secondary field '{}' would be attached as '{}', which already exists",
                    alias.from, alias.to
                ));
            }
        }
        for field in [&self.selection.structural_field, &self.selection.mass_field] {
            if !seen.contains(field.as_str()) {
                return invalid(format!(
                    "selection field '{field}' is neither loaded nor attached"
                ));
            }
        }

        for catalog in [&self.reference, &self.secondary] {
            if catalog.kind == SourceKind::Memory {
                return invalid(format!("{} cannot be read from a file", catalog.kind));
            }
            if catalog.kind.is_hierarchical() && catalog.key.is_none() {
                return Err(HaloError::MissingSourceKey(catalog.file.clone()));
            }
        }
        if self.output.as_str().is_empty() || self.membership_cache.as_str().is_empty() {
            return invalid("output and membership_cache paths must be set".into());
        }
        output_kind(&self.output).ensure_enabled()?;
        Ok(())
    }
}

/// Builder for [`HaloConfig`], with validation.
#[derive(Debug, Clone, Default)]
pub struct HaloConfigBuilder {
    config: HaloConfig,
}

impl HaloConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_path(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.base_path = v.into();
        self
    }
    pub fn reference(mut self, v: CatalogConfig) -> Self {
        self.config.reference = v;
        self
    }
    pub fn secondary(mut self, v: CatalogConfig) -> Self {
        self.config.secondary = v;
        self
    }

    // --- Tessellation ---
    pub fn nside(mut self, v: u32) -> Self {
        self.config.nside = v;
        self
    }
    pub fn ordering(mut self, v: PixelOrdering) -> Self {
        self.config.ordering = v;
        self
    }
    pub fn coordinate_fields(mut self, lon: &str, lat: &str) -> Self {
        self.config.coordinate_fields = [lon.to_string(), lat.to_string()];
        self
    }

    // --- Fields, join and selection ---
    pub fn reference_fields<S: AsRef<str>>(mut self, v: &[S]) -> Self {
        self.config.reference_fields = v.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }
    pub fn secondary_aliases(mut self, v: Vec<FieldAlias>) -> Self {
        self.config.secondary_aliases = v;
        self
    }
    pub fn join(mut self, v: JoinStrategy) -> Self {
        self.config.join = v;
        self
    }
    pub fn selection(mut self, v: HaloSelection) -> Self {
        self.config.selection = v;
        self
    }
    pub fn include_neighbours(mut self, v: bool) -> Self {
        self.config.include_neighbours = v;
        self
    }

    // --- Execution ---
    pub fn n_jobs(mut self, v: i32) -> Self {
        self.config.n_jobs = v;
        self
    }
    pub fn membership_cache(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.membership_cache = v.into();
        self
    }
    pub fn reuse_membership(mut self, v: bool) -> Self {
        self.config.reuse_membership = v;
        self
    }

    // --- Output ---
    pub fn output(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.output = v.into();
        self
    }
    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    /// Finalize the builder and produce a validated [`HaloConfig`].
    ///
    /// Validation rules
    /// -----------------
    /// * `nside` is a power of two in `1..=2^29`.
    /// * `n_jobs >= -1`.
    /// * `reference_fields` and `secondary_aliases` are non-empty; reference fields are unique.
    /// * Both coordinate fields are part of `reference_fields`.
    /// * Alias targets collide neither with reference fields nor with each other.
    /// * Both selection fields are loaded or attached.
    /// * Hierarchical catalogs carry a key ([`HaloError::MissingSourceKey`]).
    ///
    /// Whether an encoding is compiled into this build is checked when the catalog is
    /// opened, before any data is read.
    pub fn build(self) -> Result<HaloConfig, HaloError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
