//! # Constants and type definitions for halopix
//!
//! Shared type aliases, default field lists and resolution parameters used across
//! the crate. Defaults reproduce the halo extraction run over the Cardinal gold and
//! BPZ catalogs: HEALPix `nside = 8`, positions read from `ra`/`dec`, halos selected
//! with `rhalo == 0 && m200 > 0` and the cosmological redshift attached as `z`.

use std::collections::HashMap;

use ahash::RandomState;

/// Identifier of one HEALPix pixel at the run resolution.
pub type CellId = u64;

/// Angle in degrees
pub type Degree = f64;

/// Angle in radians
pub type Radian = f64;

/// Hash map with the `ahash` hasher, used for key joins and cell counts.
pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

/// Default HEALPix resolution.
pub const DEFAULT_NSIDE: u32 = 8;

/// Largest `nside` handled (HEALPix depth 29).
pub const MAX_NSIDE: u32 = 1 << 29;

/// `n_jobs` value meaning "one worker per available core".
pub const ALL_CORES: i32 = -1;

/// Longitude-like and latitude-like coordinate fields of the reference catalog.
pub const DEFAULT_COORDINATE_FIELDS: [&str; 2] = ["ra", "dec"];

/// Fields loaded from the reference (gold) catalog for every cell.
pub const DEFAULT_REFERENCE_FIELDS: [&str; 10] = [
    "ra",
    "dec",
    "coadd_object_id",
    "haloid",
    "rhalo",
    "r200",
    "m200",
    "px",
    "py",
    "pz",
];

/// Field read from the secondary (bpz) catalog and the name it takes in the result.
pub const DEFAULT_SECONDARY_ALIAS: (&str, &str) = ("redshift_cos", "z");

/// Field that must be exactly zero for a central halo.
pub const DEFAULT_STRUCTURAL_FIELD: &str = "rhalo";

/// Field that must be strictly positive for a halo.
pub const DEFAULT_MASS_FIELD: &str = "m200";

/// Group holding the per-catalog keys in hierarchical sources (`catalog/<key>/<field>`).
pub const HIERARCHICAL_ROOT_GROUP: &str = "catalog";

/// Column name of the persisted cell membership.
pub const MEMBERSHIP_COLUMN: &str = "cell_id";

/// Parquet batch size used when scanning sources.
pub const DEFAULT_BATCH_SIZE: usize = 8192;
