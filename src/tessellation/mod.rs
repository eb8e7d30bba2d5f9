//! # Sky tessellation: coordinates → cell identifiers
//!
//! The spatial indexer of the pipeline. A [`Tessellation`] maps a sky position to a
//! fixed-resolution cell ([`CellId`]) and reports the cells adjacent to a given one.
//! The production implementation is [`Healpix`](crate::tessellation::healpix::Healpix),
//! an equal-area pixelization backed by `cdshealpix`.
//!
//! ## Conventions
//! -----------------
//! * Input angles are **degrees**; they are converted once to native spherical
//!   coordinates (colatitude, longitude) by [`SkyCoord::from_degrees`].
//! * The resolution is fixed for a [`Tessellation`] value; the same coordinate pair
//!   always yields the same [`CellId`].
//! * Neighbours are reported for the eight compass directions, in the order of
//!   [`NEIGHBOUR_DIRECTIONS`]. A direction with no neighbour (e.g. around the twelve
//!   HEALPix base-pixel corners where only seven neighbours exist) is `None`.
//!
//! ## See also
//! ------------
//! * [`crate::neighbours::resolve_neighbours`] – Neighbour filtering against a membership table.
//! * [`crate::membership::CellMembership`] – Per-record cell lookup built with [`compute_cell_ids`].
use crate::{
    constants::{CellId, Degree},
    conversion::SkyCoord,
    halo_errors::HaloError,
};

pub mod healpix;

/// Compass directions reported by [`Tessellation::raw_neighbours`], in order.
pub const NEIGHBOUR_DIRECTIONS: [&str; 8] = ["SW", "W", "NW", "N", "NE", "E", "SE", "S"];

/// A deterministic partition of the celestial sphere into numbered cells.
pub trait Tessellation: Send + Sync {
    /// Cell containing the given position.
    fn cell_of(&self, coord: &SkyCoord) -> CellId;

    /// The eight neighbours of `cell`, `None` where the scheme has no such neighbour.
    fn raw_neighbours(&self, cell: CellId) -> [Option<CellId>; 8];

    /// Number of cells covering the sphere.
    fn n_cells(&self) -> u64;

    /// Stable, human-readable description of the scheme and its resolution.
    ///
    /// Used to tag persisted membership tables so a cache built at another
    /// resolution is never reused.
    fn describe(&self) -> String;
}

/// Run the spatial indexer over coordinate columns.
///
/// Arguments
/// -----------------
/// * `tessellation`: the partitioning scheme.
/// * `lon`: longitude-like angles in degrees (e.g. `ra`).
/// * `lat`: latitude-like angles in degrees (e.g. `dec`), in [-90, 90].
///
/// Return
/// ----------
/// * One [`CellId`] per input pair, in input order.
/// * [`HaloError::CoordinateLengthMismatch`] if the columns differ in length,
///   [`HaloError::InvalidCoordinate`] on the first non-finite or out-of-range pair.
pub fn compute_cell_ids<T: Tessellation + ?Sized>(
    tessellation: &T,
    lon: &[Degree],
    lat: &[Degree],
) -> Result<Vec<CellId>, HaloError> {
    if lon.len() != lat.len() {
        return Err(HaloError::CoordinateLengthMismatch {
            lon: lon.len(),
            lat: lat.len(),
        });
    }

    lon.iter()
        .zip(lat)
        .enumerate()
        .map(|(row, (&lon, &lat))| {
            SkyCoord::from_degrees(lon, lat)
                .map(|coord| tessellation.cell_of(&coord))
                .ok_or(HaloError::InvalidCoordinate { row, lon, lat })
        })
        .collect()
}
