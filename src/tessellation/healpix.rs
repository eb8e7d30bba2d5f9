//! HEALPix pixelization backed by [`cdshealpix`].
//!
//! `cdshealpix` works natively in the NESTED numbering. RING indices, the numbering
//! `healpy` uses by default, are obtained through the layer's ring conversions so the
//! two orderings describe the same pixels.
use cdshealpix::compass_point::MainWind;
use cdshealpix::nested::{self, Layer};

use crate::{
    constants::{CellId, MAX_NSIDE},
    conversion::SkyCoord,
    halo_errors::HaloError,
    tessellation::Tessellation,
};

/// Pixel numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelOrdering {
    #[default]
    Ring,
    Nested,
}

impl std::fmt::Display for PixelOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelOrdering::Ring => write!(f, "ring"),
            PixelOrdering::Nested => write!(f, "nested"),
        }
    }
}

// Same order as NEIGHBOUR_DIRECTIONS.
const MAIN_WINDS: [MainWind; 8] = [
    MainWind::SW,
    MainWind::W,
    MainWind::NW,
    MainWind::N,
    MainWind::NE,
    MainWind::E,
    MainWind::SE,
    MainWind::S,
];

/// Equal-area HEALPix tessellation at a fixed `nside`.
#[derive(Clone, Copy)]
pub struct Healpix {
    nside: u32,
    ordering: PixelOrdering,
    layer: &'static Layer,
}

impl std::fmt::Debug for Healpix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Healpix")
            .field("nside", &self.nside)
            .field("ordering", &self.ordering)
            .finish()
    }
}

impl Healpix {
    /// Build the tessellation for `nside`, which must be a power of two in `1..=2^29`.
    pub fn new(nside: u32, ordering: PixelOrdering) -> Result<Self, HaloError> {
        if !nside.is_power_of_two() || nside > MAX_NSIDE {
            return Err(HaloError::InvalidConfig(format!(
                "nside must be a power of two between 1 and {MAX_NSIDE}, got {nside}"
            )));
        }
        let depth = nside.trailing_zeros() as u8;
        Ok(Healpix {
            nside,
            ordering,
            layer: nested::get(depth),
        })
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn ordering(&self) -> PixelOrdering {
        self.ordering
    }

    #[inline]
    fn to_nested(&self, cell: CellId) -> u64 {
        match self.ordering {
            PixelOrdering::Nested => cell,
            PixelOrdering::Ring => self.layer.from_ring(cell),
        }
    }

    #[inline]
    fn from_nested(&self, hash: u64) -> CellId {
        match self.ordering {
            PixelOrdering::Nested => hash,
            PixelOrdering::Ring => self.layer.to_ring(hash),
        }
    }
}

impl Tessellation for Healpix {
    fn cell_of(&self, coord: &SkyCoord) -> CellId {
        let hash = self.layer.hash(coord.longitude, coord.latitude());
        self.from_nested(hash)
    }

    fn raw_neighbours(&self, cell: CellId) -> [Option<CellId>; 8] {
        let mut out = [None; 8];
        if cell >= self.n_cells() {
            return out;
        }
        let neighbours = self.layer.neighbours(self.to_nested(cell), false);
        for (slot, wind) in out.iter_mut().zip(MAIN_WINDS) {
            *slot = neighbours.get(wind).map(|&hash| self.from_nested(hash));
        }
        out
    }

    fn n_cells(&self) -> u64 {
        12 * (self.nside as u64) * (self.nside as u64)
    }

    fn describe(&self) -> String {
        format!("healpix nside={} ordering={}", self.nside, self.ordering)
    }
}
