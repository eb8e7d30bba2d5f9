use itertools::Itertools;

use crate::{constants::CellId, membership::CellMembership, tessellation::Tessellation};

/// Cells adjacent to `cell` that also hold records of the catalog.
///
/// Neighbours the tessellation cannot define are dropped first, then the remaining
/// ones are kept only if they appear in `membership`. The result is ascending and
/// never contains `cell` itself, so loading them in order gives the same row order
/// on every run.
///
/// Arguments
/// -----------------
/// * `tessellation`: the scheme defining adjacency.
/// * `cell`: the target cell.
/// * `membership`: the table whose observed cells bound the answer.
///
/// Return
/// ----------
/// * The sorted, de-duplicated neighbour cells present in the catalog.
pub fn resolve_neighbours<T: Tessellation + ?Sized>(
    tessellation: &T,
    cell: CellId,
    membership: &CellMembership,
) -> Vec<CellId> {
    tessellation
        .raw_neighbours(cell)
        .into_iter()
        .flatten()
        .filter(|&n| n != cell && membership.contains(n))
        .sorted_unstable()
        .dedup()
        .collect()
}

#[cfg(test)]
mod neighbours_test {
    use super::*;
    use crate::conversion::SkyCoord;
    use crate::tessellation::healpix::{Healpix, PixelOrdering};

    /// One-dimensional strip of cells: neighbours are `c - 1` and `c + 1`.
    struct Strip {
        n: u64,
    }

    impl Tessellation for Strip {
        fn cell_of(&self, coord: &SkyCoord) -> CellId {
            (coord.longitude / std::f64::consts::TAU * self.n as f64) as CellId
        }

        fn raw_neighbours(&self, cell: CellId) -> [Option<CellId>; 8] {
            let mut out = [None; 8];
            out[1] = cell.checked_sub(1);
            out[5] = Some(cell + 1).filter(|&c| c < self.n);
            // Duplicate report, as happens for tiny HEALPix resolutions.
            out[3] = out[5];
            out
        }

        fn n_cells(&self) -> u64 {
            self.n
        }

        fn describe(&self) -> String {
            format!("strip n={}", self.n)
        }
    }

    #[test]
    fn test_sentinels_and_absent_cells_dropped() {
        let strip = Strip { n: 10 };
        let membership = CellMembership::from_cells(vec![0, 1, 3, 4, 9]);

        assert_eq!(resolve_neighbours(&strip, 0, &membership), vec![1]);
        assert_eq!(resolve_neighbours(&strip, 4, &membership), vec![3]);
        assert_eq!(resolve_neighbours(&strip, 9, &membership), Vec::<CellId>::new());
        assert_eq!(resolve_neighbours(&strip, 2, &membership), vec![1, 3]);
    }

    #[test]
    fn test_healpix_neighbours_are_known_cells() {
        let hp = Healpix::new(8, PixelOrdering::Ring).unwrap();
        let cells: Vec<CellId> = (0..hp.n_cells()).filter(|c| c % 3 != 0).collect();
        let membership = CellMembership::from_cells(cells);

        for &cell in membership.unique_cells() {
            let neighbours = resolve_neighbours(&hp, cell, &membership);
            assert!(neighbours.windows(2).all(|w| w[0] < w[1]));
            for n in neighbours {
                assert!(membership.contains(n));
                assert_ne!(n, cell);
            }
        }
    }
}
