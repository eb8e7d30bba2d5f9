//! # Pixel data loader
//!
//! Reads the records of one cell (optionally with its neighbours) from a catalog
//! source, using the cell membership table as a row mask. Only requested fields
//! are decoded, and only the rows of the requested cells are returned.
//!
//! ## Row order
//! -----------------
//! * Within a cell, rows keep catalog order.
//! * With neighbours, the target cell comes first, followed by each neighbour in
//!   ascending [`CellId`] order (see [`resolve_neighbours`]).
use arrow_array::RecordBatch;
use arrow_select::concat::concat_batches;
use log::debug;

use crate::{
    catalog::CatalogSource, constants::CellId, halo_errors::HaloError,
    membership::CellMembership, neighbours::resolve_neighbours, tessellation::Tessellation,
};

/// Load `fields` for the records of `cell`.
///
/// Return
/// ----------
/// * A batch with exactly `fields`, one row per record whose membership is `cell`.
/// * A data access error if a field is missing or the source cannot be opened;
///   [`HaloError::MembershipLengthMismatch`] if `membership` does not index `source`.
pub fn load_cell(
    source: &dyn CatalogSource,
    cell: CellId,
    fields: &[String],
    membership: &CellMembership,
) -> Result<RecordBatch, HaloError> {
    let mask = membership.mask_for(cell);
    let batch = source.read_fields(fields, Some(&mask))?;
    debug!(
        "cell {cell}: {} rows of {:?} from {}",
        batch.num_rows(),
        fields,
        source.describe().path
    );
    Ok(batch)
}

/// The target cell followed by its populated neighbours, in load order.
pub fn cell_with_neighbours<T: Tessellation + ?Sized>(
    tessellation: &T,
    cell: CellId,
    membership: &CellMembership,
) -> Vec<CellId> {
    let mut cells = Vec::with_capacity(9);
    cells.push(cell);
    cells.extend(resolve_neighbours(tessellation, cell, membership));
    cells
}

/// Load `fields` for each of `cells` and concatenate them, in the given order.
pub fn load_cells(
    source: &dyn CatalogSource,
    cells: &[CellId],
    fields: &[String],
    membership: &CellMembership,
) -> Result<RecordBatch, HaloError> {
    let batches = cells
        .iter()
        .map(|&cell| load_cell(source, cell, fields, membership))
        .collect::<Result<Vec<_>, _>>()?;

    match batches.first() {
        Some(first) => Ok(concat_batches(&first.schema(), &batches)?),
        None => Err(HaloError::InvalidConfig(
            "no cell requested from the pixel loader".into(),
        )),
    }
}

/// Load `fields` for `cell` and every populated neighbour of it.
pub fn load_cell_with_neighbours<T: Tessellation + ?Sized>(
    source: &dyn CatalogSource,
    tessellation: &T,
    cell: CellId,
    fields: &[String],
    membership: &CellMembership,
) -> Result<RecordBatch, HaloError> {
    let cells = cell_with_neighbours(tessellation, cell, membership);
    load_cells(source, &cells, fields, membership)
}
