//! # Cross-catalog joiner
//!
//! Attaches fields of a secondary catalog (e.g. photometric redshifts) onto the
//! rows of the reference catalog loaded for the same cells.
//!
//! ## Strategies
//! -----------------
//! * [`JoinStrategy::Positional`] – row `i` of the secondary batch belongs to row `i`
//!   of the primary batch. This holds when both catalogs share the same record
//!   ordering and were loaded through the same membership table and cell list. Only
//!   the row counts are checked; two equally long but differently ordered batches
//!   are joined silently and wrongly.
//! * [`JoinStrategy::ByKey`] – rows are matched on an integer record identifier
//!   present in both catalogs (e.g. `coadd_object_id`). Keys must match one-to-one;
//!   any missing, duplicated or extra key is a [`HaloError::Alignment`].
use std::{collections::HashMap, sync::Arc};

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, UInt32Array};
use arrow_cast::cast;
use arrow_schema::{DataType, Field, Schema};
use arrow_select::take::take;
use serde::{Deserialize, Serialize};

use crate::{constants::FastHashMap, halo_errors::HaloError};

/// A secondary field attached under a new name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAlias {
    pub from: String,
    pub to: String,
}

impl FieldAlias {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        FieldAlias {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// How secondary rows are matched to primary rows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum JoinStrategy {
    #[default]
    Positional,
    ByKey { primary: String, secondary: String },
}

impl JoinStrategy {
    /// Fields to request from the secondary catalog for `aliases`.
    pub fn secondary_fields(&self, aliases: &[FieldAlias]) -> Vec<String> {
        let mut fields: Vec<String> = aliases.iter().map(|a| a.from.clone()).collect();
        if let JoinStrategy::ByKey { secondary, .. } = self {
            if !fields.contains(secondary) {
                fields.push(secondary.clone());
            }
        }
        fields
    }

    /// Extra field the primary catalog must provide, if any.
    pub fn primary_key(&self) -> Option<&str> {
        match self {
            JoinStrategy::Positional => None,
            JoinStrategy::ByKey { primary, .. } => Some(primary),
        }
    }
}

/// Attach `aliases` from `secondary` onto `primary`.
///
/// Both batches are consumed; the secondary columns that are not attached are
/// released when this returns.
///
/// Arguments
/// -----------------
/// * `primary`: rows of the reference catalog.
/// * `secondary`: rows of the secondary catalog for the same cells.
/// * `aliases`: fields to attach and their new names.
/// * `strategy`: row matching rule.
///
/// Return
/// ----------
/// * The primary batch with one extra column per alias, appended in alias order.
/// * [`HaloError::DuplicateField`] if a new name already exists on the primary,
///   [`HaloError::Alignment`] if rows cannot be matched.
pub fn attach_fields(
    primary: RecordBatch,
    secondary: RecordBatch,
    aliases: &[FieldAlias],
    strategy: &JoinStrategy,
) -> Result<RecordBatch, HaloError> {
    let primary_schema = primary.schema();
    for alias in aliases {
        if primary_schema.index_of(&alias.to).is_ok() {
            return Err(HaloError::DuplicateField(alias.to.clone()));
        }
    }

    let take_indices = match strategy {
        JoinStrategy::Positional => {
            if primary.num_rows() != secondary.num_rows() {
                return Err(HaloError::Alignment(format!(
                    "primary has {} rows, secondary has {}",
                    primary.num_rows(),
                    secondary.num_rows()
                )));
            }
            None
        }
        JoinStrategy::ByKey {
            primary: primary_key,
            secondary: secondary_key,
        } => Some(match_keys(
            &primary,
            primary_key,
            &secondary,
            secondary_key,
        )?),
    };

    let mut fields: Vec<Arc<Field>> = primary_schema.fields().iter().cloned().collect();
    let mut columns: Vec<ArrayRef> = primary.columns().to_vec();
    for alias in aliases {
        let column = secondary.column_by_name(&alias.from).ok_or_else(|| {
            HaloError::InvalidConfig(format!(
                "field '{}' was not loaded from the secondary catalog",
                alias.from
            ))
        })?;
        let column = match &take_indices {
            Some(indices) => take(column.as_ref(), indices, None)?,
            None => column.clone(),
        };
        // Nullability follows the secondary schema so every cell gets the same schema.
        let nullable = secondary
            .schema()
            .field_with_name(&alias.from)
            .map(|f| f.is_nullable())
            .unwrap_or(true);
        fields.push(Arc::new(Field::new(
            &alias.to,
            column.data_type().clone(),
            nullable,
        )));
        columns.push(column);
    }

    Ok(RecordBatch::try_new(
        Arc::new(Schema::new_with_metadata(
            fields,
            primary_schema.metadata().clone(),
        )),
        columns,
    )?)
}

/// For each primary row, the index of the secondary row with the same key.
fn match_keys(
    primary: &RecordBatch,
    primary_key: &str,
    secondary: &RecordBatch,
    secondary_key: &str,
) -> Result<UInt32Array, HaloError> {
    if primary.num_rows() != secondary.num_rows() {
        return Err(HaloError::Alignment(format!(
            "key join needs one-to-one rows: primary has {}, secondary has {}",
            primary.num_rows(),
            secondary.num_rows()
        )));
    }
    let primary_keys = key_column(primary, primary_key)?;
    let secondary_keys = key_column(secondary, secondary_key)?;

    let mut positions: FastHashMap<i64, u32> = HashMap::default();
    positions.reserve(secondary_keys.len());
    for (row, &key) in secondary_keys.values().iter().enumerate() {
        if positions.insert(key, row as u32).is_some() {
            return Err(HaloError::Alignment(format!(
                "duplicate key {key} in secondary field '{secondary_key}'"
            )));
        }
    }

    let mut seen = vec![false; secondary_keys.len()];
    let mut indices = Vec::with_capacity(primary_keys.len());
    for &key in primary_keys.values().iter() {
        let row = *positions.get(&key).ok_or_else(|| {
            HaloError::Alignment(format!(
                "key {key} of primary field '{primary_key}' has no secondary match"
            ))
        })?;
        if std::mem::replace(&mut seen[row as usize], true) {
            return Err(HaloError::Alignment(format!(
                "duplicate key {key} in primary field '{primary_key}'"
            )));
        }
        indices.push(row);
    }
    Ok(UInt32Array::from(indices))
}

fn key_column(batch: &RecordBatch, name: &str) -> Result<Int64Array, HaloError> {
    let column = batch.column_by_name(name).ok_or_else(|| {
        HaloError::Alignment(format!("join key '{name}' was not loaded"))
    })?;
    let as_i64 = cast(column, &DataType::Int64).map_err(|_| HaloError::UnsupportedFieldType {
        field: name.to_string(),
        data_type: column.data_type().to_string(),
    })?;
    let keys = as_i64
        .as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| HaloError::UnsupportedFieldType {
            field: name.to_string(),
            data_type: column.data_type().to_string(),
        })?;
    if keys.null_count() > 0 {
        return Err(HaloError::Alignment(format!("join key '{name}' has null values")));
    }
    Ok(keys)
}

#[cfg(test)]
mod join_test {
    use arrow_array::Float64Array;

    use super::*;

    fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        RecordBatch::try_from_iter(columns).unwrap()
    }

    fn floats(batch: &RecordBatch, name: &str) -> Vec<f64> {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    fn gold() -> RecordBatch {
        batch(vec![
            ("coadd_object_id", Arc::new(Int64Array::from(vec![10, 11, 12])) as ArrayRef),
            ("m200", Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef),
        ])
    }

    fn redshift() -> FieldAlias {
        FieldAlias::new("redshift_cos", "z")
    }

    #[test]
    fn test_positional_attach() {
        let bpz = batch(vec![(
            "redshift_cos",
            Arc::new(Float64Array::from(vec![0.1, 0.2, 0.3])) as ArrayRef,
        )]);
        let out = attach_fields(gold(), bpz, &[redshift()], &JoinStrategy::Positional).unwrap();
        assert_eq!(out.num_columns(), 3);
        assert_eq!(out.schema().field(2).name(), "z");
        assert_eq!(floats(&out, "z"), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_positional_row_count_mismatch() {
        let bpz = batch(vec![(
            "redshift_cos",
            Arc::new(Float64Array::from(vec![0.1])) as ArrayRef,
        )]);
        assert!(matches!(
            attach_fields(gold(), bpz, &[redshift()], &JoinStrategy::Positional),
            Err(HaloError::Alignment(_))
        ));
    }

    #[test]
    fn test_duplicate_target_name() {
        let bpz = batch(vec![(
            "m200",
            Arc::new(Float64Array::from(vec![0.1, 0.2, 0.3])) as ArrayRef,
        )]);
        assert!(matches!(
            attach_fields(
                gold(),
                bpz,
                &[FieldAlias::new("m200", "m200")],
                &JoinStrategy::Positional
            ),
            Err(HaloError::DuplicateField(f)) if f == "m200"
        ));
    }

    #[test]
    fn test_key_join_reorders() {
        let bpz = batch(vec![
            ("coadd_object_id", Arc::new(Int64Array::from(vec![12, 10, 11])) as ArrayRef),
            ("redshift_cos", Arc::new(Float64Array::from(vec![0.3, 0.1, 0.2])) as ArrayRef),
        ]);
        let strategy = JoinStrategy::ByKey {
            primary: "coadd_object_id".into(),
            secondary: "coadd_object_id".into(),
        };
        assert_eq!(
            strategy.secondary_fields(&[redshift()]),
            vec!["redshift_cos".to_string(), "coadd_object_id".to_string()]
        );

        let out = attach_fields(gold(), bpz, &[redshift()], &strategy).unwrap();
        assert_eq!(floats(&out, "z"), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_key_join_alignment_errors() {
        let strategy = JoinStrategy::ByKey {
            primary: "coadd_object_id".into(),
            secondary: "coadd_object_id".into(),
        };

        let missing = batch(vec![
            ("coadd_object_id", Arc::new(Int64Array::from(vec![12, 10, 99])) as ArrayRef),
            ("redshift_cos", Arc::new(Float64Array::from(vec![0.3, 0.1, 0.2])) as ArrayRef),
        ]);
        assert!(matches!(
            attach_fields(gold(), missing, &[redshift()], &strategy),
            Err(HaloError::Alignment(_))
        ));

        let duplicated = batch(vec![
            ("coadd_object_id", Arc::new(Int64Array::from(vec![10, 10, 11])) as ArrayRef),
            ("redshift_cos", Arc::new(Float64Array::from(vec![0.3, 0.1, 0.2])) as ArrayRef),
        ]);
        assert!(matches!(
            attach_fields(gold(), duplicated, &[redshift()], &strategy),
            Err(HaloError::Alignment(_))
        ));
    }
}
