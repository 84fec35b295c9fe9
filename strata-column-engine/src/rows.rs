//! Row-level accessors over stored batches.

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Int64Array, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::compute::{SortColumn, cast, lexsort_to_indices, take_record_batch};
use arrow::datatypes::{DataType, Int64Type, UInt64Type};
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_storage::constants::{DELETED_COLUMN_NAME, PLAN_STEP_COLUMN_NAME, TX_ID_COLUMN_NAME};
use strata_types::{KeyValue, RowKey, Snapshot};

/// Key columns normalized to one physical type per [`KeyValue`] variant.
enum KeyArray {
    Bool(BooleanArray),
    Int(Int64Array),
    UInt(UInt64Array),
    Utf8(StringArray),
    Binary(BinaryArray),
}

impl KeyArray {
    fn normalize(array: &ArrayRef) -> Result<Self> {
        let normalized = match array.data_type() {
            DataType::Boolean => KeyArray::Bool(array.as_boolean().clone()),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                KeyArray::Int(cast(array, &DataType::Int64)?
                    .as_primitive::<Int64Type>()
                    .clone())
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                KeyArray::UInt(cast(array, &DataType::UInt64)?
                    .as_primitive::<UInt64Type>()
                    .clone())
            }
            DataType::Utf8 | DataType::LargeUtf8 => {
                KeyArray::Utf8(cast(array, &DataType::Utf8)?.as_string::<i32>().clone())
            }
            DataType::Binary | DataType::LargeBinary => {
                KeyArray::Binary(cast(array, &DataType::Binary)?.as_binary::<i32>().clone())
            }
            other => {
                return Err(Error::Internal(format!(
                    "unsupported key column type {other}"
                )));
            }
        };
        Ok(normalized)
    }

    fn value(&self, row: usize) -> KeyValue {
        match self {
            KeyArray::Bool(a) => KeyValue::Bool(a.value(row)),
            KeyArray::Int(a) => KeyValue::Int(a.value(row)),
            KeyArray::UInt(a) => KeyValue::UInt(a.value(row)),
            KeyArray::Utf8(a) => KeyValue::Utf8(a.value(row).to_string()),
            KeyArray::Binary(a) => KeyValue::Binary(a.value(row).to_vec()),
        }
    }
}

/// Extracts [`RowKey`]s from the key columns of a batch.
pub struct KeyColumns {
    columns: Vec<KeyArray>,
}

impl KeyColumns {
    pub fn new(batch: &RecordBatch, key_indices: &[usize]) -> Result<Self> {
        let columns = key_indices
            .iter()
            .map(|&idx| KeyArray::normalize(batch.column(idx)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn key(&self, row: usize) -> RowKey {
        RowKey::new(self.columns.iter().map(|c| c.value(row)).collect())
    }

    /// Smallest and largest key of the batch, or `None` when it is empty.
    pub fn bounds(&self, rows: usize) -> Option<(RowKey, RowKey)> {
        let mut keys = (0..rows).map(|row| self.key(row));
        let first = keys.next()?;
        Some(keys.fold((first.clone(), first), |(lo, hi), key| {
            if key < lo {
                (key, hi)
            } else if key > hi {
                (lo, key)
            } else {
                (lo, hi)
            }
        }))
    }
}

/// Typed views of the system columns of a stored batch.
pub struct SystemColumns<'a> {
    plan_step: &'a UInt64Array,
    tx_id: &'a UInt64Array,
    deleted: &'a BooleanArray,
}

impl<'a> SystemColumns<'a> {
    pub fn new(batch: &'a RecordBatch) -> Result<Self> {
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .ok_or_else(|| Error::Internal(format!("stored batch lacks `{name}` column")))
        };
        let plan_step = column(PLAN_STEP_COLUMN_NAME)?
            .as_primitive_opt::<UInt64Type>()
            .ok_or_else(|| Error::Internal("`__plan_step` must be UInt64".into()))?;
        let tx_id = column(TX_ID_COLUMN_NAME)?
            .as_primitive_opt::<UInt64Type>()
            .ok_or_else(|| Error::Internal("`__tx_id` must be UInt64".into()))?;
        let deleted = column(DELETED_COLUMN_NAME)?
            .as_boolean_opt()
            .ok_or_else(|| Error::Internal("`__deleted` must be Boolean".into()))?;
        Ok(Self {
            plan_step,
            tx_id,
            deleted,
        })
    }

    #[inline]
    pub fn commit(&self, row: usize) -> Snapshot {
        Snapshot::new(self.plan_step.value(row), self.tx_id.value(row))
    }

    #[inline]
    pub fn is_deleted(&self, row: usize) -> bool {
        self.deleted.value(row)
    }

    pub fn deleted(&self) -> &'a BooleanArray {
        self.deleted
    }

    /// Smallest and largest commit snapshot of the batch.
    pub fn snapshot_bounds(&self) -> Option<(Snapshot, Snapshot)> {
        (0..self.plan_step.len())
            .map(|row| self.commit(row))
            .fold(None, |acc, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
    }
}

/// Sort a stored batch by key, breaking ties by commit snapshot.
pub fn sort_by_key(batch: &RecordBatch, key_indices: &[usize]) -> Result<RecordBatch> {
    if batch.num_rows() < 2 {
        return Ok(batch.clone());
    }
    let mut columns: Vec<SortColumn> = key_indices
        .iter()
        .map(|&idx| SortColumn {
            values: batch.column(idx).clone(),
            options: None,
        })
        .collect();
    for name in [PLAN_STEP_COLUMN_NAME, TX_ID_COLUMN_NAME] {
        if let Some(values) = batch.column_by_name(name) {
            columns.push(SortColumn {
                values: values.clone(),
                options: None,
            });
        }
    }
    let indices: UInt32Array = lexsort_to_indices(&columns, None)?;
    Ok(take_record_batch(batch, &indices)?)
}
