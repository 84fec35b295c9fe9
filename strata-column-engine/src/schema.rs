//! Engine schema: user columns, key columns, and the stored batch layout.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, UInt64Array, new_null_array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_storage::constants::{
    DELETED_COLUMN_NAME, PLAN_STEP_COLUMN_NAME, SYSTEM_COLUMN_NAMES, TX_ID_COLUMN_NAME,
};
use strata_types::{SchemaId, Snapshot};

/// Schema version assigned by [`EngineSchema::new`].
pub const INITIAL_SCHEMA_ID: SchemaId = 1;

/// Fixed schema of one engine.
///
/// Stored batches carry the user columns (non-key columns relaxed to
/// nullable so tombstones can leave them empty) followed by the
/// `__plan_step`, `__tx_id`, and `__deleted` system columns.
#[derive(Debug, Clone)]
pub struct EngineSchema {
    user: SchemaRef,
    storage: SchemaRef,
    key_schema: SchemaRef,
    key_indices: Vec<usize>,
    schema_id: SchemaId,
}

impl EngineSchema {
    /// Build a schema keyed by `key_columns`, in key order.
    ///
    /// Key columns must be non-nullable and of a boolean, integer, string, or
    /// binary type. System column names are reserved.
    pub fn new(user: SchemaRef, key_columns: &[&str]) -> Result<Self> {
        if user.fields().is_empty() {
            return Err(Error::schema_mismatch("schema has no columns"));
        }
        if key_columns.is_empty() {
            return Err(Error::schema_mismatch("at least one key column is required"));
        }
        if let Some(field) = user
            .fields()
            .iter()
            .find(|f| SYSTEM_COLUMN_NAMES.contains(&f.name().as_str()))
        {
            return Err(Error::schema_mismatch(format!(
                "column name `{}` is reserved",
                field.name()
            )));
        }

        let mut key_indices = Vec::with_capacity(key_columns.len());
        for name in key_columns {
            let idx = user.index_of(name).map_err(|_| {
                Error::schema_mismatch(format!("key column `{name}` is not part of the schema"))
            })?;
            if key_indices.contains(&idx) {
                return Err(Error::schema_mismatch(format!(
                    "key column `{name}` listed twice"
                )));
            }
            let field = user.field(idx);
            if !is_supported_key_type(field.data_type()) {
                return Err(Error::schema_mismatch(format!(
                    "key column `{name}` has unsupported type {}",
                    field.data_type()
                )));
            }
            if field.is_nullable() {
                return Err(Error::schema_mismatch(format!(
                    "key column `{name}` must not be nullable"
                )));
            }
            key_indices.push(idx);
        }

        let mut storage_fields: Vec<Field> = user
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, f)| {
                let field = f.as_ref().clone();
                if key_indices.contains(&idx) {
                    field
                } else {
                    field.with_nullable(true)
                }
            })
            .collect();
        storage_fields.push(Field::new(PLAN_STEP_COLUMN_NAME, DataType::UInt64, false));
        storage_fields.push(Field::new(TX_ID_COLUMN_NAME, DataType::UInt64, false));
        storage_fields.push(Field::new(DELETED_COLUMN_NAME, DataType::Boolean, false));

        let key_schema = Arc::new(Schema::new(
            key_indices
                .iter()
                .map(|&idx| user.field(idx).clone())
                .collect::<Vec<_>>(),
        ));

        Ok(Self {
            user,
            storage: Arc::new(Schema::new(storage_fields)),
            key_schema,
            key_indices,
            schema_id: INITIAL_SCHEMA_ID,
        })
    }

    /// Tag the schema with an explicit version.
    pub fn with_schema_id(mut self, schema_id: SchemaId) -> Self {
        self.schema_id = schema_id;
        self
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn user_schema(&self) -> &SchemaRef {
        &self.user
    }

    pub fn storage_schema(&self) -> &SchemaRef {
        &self.storage
    }

    /// Schema of the batches `delete` accepts: the key columns only.
    pub fn key_schema(&self) -> &SchemaRef {
        &self.key_schema
    }

    /// Positions of the key columns, valid in both user and stored batches.
    pub fn key_indices(&self) -> &[usize] {
        &self.key_indices
    }

    pub fn key_column_names(&self) -> Vec<String> {
        self.key_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Check an ingestion batch against the user schema.
    pub fn validate_batch(&self, batch: &RecordBatch) -> Result<()> {
        check_columns(self.user.as_ref(), batch)
    }

    /// Check a delete batch against the key schema.
    pub fn validate_key_batch(&self, batch: &RecordBatch) -> Result<()> {
        check_columns(self.key_schema.as_ref(), batch)
    }

    /// Append system columns to a validated user batch.
    pub fn to_storage_batch(&self, batch: &RecordBatch, commit: Snapshot) -> Result<RecordBatch> {
        self.assemble(batch.columns().to_vec(), batch.num_rows(), commit, false)
    }

    /// Build tombstone rows for the keys in a validated key batch.
    pub fn to_tombstone_batch(&self, keys: &RecordBatch, commit: Snapshot) -> Result<RecordBatch> {
        let rows = keys.num_rows();
        let columns = self
            .user
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, field)| match self.key_indices.iter().position(|&k| k == idx) {
                Some(pos) => Arc::clone(keys.column(pos)),
                None => new_null_array(field.data_type(), rows),
            })
            .collect();
        self.assemble(columns, rows, commit, true)
    }

    fn assemble(
        &self,
        mut columns: Vec<ArrayRef>,
        rows: usize,
        commit: Snapshot,
        deleted: bool,
    ) -> Result<RecordBatch> {
        columns.push(Arc::new(UInt64Array::from(vec![commit.plan_step; rows])));
        columns.push(Arc::new(UInt64Array::from(vec![commit.tx_id; rows])));
        columns.push(Arc::new(BooleanArray::from(vec![deleted; rows])));
        Ok(RecordBatch::try_new(Arc::clone(&self.storage), columns)?)
    }

    /// Resolve an optional projection to user column positions.
    pub fn projection_indices(&self, projection: Option<&[String]>) -> Result<Vec<usize>> {
        match projection {
            None => Ok((0..self.user.fields().len()).collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.user.index_of(name).map_err(|_| {
                        Error::InvalidArgumentError(format!("unknown projection column `{name}`"))
                    })
                })
                .collect(),
        }
    }

    /// Output schema for a resolved projection.
    pub fn output_schema(&self, indices: &[usize]) -> Result<SchemaRef> {
        Ok(Arc::new(self.user.project(indices)?))
    }

    /// Project a stored batch down to user columns.
    pub fn project(
        &self,
        stored: &RecordBatch,
        indices: &[usize],
        output: &SchemaRef,
    ) -> Result<RecordBatch> {
        let columns = indices
            .iter()
            .map(|&idx| Arc::clone(stored.column(idx)))
            .collect();
        Ok(RecordBatch::try_new(Arc::clone(output), columns)?)
    }
}

fn is_supported_key_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Binary
            | DataType::LargeBinary
    )
}

fn check_columns(expected: &Schema, batch: &RecordBatch) -> Result<()> {
    let actual = batch.schema_ref();
    if actual.fields().len() != expected.fields().len() {
        return Err(Error::schema_mismatch(format!(
            "expected {} columns, got {}",
            expected.fields().len(),
            actual.fields().len()
        )));
    }
    for (idx, (want, got)) in expected.fields().iter().zip(actual.fields()).enumerate() {
        if want.name() != got.name() {
            return Err(Error::schema_mismatch(format!(
                "column {idx}: expected `{}`, got `{}`",
                want.name(),
                got.name()
            )));
        }
        if want.data_type() != got.data_type() {
            return Err(Error::schema_mismatch(format!(
                "column `{}`: expected {}, got {}",
                want.name(),
                want.data_type(),
                got.data_type()
            )));
        }
        if !want.is_nullable() && batch.column(idx).null_count() > 0 {
            return Err(Error::schema_mismatch(format!(
                "column `{}` is not nullable but contains nulls",
                want.name()
            )));
        }
    }
    Ok(())
}
