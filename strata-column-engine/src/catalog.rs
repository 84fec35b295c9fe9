//! Persisted form of the live portion set.
//!
//! The catalog is one bitcode blob at the pager's catalog root key. It is
//! rewritten after every successful mutation of the portion set and read
//! back by [`ColumnEngine::open`](crate::ColumnEngine::open).

use std::io::Cursor;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use bitcode::{Decode, Encode};
use strata_result::{Error, Result};
use strata_storage::pager::Pager;
use strata_types::{PortionId, SchemaId};

use crate::portion::PortionMeta;
use crate::portion_set::PortionSet;
use crate::schema::EngineSchema;

#[derive(Debug, Clone, Encode, Decode)]
pub struct PortionCatalog {
    /// Portion-set version the catalog was captured at.
    pub version: u64,
    pub schema_id: SchemaId,
    /// User schema as an Arrow IPC stream header.
    pub schema_bytes: Vec<u8>,
    pub key_columns: Vec<String>,
    pub next_portion_id: PortionId,
    pub portions: Vec<PortionMeta>,
}

impl PortionCatalog {
    pub fn capture<P: Pager>(
        set: &PortionSet<P>,
        schema: &EngineSchema,
        schema_bytes: &[u8],
        next_portion_id: PortionId,
    ) -> Self {
        Self {
            version: set.version(),
            schema_id: schema.schema_id(),
            schema_bytes: schema_bytes.to_vec(),
            key_columns: schema.key_column_names(),
            next_portion_id,
            portions: set.metas(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes)
            .map_err(|e| Error::Internal(format!("catalog decode failed: {e}")))
    }

    pub fn schema(&self) -> Result<SchemaRef> {
        let reader = StreamReader::try_new(Cursor::new(&self.schema_bytes), None)?;
        Ok(reader.schema())
    }

    /// Reject opening the catalog with a schema other than the one it was
    /// written with.
    pub fn check_compatible(&self, schema: &EngineSchema) -> Result<()> {
        let stored = self.schema()?;
        if stored.fields() != schema.user_schema().fields() {
            return Err(Error::schema_mismatch(format!(
                "catalog was written with columns {:?}",
                stored
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect::<Vec<_>>()
            )));
        }
        if self.key_columns != schema.key_column_names() {
            return Err(Error::schema_mismatch(format!(
                "catalog was written with key columns {:?}",
                self.key_columns
            )));
        }
        if self.schema_id != schema.schema_id() {
            return Err(Error::schema_mismatch(format!(
                "catalog schema version {} differs from {}",
                self.schema_id,
                schema.schema_id()
            )));
        }
        Ok(())
    }
}

/// Encode a schema as an Arrow IPC stream with no batches.
pub fn encode_schema(schema: &Schema) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut out, schema)?;
        writer.finish()?;
    }
    Ok(out)
}
