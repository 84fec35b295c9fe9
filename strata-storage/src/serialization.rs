//! Portion blob encoding.
//!
//! A portion blob is a 4-byte magic followed by a single Arrow IPC stream
//! holding the portion's record batch. The blob store is an external
//! collaborator, so the format only has to round-trip through this module;
//! the magic lets a reader reject bytes that were never written by it.

use std::io::Cursor;

use arrow::compute::concat_batches;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

use strata_result::{Error, Result};

const MAGIC: [u8; 4] = *b"STP1";

/// Encode `batch` into a self-describing blob.
pub fn encode_batch(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(MAGIC.len() + batch.get_array_memory_size());
    out.extend_from_slice(&MAGIC);
    {
        let mut writer = StreamWriter::try_new(&mut out, batch.schema_ref())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(out)
}

/// Decode a blob produced by [`encode_batch`].
pub fn decode_batch(bytes: &[u8]) -> Result<RecordBatch> {
    let payload = bytes
        .strip_prefix(&MAGIC[..])
        .ok_or_else(|| Error::Internal("portion blob has an unknown header".to_string()))?;

    let reader = StreamReader::try_new(Cursor::new(payload), None)?;
    let schema = reader.schema();
    let mut batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => Ok(batches.swap_remove(0)),
        _ => Ok(concat_batches(&schema, &batches)?),
    }
}
