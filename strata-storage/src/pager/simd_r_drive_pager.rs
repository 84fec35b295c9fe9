//! Durable pager backed by `simd_r_drive::DataStore`.
//!
//! - One append-only backing file; blobs are addressed by their physical key
//!   used directly as the store's key hash.
//! - Reads hand out `EntryHandle`s that borrow the memory-mapped file.
//! - The key allocator is seeded by scanning live entries once on open.

use super::{BatchGet, BatchPut, GetResult, Pager};
use crate::constants::CATALOG_ROOT_PKEY;
use crate::types::PhysicalKey;

use simd_r_drive::{
    DataStore,
    traits::{DataStoreReader, DataStoreWriter},
};
use simd_r_drive_entry_handle::EntryHandle;
use strata_result::{Error, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

fn store_error(op: &str, err: impl fmt::Display) -> Error {
    Error::Io(std::io::Error::other(format!("DataStore {op} failed: {err}")))
}

pub struct SimdRDrivePager {
    ds: DataStore,
    path: PathBuf,
    next_key: AtomicU64,
}

impl fmt::Debug for SimdRDrivePager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimdRDrivePager")
            .field("path", &self.path)
            .field("next_key", &self.next_key.load(Ordering::Relaxed))
            .finish()
    }
}

impl SimdRDrivePager {
    /// Open (or create) the datastore file at `path`.
    ///
    /// Allocation resumes after the largest live key, and never below the
    /// reserved catalog root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ds = DataStore::open(&path).map_err(|e| store_error("open", e))?;

        let max_key = ds
            .iter_entries()
            .map(|entry| entry.key_hash())
            .fold(CATALOG_ROOT_PKEY, PhysicalKey::max);
        tracing::debug!(
            "[PAGER] opened datastore at {} (next key {})",
            path.display(),
            max_key.saturating_add(1)
        );

        Ok(Self {
            ds,
            path,
            next_key: AtomicU64::new(max_key.saturating_add(1)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Expose the underlying DataStore if callers need advanced ops.
    pub fn datastore(&self) -> &DataStore {
        &self.ds
    }
}

impl Pager for SimdRDrivePager {
    type Blob = EntryHandle;

    fn alloc_many(&self, n: usize) -> Result<Vec<PhysicalKey>> {
        let n = u64::try_from(n)
            .map_err(|_| Error::Internal("alloc_many: n does not fit in u64".into()))?;
        let start = self
            .next_key
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| cur.checked_add(n))
            .map_err(|_| Error::Internal("physical key space overflow".into()))?;
        Ok((start..start + n).collect())
    }

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        let mut out = Vec::with_capacity(gets.len());
        for g in gets {
            match *g {
                BatchGet::Raw { key } => match self
                    .ds
                    .read_with_key_hash(key)
                    .map_err(|e| store_error("read", e))?
                {
                    Some(bytes) => out.push(GetResult::Raw { key, bytes }),
                    None => out.push(GetResult::Missing { key }),
                },
            }
        }
        Ok(out)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        let mut entries: Vec<(u64, &[u8])> = Vec::with_capacity(puts.len());
        for p in puts {
            match p {
                BatchPut::Raw { key, bytes } => {
                    // The store treats an empty payload as a deletion marker.
                    if bytes.is_empty() {
                        return Err(Error::InvalidArgumentError(format!(
                            "empty payload for key {key}"
                        )));
                    }
                    entries.push((*key, bytes.as_slice()));
                }
            }
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.ds
            .batch_write_with_key_hashes(entries, false)
            .map_err(|e| store_error("write", e))?;
        Ok(())
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.ds
            .batch_delete_key_hashes(keys)
            .map_err(|e| store_error("delete", e))?;
        Ok(())
    }

    fn enumerate_keys(&self) -> Result<Vec<PhysicalKey>> {
        let mut keys: Vec<PhysicalKey> = self
            .ds
            .iter_entries()
            .map(|entry| entry.key_hash())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_allocates_after_catalog_root() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let pager = SimdRDrivePager::open(tmp.path().join("strata.bin")).expect("open");
        let keys = pager.alloc_many(2).expect("alloc");
        assert_eq!(keys, vec![CATALOG_ROOT_PKEY + 1, CATALOG_ROOT_PKEY + 2]);
        assert!(pager.enumerate_keys().expect("enumerate").is_empty());
    }

    #[test]
    fn empty_payloads_are_rejected() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let pager = SimdRDrivePager::open(tmp.path().join("strata.bin")).expect("open");
        let err = pager
            .batch_put(&[BatchPut::Raw {
                key: 7,
                bytes: Vec::new(),
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)));
    }
}
