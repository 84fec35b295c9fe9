//! Copy-on-write collection of live portions.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use strata_result::{Error, Result};
use strata_storage::pager::Pager;
use strata_types::{KeyRange, PortionId, RowKey};

use crate::portion::{Portion, PortionMeta};

/// Authoritative set of live portions at one version.
///
/// Instances are immutable once published: [`insert`](Self::insert) and
/// [`retire_and_replace`](Self::retire_and_replace) return a new set with a
/// higher version and leave `self` untouched, so readers holding an
/// `Arc<PortionSet>` keep a consistent point-in-time view.
pub struct PortionSet<P: Pager> {
    version: u64,
    portions: FxHashMap<PortionId, Arc<Portion<P>>>,
    by_key: BTreeSet<(RowKey, PortionId)>,
}

impl<P: Pager> Clone for PortionSet<P> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            portions: self.portions.clone(),
            by_key: self.by_key.clone(),
        }
    }
}

impl<P: Pager> Default for PortionSet<P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<P: Pager> PortionSet<P> {
    pub fn empty() -> Self {
        Self::with_version(0)
    }

    pub(crate) fn with_version(version: u64) -> Self {
        Self {
            version,
            portions: FxHashMap::default(),
            by_key: BTreeSet::new(),
        }
    }

    /// Rebuild a set from restored portions at a persisted version.
    pub(crate) fn from_portions(
        version: u64,
        portions: impl IntoIterator<Item = Arc<Portion<P>>>,
    ) -> Result<Self> {
        let mut set = Self::with_version(version);
        for portion in portions {
            set.add(portion)?;
        }
        Ok(set)
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.portions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portions.is_empty()
    }

    pub fn contains(&self, id: PortionId) -> bool {
        self.portions.contains_key(&id)
    }

    pub fn get(&self, id: PortionId) -> Option<&Arc<Portion<P>>> {
        self.portions.get(&id)
    }

    /// Portions ordered by `(min_key, portion_id)`.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Portion<P>>> + '_ {
        self.by_key.iter().map(move |(_, id)| &self.portions[id])
    }

    pub fn metas(&self) -> Vec<PortionMeta> {
        self.iter().map(|p| p.meta().clone()).collect()
    }

    pub fn total_rows(&self) -> u64 {
        self.portions.values().map(|p| p.meta().row_count).sum()
    }

    /// Portions whose key interval intersects `range`, in key order.
    ///
    /// The key index is walked by `min_key` and cut off at the range's upper
    /// bound; only the lower bound needs a per-portion check.
    pub fn overlapping<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = &'a Arc<Portion<P>>> + 'a {
        self.by_key
            .iter()
            .take_while(move |(min_key, _)| range.below_upper(min_key))
            .map(move |(_, id)| &self.portions[id])
            .filter(move |p| p.meta().overlaps_range(range))
    }

    /// New set containing `portion` as well.
    pub fn insert(&self, portion: Arc<Portion<P>>) -> Result<Self> {
        let mut next = self.clone();
        next.add(portion)?;
        next.version += 1;
        Ok(next)
    }

    /// New set with `old_ids` removed and `new_portions` added, atomically.
    ///
    /// Fails with `CompactionConflict` if any of `old_ids` is no longer live.
    pub fn retire_and_replace(
        &self,
        old_ids: &[PortionId],
        new_portions: &[Arc<Portion<P>>],
    ) -> Result<Self> {
        if let Some(missing) = old_ids.iter().find(|id| !self.contains(**id)) {
            return Err(Error::CompactionConflict(format!(
                "portion {missing} is no longer live at version {}",
                self.version
            )));
        }
        let mut next = self.clone();
        for id in old_ids {
            next.remove(*id);
        }
        for portion in new_portions {
            next.add(Arc::clone(portion))?;
        }
        next.version += 1;
        Ok(next)
    }

    fn add(&mut self, portion: Arc<Portion<P>>) -> Result<()> {
        let meta = portion.meta();
        let id = meta.portion_id;
        if self.portions.contains_key(&id) {
            return Err(Error::Internal(format!("portion {id} inserted twice")));
        }
        self.by_key.insert((meta.min_key.clone(), id));
        self.portions.insert(id, portion);
        Ok(())
    }

    fn remove(&mut self, id: PortionId) {
        if let Some(portion) = self.portions.remove(&id) {
            self.by_key.remove(&(portion.meta().min_key.clone(), id));
        }
    }
}
