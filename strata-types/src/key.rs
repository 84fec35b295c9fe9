//! Primary-key values, row keys, and key ranges.

use bitcode::{Decode, Encode};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// A single primary-key column value.
///
/// Integer widths are widened (`Int8..Int64` → [`KeyValue::Int`],
/// `UInt8..UInt64` → [`KeyValue::UInt`]) so keys compare without caring about
/// the physical Arrow type. Within one engine every key position always holds
/// the same variant, so the derived cross-variant order is never consulted
/// for valid data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Utf8(String),
    Binary(Vec<u8>),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Bool(v) => write!(f, "{v}"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::UInt(v) => write!(f, "{v}"),
            KeyValue::Utf8(v) => write!(f, "{v:?}"),
            KeyValue::Binary(v) => {
                f.write_str("0x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(v as i64)
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        KeyValue::UInt(v)
    }
}

impl From<u32> for KeyValue {
    fn from(v: u32) -> Self {
        KeyValue::UInt(v as u64)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Utf8(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Utf8(v)
    }
}

impl From<Vec<u8>> for KeyValue {
    fn from(v: Vec<u8>) -> Self {
        KeyValue::Binary(v)
    }
}

/// Ordered tuple of primary-key column values.
///
/// Ordering is lexicographic over the components, which is what bounds
/// portions by range and orders merges.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct RowKey(pub Vec<KeyValue>);

impl RowKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Single-column key.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare `self` against `bound`, looking only at the first
    /// `bound.len()` components.
    ///
    /// A bound may name just a prefix of the key (e.g. `(tenant)` for a
    /// `(tenant, id)` key); every key sharing that prefix compares `Equal`.
    pub fn compare_prefix(&self, bound: &RowKey) -> Ordering {
        for (lhs, rhs) in self.0.iter().zip(bound.0.iter()) {
            match lhs.cmp(rhs) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        if self.0.len() < bound.0.len() {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, v) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

impl From<Vec<KeyValue>> for RowKey {
    fn from(values: Vec<KeyValue>) -> Self {
        RowKey(values)
    }
}

/// Key interval selected by a read. Bounds may be key prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<RowKey>,
    pub upper: Bound<RowKey>,
}

impl KeyRange {
    pub fn new(lower: Bound<RowKey>, upper: Bound<RowKey>) -> Self {
        Self { lower, upper }
    }

    /// Unbounded on both sides.
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Closed interval `[lower, upper]`.
    pub fn inclusive(lower: RowKey, upper: RowKey) -> Self {
        Self::new(Bound::Included(lower), Bound::Included(upper))
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(
            (&self.lower, &self.upper),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }

    /// Whether `key` falls inside the range.
    pub fn contains(&self, key: &RowKey) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }

    fn above_lower(&self, key: &RowKey) -> bool {
        match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(b) => key.compare_prefix(b) != Ordering::Less,
            Bound::Excluded(b) => key.compare_prefix(b) == Ordering::Greater,
        }
    }

    /// Whether `key` is not past the upper bound. Monotone in key order, so
    /// a scan over ascending keys can stop at the first `false`.
    pub fn below_upper(&self, key: &RowKey) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(b) => key.compare_prefix(b) != Ordering::Greater,
            Bound::Excluded(b) => key.compare_prefix(b) == Ordering::Less,
        }
    }

    /// Whether the closed interval `[min, max]` intersects the range.
    pub fn overlaps(&self, min: &RowKey, max: &RowKey) -> bool {
        self.below_upper(min) && self.above_lower(max)
    }

    /// Whether the closed interval `[min, max]` lies entirely inside the range.
    pub fn covers(&self, min: &RowKey, max: &RowKey) -> bool {
        self.above_lower(min) && self.below_upper(max)
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Whether two closed key intervals intersect.
#[inline]
pub fn intervals_overlap(a_min: &RowKey, a_max: &RowKey, b_min: &RowKey, b_max: &RowKey) -> bool {
    a_min <= b_max && b_min <= a_max
}
