//! Base nodes: compact, sorted snapshots that terminate a delta chain.

/// A sorted, immutable snapshot of a logical node's present entries.
///
/// Keys are strictly ascending (invariant I4), which is what makes
/// [`crate::search`]'s lower-bound search well-defined over
/// [`BaseNode::keys`].
#[derive(Debug, Clone, Default)]
pub struct BaseNode {
    keys: Vec<i64>,
    values: Vec<u64>,
}

impl BaseNode {
    /// Build a base node from entries already sorted by strictly ascending
    /// key. Debug builds assert the ordering; release builds trust the
    /// caller (the only caller is consolidation, which sorts just before
    /// this call).
    #[must_use]
    pub fn from_sorted(entries: Vec<(i64, u64)>) -> Self {
        debug_assert!(
            entries.windows(2).all(|w| w[0].0 < w[1].0),
            "BaseNode entries must be strictly ascending by key"
        );
        let mut keys = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            keys.push(k);
            values.push(v);
        }
        Self { keys, values }
    }

    /// An empty base node (a consolidation that dropped every key still
    /// installs one of these — the slot stays nonzero with a zero count).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the node holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The sorted key array, for search.
    #[must_use]
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// Look up `key` by SIMD-accelerated binary search, returning its
    /// value if present.
    #[must_use]
    pub fn get(&self, key: i64) -> Option<u64> {
        let idx = crate::search::lower_bound_vectorized(&self.keys, key);
        if idx < self.keys.len() && self.keys[idx] == key {
            Some(self.values[idx])
        } else {
            None
        }
    }

    /// Entries with `lo <= key < hi`, in ascending key order.
    #[must_use]
    pub fn range(&self, lo: i64, hi: i64) -> Vec<(i64, u64)> {
        let start = crate::search::lower_bound_vectorized(&self.keys, lo);
        let end = crate::search::lower_bound_vectorized(&self.keys, hi);
        self.keys[start..end]
            .iter()
            .zip(&self.values[start..end])
            .map(|(&k, &v)| (k, v))
            .collect()
    }

    /// All entries in ascending key order.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.keys.iter().copied().zip(self.values.iter().copied())
    }
}
