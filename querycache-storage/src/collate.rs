//! Ordered reassembly of cached and freshly fetched records.

use std::collections::HashMap;

use querycache_core::{CacheableRecord, RecordId};

/// The authoritative result order for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdOrder {
    ids: Vec<RecordId>,
    positions: HashMap<RecordId, usize>,
}

impl IdOrder {
    /// Order taken from a cached ID list.
    pub fn new(ids: Vec<RecordId>) -> Self {
        let mut positions = HashMap::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            // A repeated id keeps its first position
            positions.entry(*id).or_insert(pos);
        }
        Self { ids, positions }
    }

    /// Order taken from the rows the source returned on a miss.
    pub fn from_records<R: CacheableRecord>(records: &[R]) -> Self {
        Self::new(records.iter().map(CacheableRecord::record_id).collect())
    }

    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<RecordId> {
        self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Merge `cached` and `fresh` into `order`.
///
/// Records whose id is not in `order` are dropped. When both inputs carry the
/// same id, the cached record is kept. Ids with no record leave no gap.
pub fn collate<R: CacheableRecord>(order: &IdOrder, cached: Vec<R>, fresh: Vec<R>) -> Vec<R> {
    let mut slots: Vec<Option<R>> = (0..order.len()).map(|_| None).collect();

    for record in fresh.into_iter().chain(cached) {
        if let Some(pos) = order.position(record.record_id()) {
            slots[pos] = Some(record);
        }
    }

    slots.into_iter().flatten().collect()
}
