//! Per-request resolution state.
//!
//! A [`QueryContext`] is created by `QueryCache::resolve` for exactly one
//! request and consumed by the completion step. It is never stored on the
//! cache and never reused, so nothing leaks from one query to the next.

use querycache_core::{FoundCountState, Namespace, QueryFingerprint, RecordId, WriteMode};

/// What the ID-list lookup returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdListLookup {
    /// No entry (or the lookup failed).
    #[default]
    Absent,
    /// An entry holding an empty list.
    Empty,
    /// An entry holding identifiers in result order.
    Ids(Vec<RecordId>),
}

impl IdListLookup {
    pub fn from_cached(cached: Option<Vec<RecordId>>) -> Self {
        match cached {
            None => Self::Absent,
            Some(ids) if ids.is_empty() => Self::Empty,
            Some(ids) => Self::Ids(ids),
        }
    }

    /// Presence for the consistency check. An empty list does not count.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Ids(_))
    }

    /// The cached list, if there is an entry at all.
    pub fn as_list(&self) -> Option<&[RecordId]> {
        match self {
            Self::Absent => None,
            Self::Empty => Some(&[]),
            Self::Ids(ids) => Some(ids),
        }
    }
}

/// What the found-count lookup returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FoundCountLookup {
    /// No entry (or the lookup failed).
    #[default]
    Absent,
    /// The entry was deliberately not read in this state.
    NotConsulted(FoundCountState),
    /// A cached total.
    Count(u64),
}

impl FoundCountLookup {
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Resolution state for one request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    fingerprint: QueryFingerprint,
    namespace: Option<Namespace>,
    state: FoundCountState,
    id_list: IdListLookup,
    found_count: FoundCountLookup,
    cached_ids: Vec<RecordId>,
    write_mode: WriteMode,
    bypassed: bool,
}

impl QueryContext {
    /// Build the context after both lookups ran under `namespace`.
    pub fn new(
        fingerprint: QueryFingerprint,
        namespace: Namespace,
        state: FoundCountState,
        id_list: IdListLookup,
        found_count: FoundCountLookup,
    ) -> Self {
        // The consistency check only applies when the count participates
        let write_mode = if state.consults_entry() {
            WriteMode::for_presence(id_list.is_present(), found_count.count().is_some())
        } else {
            WriteMode::InsertOnly
        };

        Self {
            fingerprint,
            namespace: Some(namespace),
            state,
            id_list,
            found_count,
            cached_ids: Vec::new(),
            write_mode,
            bypassed: false,
        }
    }

    /// A context whose namespace is unknown. Resolves as a miss and never
    /// writes back.
    pub fn detached(fingerprint: QueryFingerprint, state: FoundCountState) -> Self {
        Self {
            fingerprint,
            namespace: None,
            state,
            id_list: IdListLookup::Absent,
            found_count: FoundCountLookup::Absent,
            cached_ids: Vec::new(),
            write_mode: WriteMode::InsertOnly,
            bypassed: false,
        }
    }

    /// A context for a record kind that is never cached.
    pub fn bypassed(fingerprint: QueryFingerprint, state: FoundCountState) -> Self {
        Self {
            bypassed: true,
            ..Self::detached(fingerprint, state)
        }
    }

    /// Whether the lookups amount to a cache hit signal: a cached list, plus
    /// a cached count unless the count does not participate.
    pub fn is_cached(&self) -> bool {
        let count_ok = match self.found_count {
            FoundCountLookup::Count(_) | FoundCountLookup::NotConsulted(_) => true,
            FoundCountLookup::Absent => false,
        };
        count_ok && self.id_list.as_list().is_some()
    }

    /// Whether write-back may store entries for this request.
    pub fn writes_enabled(&self) -> bool {
        self.namespace.is_some() && !self.bypassed
    }

    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn found_count_state(&self) -> FoundCountState {
        self.state
    }

    pub fn id_list(&self) -> &IdListLookup {
        &self.id_list
    }

    pub fn found_count(&self) -> FoundCountLookup {
        self.found_count
    }

    /// Ids whose records were already in the record store.
    pub fn cached_ids(&self) -> &[RecordId] {
        &self.cached_ids
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub(crate) fn set_cached_ids(&mut self, ids: Vec<RecordId>) {
        self.cached_ids = ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycache_core::Generation;

    fn fp() -> QueryFingerprint {
        QueryFingerprint::from_representation("SELECT ids")
    }

    fn ns() -> Namespace {
        Namespace::new("querycache_", Generation(3))
    }

    #[test]
    fn test_id_list_lookup() {
        assert_eq!(IdListLookup::from_cached(None), IdListLookup::Absent);
        assert_eq!(IdListLookup::from_cached(Some(vec![])), IdListLookup::Empty);
        assert_eq!(
            IdListLookup::from_cached(Some(vec![4, 2])),
            IdListLookup::Ids(vec![4, 2])
        );

        assert!(!IdListLookup::Empty.is_present());
        assert_eq!(IdListLookup::Empty.as_list(), Some(&[][..]));
        assert_eq!(IdListLookup::Absent.as_list(), None);
    }

    #[test]
    fn test_full_pair_is_cached_insert_only() {
        let ctx = QueryContext::new(
            fp(),
            ns(),
            FoundCountState::Pending,
            IdListLookup::Ids(vec![1, 2]),
            FoundCountLookup::Count(20),
        );
        assert!(ctx.is_cached());
        assert_eq!(ctx.write_mode(), WriteMode::InsertOnly);
        assert!(ctx.writes_enabled());
    }

    #[test]
    fn test_half_primed_pair_overwrites() {
        let ids_only = QueryContext::new(
            fp(),
            ns(),
            FoundCountState::Pending,
            IdListLookup::Ids(vec![1, 2]),
            FoundCountLookup::Absent,
        );
        assert!(!ids_only.is_cached());
        assert_eq!(ids_only.write_mode(), WriteMode::Overwrite);

        let count_only = QueryContext::new(
            fp(),
            ns(),
            FoundCountState::Pending,
            IdListLookup::Absent,
            FoundCountLookup::Count(20),
        );
        assert!(!count_only.is_cached());
        assert_eq!(count_only.write_mode(), WriteMode::Overwrite);
    }

    #[test]
    fn test_empty_list_with_count_is_cached() {
        let ctx = QueryContext::new(
            fp(),
            ns(),
            FoundCountState::Pending,
            IdListLookup::Empty,
            FoundCountLookup::Count(0),
        );
        assert!(ctx.is_cached());
        // An empty list does not count as present, so the pair is inconsistent
        assert_eq!(ctx.write_mode(), WriteMode::Overwrite);
    }

    #[test]
    fn test_skip_states_rely_on_id_list_alone() {
        for state in [FoundCountState::Skip, FoundCountState::Unbounded] {
            let hit = QueryContext::new(
                fp(),
                ns(),
                state,
                IdListLookup::Ids(vec![9]),
                FoundCountLookup::NotConsulted(state),
            );
            assert!(hit.is_cached());
            assert_eq!(hit.write_mode(), WriteMode::InsertOnly);

            let miss = QueryContext::new(
                fp(),
                ns(),
                state,
                IdListLookup::Absent,
                FoundCountLookup::NotConsulted(state),
            );
            assert!(!miss.is_cached());
            assert_eq!(miss.write_mode(), WriteMode::InsertOnly);
        }
    }

    #[test]
    fn test_detached_and_bypassed_never_write() {
        let detached = QueryContext::detached(fp(), FoundCountState::Pending);
        assert!(!detached.is_cached());
        assert!(!detached.writes_enabled());
        assert!(!detached.is_bypassed());

        let bypassed = QueryContext::bypassed(fp(), FoundCountState::Pending);
        assert!(!bypassed.writes_enabled());
        assert!(bypassed.is_bypassed());
    }
}
