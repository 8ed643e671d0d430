//! Invalidation scopes and host events.
//!
//! Invalidation never deletes entries. It bumps the domain's generation so
//! every later lookup lands in a new, empty namespace. An
//! [`InvalidationScope`] lives for one unit of work (one host request, one
//! bulk job) and keeps that unit from bumping more often than it has to.

use querycache_core::{Generation, RecordId};

/// Per-unit-of-work flush state.
///
/// After a flush, further flushes in the same scope are collapsed until the
/// scope writes to the cache again. While suppressed, flushes are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationScope {
    suppressed: bool,
    flushed: bool,
}

impl InvalidationScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn flushing off (`true`) or back on (`false`).
    pub fn suppress(&mut self, suppressed: bool) {
        self.suppressed = suppressed;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Whether a flush already happened with no cache write since.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Record a cache write; the next flush bumps again.
    pub fn mark_written(&mut self) {
        self.flushed = false;
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.flushed = true;
    }
}

/// Data-change notifications a host can forward to `QueryCache::handle_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// A record was created, updated or deleted.
    RecordChanged { id: RecordId },
    /// A taxonomy term or other shared classifier changed.
    TermChanged,
    /// Metadata attached to a record was added, updated or deleted.
    MetadataChanged { id: RecordId },
    /// A bulk count recalculation is starting; flushes are held off.
    CountUpdateStarted,
    /// The bulk count recalculation finished; flushes resume.
    CountUpdateFinished,
}

impl InvalidationEvent {
    pub fn record_changed(id: RecordId) -> Self {
        Self::RecordChanged { id }
    }

    pub fn metadata_changed(id: RecordId) -> Self {
        Self::MetadataChanged { id }
    }

    /// Whether the event asks for a flush, as opposed to toggling suppression.
    pub fn flushes(&self) -> bool {
        !matches!(self, Self::CountUpdateStarted | Self::CountUpdateFinished)
    }
}

/// Result of an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// The generation moved; the new value is attached.
    Bumped(Generation),
    /// The scope is suppressed; nothing happened.
    Suppressed,
    /// The scope already flushed and has not written since.
    Collapsed,
    /// The event only toggled suppression.
    SuppressionChanged { suppressed: bool },
}

impl InvalidationOutcome {
    pub fn bumped(&self) -> bool {
        matches!(self, Self::Bumped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_lifecycle() {
        let mut scope = InvalidationScope::new();
        assert!(!scope.is_suppressed());
        assert!(!scope.is_flushed());

        scope.mark_flushed();
        assert!(scope.is_flushed());
        scope.mark_written();
        assert!(!scope.is_flushed());

        scope.suppress(true);
        assert!(scope.is_suppressed());
        scope.suppress(false);
        assert!(!scope.is_suppressed());
    }

    #[test]
    fn test_event_flushes() {
        assert!(InvalidationEvent::record_changed(1).flushes());
        assert!(InvalidationEvent::metadata_changed(1).flushes());
        assert!(InvalidationEvent::TermChanged.flushes());
        assert!(!InvalidationEvent::CountUpdateStarted.flushes());
        assert!(!InvalidationEvent::CountUpdateFinished.flushes());
    }

    #[test]
    fn test_record_changed_event() {
        match InvalidationEvent::record_changed(42) {
            InvalidationEvent::RecordChanged { id } => assert_eq!(id, 42),
            other => panic!("Expected RecordChanged event, got {:?}", other),
        }
    }
}
