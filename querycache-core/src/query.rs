//! Query requests and the per-request protocol states derived from them.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Identifier of a record in the record store.
pub type RecordId = u64;

/// Marker trait for records that can flow through the cache.
///
/// `record_id()` must be unique within one query result.
pub trait CacheableRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the identifier of this record.
    fn record_id(&self) -> RecordId;
}

/// Caller intent that drives the found-count protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Page size. `None` means every match is returned in one go.
    pub limit: Option<u64>,
    /// The caller does not need the total match count.
    pub no_found_rows: bool,
}

impl QueryOptions {
    /// A paginated query that needs the total count.
    pub fn paginated(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            no_found_rows: false,
        }
    }

    /// A query that returns all matches.
    pub fn unbounded() -> Self {
        Self {
            limit: None,
            no_found_rows: false,
        }
    }

    /// Opt out of the total count.
    pub fn without_found_rows(mut self) -> Self {
        self.no_found_rows = true;
        self
    }
}

/// A list query as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Canonical query text (e.g. the generated SQL). Two requests with the
    /// same representation and kind share cache entries.
    pub representation: String,
    /// Record kind the query ranges over, if the host scopes by kind.
    pub kind: Option<String>,
    pub options: QueryOptions,
}

impl QueryRequest {
    pub fn new(representation: impl Into<String>, options: QueryOptions) -> Self {
        Self {
            representation: representation.into(),
            kind: None,
            options,
        }
    }

    /// Scope the request to a record kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn found_count_state(&self) -> FoundCountState {
        FoundCountState::from_options(&self.options)
    }
}

/// Found-count protocol state for one request.
///
/// Decided once from the caller's options before resolution and never
/// changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FoundCountState {
    /// A count is needed and not yet known.
    #[default]
    Pending,
    /// The caller does not need a count; the found-count entry is neither
    /// read nor written.
    Skip,
    /// No limit was requested; the count is the length of the result.
    Unbounded,
}

impl FoundCountState {
    /// Derive the state from caller options. An explicit opt-out wins over
    /// the absence of a limit.
    pub fn from_options(options: &QueryOptions) -> Self {
        if options.no_found_rows {
            Self::Skip
        } else if options.limit.is_none() {
            Self::Unbounded
        } else {
            Self::Pending
        }
    }

    /// Whether the found-count entry takes part in reads and writes.
    pub fn consults_entry(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// The count reported to the caller once the ordered result is known.
    pub fn reported_count(&self, cached: Option<u64>, result_len: usize) -> Option<u64> {
        match self {
            Self::Pending => cached,
            Self::Skip => None,
            Self::Unbounded => Some(result_len as u64),
        }
    }
}

/// How write-back stores entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    /// Write only if the key holds no value.
    #[default]
    InsertOnly,
    /// Replace any existing value.
    Overwrite,
}

impl WriteMode {
    /// Pick the write mode from the presence of the two entries.
    ///
    /// A half-primed pair (exactly one entry present) must be overwritten.
    pub fn for_presence(id_list_present: bool, found_count_present: bool) -> Self {
        if id_list_present ^ found_count_present {
            Self::Overwrite
        } else {
            Self::InsertOnly
        }
    }
}
