//! A per-revision catalogue of profiles stored in a compact binary format.
//!
//! [Index] records, for every profile registered under a revision, the [Checksum] locating the
//! profile in the object store along with enough details (type, command, workload, collector and
//! postprocessors) to answer common queries without loading the profile itself.
//!
//! # Format
//!
//! All integers are little-endian. An index starts with a 12-byte [Header] followed by `Entries`
//! records stored back-to-back:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 |10 |11 |12 |       ...         |   |   |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |  "p i d x"    | Version (u32) | Entries (u32) | Record1 | Record2 |   ...     |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! Records come in two generations. Version 1 indices hold basic records:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 2 | 3 | 4 |    ...    |23 |24 |    ...    | n |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |  Time (u32)   |  Checksum (20B)   |   Path    | 0 |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! Version 2 indices hold extended records: a basic record followed by the profile type, command,
//! workload and collector (each a string prefixed by its length as a u32) and the list of
//! postprocessors (a u32 count followed by that many length-prefixed strings).
//!
//! # Ordering
//!
//! Records are ordered by path and then by time. [Index::insert] keeps this order by writing new
//! records in front of the first record that does not precede them, shifting (but never
//! re-encoding) the records that follow.
//!
//! # Legacy Indices
//!
//! Basic records of a version 1 index are upgraded to extended records while being read by loading
//! the details of each profile from the [Objects](crate::profile::Objects) store. Any write to a
//! version 1 index first rewrites it in the current format, so the declared version always matches
//! the encoding of the records.
//!
//! # Consistency
//!
//! The entry count declared by the header should always match the number of decodable records. A
//! mismatch is logged (and reported by [Index::verify]) but reads proceed with whatever records
//! could be decoded. Mutations are not atomic: a crash between writing records and updating the
//! header can leave the declared count lower than the number of records written.

mod entry;
pub mod header;
mod storage;
pub mod walker;

pub use entry::{
    is_checksum, Checksum, Common, Details, Entry, Generation, Timestamp, CHECKSUM_LENGTH,
    MIN_ENTRY_SIZE,
};
pub use header::{Header, MAGIC, VERSION};
pub use storage::Index;

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Errors that can occur when interacting with an [Index].
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("profile error: {0}")]
    Profile(#[from] crate::profile::Error),
    #[error("malformed index: not an index file")]
    MalformedIndex,
    #[error("unsupported index version: {0} (supported: {VERSION})")]
    UnsupportedVersion(u32),
    #[error("entry count mismatch: declared {declared}, decoded {decoded}")]
    EntryCountMismatch { declared: u32, decoded: u32 },
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("invalid entry: {0}")]
    InvalidEntry(&'static str),
    #[error("invalid offset: {0}")]
    InvalidOffset(u64),
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("blob too large: {0}")]
    BlobTooLarge(u64),
    #[error("too many entries: {0}")]
    TooManyEntries(usize),
}

/// Identifies records to remove from an [Index].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    /// Matches records pointing to the profile with this checksum.
    Checksum(Checksum),
    /// Matches records registered under this path.
    Path(String),
}

impl Key {
    /// Returns whether `entry` is matched by this key.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::Checksum(checksum) => entry.checksum() == checksum,
            Self::Path(path) => entry.path() == path,
        }
    }
}

impl From<&str> for Key {
    /// Keys shaped like a hex-encoded checksum match checksums, anything else matches paths.
    fn from(key: &str) -> Self {
        if is_checksum(key) {
            if let Ok(checksum) = key.parse() {
                return Self::Checksum(checksum);
            }
        }
        Self::Path(key.to_string())
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum(checksum) => write!(f, "{checksum}"),
            Self::Path(path) => write!(f, "{path}"),
        }
    }
}

/// Outcome of [Index::insert].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    /// The record was written at this offset.
    Inserted(u64),
    /// A record with the same path and time was already registered.
    Duplicate,
}

/// Outcome of [Index::remove].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Records that were removed, in the order they were stored.
    pub removed: Vec<Entry>,
    /// Keys that did not match any record.
    pub missing: Vec<Key>,
}
