//! Register, deregister, list and count the profiles of each revision.
//!
//! [Catalog] keeps one [Index](crate::index::Index) per revision, stored as a blob named after the
//! revision identifier in the configured partition. Indices are created on first registration.
//! Reading operations never create an index: a revision without one simply has no profiles.
//!
//! # Example
//!
//! ```rust,ignore
//! use pvc_index::catalog::{Catalog, Config};
//!
//! let catalog = Catalog::new(context, Config { partition: "indices".into() }, objects);
//! catalog.register(revision, "/tmp/sort.perf", checksum, time, &profile).await?;
//! for entry in catalog.list(revision).await? {
//!     println!("{entry}");
//! }
//! ```

mod storage;

use std::collections::BTreeMap;
pub use storage::Catalog;

/// Configuration for a [Catalog].
#[derive(Clone)]
pub struct Config {
    /// The [commonware_runtime::Storage] partition to store indices in.
    pub partition: String,
}

/// Number of profiles registered under a revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    /// Number of profiles declared by the index.
    pub all: u32,
    /// Number of profiles of each supported type (empty if the revision has no index).
    pub types: BTreeMap<&'static str, u32>,
}
