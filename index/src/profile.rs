//! Boundary to the content-addressed object store that holds profiles.
//!
//! Indices never store profiles themselves, only the [Checksum] under which a profile can be
//! found. When an index written in the legacy format is read, the details an extended entry carries
//! inline are recovered by resolving the checksum to a location and loading the profile document
//! found there through [Objects].

use crate::index::{Checksum, Details};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

/// Profile types tracked separately when counting the entries of an index.
pub const SUPPORTED_TYPES: [&str; 3] = ["memory", "mixed", "time"];

/// Errors that can occur when loading profiles from an object store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("profile missing: {0}")]
    Missing(String),
    #[error("invalid profile document: missing {0}")]
    InvalidDocument(&'static str),
}

/// A content-addressed store of profile documents.
pub trait Objects: Clone + Send + Sync + 'static {
    /// Resolve the storage location of the object identified by `checksum`.
    fn resolve(&self, checksum: &Checksum) -> String;

    /// Load the profile document stored at `location`.
    fn load(&self, location: &str) -> impl Future<Output = Result<Value, Error>> + Send;

    /// Load the profile identified by `checksum` and extract the [Details] an extended entry
    /// stores about it.
    fn details(&self, checksum: &Checksum) -> impl Future<Output = Result<Details, Error>> + Send {
        let location = self.resolve(checksum);
        async move {
            let document = self.load(&location).await?;
            details(&document)
        }
    }
}

/// Extract the [Details] of a profile from its document.
///
/// The `workload` of the profile header is optional (profiles collected before workloads were
/// tracked do not carry one) and defaults to an empty string.
pub fn details(document: &Value) -> Result<Details, Error> {
    let header = document
        .get("header")
        .ok_or(Error::InvalidDocument("header"))?;
    let profile_type = string(header, "type").ok_or(Error::InvalidDocument("header.type"))?;
    let command = string(header, "cmd").ok_or(Error::InvalidDocument("header.cmd"))?;
    let workload = string(header, "workload").unwrap_or_default();
    let collector = document
        .get("collector_info")
        .and_then(|info| string(info, "name"))
        .ok_or(Error::InvalidDocument("collector_info.name"))?;
    let postprocessors = match document.get("postprocessors") {
        Some(Value::Array(postprocessors)) => postprocessors
            .iter()
            .map(|postprocessor| {
                string(postprocessor, "name").ok_or(Error::InvalidDocument("postprocessors.name"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(Error::InvalidDocument("postprocessors")),
        None => Vec::new(),
    };
    Ok(Details::new(
        profile_type,
        command,
        workload,
        collector,
        postprocessors,
    ))
}

fn string(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}
