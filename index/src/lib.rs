//! Track performance profiles registered under each revision of a repository.
//!
//! Profiles themselves live in a content-addressed object store (see [profile::Objects]). For every
//! revision, a compact binary [index::Index] records which profiles were registered, under which
//! path and when, along with enough of each profile's details to answer common queries without
//! loading it. [catalog::Catalog] exposes the operations higher layers need (register, deregister,
//! list, count and dump) on top of one index per revision. [custom::Store] persists arbitrary
//! auxiliary mappings as compressed JSON.
//!
//! # Status
//!
//! `pvc-index` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod catalog;
pub mod custom;
pub mod index;
pub mod profile;
