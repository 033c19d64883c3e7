use super::{Config, Counts};
use crate::{
    index::{Checksum, Common, Entry, Error, Index, Insertion, Key, Removal, Timestamp, VERSION},
    profile::{self, Objects, SUPPORTED_TYPES},
};
use commonware_runtime::{Metrics, Storage};
use futures::TryStreamExt;
use prometheus_client::metrics::counter::Counter;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// The profiles registered under each revision, one [Index] per revision.
pub struct Catalog<E: Storage + Metrics, O: Objects> {
    context: E,
    config: Config,
    objects: O,

    inserted: Counter,
    duplicates: Counter,
    removed: Counter,
    missing: Counter,
    upgraded: Counter,
}

impl<E: Storage + Metrics, O: Objects> Catalog<E, O> {
    /// Create a new [Catalog] storing indices in `config.partition`.
    pub fn new(context: E, config: Config, objects: O) -> Self {
        let inserted = Counter::default();
        let duplicates = Counter::default();
        let removed = Counter::default();
        let missing = Counter::default();
        let upgraded = Counter::default();
        context.register("inserted", "Number of profiles registered", inserted.clone());
        context.register(
            "duplicates",
            "Number of registrations skipped as already registered",
            duplicates.clone(),
        );
        context.register("removed", "Number of profiles deregistered", removed.clone());
        context.register(
            "missing",
            "Number of deregistration keys matching no profile",
            missing.clone(),
        );
        context.register("upgraded", "Number of legacy indices upgraded", upgraded.clone());

        Self {
            context,
            config,
            objects,
            inserted,
            duplicates,
            removed,
            missing,
            upgraded,
        }
    }

    /// Check whether an index exists for `revision` without creating one.
    pub async fn exists(&self, revision: &str) -> Result<bool, Error> {
        let names = match self.context.scan(&self.config.partition).await {
            Ok(names) => names,
            Err(commonware_runtime::Error::PartitionMissing(_)) => return Ok(false),
            Err(err) => return Err(Error::Runtime(err)),
        };
        Ok(names.iter().any(|name| name == revision.as_bytes()))
    }

    async fn open(&self, revision: &str) -> Result<Index<E::Blob, O>, Error> {
        Index::init(
            &self.context,
            &self.config.partition,
            revision.as_bytes(),
            self.objects.clone(),
        )
        .await
    }

    /// Open the index of `revision`, failing if it does not exist.
    async fn open_existing(&self, revision: &str) -> Result<Index<E::Blob, O>, Error> {
        if !self.exists(revision).await? {
            return Err(Error::IndexNotFound(revision.to_string()));
        }
        self.open(revision).await
    }

    /// Register the profile stored at `path` under `revision`.
    ///
    /// Only the file name of `path` is recorded, along with the modification `time` of the file and
    /// the `checksum` under which `profile` is stored. The index of `revision` is created if it does
    /// not exist yet.
    pub async fn register(
        &self,
        revision: &str,
        path: &str,
        checksum: Checksum,
        time: Timestamp,
        profile: &Value,
    ) -> Result<Insertion, Error> {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path);
        let details = profile::details(profile)?;
        let entry = Entry::Extended(Common::new(time, checksum, name)?, details);

        let mut index = self.open(revision).await?;
        let legacy = index.header().await?.version() < VERSION;
        let insertion = index.insert(entry).await?;
        match insertion {
            Insertion::Inserted(_) => {
                self.inserted.inc();
                if legacy {
                    self.upgraded.inc();
                }
            }
            Insertion::Duplicate => {
                self.duplicates.inc();
            }
        }
        Ok(insertion)
    }

    /// Deregister the profiles of `revision` matched by `keys`.
    ///
    /// Keys naming profiles that are not registered are reported in [Removal::missing].
    pub async fn deregister(&self, revision: &str, keys: &[Key]) -> Result<Removal, Error> {
        if keys.is_empty() {
            debug!(revision, "nothing to deregister");
            return Ok(Removal::default());
        }
        let mut index = self.open_existing(revision).await?;
        let legacy = index.header().await?.version() < VERSION;
        let removal = index.remove(keys).await?;
        self.removed.inc_by(removal.removed.len() as u64);
        self.missing.inc_by(removal.missing.len() as u64);
        if legacy && !removal.removed.is_empty() {
            self.upgraded.inc();
        }
        Ok(removal)
    }

    /// List the profiles registered under `revision`, ordered by path and then by time.
    ///
    /// A legacy index is upgraded to the current format once it has been read. A revision
    /// without an index has no profiles.
    pub async fn list(&self, revision: &str) -> Result<Vec<Entry>, Error> {
        if !self.exists(revision).await? {
            return Ok(Vec::new());
        }
        let mut index = self.open(revision).await?;
        let header = index.header().await?;
        let entries = index.entries().await?;
        if header.version() >= VERSION {
            return Ok(entries);
        }

        // Offsets change once records are extended, so read them back
        index.rewrite(&entries).await?;
        self.upgraded.inc();
        info!(
            revision,
            from = header.version(),
            to = VERSION,
            "upgraded index"
        );
        index.entries().await
    }

    /// Count the profiles registered under `revision`, overall and per supported profile type.
    ///
    /// The overall count is the one declared by the index.
    pub async fn count(&self, revision: &str) -> Result<Counts, Error> {
        let mut counts = Counts::default();
        if !self.exists(revision).await? {
            return Ok(counts);
        }
        let index = self.open(revision).await?;
        counts.all = index.header().await?.entries();
        counts.types = SUPPORTED_TYPES.iter().map(|ty| (*ty, 0)).collect();
        index
            .walk()
            .await?
            .try_for_each(|entry| {
                if let Some(count) = counts.types.get_mut(entry.profile_type()) {
                    *count += 1;
                }
                futures::future::ready(Ok(()))
            })
            .await?;
        Ok(counts)
    }

    /// Render the index of `revision` in a human-readable form.
    pub async fn dump(&self, revision: &str) -> Result<String, Error> {
        self.open_existing(revision).await?.dump().await
    }
}
