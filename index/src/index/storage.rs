use super::{
    header::{self, Header, MAGIC, VERSION},
    walker, Entry, Error, Insertion, Key, Removal,
};
use crate::profile::Objects;
use bytes::Bytes;
use commonware_runtime::{Blob, Storage};
use futures::{pin_mut, Stream, StreamExt, TryStreamExt};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// An index of the profiles registered under one revision.
pub struct Index<B: Blob, O: Objects> {
    blob: B,
    size: u64,
    objects: O,
}

impl<B: Blob, O: Objects> Index<B, O> {
    /// Open the index stored in blob `name` of `partition`, creating an empty one if it does not
    /// exist yet.
    pub async fn init<E: Storage<Blob = B>>(
        context: &E,
        partition: &str,
        name: &[u8],
        objects: O,
    ) -> Result<Self, Error> {
        let (blob, size) = header::touch(context, partition, name).await?;
        Ok(Self {
            blob,
            size,
            objects,
        })
    }

    /// Size of the index in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, Error> {
        let len = end - start;
        let len = usize::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        let buf = self.blob.read_at(vec![0u8; len], start).await?;
        Ok(buf.as_ref().to_vec())
    }

    /// Read and validate the header of the index.
    pub async fn header(&self) -> Result<Header, Error> {
        if self.size < Header::SIZE as u64 {
            return Err(Error::MalformedIndex);
        }
        let buf = self.read_range(0, Header::SIZE as u64).await?;
        Header::read(&mut &buf[..])
    }

    /// Stream all records of the index in the order they are stored.
    ///
    /// Each call reads the index from the start. See [walker::walk] for the decoding rules.
    pub async fn walk(&self) -> Result<impl Stream<Item = Result<Entry, Error>> + '_, Error> {
        let buf = Bytes::from(self.read_range(0, self.size).await?);
        walker::walk(buf, &self.objects)
    }

    /// Collect all records of the index.
    pub async fn entries(&self) -> Result<Vec<Entry>, Error> {
        self.walk().await?.try_collect().await
    }

    /// Return the first record satisfying `predicate`, without decoding the records after it.
    ///
    /// `name` identifies what is being looked up in the returned [Error::EntryNotFound].
    pub async fn find_first(
        &self,
        predicate: impl Fn(&Entry) -> bool,
        name: &str,
    ) -> Result<Entry, Error> {
        let stream = self.walk().await?;
        pin_mut!(stream);
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if predicate(&entry) {
                return Ok(entry);
            }
        }
        Err(Error::EntryNotFound(name.to_string()))
    }

    /// Return all records satisfying `predicate`.
    pub async fn find_all(&self, predicate: impl Fn(&Entry) -> bool) -> Result<Vec<Entry>, Error> {
        self.walk()
            .await?
            .try_filter(|entry| futures::future::ready(predicate(entry)))
            .try_collect()
            .await
    }

    /// Check that the declared number of records matches the number of decodable records,
    /// returning the count.
    pub async fn verify(&self) -> Result<u32, Error> {
        let declared = self.header().await?.entries();
        let decoded = self
            .walk()
            .await?
            .try_fold(0u32, |count, _| async move { Ok::<_, Error>(count + 1) })
            .await?;
        if decoded != declared {
            return Err(Error::EntryCountMismatch { declared, decoded });
        }
        Ok(decoded)
    }

    /// Fill in the details of a basic record from the profile it points to.
    async fn extend(&self, entry: Entry) -> Result<Entry, Error> {
        match entry {
            Entry::Basic(_) => {
                let details = self.objects.details(entry.checksum()).await?;
                Ok(entry.extend(details))
            }
            extended => Ok(extended),
        }
    }

    /// Rewrite a legacy index in the current format (if it is not already).
    ///
    /// Returns whether the index was rewritten.
    pub async fn upgrade(&mut self) -> Result<bool, Error> {
        let header = self.header().await?;
        if header.version() >= VERSION {
            return Ok(false);
        }
        let entries = self.entries().await?;
        self.rewrite(&entries).await?;
        info!(
            from = header.version(),
            to = VERSION,
            entries = entries.len(),
            "upgraded index"
        );
        Ok(true)
    }

    /// Insert `entry` into the index, keeping records ordered by path and then by time.
    ///
    /// If `entry` carries an offset, it is written at that offset. Otherwise, it is written before
    /// the first record that does not precede it (or at the end of the index). If a record with the
    /// same path and time is already present, the index is left untouched and
    /// [Insertion::Duplicate] is returned.
    ///
    /// All bytes following the insertion point are preserved as they are. A legacy index is
    /// rewritten in the current format before the record is inserted.
    pub async fn insert(&mut self, entry: Entry) -> Result<Insertion, Error> {
        let key = (entry.path().to_string(), entry.time());
        let precedes = |existing: &Entry| (existing.path(), existing.time()) >= (&key.0[..], key.1);
        let duplicate = |existing: &Entry| existing.path() == key.0 && existing.time() == key.1;

        // Position the record
        let mut offset = entry.offset();
        if offset.is_none() || self.header().await?.version() < VERSION {
            match self.find_first(precedes, &key.0).await {
                Ok(existing) if duplicate(&existing) => {
                    warn!(path = %key.0, time = %key.1, "already registered");
                    return Ok(Insertion::Duplicate);
                }
                Ok(existing) => offset = existing.offset(),
                Err(Error::EntryNotFound(_)) => offset = None,
                Err(err) => return Err(err),
            }

            // Offsets of a legacy index are stale once it is rewritten
            if self.upgrade().await? {
                offset = match self.find_first(precedes, &key.0).await {
                    Ok(existing) => existing.offset(),
                    Err(Error::EntryNotFound(_)) => None,
                    Err(err) => return Err(err),
                };
            }
        }
        let offset = offset.unwrap_or(self.size);
        if offset < Header::SIZE as u64 || offset > self.size {
            return Err(Error::InvalidOffset(offset));
        }

        // Shift the tail of the index to make room for the record
        let entry = self.extend(entry).await?;
        let record = entry.encode();
        let record_len = record.len() as u64;
        let tail = self.read_range(offset, self.size).await?;
        self.blob.write_at(record, offset).await?;
        self.blob.write_at(tail, offset + record_len).await?;
        self.size += record_len;

        // Only account for the record once it has been written
        let count = header::patch_entry_count(&self.blob, |count| count.saturating_add(1)).await?;
        header::bump_version(&self.blob).await?;
        self.blob.sync().await?;
        debug!(path = entry.path(), offset, entries = count, "inserted entry");
        Ok(Insertion::Inserted(offset))
    }

    /// Remove the records matched by `keys`, walking the index once.
    ///
    /// Every record matched by at least one key is removed. Keys matching nothing are reported in
    /// [Removal::missing] and do not abort the removal. The remaining records are packed, in their
    /// original order, directly after the header.
    pub async fn remove(&mut self, keys: &[Key]) -> Result<Removal, Error> {
        let mut removal = Removal::default();
        if keys.is_empty() {
            debug!("nothing to remove");
            return Ok(removal);
        }

        // Match keys against records
        let entries = self.entries().await?;
        let mut removed = vec![false; entries.len()];
        for (i, key) in keys.iter().enumerate() {
            let progress = format!("{}/{}", i + 1, keys.len());
            let mut found = false;
            for (entry, removed) in entries.iter().zip(removed.iter_mut()) {
                if key.matches(entry) {
                    found = true;
                    *removed = true;
                    debug!(progress = %progress, path = entry.path(), "deregistered");
                }
            }
            if !found {
                warn!(progress = %progress, %key, "not found");
                removal.missing.push(key.clone());
            }
        }
        removal.removed = entries
            .iter()
            .zip(removed.iter())
            .filter_map(|(entry, removed)| removed.then(|| entry.clone()))
            .collect();
        if removal.removed.is_empty() {
            info!(missing = removal.missing.len(), "nothing to remove");
            return Ok(removal);
        }

        // Update the count before compacting the records
        let kept: Vec<&Entry> = entries
            .iter()
            .zip(removed.iter())
            .filter_map(|(entry, removed)| (!removed).then_some(entry))
            .collect();
        header::patch_entry_count(&self.blob, |_| kept.len() as u32).await?;
        let mut buf = Vec::with_capacity(kept.iter().map(|entry| entry.encoded_size()).sum());
        for entry in &kept {
            entry.write(&mut buf);
        }
        let end = Header::SIZE as u64 + buf.len() as u64;
        self.blob.write_at(buf, Header::SIZE as u64).await?;
        self.blob.resize(end).await?;
        self.size = end;
        header::bump_version(&self.blob).await?;
        self.blob.sync().await?;
        info!(
            removed = removal.removed.len(),
            missing = removal.missing.len(),
            "removal succeeded"
        );
        Ok(removal)
    }

    /// Replace the content of the index with `entries`, in the given order.
    ///
    /// Basic records are extended with the details of their profiles before being written.
    pub async fn rewrite(&mut self, entries: &[Entry]) -> Result<(), Error> {
        let count = u32::try_from(entries.len()).map_err(|_| Error::TooManyEntries(entries.len()))?;
        let mut buf = Vec::with_capacity(
            Header::SIZE + entries.iter().map(|entry| entry.encoded_size()).sum::<usize>(),
        );
        Header::new(count).write(&mut buf);
        for entry in entries {
            self.extend(entry.clone()).await?.write(&mut buf);
        }
        let end = buf.len() as u64;
        self.blob.resize(0).await?;
        self.blob.write_at(buf, 0).await?;
        self.blob.sync().await?;
        self.size = end;
        debug!(entries = count, "rewrote index");
        Ok(())
    }

    /// Render the header and every record of the index, one per line.
    pub async fn dump(&self) -> Result<String, Error> {
        let header = self.header().await?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}, index version {} with {} entries",
            String::from_utf8_lossy(&MAGIC),
            header.version(),
            header.entries()
        );
        for entry in self.entries().await? {
            let _ = writeln!(out, "{entry}");
        }
        Ok(out)
    }
}
