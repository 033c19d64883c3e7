//! Fixed-size prologue of an index and helpers to patch it in place.

use super::{Error, Generation};
use bytes::{Buf, BufMut};
use commonware_runtime::{Blob, Storage};
use tracing::debug;

/// Magic bytes identifying an index.
pub const MAGIC: [u8; 4] = *b"pidx";

/// Format version written by this crate.
pub const VERSION: u32 = Generation::Extended as u32;

/// Position of the format version within the header.
const VERSION_OFFSET: u64 = 4;

/// Position of the entry count within the header.
const COUNT_OFFSET: u64 = 8;

/// Prologue of an index.
///
/// ```text
/// +---+---+---+---+---+---+---+---+---+---+---+---+
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 |10 |11 |
/// +---+---+---+---+---+---+---+---+---+---+---+---+
/// |  "p i d x"    | Version (u32) | Entries (u32) |
/// +---+---+---+---+---+---+---+---+---+---+---+---+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    version: u32,
    entries: u32,
}

impl Header {
    /// Header size in bytes.
    pub const SIZE: usize = 12;

    /// Create a header of the current format version.
    pub fn new(entries: u32) -> Self {
        Self {
            version: VERSION,
            entries,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of records the index declares.
    pub fn entries(&self) -> u32 {
        self.entries
    }

    /// Generation of the records that follow this header.
    pub fn generation(&self) -> Generation {
        // Versions are validated when the header is read
        Generation::from_version(self.version).unwrap_or(Generation::Extended)
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.entries);
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        self.write(&mut &mut bytes[..]);
        bytes
    }

    /// Read and validate a header.
    pub fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::MalformedIndex);
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(Error::MalformedIndex);
        }
        let version = buf.get_u32_le();
        if version > VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        if Generation::from_version(version).is_none() {
            return Err(Error::MalformedIndex);
        }
        let entries = buf.get_u32_le();
        Ok(Self { version, entries })
    }
}

/// Open the blob `name` in `partition`, initializing it with an empty header if it does not exist
/// yet. Returns the blob and its length.
///
/// Calling this on an index that already exists does not modify it.
pub async fn touch<E: Storage>(
    context: &E,
    partition: &str,
    name: &[u8],
) -> Result<(E::Blob, u64), Error> {
    let (blob, len) = context.open(partition, name).await?;
    if len > 0 {
        return Ok((blob, len));
    }
    blob.write_at(Header::new(0).encode().to_vec(), 0).await?;
    blob.sync().await?;
    debug!(partition, "initialized index");
    Ok((blob, Header::SIZE as u64))
}

/// Replace the entry count of the index stored in `blob` with `modify(count)`, returning the new
/// count.
pub async fn patch_entry_count<B: Blob>(
    blob: &B,
    modify: impl FnOnce(u32) -> u32,
) -> Result<u32, Error> {
    let buf = blob.read_at(vec![0u8; 4], COUNT_OFFSET).await?;
    let mut bytes: &[u8] = buf.as_ref();
    let count = modify(bytes.get_u32_le());
    blob.write_at(count.to_le_bytes().to_vec(), COUNT_OFFSET)
        .await?;
    Ok(count)
}

/// Upgrade the declared format version of the index stored in `blob` to [VERSION].
pub async fn bump_version<B: Blob>(blob: &B) -> Result<(), Error> {
    blob.write_at(VERSION.to_le_bytes().to_vec(), VERSION_OFFSET)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    #[test]
    fn test_header_layout() {
        let header = Header::new(3);
        let bytes = header.encode();
        assert_eq!(&bytes, b"pidx\x02\x00\x00\x00\x03\x00\x00\x00");
        let parsed = Header::read(&mut &bytes[..]).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.generation(), Generation::Extended);
    }

    #[test]
    fn test_header_invalid() {
        let result = Header::read(&mut &b"xidx\x02\x00\x00\x00\x00\x00\x00\x00"[..]);
        assert!(matches!(result, Err(Error::MalformedIndex)));

        let result = Header::read(&mut &b"pidx\x02\x00"[..]);
        assert!(matches!(result, Err(Error::MalformedIndex)));

        let result = Header::read(&mut &b"pidx\x03\x00\x00\x00\x00\x00\x00\x00"[..]);
        assert!(matches!(result, Err(Error::UnsupportedVersion(3))));

        let result = Header::read(&mut &b"pidx\x00\x00\x00\x00\x00\x00\x00\x00"[..]);
        assert!(matches!(result, Err(Error::MalformedIndex)));
    }

    #[test]
    fn test_header_legacy() {
        let header = Header::read(&mut &b"pidx\x01\x00\x00\x00\x05\x00\x00\x00"[..]).unwrap();
        assert_eq!(header.version(), 1);
        assert_eq!(header.entries(), 5);
        assert_eq!(header.generation(), Generation::Basic);
    }

    #[test_traced]
    fn test_touch() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (blob, len) = touch(&context, "test", b"idx").await.unwrap();
            assert_eq!(len, Header::SIZE as u64);
            let buf = blob.read_at(vec![0u8; Header::SIZE], 0).await.unwrap();
            assert_eq!(buf.as_ref(), b"pidx\x02\x00\x00\x00\x00\x00\x00\x00");

            // Touching again leaves the index untouched
            patch_entry_count(&blob, |count| count + 4).await.unwrap();
            blob.sync().await.unwrap();
            let (blob, len) = touch(&context, "test", b"idx").await.unwrap();
            assert_eq!(len, Header::SIZE as u64);
            let buf = blob.read_at(vec![0u8; Header::SIZE], 0).await.unwrap();
            assert_eq!(buf.as_ref(), b"pidx\x02\x00\x00\x00\x04\x00\x00\x00");
        });
    }

    #[test_traced]
    fn test_patch_and_bump() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (blob, _) = context.open("test", b"legacy").await.unwrap();
            blob.write_at(b"pidx\x01\x00\x00\x00\x02\x00\x00\x00".to_vec(), 0)
                .await
                .unwrap();

            assert_eq!(patch_entry_count(&blob, |count| count + 1).await.unwrap(), 3);
            assert_eq!(patch_entry_count(&blob, |_| 1).await.unwrap(), 1);
            bump_version(&blob).await.unwrap();

            let buf = blob.read_at(vec![0u8; Header::SIZE], 0).await.unwrap();
            let header = Header::read(&mut buf.as_ref()).unwrap();
            assert_eq!(header, Header::new(1));
        });
    }
}
