use super::{Entry, Error, Generation, Header, MIN_ENTRY_SIZE};
use crate::profile::Objects;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tracing::warn;

/// Position of the walk within an index.
struct Cursor<'a, O: Objects> {
    buf: Bytes,
    position: usize,
    generation: Generation,
    declared: u32,
    decoded: u32,
    failed: bool,
    objects: &'a O,
}

/// Decode the records of the index contained in `buf`, in the order they are stored.
///
/// The header is validated before the stream is returned. Records are then decoded lazily until
/// either the declared number of records has been produced or too few bytes remain to hold another
/// record. If the number of decoded records differs from the declared count, a warning is logged
/// and the stream ends normally (callers needing the strict count must check it themselves).
///
/// Records of a legacy index are upgraded to [Entry::Extended] by loading the details of each
/// profile from `objects`. The first record that fails to decode ends the stream with an error.
pub fn walk<O: Objects>(
    buf: Bytes,
    objects: &O,
) -> Result<impl Stream<Item = Result<Entry, Error>> + '_, Error> {
    let header = Header::read(&mut &buf[..])?;
    let cursor = Cursor {
        buf,
        position: Header::SIZE,
        generation: header.generation(),
        declared: header.entries(),
        decoded: 0,
        failed: false,
        objects,
    };
    Ok(stream::unfold(cursor, |mut cursor| async move {
        if cursor.failed {
            return None;
        }
        let remaining = cursor.buf.len() - cursor.position;
        if remaining < MIN_ENTRY_SIZE || cursor.decoded >= cursor.declared {
            if cursor.decoded != cursor.declared {
                warn!(
                    declared = cursor.declared,
                    decoded = cursor.decoded,
                    "malformed index: too many or too few entries registered"
                );
            }
            return None;
        }

        // Decode the next record
        let offset = cursor.position;
        let mut reader = &cursor.buf[offset..];
        let entry = Entry::read(&mut reader, cursor.generation, offset as u64);
        cursor.position = cursor.buf.len() - reader.len();
        let entry = match entry {
            Ok(basic @ Entry::Basic(_)) => {
                let details = cursor.objects.details(basic.checksum()).await;
                details
                    .map(|details| basic.extend(details))
                    .map_err(Error::Profile)
            }
            entry => entry,
        };
        match entry {
            Ok(_) => cursor.decoded += 1,
            Err(_) => cursor.failed = true,
        }
        Some((entry, cursor))
    }))
}
