//! Records stored in an index and their two on-disk generations.

use super::Error;
use bytes::{Buf, BufMut};
use chrono::{DateTime, NaiveDateTime};
use commonware_utils::{from_hex, hex};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// Length of a [Checksum] in bytes.
pub const CHECKSUM_LENGTH: usize = 20;

/// Size of an encoded [Timestamp] in bytes.
const TIMESTAMP_LENGTH: usize = 4;

/// Size of the smallest possible record (timestamp, checksum and an empty path).
pub const MIN_ENTRY_SIZE: usize = TIMESTAMP_LENGTH + CHECKSUM_LENGTH + 1;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Encoding generation of a record, matching the format version that introduced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Generation {
    /// Timestamp, checksum and path only.
    Basic = 1,
    /// Basic fields followed by details of the profile.
    Extended = 2,
}

impl Generation {
    /// Map a format version to the generation of the records it contains.
    pub fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::Basic),
            2 => Some(Self::Extended),
            _ => None,
        }
    }

    /// The format version that introduced this generation.
    pub fn version(self) -> u32 {
        self as u32
    }

    /// The generation preceding this one, if any.
    pub fn previous(self) -> Option<Self> {
        Self::from_version(self.version() - 1)
    }
}

/// Content hash identifying where a profile is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; CHECKSUM_LENGTH]);

impl Checksum {
    pub const fn new(bytes: [u8; CHECKSUM_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LENGTH] {
        &self.0
    }
}

/// Returns whether `key` is shaped like a hex-encoded [Checksum].
pub fn is_checksum(key: &str) -> bool {
    key.len() == 2 * CHECKSUM_LENGTH
        && key
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        from_hex(s)
            .and_then(|bytes| bytes.try_into().ok())
            .map(Self)
            .ok_or_else(|| Error::InvalidChecksum(s.to_string()))
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// Modification time of a profile, in seconds since the Unix epoch.
///
/// Rendered (and parsed) as `YYYY-MM-DD HH:MM:SS` in UTC. The ordering of timestamps matches
/// the ordering of their rendered form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(u32);

impl Timestamp {
    pub const fn new(seconds: u32) -> Self {
        Self(seconds)
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let seconds = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))?
            .and_utc()
            .timestamp();
        u32::try_from(seconds)
            .map(Self)
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp(i64::from(self.0), 0) {
            Some(time) => write!(f, "{}", time.format(TIME_FORMAT)),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Fields shared by both record generations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Common {
    time: Timestamp,
    checksum: Checksum,
    path: String,
    offset: Option<u64>,
}

impl Common {
    /// Create the fields of a record that has not been placed in an index yet.
    ///
    /// Paths are terminated by a NUL byte on disk and therefore may not contain one.
    pub fn new(time: Timestamp, checksum: Checksum, path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if path.as_bytes().contains(&0) {
            return Err(Error::InvalidEntry("path contains NUL"));
        }
        Ok(Self {
            time,
            checksum,
            path,
            offset: None,
        })
    }

    /// Place the record at `offset`.
    pub fn at(self, offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..self
        }
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Byte position of the record within its index (`None` if it has not been placed).
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    fn encoded_size(&self) -> usize {
        TIMESTAMP_LENGTH + CHECKSUM_LENGTH + self.path.len() + 1
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.time.0);
        buf.put_slice(&self.checksum.0);
        buf.put_slice(self.path.as_bytes());
        buf.put_u8(0);
    }

    fn read(buf: &mut impl Buf, offset: u64) -> Result<Self, Error> {
        if buf.remaining() < MIN_ENTRY_SIZE {
            return Err(Error::EndOfBuffer);
        }
        let time = Timestamp(buf.get_u32_le());
        let mut checksum = [0u8; CHECKSUM_LENGTH];
        buf.copy_to_slice(&mut checksum);
        let mut path = Vec::new();
        loop {
            if !buf.has_remaining() {
                return Err(Error::EndOfBuffer);
            }
            match buf.get_u8() {
                0 => break,
                byte => path.push(byte),
            }
        }
        let path = String::from_utf8(path).map_err(|_| Error::InvalidEntry("path is not UTF-8"))?;
        Ok(Self {
            time,
            checksum: Checksum(checksum),
            path,
            offset: Some(offset),
        })
    }
}

/// Details of a profile stored inline by extended records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Details {
    profile_type: String,
    command: String,
    workload: String,
    collector: String,
    postprocessors: Vec<String>,
}

impl Details {
    pub fn new(
        profile_type: impl Into<String>,
        command: impl Into<String>,
        workload: impl Into<String>,
        collector: impl Into<String>,
        postprocessors: Vec<String>,
    ) -> Self {
        Self {
            profile_type: profile_type.into(),
            command: command.into(),
            workload: workload.into(),
            collector: collector.into(),
            postprocessors,
        }
    }

    pub fn profile_type(&self) -> &str {
        &self.profile_type
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn collector(&self) -> &str {
        &self.collector
    }

    pub fn postprocessors(&self) -> &[String] {
        &self.postprocessors
    }

    fn encoded_size(&self) -> usize {
        let strings = [
            &self.profile_type,
            &self.command,
            &self.workload,
            &self.collector,
        ]
        .into_iter()
        .chain(self.postprocessors.iter());
        strings.map(|s| 4 + s.len()).sum::<usize>() + 4
    }

    fn write(&self, buf: &mut impl BufMut) {
        write_string(buf, &self.profile_type);
        write_string(buf, &self.command);
        write_string(buf, &self.workload);
        write_string(buf, &self.collector);
        buf.put_u32_le(self.postprocessors.len() as u32);
        for postprocessor in &self.postprocessors {
            write_string(buf, postprocessor);
        }
    }

    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        let profile_type = read_string(buf)?;
        let command = read_string(buf)?;
        let workload = read_string(buf)?;
        let collector = read_string(buf)?;
        let count = read_u32(buf)?;

        // Each postprocessor needs at least its length prefix
        if buf.remaining() < count as usize * 4 {
            return Err(Error::EndOfBuffer);
        }
        let postprocessors = (0..count)
            .map(|_| read_string(buf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            profile_type,
            command,
            workload,
            collector,
            postprocessors,
        })
    }
}

fn write_string(buf: &mut impl BufMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn read_u32(buf: &mut impl Buf) -> Result<u32, Error> {
    if buf.remaining() < 4 {
        return Err(Error::EndOfBuffer);
    }
    Ok(buf.get_u32_le())
}

fn read_string(buf: &mut impl Buf) -> Result<String, Error> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut value = vec![0u8; len];
    buf.copy_to_slice(&mut value);
    String::from_utf8(value).map_err(|_| Error::InvalidEntry("string is not UTF-8"))
}

/// A record of an index.
///
/// Both variants share the [Common] prefix. Which variant is decoded depends only on the
/// [Generation] declared by the index being read, never on the content of a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Basic(Common),
    Extended(Common, Details),
}

impl Entry {
    pub fn common(&self) -> &Common {
        match self {
            Self::Basic(common) | Self::Extended(common, _) => common,
        }
    }

    pub fn details(&self) -> Option<&Details> {
        match self {
            Self::Basic(_) => None,
            Self::Extended(_, details) => Some(details),
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            Self::Basic(_) => Generation::Basic,
            Self::Extended(..) => Generation::Extended,
        }
    }

    pub fn time(&self) -> Timestamp {
        self.common().time
    }

    pub fn checksum(&self) -> &Checksum {
        &self.common().checksum
    }

    pub fn path(&self) -> &str {
        &self.common().path
    }

    pub fn offset(&self) -> Option<u64> {
        self.common().offset
    }

    /// Type of the profile, or `??` if this record does not know it.
    pub fn profile_type(&self) -> &str {
        self.details().map_or("??", Details::profile_type)
    }

    /// Convert into an extended record carrying `details`.
    pub fn extend(self, details: Details) -> Self {
        match self {
            Self::Basic(common) | Self::Extended(common, _) => Self::Extended(common, details),
        }
    }

    /// Number of bytes [Entry::write] emits.
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Basic(common) => common.encoded_size(),
            Self::Extended(common, details) => common.encoded_size() + details.encoded_size(),
        }
    }

    /// Serialize the record. The offset is positional and never written.
    pub fn write(&self, buf: &mut impl BufMut) {
        match self {
            Self::Basic(common) => common.write(buf),
            Self::Extended(common, details) => {
                common.write(buf);
                details.write(buf);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.write(&mut buf);
        buf
    }

    /// Deserialize a record of the given `generation` located at `offset`.
    pub fn read(buf: &mut impl Buf, generation: Generation, offset: u64) -> Result<Self, Error> {
        match generation {
            Generation::Basic => Ok(Self::Basic(Common::read(buf, offset)?)),
            Generation::Extended => {
                let common = Common::read(buf, offset)?;
                let details = Details::read(buf)?;
                Ok(Self::Extended(common, details))
            }
        }
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let common = self.common();
        let offset = common.offset.map_or(-1, |offset| offset as i64);
        write!(
            f,
            " @{} {} -> {} ({})",
            offset, common.path, common.checksum, common.time
        )?;
        if let Self::Extended(_, details) = self {
            write!(
                f,
                " {}; {} {}; {} {}",
                details.profile_type,
                details.command,
                details.workload,
                details.collector,
                details.postprocessors.join(" ")
            )?;
        }
        Ok(())
    }
}
