use super::{Config, Error};
use commonware_runtime::{Blob, Storage};
use serde_json::{Map, Value};
use tracing::debug;
use zstd::{bulk::compress, decode_all};

/// Auxiliary mappings stored as compressed JSON, one blob per mapping.
pub struct Store<E: Storage> {
    context: E,
    config: Config,
}

impl<E: Storage> Store<E> {
    pub fn new(context: E, config: Config) -> Self {
        Self { context, config }
    }

    async fn exists(&self, name: &str) -> Result<bool, Error> {
        let names = match self.context.scan(&self.config.partition).await {
            Ok(names) => names,
            Err(commonware_runtime::Error::PartitionMissing(_)) => return Ok(false),
            Err(err) => return Err(Error::Runtime(err)),
        };
        Ok(names.iter().any(|stored| stored == name.as_bytes()))
    }

    /// Load the mapping stored under `name`.
    ///
    /// A mapping that does not exist yet is initialized to (and returned as) an empty object. A
    /// mapping that cannot be decompressed or parsed is returned as an empty object.
    pub async fn load(&self, name: &str) -> Result<Value, Error> {
        let empty = Value::Object(Map::new());
        if !self.exists(name).await? {
            self.save(name, &empty).await?;
            return Ok(empty);
        }

        // Read the compressed document
        let (blob, len) = self.context.open(&self.config.partition, name.as_bytes()).await?;
        let len = usize::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        let buf = blob.read_at(vec![0u8; len], 0).await?;

        // Fall back to an empty mapping on corruption
        let decompressed = match decode_all(buf.as_ref()) {
            Ok(decompressed) => decompressed,
            Err(err) => {
                debug!(name, len, ?err, "unable to decompress mapping");
                return Ok(empty);
            }
        };
        match serde_json::from_slice(&decompressed) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(name, len, ?err, "unable to parse mapping");
                Ok(empty)
            }
        }
    }

    /// Store `value` under `name`, replacing any previous mapping.
    pub async fn save(&self, name: &str, value: &Value) -> Result<(), Error> {
        let encoded = serde_json::to_vec(value)?;
        let compressed = compress(&encoded, self.config.compression as i32)
            .map_err(|_| Error::CompressionFailed)?;
        let (blob, _) = self.context.open(&self.config.partition, name.as_bytes()).await?;
        blob.resize(0).await?;
        blob.write_at(compressed, 0).await?;
        blob.sync().await?;
        debug!(name, "saved mapping");
        Ok(())
    }
}
