use crate::codec::{hex_to_bin, target_from_hex};
use crate::error::Result;
use serde::Deserialize;
use serde_json::Value;

/// Byte offset of the 4-byte little-endian nonce inside a job blob.
pub const NONCE_OFFSET: usize = 39;
pub const NONCE_SIZE: usize = 4;

const DEFAULT_FIELD: &str = "0";

fn default_field() -> String {
    DEFAULT_FIELD.to_string()
}

/// Job fields as they appear on the wire, in `result.job` or pushed `params`.
#[derive(Debug, Deserialize)]
struct JobFields {
    #[serde(default = "default_field")]
    blob: String,
    #[serde(default = "default_field")]
    target: String,
    #[serde(default = "default_field")]
    job_id: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    seed_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub blob: Vec<u8>,
    pub target: u32,
    pub job_id: String,
    pub miner_id: String,
    /// RandomX key for this job, when the pool sends one.
    pub seed: Option<Vec<u8>>,
}

impl Job {
    /// Decodes a job object. `fallback_miner_id` is used when the object has
    /// no `id` of its own.
    pub fn from_value(value: &Value, fallback_miner_id: Option<&str>) -> Result<Self> {
        let fields = JobFields::deserialize(value)?;
        let miner_id = fields
            .id
            .or_else(|| fallback_miner_id.map(str::to_string))
            .unwrap_or_else(default_field);
        let seed = match fields.seed_hash.as_deref() {
            Some(seed) if !seed.is_empty() => Some(hex_to_bin(seed)?),
            _ => None,
        };
        Ok(Job {
            blob: hex_to_bin(&fields.blob)?,
            target: target_from_hex(&fields.target)?,
            job_id: fields.job_id,
            miner_id,
            seed,
        })
    }

    /// The nonce currently embedded in the blob, if the blob is long enough
    /// to carry one.
    pub fn nonce(&self) -> Option<[u8; NONCE_SIZE]> {
        self.blob
            .get(NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
    }
}
