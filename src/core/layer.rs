use crate::domain::model::Step;
use crate::domain::ports::Storage;
use crate::utils::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Location of the layer journal inside the provisioned root.
pub const JOURNAL_PATH: &str = "/var/lib/envprov/layers.json";

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn base_digest(reference: &str) -> String {
    format!("sha256:{}", sha256_hex(format!("base:{}", reference).as_bytes()))
}

/// Chain id of a layer: parent digest, the step itself, and for copies the
/// bytes being copied, so an edited context file invalidates the layer.
pub fn chain_digest(parent: &str, step: &Step, content: Option<&[u8]>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(step)?);
    if let Some(content) = content {
        hasher.update(b"\n");
        hasher.update(sha256_hex(content).as_bytes());
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub index: usize,
    pub kind: String,
    pub digest: String,
    pub committed_at: DateTime<Utc>,
}

/// Record of the layers already applied to a root filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerJournal {
    pub base: String,
    pub layers: Vec<JournalEntry>,
}

impl LayerJournal {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            layers: Vec::new(),
        }
    }

    /// Load the journal for `base`. A journal written for another base is discarded.
    pub async fn load<S: Storage>(rootfs: &S, base: &str) -> Result<Self> {
        if !rootfs.exists(JOURNAL_PATH).await {
            return Ok(Self::new(base));
        }

        let data = rootfs
            .read_file(JOURNAL_PATH)
            .await
            .map_err(|e| ProvisionError::JournalError {
                message: format!("cannot read {}: {}", JOURNAL_PATH, e),
            })?;
        let journal: LayerJournal =
            serde_json::from_slice(&data).map_err(|e| ProvisionError::JournalError {
                message: format!("corrupt {}: {}", JOURNAL_PATH, e),
            })?;

        if journal.base != base {
            tracing::warn!(
                "Layer journal was written for base '{}', starting fresh for '{}'",
                journal.base,
                base
            );
            return Ok(Self::new(base));
        }

        Ok(journal)
    }

    pub async fn save<S: Storage>(&self, rootfs: &S) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        rootfs
            .write_file(JOURNAL_PATH, &data)
            .await
            .map_err(|e| ProvisionError::JournalError {
                message: format!("cannot write {}: {}", JOURNAL_PATH, e),
            })
    }

    pub fn is_committed(&self, index: usize, digest: &str) -> bool {
        self.layers
            .get(index)
            .map(|entry| entry.digest == digest)
            .unwrap_or(false)
    }

    /// Record layer `index`, dropping anything recorded after it.
    pub fn commit(&mut self, index: usize, step: &Step, digest: &str) {
        self.layers.truncate(index);
        self.layers.push(JournalEntry {
            index,
            kind: step.kind().to_string(),
            digest: digest.to_string(),
            committed_at: Utc::now(),
        });
    }
}
