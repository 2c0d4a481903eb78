//! 📦 **Common store config**: the knobs every aggregate store backend shares.
//!
//! 🧠 Knowledge graph:
//! - Embedded in `AggregateStoreConfig::InMemory` directly and flattened into
//!   `FileAggregateStoreConfig`.
//! - `max_writes_per_batch`: the backend's per-commit write ceiling. Document
//!   databases tend to cap a batch at 500 writes, so that's what we emulate.
//!   The `BatchWriter` clamps its chunk size to this, never the other way around.
//!
//! "He who ignores the batch limit, learns about it in production." 🦆

use serde::Deserialize;

/// 📦 Shared configuration embedded by every aggregate store backend config.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CommonStoreConfig {
    /// 📦 Max writes accepted by one commit or one batch.
    #[serde(default = "default_max_writes_per_batch")]
    pub max_writes_per_batch: usize,
}

// 📦 500: the number every document store seems to agree on, like a secret handshake.
fn default_max_writes_per_batch() -> usize {
    500
}

impl Default for CommonStoreConfig {
    fn default() -> Self {
        Self { max_writes_per_batch: default_max_writes_per_batch() }
    }
}
