use serde::{Deserialize, Serialize};

use crate::types::CURRENT_SCHEMA_VERSION;

/// Limits and key-layout constants for the part ingestion path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_part_number: u32,
    pub max_part_size: u64,
    pub part_number_width: usize,
    pub shadow_bucket_prefix: String,
    pub overview_prefix: String,
    pub splitter: char,
    pub legacy_splitter: char,
    /// Shadow buckets below this schema version use `legacy_splitter`.
    pub splitter_schema_version: u32,
    pub overview_list_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_part_number: 10_000,
            max_part_size: 5_368_709_120,
            part_number_width: 5,
            shadow_bucket_prefix: "mpuShadowBucket".to_string(),
            overview_prefix: "overview".to_string(),
            splitter: '|',
            legacy_splitter: '.',
            splitter_schema_version: CURRENT_SCHEMA_VERSION,
            overview_list_limit: 2,
        }
    }
}

impl IngestConfig {
    pub fn splitter_for(&self, schema_version: u32) -> char {
        if schema_version < self.splitter_schema_version {
            self.legacy_splitter
        } else {
            self.splitter
        }
    }

    pub fn shadow_bucket_name(&self, bucket: &str) -> String {
        format!("{}{bucket}", self.shadow_bucket_prefix)
    }
}
