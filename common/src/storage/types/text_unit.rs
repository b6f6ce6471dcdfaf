use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Smallest addressable passage of scripture after normalization, usually a
/// single verse. Immutable once created; re-ingestion recreates units
/// wholesale rather than mutating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub collection: String,
    pub source_path: String,
    pub sequence_index: usize,
    pub raw_text: String,
    pub normalized_text: String,
    pub metadata: BTreeMap<String, String>,
}

impl TextUnit {
    pub fn new(
        collection: String,
        source_path: String,
        sequence_index: usize,
        raw_text: String,
        normalized_text: String,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let id = Self::derive_id(&collection, &source_path, sequence_index);
        Self {
            id,
            collection,
            source_path,
            sequence_index,
            raw_text,
            normalized_text,
            metadata,
        }
    }

    /// Identifier is a pure function of (collection, source file, position),
    /// so re-ingesting unchanged input yields identical ids.
    pub fn derive_id(collection: &str, source_path: &str, sequence_index: usize) -> String {
        let stem = Path::new(source_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_path);
        format!("{collection}:{stem}:{sequence_index}")
    }
}
