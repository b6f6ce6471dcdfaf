use std::{collections::BTreeMap, path::Path};

use serde::Serialize;
use tracing::info;

use common::error::AppError;

use crate::loader::{load_source_file, CorpusLoader};

/// Per-corpus validation summary produced by `validate_corpus`.
#[derive(Debug, Default, Serialize)]
pub struct CorpusReport {
    pub collections: BTreeMap<String, CollectionReport>,
}

#[derive(Debug, Default, Serialize)]
pub struct CollectionReport {
    pub valid_files: usize,
    pub unit_count: usize,
    pub malformed: Vec<MalformedFile>,
}

#[derive(Debug, Serialize)]
pub struct MalformedFile {
    pub path: String,
    pub reason: String,
}

impl CorpusReport {
    pub fn total_units(&self) -> usize {
        self.collections.values().map(|c| c.unit_count).sum()
    }

    pub fn valid_files(&self) -> usize {
        self.collections.values().map(|c| c.valid_files).sum()
    }

    pub fn malformed_files(&self) -> usize {
        self.collections.values().map(|c| c.malformed.len()).sum()
    }
}

/// Walks every collection and reports which source files parse cleanly.
/// Exercises the loader only; no cache or index state is touched.
pub fn validate_corpus(data_dir: &Path) -> Result<CorpusReport, AppError> {
    let loader = CorpusLoader::new(data_dir);
    let mut report = CorpusReport::default();

    for collection in loader.collections()? {
        let mut collection_report = CollectionReport::default();
        for path in loader.source_files(&collection)? {
            match load_source_file(&path, &collection) {
                Ok(units) => {
                    collection_report.valid_files += 1;
                    collection_report.unit_count += units.len();
                }
                Err(err) => collection_report.malformed.push(MalformedFile {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                }),
            }
        }
        report.collections.insert(collection, collection_report);
    }

    info!(
        collections = report.collections.len(),
        units = report.total_units(),
        malformed = report.malformed_files(),
        "validated corpus"
    );
    Ok(report)
}
