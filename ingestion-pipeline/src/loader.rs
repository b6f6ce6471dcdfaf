use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use common::{error::AppError, storage::types::text_unit::TextUnit};

/// Field names probed, in order, for a verse object's primary text.
const TEXT_FIELDS: [&str; 7] = [
    "text",
    "english",
    "translation",
    "meaning",
    "hindi",
    "sanskrit",
    "verse",
];

/// Reads collection directories of verse files into normalized text units.
///
/// The loader is a pure read: it never touches cache or index state, and
/// loading the same unchanged collection twice produces byte-identical units
/// with identical ids.
pub struct CorpusLoader {
    data_dir: PathBuf,
}

impl CorpusLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Collection directories under the data dir, lexicographically ordered.
    pub fn collections(&self) -> Result<Vec<String>, AppError> {
        if !self.data_dir.is_dir() {
            return Err(AppError::CollectionNotFound(
                self.data_dir.display().to_string(),
            ));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn load_all(&self) -> Result<Vec<TextUnit>, AppError> {
        let mut units = Vec::new();
        for collection in self.collections()? {
            units.extend(self.load_collection(&collection)?);
        }
        Ok(units)
    }

    /// Loads one collection directory. Files that fail to parse are logged
    /// and skipped so a single bad file never sinks the whole collection.
    pub fn load_collection(&self, collection_name: &str) -> Result<Vec<TextUnit>, AppError> {
        let mut units = Vec::new();
        for path in self.source_files(collection_name)? {
            match load_source_file(&path, collection_name) {
                Ok(mut file_units) => units.append(&mut file_units),
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping malformed source file");
                }
            }
        }
        debug!(
            collection = %canonical_collection_name(collection_name),
            units = units.len(),
            "loaded collection"
        );
        Ok(units)
    }

    /// JSON source files of a collection, lexicographically ordered so that
    /// sequence indexes are stable across runs.
    pub fn source_files(&self, collection_name: &str) -> Result<Vec<PathBuf>, AppError> {
        let dir = self.data_dir.join(collection_name);
        if !dir.is_dir() {
            return Err(AppError::CollectionNotFound(collection_name.to_owned()));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Parses a single verse file into text units. Returns `MalformedSource`
/// when the file as a whole cannot be used; individual verses without a
/// usable text field are skipped with a warning instead.
pub fn load_source_file(path: &Path, collection_dir: &str) -> Result<Vec<TextUnit>, AppError> {
    let source_path = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|e| AppError::MalformedSource {
        path: source_path.clone(),
        reason: e.to_string(),
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| AppError::MalformedSource {
        path: source_path.clone(),
        reason: e.to_string(),
    })?;

    let verses = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        other => {
            return Err(AppError::MalformedSource {
                path: source_path,
                reason: format!("expected a verse object or array, got {}", json_kind(&other)),
            })
        }
    };

    let collection = canonical_collection_name(collection_dir);
    let display = display_collection_name(collection_dir);

    let mut units = Vec::new();
    for (index, verse) in verses.iter().enumerate() {
        let Some(raw_text) = extract_text(verse) else {
            warn!(
                path = %source_path,
                index,
                "verse has no usable text field; skipping"
            );
            continue;
        };
        let normalized = normalize_text(&raw_text);
        if normalized.is_empty() {
            continue;
        }
        let mut metadata = scalar_metadata(verse);
        metadata.insert("collection_display".to_owned(), display.clone());
        units.push(TextUnit::new(
            collection.clone(),
            source_path.clone(),
            index,
            raw_text,
            normalized,
            metadata,
        ));
    }
    Ok(units)
}

/// Strips markup, applies Unicode NFC, and collapses runs of whitespace to
/// single spaces. Deterministic: downstream cache keys hash this output.
pub fn normalize_text(raw: &str) -> String {
    let stripped = strip_markup(raw);
    let composed: String = stripped.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps a source directory or file name onto its canonical collection name.
pub fn canonical_collection_name(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.contains("ramcharitmanas") || lower.contains("ramcharit") {
        "ramcharitmanas".to_owned()
    } else if lower.contains("valmiki") {
        "valmiki_ramayana".to_owned()
    } else if lower.contains("bhagavad") || lower.contains("gita") {
        "bhagavad_gita".to_owned()
    } else if lower.contains("ramayana") {
        "ramayana".to_owned()
    } else if lower.contains("mahabharata") {
        "mahabharata".to_owned()
    } else {
        "other_texts".to_owned()
    }
}

pub fn display_collection_name(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.contains("ramcharitmanas") || lower.contains("ramcharit") {
        "Ramcharitmanas".to_owned()
    } else if lower.contains("valmiki") {
        "Valmiki Ramayana".to_owned()
    } else if lower.contains("bhagavad") || lower.contains("gita") {
        "Bhagavad Gita".to_owned()
    } else if lower.contains("ramayana") {
        "Ramayana".to_owned()
    } else if lower.contains("mahabharata") {
        "Mahabharata".to_owned()
    } else {
        "Other Texts".to_owned()
    }
}

fn extract_text(verse: &Value) -> Option<String> {
    match verse {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Object(map) => TEXT_FIELDS.iter().find_map(|field| match map.get(*field) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        }),
        _ => None,
    }
}

fn scalar_metadata(verse: &Value) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Value::Object(map) = verse {
        for (key, value) in map {
            let rendered = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => continue,
            };
            metadata.insert(key.clone(), rendered);
        }
    }
    metadata
}

fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
