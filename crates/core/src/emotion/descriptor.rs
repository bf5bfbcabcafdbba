use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

const LOG_TARGET: &str = "emotion::descriptor";

/// Intensity class a free-text descriptor falls into.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Bucket {
    High,
    Low,
    Moderate,
    Variable,
    Unmatched,
}

/// Buckets in match priority; the first one with a keyword inside the
/// descriptor wins.
const BUCKET_KEYWORDS: [(Bucket, &[&str]); 4] = [
    (
        Bucket::High,
        &["high", "raised", "sharp", "bright", "spike", "wide", "fast", "clear"],
    ),
    (
        Bucket::Low,
        &["low", "lowered", "dull", "flat", "narrow", "slow"],
    ),
    (
        Bucket::Moderate,
        &["moderate", "mid", "balanced", "moderately"],
    ),
    (
        Bucket::Variable,
        &["variable", "unstable", "shifting", "irregular"],
    ),
];

/// Substring keyword classification, case-insensitive.
pub fn classify(descriptor: &str) -> Bucket {
    let text = descriptor.to_lowercase();
    BUCKET_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(bucket, _)| *bucket)
        .unwrap_or(Bucket::Unmatched)
}

/// True for cells that carry no descriptor: blank or the literal "n/a".
pub fn is_not_applicable(descriptor: &str) -> bool {
    let text = descriptor.trim();
    text.is_empty() || text.eq_ignore_ascii_case("n/a")
}

#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("label column `{0}` not found in header")]
    MissingLabelColumn(String),

    #[error("emotion `{0}` appears more than once")]
    DuplicateEmotion(String),

    #[error("column `{0}` appears more than once")]
    DuplicateColumn(String),

    #[error("descriptor table has no emotion rows")]
    Empty,
}

/// One emotion and its descriptor per acoustic dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmotionRow {
    pub label: String,
    cells: BTreeMap<String, String>,
}

impl EmotionRow {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn with_cell(mut self, dimension: &str, descriptor: &str) -> Self {
        self.cells
            .insert(dimension.trim().to_owned(), descriptor.to_owned());
        self
    }

    pub fn descriptor(&self, dimension: &str) -> Option<&str> {
        self.cells.get(dimension).map(String::as_str)
    }
}

/// Human-authored emotion × dimension descriptor grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    dimensions: Vec<String>,
    rows: Vec<EmotionRow>,
}

impl DescriptorTable {
    pub fn new(rows: Vec<EmotionRow>) -> Result<Self, TableError> {
        if rows.is_empty() {
            return Err(TableError::Empty);
        }
        let mut seen = BTreeSet::new();
        let mut dimensions: Vec<String> = Vec::new();
        for row in &rows {
            if !seen.insert(row.label.as_str()) {
                return Err(TableError::DuplicateEmotion(row.label.clone()));
            }
            for dim in row.cells.keys() {
                if !dimensions.contains(dim) {
                    dimensions.push(dim.clone());
                }
            }
        }
        Ok(Self { dimensions, rows })
    }

    /// Reads a CSV table. Headers and cells are trimmed; rows with a blank
    /// label are skipped.
    pub fn from_reader<R: io::Read>(reader: R, label_column: &str) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_owned())
            .collect();
        let mut seen = BTreeSet::new();
        if let Some(dup) = headers.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(TableError::DuplicateColumn(dup.clone()));
        }
        let label_idx = headers
            .iter()
            .position(|h| h == label_column)
            .ok_or_else(|| TableError::MissingLabelColumn(label_column.to_owned()))?;

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let label = record.get(label_idx).unwrap_or_default();
            if label.is_empty() {
                tracing::warn!(target: LOG_TARGET, row = line + 1, "skipping row without emotion label");
                continue;
            }
            let row = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != label_idx)
                .fold(EmotionRow::new(label), |row, (i, header)| match record.get(i) {
                    Some(cell) => row.with_cell(header, cell),
                    None => row,
                });
            rows.push(row);
        }

        let mut table = Self::new(rows)?;
        // Header order, not first-seen order, for display.
        table.dimensions = headers
            .into_iter()
            .enumerate()
            .filter(|(i, h)| *i != label_idx && table.dimensions.contains(h))
            .map(|(_, h)| h)
            .collect();
        Ok(table)
    }

    pub fn load(path: &Path, label_column: &str) -> Result<Self, TableError> {
        let file = std::fs::File::open(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_reader(io::BufReader::new(file), label_column)?;
        tracing::debug!(
            target: LOG_TARGET,
            path = %path.display(),
            emotions = table.rows.len(),
            dimensions = table.dimensions.len(),
            "descriptor table loaded"
        );
        if let Some(first) = table.rows.first() {
            tracing::debug!(target: LOG_TARGET, emotion = %first.label, cells = ?first.cells, "first descriptor row");
        }
        Ok(table)
    }

    pub fn rows(&self) -> &[EmotionRow] {
        &self.rows
    }

    pub fn emotions(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.label.as_str())
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn descriptor(&self, emotion: &str, dimension: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.label == emotion)?
            .descriptor(dimension)
    }
}
