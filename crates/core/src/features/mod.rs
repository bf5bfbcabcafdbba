mod acoustic;
mod dsp;

use crate::decode::DecodeError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use acoustic::{AcousticExtractor, AnalysisParams};

/// Named scalar measurements for one recording. Absent names are missing
/// values; non-finite values are never stored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        if value.is_finite() {
            self.values.insert(name.to_owned(), value);
        } else {
            self.values.remove(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut v = Self::new();
        for (name, value) in iter {
            v.insert(name.as_ref(), value);
        }
        v
    }
}

/// Keeps only `selected` names from a raw extractor result. Names the
/// backend did not produce stay absent.
pub fn select_features(raw: &BTreeMap<String, f64>, selected: &[String]) -> FeatureVector {
    selected
        .iter()
        .filter_map(|name| raw.get(name).map(|v| (name.as_str(), *v)))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    pub id: String,
    pub features: FeatureVector,
}

impl Recording {
    pub fn new<S: Into<String>>(id: S, features: FeatureVector) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }
}

/// Recordings of one batch, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    recordings: Vec<Recording>,
}

impl FeatureSet {
    pub fn new(recordings: Vec<Recording>) -> Self {
        Self { recordings }
    }

    pub fn push(&mut self, recording: Recording) {
        self.recordings.push(recording);
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn get(&self, id: &str) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<f64>> + 'a {
        self.recordings.iter().map(move |r| r.features.get(name))
    }

    pub fn sorted_by_id(mut self) -> Self {
        self.recordings.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }
}

impl FromIterator<Recording> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Recording>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Per-recording instability measures, consulted for "variable" descriptors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarianceTable {
    rows: BTreeMap<String, FeatureVector>,
}

impl VarianceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, recording: S, values: FeatureVector) {
        self.rows.insert(recording.into(), values);
    }

    pub fn get(&self, recording: &str, feature: &str) -> Option<f64> {
        self.rows.get(recording)?.get(feature)
    }

    pub fn recordings(&self) -> impl Iterator<Item = (&str, &FeatureVector)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FeatureVector)> for VarianceTable {
    fn from_iter<I: IntoIterator<Item = (S, FeatureVector)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (recording, values) in iter {
            table.insert(recording, values);
        }
        table
    }
}

/// What an extractor yields for one audio file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub features: FeatureVector,
    pub variance: Option<FeatureVector>,
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("recording too short: {samples} samples, need at least {required}")]
    TooShort { samples: usize, required: usize },

    #[error("extraction task failed: {0}")]
    Task(String),
}

pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, path: PathBuf) -> BoxFuture<'_, Result<Extraction, ExtractError>>;
}
