use crate::features::AnalysisParams;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

pub const DEFAULT_EXTENSION: &str = "ogg";
pub const DEFAULT_OUTPUT_FILE: &str = "acoustic_features.csv";
pub const DEFAULT_LABEL_COLUMN: &str = "Emotion";
pub const DEFAULT_JOBS: usize = 4;
pub const DEFAULT_PITCH_MIN_HZ: u32 = 55;
pub const DEFAULT_PITCH_MAX_HZ: u32 = 1000;
pub const ENV_SAMPLES_DIR: &str = "SOUNDCHECK_SAMPLES_DIR";
pub const ENV_EMOTION_TABLE: &str = "SOUNDCHECK_EMOTION_TABLE";
pub const ENV_OUTPUT: &str = "SOUNDCHECK_OUTPUT";

pub const PITCH_MEAN: &str = "F0semitoneFrom27.5Hz_sma3nz_amean";
pub const HNR_MEAN: &str = "HNRdBACF_sma3nz_amean";
pub const LOUDNESS_MEAN: &str = "loudness_sma3_amean";
pub const F1_MEAN: &str = "F1frequency_sma3nz_amean";
pub const JITTER_MEAN: &str = "jitterLocal_sma3nz_amean";
pub const SHIMMER_MEAN: &str = "shimmerLocaldB_sma3nz_amean";
pub const MFCC1_MEAN: &str = "mfcc1_sma3_amean";
pub const SPECTRAL_FLUX_MEAN: &str = "spectralFlux_sma3_amean";
pub const ZCR_MEAN: &str = "pcm_zcr_sma3_amean";
pub const PITCH_STDDEV_NORM: &str = "F0semitoneFrom27.5Hz_sma3nz_stddevNorm";
pub const LOCAL_DURATION_MEAN: &str = "localDuration_sma3_amean";

/// Feature identifiers paired with the descriptor table column they feed.
const EGEMAPS_DIMENSIONS: [(&str, &str); 11] = [
    (PITCH_MEAN, "Pitch"),
    (HNR_MEAN, "HNR"),
    (LOUDNESS_MEAN, "Loudness"),
    (F1_MEAN, "Formant Changes"),
    (JITTER_MEAN, "Jitter"),
    (SHIMMER_MEAN, "Shimmer"),
    (MFCC1_MEAN, "MFCCs"),
    (SPECTRAL_FLUX_MEAN, "Spectral Centroid"),
    (ZCR_MEAN, "ZCR"),
    (PITCH_STDDEV_NORM, "Pitch Variability"),
    (LOCAL_DURATION_MEAN, "Speech Rate"),
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("file extension must not be empty")]
    EmptyExtension,
    #[error("concurrency must be > 0")]
    ZeroConcurrency,
    #[error("label column must not be empty")]
    EmptyLabelColumn,
    #[error("feature catalog selects no features")]
    EmptyCatalog,
    #[error("feature `{0}` is listed more than once")]
    DuplicateFeature(String),
    #[error("feature `{0}` is not in the selected feature list")]
    UnknownFeature(String),
    #[error("feature `{0}` maps to an empty dimension name")]
    EmptyDimension(String),
    #[error("pitch range {min_hz}..{max_hz} Hz is empty")]
    InvalidPitchRange { min_hz: u32, max_hz: u32 },
    #[error("feature `{0}` is bound to a dimension but not normalized")]
    UnnormalizedDimension(String),
    #[error("missing required setting (pass it on the command line or set {0})")]
    Missing(&'static str),
    #[error("failed to read catalog {path}: {reason}")]
    CatalogIo { path: String, reason: String },
    #[error("invalid catalog json: {0}")]
    CatalogParse(String),
}

/// Audio file extension selected for a batch, stored without the leading dot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        let v = v.trim().trim_start_matches('.');
        if v.is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        Ok(Self(v.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.0))
    }
}

impl Default for FileExtension {
    fn default() -> Self {
        Self(DEFAULT_EXTENSION.to_owned())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concurrency {
    pub jobs: usize,
}

impl Concurrency {
    pub fn new(jobs: usize) -> Result<Self, ConfigError> {
        if jobs == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self { jobs })
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self { jobs: DEFAULT_JOBS }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionBinding {
    pub feature: String,
    pub dimension: String,
}

/// Immutable description of which features are extracted, which are
/// normalized, and which descriptor table column each one is scored against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawCatalog")]
pub struct FeatureCatalog {
    selected: Vec<String>,
    normalize: Vec<String>,
    dimensions: Vec<DimensionBinding>,
}

#[derive(Deserialize)]
struct RawCatalog {
    selected: Vec<String>,
    #[serde(default)]
    normalize: Option<Vec<String>>,
    dimensions: Vec<DimensionBinding>,
}

impl TryFrom<RawCatalog> for FeatureCatalog {
    type Error = ConfigError;

    fn try_from(raw: RawCatalog) -> Result<Self, Self::Error> {
        let normalize = raw.normalize.unwrap_or_else(|| raw.selected.clone());
        Self::new(raw.selected, normalize, raw.dimensions)
    }
}

impl FeatureCatalog {
    pub fn new(
        selected: Vec<String>,
        normalize: Vec<String>,
        dimensions: Vec<DimensionBinding>,
    ) -> Result<Self, ConfigError> {
        if selected.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        let known = unique_names(selected.iter())?;
        unique_names(normalize.iter())?;
        unique_names(dimensions.iter().map(|b| &b.feature))?;

        let referenced = normalize.iter().chain(dimensions.iter().map(|b| &b.feature));
        for name in referenced {
            if !known.contains(name.as_str()) {
                return Err(ConfigError::UnknownFeature(name.clone()));
            }
        }
        if let Some(b) = dimensions.iter().find(|b| b.dimension.trim().is_empty()) {
            return Err(ConfigError::EmptyDimension(b.feature.clone()));
        }
        // Scoring formulas expect values in [0, 1].
        if let Some(b) = dimensions.iter().find(|b| !normalize.contains(&b.feature)) {
            return Err(ConfigError::UnnormalizedDimension(b.feature.clone()));
        }

        Ok(Self {
            selected,
            normalize,
            dimensions,
        })
    }

    /// The eleven eGeMAPS functionals used by the reference descriptor table.
    pub fn egemaps() -> Self {
        let selected: Vec<String> = EGEMAPS_DIMENSIONS
            .iter()
            .map(|(f, _)| (*f).to_owned())
            .collect();
        Self {
            normalize: selected.clone(),
            selected,
            dimensions: EGEMAPS_DIMENSIONS
                .iter()
                .map(|(f, d)| DimensionBinding {
                    feature: (*f).to_owned(),
                    dimension: (*d).to_owned(),
                })
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::CatalogParse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn normalize_columns(&self) -> &[String] {
        &self.normalize
    }

    pub fn dimensions(&self) -> &[DimensionBinding] {
        &self.dimensions
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::egemaps()
    }
}

fn unique_names<'a>(names: impl Iterator<Item = &'a String>) -> Result<BTreeSet<&'a str>, ConfigError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::DuplicateFeature(name.clone()));
        }
    }
    Ok(seen)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum VarianceSource {
    #[default]
    Disabled,
    File(PathBuf),
    Estimated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub samples_dir: PathBuf,
    pub emotion_table: PathBuf,
    pub label_column: String,
    pub output: PathBuf,
    pub normalized_output: Option<PathBuf>,
    pub scores_output: Option<PathBuf>,
    pub extension: FileExtension,
    pub recursive: bool,
    pub jobs: Concurrency,
    pub variance: VarianceSource,
    pub catalog: FeatureCatalog,
    pub analysis: AnalysisParams,
}

pub fn validate_label_column(label: &str) -> Result<String, ConfigError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ConfigError::EmptyLabelColumn);
    }
    Ok(label.to_owned())
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_path(
    cli_value: Option<PathBuf>,
    env_key: &'static str,
    env: &impl Env,
) -> Result<PathBuf, ConfigError> {
    match cli_value {
        Some(p) => Ok(p),
        None => env
            .var(env_key)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing(env_key)),
    }
}

pub fn resolve_path_with_default(
    cli_value: Option<PathBuf>,
    env_key: &'static str,
    env: &impl Env,
    default: &str,
) -> PathBuf {
    resolve_path(cli_value, env_key, env).unwrap_or_else(|_| PathBuf::from(default))
}
