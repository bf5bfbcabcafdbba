use crate::config::{AppConfig, Concurrency, FeatureCatalog, FileExtension};
use crate::emotion::{DescriptorTable, EmotionScorer, ScoreMatrix};
use crate::features::{FeatureExtractor, FeatureSet, Recording, VarianceTable};
use crate::normalize::{normalize, NormalizedFeatureSet};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "pipeline";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot scan {path}: {reason}")]
    Scan { path: String, reason: String },
    #[error("no recordings produced features")]
    EmptyBatch,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub samples_dir: PathBuf,
    pub extension: FileExtension,
    pub recursive: bool,
    pub jobs: Concurrency,
    pub catalog: FeatureCatalog,
}

impl PipelineConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            samples_dir: app.samples_dir.clone(),
            extension: app.extension.clone(),
            recursive: app.recursive,
            jobs: app.jobs,
            catalog: app.catalog.clone(),
        }
    }
}

/// A sample the extractor could not process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub recording: String,
    pub reason: String,
}

/// Raw extraction results of one batch, sorted by recording identifier.
#[derive(Clone, Debug, Default)]
pub struct ExtractedBatch {
    pub features: FeatureSet,
    pub variance: Option<VarianceTable>,
    pub failures: Vec<ExtractionFailure>,
}

#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub raw: FeatureSet,
    pub normalized: NormalizedFeatureSet,
    pub scores: ScoreMatrix,
    pub failures: Vec<ExtractionFailure>,
}

/// Audio files under `dir` with the configured extension, sorted by path.
pub fn scan_samples(
    dir: &Path,
    extension: &FileExtension,
    recursive: bool,
) -> Result<Vec<PathBuf>, PipelineError> {
    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| PipelineError::Scan {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && extension.matches(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Identifier of a sample: its path relative to the scanned directory.
pub fn recording_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalizes and scores an already extracted batch.
pub fn score_batch(
    raw: &FeatureSet,
    table: &DescriptorTable,
    catalog: &FeatureCatalog,
    variance: Option<&VarianceTable>,
) -> Result<(NormalizedFeatureSet, ScoreMatrix), PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::EmptyBatch);
    }
    let normalized = normalize(raw, catalog.normalize_columns());
    if let Some(first) = normalized.recordings().first() {
        tracing::debug!(target: LOG_TARGET, recording = %first.id, features = ?first.features, "first normalized row");
    }
    let scores = EmotionScorer::new(table, catalog)
        .with_variance(variance)
        .score_all(&normalized);
    Ok((normalized, scores))
}

pub struct Pipeline<E> {
    pub extractor: E,
    pub config: PipelineConfig,
}

impl<E> Pipeline<E>
where
    E: FeatureExtractor,
{
    pub fn new(extractor: E, config: PipelineConfig) -> Self {
        Self { extractor, config }
    }

    /// Extracts every path with up to `jobs` extractions in flight. Failed
    /// samples are logged and excluded.
    pub async fn extract_all(&self, paths: Vec<PathBuf>) -> ExtractedBatch {
        let root = self.config.samples_dir.clone();
        let results: Vec<_> = stream::iter(paths)
            .map(|path| {
                let id = recording_id(&root, &path);
                async move { (id, self.extractor.extract(path).await) }
            })
            .buffer_unordered(self.config.jobs.jobs)
            .collect()
            .await;

        let mut recordings = Vec::with_capacity(results.len());
        let mut variance: Option<VarianceTable> = None;
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(extraction) => {
                    if let Some(v) = extraction.variance {
                        variance.get_or_insert_with(VarianceTable::new).insert(id.clone(), v);
                    }
                    tracing::debug!(target: LOG_TARGET, recording = %id, features = extraction.features.len(), "extracted");
                    recordings.push(Recording::new(id, extraction.features));
                }
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, recording = %id, error = %e, "extraction failed; sample excluded");
                    failures.push(ExtractionFailure {
                        recording: id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        failures.sort_by(|a, b| a.recording.cmp(&b.recording));

        ExtractedBatch {
            features: FeatureSet::new(recordings).sorted_by_id(),
            variance,
            failures,
        }
    }

    /// Scan, extract, normalize and score. A caller-supplied variance table
    /// takes precedence over one estimated by the extractor.
    pub async fn run(
        &self,
        table: &DescriptorTable,
        variance: Option<VarianceTable>,
    ) -> Result<BatchOutcome, PipelineError> {
        let paths = scan_samples(
            &self.config.samples_dir,
            &self.config.extension,
            self.config.recursive,
        )?;
        tracing::info!(
            target: LOG_TARGET,
            dir = %self.config.samples_dir.display(),
            extension = self.config.extension.as_str(),
            samples = paths.len(),
            "scanned sample directory"
        );

        let batch = self.extract_all(paths).await;
        tracing::info!(
            target: LOG_TARGET,
            extracted = batch.features.len(),
            failed = batch.failures.len(),
            "extraction finished"
        );
        if let Some(first) = batch.features.recordings().first() {
            tracing::debug!(target: LOG_TARGET, recording = %first.id, features = ?first.features, "first raw row");
        }

        let variance = variance.or(batch.variance);
        let (normalized, scores) =
            score_batch(&batch.features, table, &self.config.catalog, variance.as_ref())?;

        Ok(BatchOutcome {
            raw: batch.features,
            normalized,
            scores,
            failures: batch.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionBinding;
    use crate::emotion::EmotionRow;
    use crate::features::{ExtractError, Extraction, FeatureVector};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::BTreeMap;

    /// Serves canned pitch values keyed by file name; unknown files fail.
    struct CannedExtractor {
        pitches: BTreeMap<String, f64>,
        with_variance: bool,
    }

    impl CannedExtractor {
        fn new(pitches: &[(&str, f64)]) -> Self {
            Self {
                pitches: pitches.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
                with_variance: false,
            }
        }
    }

    impl FeatureExtractor for CannedExtractor {
        fn extract(&self, path: PathBuf) -> BoxFuture<'_, Result<Extraction, ExtractError>> {
            async move {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let pitch = self
                    .pitches
                    .get(&name)
                    .copied()
                    .ok_or_else(|| ExtractError::Task(format!("cannot read {name}")))?;
                Ok::<_, ExtractError>(Extraction {
                    features: FeatureVector::new().with_value("pitch", pitch),
                    variance: self
                        .with_variance
                        .then(|| FeatureVector::new().with_value("pitch", 0.9)),
                })
            }
            .boxed()
        }
    }

    fn catalog() -> FeatureCatalog {
        FeatureCatalog::new(
            vec!["pitch".to_owned()],
            vec!["pitch".to_owned()],
            vec![DimensionBinding {
                feature: "pitch".to_owned(),
                dimension: "Pitch".to_owned(),
            }],
        )
        .expect("catalog")
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            samples_dir: dir.to_path_buf(),
            extension: FileExtension::default(),
            recursive: false,
            jobs: Concurrency::new(2).expect("nonzero"),
            catalog: catalog(),
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").expect("touch");
    }

    #[test]
    fn scan_filters_by_extension_and_depth() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "b.ogg");
        touch(dir.path(), "a.OGG");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        touch(&dir.path().join("nested"), "c.ogg");

        let ext = FileExtension::default();
        let flat = scan_samples(dir.path(), &ext, false).expect("scan");
        let names: Vec<String> = flat.iter().map(|p| recording_id(dir.path(), p)).collect();
        assert_eq!(names, vec!["a.OGG", "b.ogg"]);

        let deep = scan_samples(dir.path(), &ext, true).expect("scan");
        let names: Vec<String> = deep.iter().map(|p| recording_id(dir.path(), p)).collect();
        assert_eq!(names, vec!["a.OGG", "b.ogg", "nested/c.ogg"]);
    }

    #[test]
    fn scan_of_missing_directory_fails() {
        let err = scan_samples(Path::new("/nonexistent/samples"), &FileExtension::default(), false)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Scan { .. }));
    }

    #[test]
    fn failed_samples_are_excluded_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["z.ogg", "a.ogg", "broken.ogg"] {
            touch(dir.path(), name);
        }
        let pipeline = Pipeline::new(
            CannedExtractor::new(&[("z.ogg", 200.0), ("a.ogg", 100.0)]),
            config(dir.path()),
        );
        let table = DescriptorTable::new(vec![EmotionRow::new("Joy").with_cell("Pitch", "high")])
            .expect("table");

        let outcome = futures::executor::block_on(pipeline.run(&table, None)).expect("outcome");
        let ids: Vec<&str> = outcome.raw.recordings().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a.ogg", "z.ogg"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].recording, "broken.ogg");
        assert_eq!(outcome.scores.score("a.ogg", "Joy"), Some(0.0));
        assert_eq!(outcome.scores.score("z.ogg", "Joy"), Some(10.0));
        assert_eq!(outcome.raw.recordings()[1].features.get("pitch"), Some(200.0));
    }

    #[test]
    fn batch_with_no_features_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "broken.ogg");
        let pipeline = Pipeline::new(CannedExtractor::new(&[]), config(dir.path()));
        let table = DescriptorTable::new(vec![EmotionRow::new("Joy").with_cell("Pitch", "high")])
            .expect("table");
        let err = futures::executor::block_on(pipeline.run(&table, None)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch));
    }

    #[test]
    fn estimated_variance_feeds_variable_descriptors() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "a.ogg");
        let mut extractor = CannedExtractor::new(&[("a.ogg", 120.0)]);
        extractor.with_variance = true;
        let pipeline = Pipeline::new(extractor, config(dir.path()));
        let table = DescriptorTable::new(vec![EmotionRow::new("Fear").with_cell("Pitch", "unstable")])
            .expect("table");

        let outcome = futures::executor::block_on(pipeline.run(&table, None)).expect("outcome");
        assert_eq!(outcome.scores.score("a.ogg", "Fear"), Some(9.0));

        let supplied: VarianceTable = [("a.ogg", FeatureVector::new().with_value("pitch", 0.2))]
            .into_iter()
            .collect();
        let outcome =
            futures::executor::block_on(pipeline.run(&table, Some(supplied))).expect("outcome");
        assert_eq!(outcome.scores.score("a.ogg", "Fear"), Some(2.0));
    }

    #[test]
    fn score_batch_rejects_empty_input() {
        let table = DescriptorTable::new(vec![EmotionRow::new("Joy").with_cell("Pitch", "high")])
            .expect("table");
        let err = score_batch(&FeatureSet::default(), &table, &catalog(), None).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch));
    }
}
