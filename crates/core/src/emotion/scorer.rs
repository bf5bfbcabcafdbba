use super::descriptor::{classify, is_not_applicable, Bucket, DescriptorTable, EmotionRow};
use crate::config::{DimensionBinding, FeatureCatalog};
use crate::features::{Recording, VarianceTable};
use crate::normalize::NormalizedFeatureSet;
use serde::Serialize;
use std::fmt::Write as _;

const LOG_TARGET: &str = "emotion::scorer";
/// Contribution of "variable" descriptors without a variance measure, and of
/// descriptors that match no bucket.
pub const NEUTRAL_CONTRIBUTION: f64 = 0.5;
pub const SCORE_SCALE: f64 = 10.0;

/// One (feature, emotion) term of a score.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Contribution {
    pub feature: String,
    pub dimension: String,
    pub bucket: Bucket,
    pub value: f64,
}

/// How much a normalized `value` agrees with a descriptor in `bucket`.
pub fn contribution(bucket: Bucket, value: f64, variance: Option<f64>) -> f64 {
    match bucket {
        Bucket::High => value,
        Bucket::Low => 1.0 - value,
        Bucket::Moderate => 1.0 - (value - 0.5).abs(),
        Bucket::Variable => variance.map_or(NEUTRAL_CONTRIBUTION, |v| v.clamp(0.0, 1.0)),
        Bucket::Unmatched => NEUTRAL_CONTRIBUTION,
    }
}

/// Mean contribution on the 0–10 scale, rounded to two decimals; 0 when
/// nothing contributed.
pub fn final_score<I: IntoIterator<Item = f64>>(contributions: I) -> f64 {
    let (sum, count) = contributions
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return 0.0;
    }
    round2(sum / count as f64 * SCORE_SCALE)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// Scores of one recording, aligned with [`ScoreMatrix::emotions`].
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoreRow {
    pub recording: String,
    pub scores: Vec<f64>,
}

/// Recording × emotion scores; rows sorted by recording identifier.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoreMatrix {
    emotions: Vec<String>,
    rows: Vec<ScoreRow>,
}

impl ScoreMatrix {
    pub fn new(emotions: Vec<String>, mut rows: Vec<ScoreRow>) -> Self {
        rows.sort_by(|a, b| a.recording.cmp(&b.recording));
        Self { emotions, rows }
    }

    pub fn emotions(&self) -> &[String] {
        &self.emotions
    }

    pub fn rows(&self) -> &[ScoreRow] {
        &self.rows
    }

    pub fn score(&self, recording: &str, emotion: &str) -> Option<f64> {
        let col = self.emotions.iter().position(|e| e == emotion)?;
        let row = self.rows.iter().find(|r| r.recording == recording)?;
        row.scores.get(col).copied()
    }

    /// Plain-text table with a `filename` column followed by one column per
    /// emotion.
    pub fn render_table(&self) -> String {
        let name_width = self
            .rows
            .iter()
            .map(|r| r.recording.len())
            .chain(std::iter::once("filename".len()))
            .max()
            .unwrap_or(0);
        let widths: Vec<usize> = self.emotions.iter().map(|e| e.len().max(6)).collect();

        let mut out = String::new();
        let _ = write!(out, "{:<name_width$}", "filename");
        for (e, w) in self.emotions.iter().zip(&widths) {
            let _ = write!(out, "  {e:>w$}");
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "{:<name_width$}", row.recording);
            for (s, w) in row.scores.iter().zip(&widths) {
                let _ = write!(out, "  {s:>w$.2}");
            }
            out.push('\n');
        }
        out
    }
}

/// Rule evaluation of normalized features against a descriptor table.
/// Holds only shared references; scoring never mutates its inputs.
#[derive(Clone, Copy, Debug)]
pub struct EmotionScorer<'a> {
    table: &'a DescriptorTable,
    bindings: &'a [DimensionBinding],
    variance: Option<&'a VarianceTable>,
}

impl<'a> EmotionScorer<'a> {
    pub fn new(table: &'a DescriptorTable, catalog: &'a FeatureCatalog) -> Self {
        Self {
            table,
            bindings: catalog.dimensions(),
            variance: None,
        }
    }

    pub fn with_variance(mut self, variance: Option<&'a VarianceTable>) -> Self {
        self.variance = variance;
        self
    }

    /// Every term that counts toward `recording`'s score for `emotion`.
    pub fn contributions(&self, recording: &Recording, emotion: &EmotionRow) -> Vec<Contribution> {
        self.bindings
            .iter()
            .filter_map(|binding| {
                let value = recording.features.get(&binding.feature)?;
                let descriptor = emotion.descriptor(&binding.dimension)?;
                if is_not_applicable(descriptor) {
                    return None;
                }
                let bucket = classify(descriptor);
                let variance = match bucket {
                    Bucket::Variable => self
                        .variance
                        .and_then(|t| t.get(&recording.id, &binding.feature)),
                    _ => None,
                };
                Some(Contribution {
                    feature: binding.feature.clone(),
                    dimension: binding.dimension.clone(),
                    bucket,
                    value: contribution(bucket, value, variance),
                })
            })
            .collect()
    }

    pub fn score(&self, recording: &Recording, emotion: &EmotionRow) -> f64 {
        let terms = self.contributions(recording, emotion);
        for t in &terms {
            tracing::trace!(
                target: LOG_TARGET,
                recording = %recording.id,
                emotion = %emotion.label,
                feature = %t.feature,
                bucket = ?t.bucket,
                value = t.value,
                "contribution"
            );
        }
        final_score(terms.iter().map(|t| t.value))
    }

    pub fn score_recording(&self, recording: &Recording) -> ScoreRow {
        ScoreRow {
            recording: recording.id.clone(),
            scores: self
                .table
                .rows()
                .iter()
                .map(|emotion| self.score(recording, emotion))
                .collect(),
        }
    }

    pub fn score_all(&self, set: &NormalizedFeatureSet) -> ScoreMatrix {
        let rows = set
            .recordings()
            .iter()
            .map(|r| self.score_recording(r))
            .collect();
        ScoreMatrix::new(self.table.emotions().map(str::to_owned).collect(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSet, FeatureVector};
    use crate::normalize::normalize;
    use approx::assert_abs_diff_eq;

    fn pitch_catalog() -> FeatureCatalog {
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

    fn joy_with(descriptor: &str) -> DescriptorTable {
        DescriptorTable::new(vec![EmotionRow::new("Joy").with_cell("Pitch", descriptor)])
            .expect("table")
    }

    fn two_recordings() -> NormalizedFeatureSet {
        let raw: FeatureSet = vec![
            Recording::new("rec1.ogg", FeatureVector::new().with_value("pitch", 100.0)),
            Recording::new("rec2.ogg", FeatureVector::new().with_value("pitch", 200.0)),
        ]
        .into_iter()
        .collect();
        normalize(&raw, &["pitch".to_owned()])
    }

    fn rec(id: &str, pitch: f64) -> Recording {
        Recording::new(id, FeatureVector::new().with_value("pitch", pitch))
    }

    #[test]
    fn bucket_contributions() {
        assert_abs_diff_eq!(contribution(Bucket::High, 1.0, None), 1.0);
        assert_abs_diff_eq!(contribution(Bucket::Low, 0.2, None), 0.8);
        assert_abs_diff_eq!(contribution(Bucket::Moderate, 0.5, None), 1.0);
        assert_abs_diff_eq!(contribution(Bucket::Moderate, 0.0, None), 0.5);
        assert_abs_diff_eq!(contribution(Bucket::Variable, 0.9, None), 0.5);
        assert_abs_diff_eq!(contribution(Bucket::Variable, 0.9, Some(0.3)), 0.3);
        assert_abs_diff_eq!(contribution(Bucket::Variable, 0.9, Some(4.0)), 1.0);
        assert_abs_diff_eq!(contribution(Bucket::Variable, 0.9, Some(-0.3)), 0.0);
        assert_abs_diff_eq!(contribution(Bucket::Unmatched, 0.1, None), 0.5);
    }

    #[test]
    fn final_score_scales_and_rounds() {
        assert_eq!(final_score(Vec::new()), 0.0);
        assert_eq!(final_score([1.0, 0.0]), 5.0);
        assert_eq!(final_score([1.0 / 3.0]), 3.33);
        assert_eq!(final_score([2.0 / 3.0]), 6.67);
        // Exact halves round to the even neighbour.
        assert_eq!(final_score([0.0125]), 0.12);
        assert_eq!(final_score([0.0375]), 0.38);
    }

    #[test]
    fn high_descriptor_scenario() {
        let table = joy_with("high");
        let catalog = pitch_catalog();
        let m = EmotionScorer::new(&table, &catalog).score_all(&two_recordings());
        assert_eq!(m.score("rec1.ogg", "Joy"), Some(0.0));
        assert_eq!(m.score("rec2.ogg", "Joy"), Some(10.0));
    }

    #[test]
    fn low_descriptor_scenario() {
        let table = joy_with("low");
        let catalog = pitch_catalog();
        let m = EmotionScorer::new(&table, &catalog).score_all(&two_recordings());
        assert_eq!(m.score("rec1.ogg", "Joy"), Some(10.0));
        assert_eq!(m.score("rec2.ogg", "Joy"), Some(0.0));
    }

    #[test]
    fn moderate_descriptor_peaks_at_midpoint() {
        let table = joy_with("moderate");
        let catalog = pitch_catalog();
        let scorer = EmotionScorer::new(&table, &catalog);
        let joy = &table.rows()[0];
        assert_eq!(scorer.score(&rec("a", 0.5), joy), 10.0);
        assert_eq!(scorer.score(&rec("b", 0.0), joy), 5.0);
        assert_eq!(scorer.score(&rec("c", 1.0), joy), 5.0);
    }

    #[test]
    fn all_na_emotion_scores_zero() {
        let table = DescriptorTable::new(vec![
            EmotionRow::new("Calm").with_cell("Pitch", "N/A"),
            EmotionRow::new("Joy").with_cell("Pitch", "high"),
        ])
        .expect("table");
        let catalog = pitch_catalog();
        let m = EmotionScorer::new(&table, &catalog).score_all(&two_recordings());
        for row in m.rows() {
            assert_eq!(m.score(&row.recording, "Calm"), Some(0.0));
        }
    }

    #[test]
    fn recording_without_mapped_features_scores_zero() {
        let table = joy_with("high");
        let catalog = pitch_catalog();
        let scorer = EmotionScorer::new(&table, &catalog);
        let stranger = Recording::new("x.ogg", FeatureVector::new().with_value("energy", 1.0));
        assert_eq!(scorer.score_recording(&stranger).scores, vec![0.0]);
    }

    #[test]
    fn unmatched_descriptor_counts_as_neutral() {
        let table = joy_with("breathy");
        let catalog = pitch_catalog();
        let scorer = EmotionScorer::new(&table, &catalog);
        assert_eq!(scorer.score(&rec("a", 0.9), &table.rows()[0]), 5.0);
    }

    #[test]
    fn missing_and_blank_descriptors_are_skipped() {
        let catalog = FeatureCatalog::new(
            vec!["pitch".to_owned(), "loudness".to_owned()],
            vec!["pitch".to_owned(), "loudness".to_owned()],
            vec![
                DimensionBinding {
                    feature: "pitch".to_owned(),
                    dimension: "Pitch".to_owned(),
                },
                DimensionBinding {
                    feature: "loudness".to_owned(),
                    dimension: "Loudness".to_owned(),
                },
            ],
        )
        .expect("catalog");
        let table = DescriptorTable::new(vec![EmotionRow::new("Joy").with_cell("Pitch", "  ")])
            .expect("table");
        let r = Recording::new(
            "a",
            FeatureVector::new()
                .with_value("pitch", 1.0)
                .with_value("loudness", 1.0),
        );
        let scorer = EmotionScorer::new(&table, &catalog);
        assert!(scorer.contributions(&r, &table.rows()[0]).is_empty());
        assert_eq!(scorer.score(&r, &table.rows()[0]), 0.0);
    }

    #[test]
    fn variable_descriptor_uses_variance_when_available() {
        let table = joy_with("unstable");
        let catalog = pitch_catalog();
        let variance: VarianceTable = [("a", FeatureVector::new().with_value("pitch", 0.8))]
            .into_iter()
            .collect();
        let with = EmotionScorer::new(&table, &catalog).with_variance(Some(&variance));
        let without = EmotionScorer::new(&table, &catalog);
        let joy = &table.rows()[0];
        assert_eq!(with.score(&rec("a", 0.1), joy), 8.0);
        // No variance row for this recording.
        assert_eq!(with.score(&rec("b", 0.1), joy), 5.0);
        assert_eq!(without.score(&rec("a", 0.1), joy), 5.0);
    }

    #[test]
    fn contributions_explain_the_score() {
        let table = joy_with("high, narrow");
        let catalog = pitch_catalog();
        let scorer = EmotionScorer::new(&table, &catalog);
        let terms = scorer.contributions(&rec("a", 0.25), &table.rows()[0]);
        assert_eq!(
            terms,
            vec![Contribution {
                feature: "pitch".to_owned(),
                dimension: "Pitch".to_owned(),
                bucket: Bucket::High,
                value: 0.25,
            }]
        );
        assert_eq!(scorer.score(&rec("a", 0.25), &table.rows()[0]), 2.5);
    }

    #[test]
    fn rows_sorted_by_recording_regardless_of_input_order() {
        let raw: FeatureSet = ["c.ogg", "a.ogg", "b.ogg"]
            .iter()
            .enumerate()
            .map(|(i, id)| rec(id, i as f64))
            .collect();
        let n = normalize(&raw, &["pitch".to_owned()]);
        let table = joy_with("high");
        let catalog = pitch_catalog();
        let m = EmotionScorer::new(&table, &catalog).score_all(&n);
        let order: Vec<&str> = m.rows().iter().map(|r| r.recording.as_str()).collect();
        assert_eq!(order, vec!["a.ogg", "b.ogg", "c.ogg"]);
        assert_eq!(m.score("c.ogg", "Joy"), Some(0.0));
        assert_eq!(m.score("b.ogg", "Joy"), Some(10.0));
    }

    #[test]
    fn scoring_is_deterministic() {
        let table = DescriptorTable::new(vec![
            EmotionRow::new("Joy").with_cell("Pitch", "high"),
            EmotionRow::new("Calm").with_cell("Pitch", "moderate"),
        ])
        .expect("table");
        let catalog = pitch_catalog();
        let scorer = EmotionScorer::new(&table, &catalog);
        let set = two_recordings();
        assert_eq!(scorer.score_all(&set), scorer.score_all(&set));
    }

    #[test]
    fn table_rendering_lists_every_row() {
        let m = ScoreMatrix::new(
            vec!["Joy".to_owned(), "Anger".to_owned()],
            vec![ScoreRow {
                recording: "clip.ogg".to_owned(),
                scores: vec![7.5, 0.0],
            }],
        );
        let text = m.render_table();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("filename"));
        assert!(lines[0].contains("Joy") && lines[0].contains("Anger"));
        assert!(lines[1].starts_with("clip.ogg"));
        assert!(lines[1].contains("7.50"));
    }
}
