use crate::features::{FeatureSet, FeatureVector, Recording};
use std::collections::BTreeMap;

const LOG_TARGET: &str = "normalize";

/// Observed extent of one feature column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnRange {
    pub min: f64,
    pub max: f64,
}

impl ColumnRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_degenerate(&self) -> bool {
        self.span() <= 0.0
    }

    /// Min-max rescale into [0, 1]. A zero-range column maps to 0.0.
    pub fn scale(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        ((value - self.min) / self.span()).clamp(0.0, 1.0)
    }

    fn observe<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        values.into_iter().fold(None, |acc, v| {
            Some(match acc {
                None => Self { min: v, max: v },
                Some(r) => Self {
                    min: r.min.min(v),
                    max: r.max.max(v),
                },
            })
        })
    }
}

/// A feature set whose configured columns are rescaled to [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFeatureSet {
    set: FeatureSet,
    ranges: BTreeMap<String, ColumnRange>,
}

impl NormalizedFeatureSet {
    pub fn recordings(&self) -> &[Recording] {
        self.set.recordings()
    }

    pub fn as_feature_set(&self) -> &FeatureSet {
        &self.set
    }

    pub fn range(&self, column: &str) -> Option<ColumnRange> {
        self.ranges.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Rescales each of `columns` independently using the min and max observed
/// across all recordings. Other features pass through, absent values stay
/// absent, and the input is left untouched.
pub fn normalize(set: &FeatureSet, columns: &[String]) -> NormalizedFeatureSet {
    let ranges: BTreeMap<String, ColumnRange> = columns
        .iter()
        .filter_map(|name| {
            let range = ColumnRange::observe(set.column(name).flatten())?;
            if range.is_degenerate() {
                tracing::warn!(target: LOG_TARGET, column = %name, value = range.min, "zero-range column mapped to 0.0");
            }
            Some((name.clone(), range))
        })
        .collect();

    let recordings = set
        .recordings()
        .iter()
        .map(|r| {
            let features: FeatureVector = r
                .features
                .iter()
                .map(|(name, value)| match ranges.get(name) {
                    Some(range) => (name, range.scale(value)),
                    None => (name, value),
                })
                .collect();
            Recording::new(r.id.clone(), features)
        })
        .collect();

    NormalizedFeatureSet { set: recordings, ranges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn set_of(column: &str, values: &[Option<f64>]) -> FeatureSet {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut f = FeatureVector::new().with_value("untouched", 100.0 + i as f64);
                if let Some(v) = v {
                    f.insert(column, *v);
                }
                Recording::new(format!("r{i}.ogg"), f)
            })
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn column_spans_zero_to_one() {
        let set = set_of("pitch", &[Some(100.0), Some(200.0), Some(150.0)]);
        let n = normalize(&set, &cols(&["pitch"]));
        let values: Vec<f64> = n.as_feature_set().column("pitch").flatten().collect();
        assert_eq!(values, vec![0.0, 1.0, 0.5]);
        assert_eq!(n.range("pitch"), Some(ColumnRange { min: 100.0, max: 200.0 }));
    }

    #[test]
    fn unlisted_columns_pass_through() {
        let set = set_of("pitch", &[Some(1.0), Some(3.0)]);
        let n = normalize(&set, &cols(&["pitch"]));
        assert_eq!(n.recordings()[1].features.get("untouched"), Some(101.0));
        assert_eq!(n.recordings()[1].id, "r1.ogg");
    }

    #[test]
    fn missing_values_stay_missing_and_do_not_affect_range() {
        let set = set_of("pitch", &[Some(2.0), None, Some(4.0)]);
        let n = normalize(&set, &cols(&["pitch"]));
        assert_eq!(n.recordings()[1].features.get("pitch"), None);
        assert_eq!(n.recordings()[2].features.get("pitch"), Some(1.0));
    }

    #[test]
    fn degenerate_column_maps_to_zero() {
        let set = set_of("pitch", &[Some(7.0), Some(7.0)]);
        let n = normalize(&set, &cols(&["pitch"]));
        let values: Vec<f64> = n.as_feature_set().column("pitch").flatten().collect();
        assert_eq!(values, vec![0.0, 0.0]);
        assert!(n.range("pitch").expect("range").is_degenerate());
    }

    #[test]
    fn renormalizing_is_a_fixed_point() {
        let set = set_of("pitch", &[Some(-3.0), Some(12.5), Some(0.25), Some(7.0)]);
        let once = normalize(&set, &cols(&["pitch"]));
        let twice = normalize(once.as_feature_set(), &cols(&["pitch"]));
        for (a, b) in once.recordings().iter().zip(twice.recordings()) {
            assert_abs_diff_eq!(
                a.features.get("pitch").unwrap(),
                b.features.get("pitch").unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn input_is_not_mutated() {
        let set = set_of("pitch", &[Some(1.0), Some(2.0)]);
        let before = set.clone();
        let _ = normalize(&set, &cols(&["pitch"]));
        assert_eq!(set, before);
    }

    #[test]
    fn empty_set_normalizes_to_empty() {
        let n = normalize(&FeatureSet::default(), &cols(&["pitch"]));
        assert!(n.is_empty());
        assert_eq!(n.range("pitch"), None);
    }
}
