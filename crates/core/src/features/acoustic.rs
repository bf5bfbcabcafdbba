use super::dsp::{self, SpectralAnalyzer};
use super::{select_features, ExtractError, Extraction, FeatureExtractor};
use crate::config::{
    ConfigError, DEFAULT_PITCH_MAX_HZ, DEFAULT_PITCH_MIN_HZ, F1_MEAN, HNR_MEAN, JITTER_MEAN,
    LOCAL_DURATION_MEAN, LOUDNESS_MEAN, MFCC1_MEAN, PITCH_MEAN, PITCH_STDDEV_NORM, SHIMMER_MEAN,
    SPECTRAL_FLUX_MEAN, ZCR_MEAN,
};
use crate::decode::{self, PcmClip};
use crate::util::stats;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "features::acoustic";
/// Reference frequency of the eGeMAPS semitone scale (A0).
const SEMITONE_REFERENCE_HZ: f32 = 27.5;
const LOUDNESS_EXPONENT: f32 = 0.3;
const HNR_LIMIT_DB: f64 = 40.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalysisParams {
    pub frame_ms: f32,
    pub hop_ms: f32,
    pub pitch_min_hz: f32,
    pub pitch_max_hz: f32,
    /// Minimum normalized autocorrelation for a frame to count as voiced.
    pub voicing_threshold: f32,
    pub mel_bands: usize,
    pub formant_band_hz: (f32, f32),
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            frame_ms: 40.0,
            hop_ms: 10.0,
            pitch_min_hz: DEFAULT_PITCH_MIN_HZ as f32,
            pitch_max_hz: DEFAULT_PITCH_MAX_HZ as f32,
            voicing_threshold: 0.45,
            mel_bands: 26,
            formant_band_hz: (250.0, 1000.0),
        }
    }
}

impl AnalysisParams {
    pub fn with_pitch_range(mut self, min_hz: u32, max_hz: u32) -> Result<Self, ConfigError> {
        if min_hz == 0 || min_hz >= max_hz {
            return Err(ConfigError::InvalidPitchRange { min_hz, max_hz });
        }
        self.pitch_min_hz = min_hz as f32;
        self.pitch_max_hz = max_hz as f32;
        Ok(self)
    }

    fn samples(ms: f32, sample_rate: u32) -> usize {
        ((ms * sample_rate as f32) / 1000.0).round().max(1.0) as usize
    }

    pub fn frame_len(&self, sample_rate: u32) -> usize {
        Self::samples(self.frame_ms, sample_rate)
    }

    pub fn hop_len(&self, sample_rate: u32) -> usize {
        Self::samples(self.hop_ms, sample_rate)
    }
}

/// Native eGeMAPS-style functionals computed from decoded audio.
#[derive(Clone, Debug)]
pub struct AcousticExtractor {
    selected: Vec<String>,
    params: AnalysisParams,
    estimate_variance: bool,
}

impl AcousticExtractor {
    pub fn new(selected: Vec<String>) -> Self {
        Self {
            selected,
            params: AnalysisParams::default(),
            estimate_variance: false,
        }
    }

    pub fn with_params(mut self, params: AnalysisParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_variance(mut self, estimate: bool) -> Self {
        self.estimate_variance = estimate;
        self
    }

    pub fn analyze_file(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let clip = decode::decode_file(path)?;
        tracing::debug!(
            target: LOG_TARGET,
            path = %path.display(),
            duration_ms = clip.duration().as_millis() as u64,
            "analyzing clip"
        );
        self.analyze_clip(&clip)
    }

    pub fn analyze_clip(&self, clip: &PcmClip) -> Result<Extraction, ExtractError> {
        let tracks = FrameTracks::compute(clip, &self.params)?;
        let features = select_features(&tracks.functionals(), &self.selected);
        let variance = self
            .estimate_variance
            .then(|| select_features(&tracks.instability(), &self.selected));
        tracing::trace!(
            target: LOG_TARGET,
            present = features.len(),
            voiced_frames = tracks.voiced.len(),
            "clip analyzed"
        );
        Ok(Extraction { features, variance })
    }
}

impl FeatureExtractor for AcousticExtractor {
    fn extract(&self, path: PathBuf) -> BoxFuture<'_, Result<Extraction, ExtractError>> {
        let this = self.clone();
        async move {
            tokio::task::spawn_blocking(move || this.analyze_file(&path))
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug)]
struct VoicedFrame {
    index: usize,
    f0_hz: f32,
    strength: f32,
    amplitude: f32,
    f1_hz: Option<f32>,
}

/// Per-frame measurements of one clip; every functional is a statistic over
/// one of these tracks.
#[derive(Debug, Default)]
struct FrameTracks {
    hop_secs: f64,
    loudness: Vec<f64>,
    zcr: Vec<f64>,
    mfcc1: Vec<f64>,
    flux: Vec<f64>,
    voiced: Vec<VoicedFrame>,
}

impl FrameTracks {
    fn compute(clip: &PcmClip, params: &AnalysisParams) -> Result<Self, ExtractError> {
        let frame_len = params.frame_len(clip.sample_rate);
        let hop = params.hop_len(clip.sample_rate);
        if clip.samples.len() < frame_len {
            return Err(ExtractError::TooShort {
                samples: clip.samples.len(),
                required: frame_len,
            });
        }

        let analyzer = SpectralAnalyzer::new(clip.sample_rate, frame_len, params.mel_bands);
        let mut tracks = Self {
            hop_secs: hop as f64 / clip.sample_rate as f64,
            ..Self::default()
        };
        let mut previous: Option<Vec<f32>> = None;

        for (index, frame) in dsp::frames(&clip.samples, frame_len, hop).enumerate() {
            let magnitudes = analyzer.magnitudes(frame);

            tracks
                .loudness
                .push(f64::from(dsp::mean_power(frame).powf(LOUDNESS_EXPONENT)));
            tracks.zcr.push(f64::from(dsp::zero_crossing_rate(frame)));
            tracks.mfcc1.push(f64::from(dsp::cepstral_coefficient(
                &analyzer.log_mel(&magnitudes),
                1,
            )));
            if let Some(prev) = &previous {
                tracks
                    .flux
                    .push(f64::from(dsp::spectral_flux(prev, &magnitudes)));
            }

            if let Some(pitch) = analyzer.pitch(
                frame,
                params.pitch_min_hz,
                params.pitch_max_hz,
                params.voicing_threshold,
            ) {
                let (lo, hi) = params.formant_band_hz;
                tracks.voiced.push(VoicedFrame {
                    index,
                    f0_hz: pitch.hz,
                    strength: pitch.strength,
                    amplitude: dsp::peak_amplitude(frame),
                    f1_hz: analyzer.peak_frequency(&magnitudes, lo, hi),
                });
            }

            previous = Some(magnitudes);
        }

        Ok(tracks)
    }

    fn semitones(&self) -> Vec<f64> {
        self.voiced
            .iter()
            .map(|v| f64::from(12.0 * (v.f0_hz / SEMITONE_REFERENCE_HZ).log2()))
            .collect()
    }

    fn hnr_db(&self) -> Vec<f64> {
        self.voiced
            .iter()
            .map(|v| {
                let r = f64::from(v.strength).min(1.0 - 1e-9);
                (10.0 * (r / (1.0 - r)).log10()).clamp(-HNR_LIMIT_DB, HNR_LIMIT_DB)
            })
            .collect()
    }

    fn formant1(&self) -> Vec<f64> {
        self.voiced
            .iter()
            .filter_map(|v| v.f1_hz.map(f64::from))
            .collect()
    }

    /// Voiced frame pairs that are adjacent in time.
    fn adjacent_voiced(&self) -> impl Iterator<Item = (&VoicedFrame, &VoicedFrame)> {
        self.voiced
            .windows(2)
            .filter(|w| w[1].index == w[0].index + 1)
            .map(|w| (&w[0], &w[1]))
    }

    /// Period perturbation of adjacent voiced frames, relative to the mean period.
    fn jitter(&self) -> Vec<f64> {
        let periods: Vec<f64> = self.voiced.iter().map(|v| 1.0 / f64::from(v.f0_hz)).collect();
        let Some(mean_period) = stats::mean(&periods) else {
            return Vec::new();
        };
        self.adjacent_voiced()
            .map(|(a, b)| {
                (1.0 / f64::from(b.f0_hz) - 1.0 / f64::from(a.f0_hz)).abs() / mean_period
            })
            .collect()
    }

    fn shimmer_db(&self) -> Vec<f64> {
        self.adjacent_voiced()
            .filter(|(a, b)| a.amplitude > 0.0 && b.amplitude > 0.0)
            .map(|(a, b)| f64::from(20.0 * (b.amplitude / a.amplitude).log10()).abs())
            .collect()
    }

    /// Lengths in seconds of uninterrupted voiced runs.
    fn voiced_runs(&self) -> Vec<f64> {
        let mut runs = Vec::new();
        let mut current = 0usize;
        let mut last: Option<usize> = None;
        for v in &self.voiced {
            match last {
                Some(prev) if v.index == prev + 1 => current += 1,
                _ => {
                    if current > 0 {
                        runs.push(current as f64 * self.hop_secs);
                    }
                    current = 1;
                }
            }
            last = Some(v.index);
        }
        if current > 0 {
            runs.push(current as f64 * self.hop_secs);
        }
        runs
    }

    fn named_tracks(&self) -> Vec<(&'static str, Vec<f64>)> {
        vec![
            (PITCH_MEAN, self.semitones()),
            (HNR_MEAN, self.hnr_db()),
            (LOUDNESS_MEAN, self.loudness.clone()),
            (F1_MEAN, self.formant1()),
            (JITTER_MEAN, self.jitter()),
            (SHIMMER_MEAN, self.shimmer_db()),
            (MFCC1_MEAN, self.mfcc1.clone()),
            (SPECTRAL_FLUX_MEAN, self.flux.clone()),
            (ZCR_MEAN, self.zcr.clone()),
            (LOCAL_DURATION_MEAN, self.voiced_runs()),
        ]
    }

    fn functionals(&self) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = self
            .named_tracks()
            .into_iter()
            .filter_map(|(name, track)| stats::mean(&track).map(|m| (name.to_owned(), m)))
            .collect();
        if let Some(cv) = stats::coefficient_of_variation(&self.semitones()) {
            out.insert(PITCH_STDDEV_NORM.to_owned(), cv);
        }
        out
    }

    /// Coefficient of variation of each track; pitch variability shares the
    /// pitch track.
    fn instability(&self) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = self
            .named_tracks()
            .into_iter()
            .filter_map(|(name, track)| {
                stats::coefficient_of_variation(&track).map(|cv| (name.to_owned(), cv))
            })
            .collect();
        if let Some(cv) = out.get(PITCH_MEAN).copied() {
            out.insert(PITCH_STDDEV_NORM.to_owned(), cv);
        }
        out
    }
}
