// Frame-level signal analysis used by the acoustic extractor.
//
// Time-domain measures (zero crossings, power, peak amplitude) work on raw
// frames; spectral measures share one Hann-windowed FFT per frame. Pitch is
// taken from the FFT-based autocorrelation of the same frame.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

const EPSILON: f32 = 1e-10;
const MEL_FMIN_HZ: f32 = 20.0;
const MEL_FMAX_HZ: f32 = 8_000.0;
/// Candidates within this fraction of the best autocorrelation peak win when
/// they sit at a shorter lag (suppresses octave-down errors).
const OCTAVE_TOLERANCE: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PitchEstimate {
    pub hz: f32,
    /// Normalized autocorrelation at the chosen lag, in (0, 1].
    pub strength: f32,
}

pub(crate) fn frames(samples: &[f32], frame_len: usize, hop: usize) -> impl Iterator<Item = &[f32]> {
    let count = if samples.len() < frame_len || frame_len == 0 {
        0
    } else {
        (samples.len() - frame_len) / hop.max(1) + 1
    };
    (0..count).map(move |i| &samples[i * hop..i * hop + frame_len])
}

pub(crate) fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

pub(crate) fn mean_power(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32
}

pub(crate) fn peak_amplitude(frame: &[f32]) -> f32 {
    frame.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

pub(crate) fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub(crate) fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Shared FFT state for one frame geometry.
pub(crate) struct SpectralAnalyzer {
    sample_rate: u32,
    frame_len: usize,
    fft_size: usize,
    window: Vec<f32>,
    spectrum_fft: Arc<dyn Fft<f32>>,
    acf_size: usize,
    acf_forward: Arc<dyn Fft<f32>>,
    acf_inverse: Arc<dyn Fft<f32>>,
    mel_bank: Vec<Vec<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, frame_len: usize, mel_bands: usize) -> Self {
        let fft_size = frame_len.next_power_of_two();
        let acf_size = (2 * frame_len).next_power_of_two();
        let mut planner = FftPlanner::new();

        let window = (0..frame_len)
            .map(|i| {
                let denom = (frame_len.max(2) - 1) as f32;
                0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / denom).cos())
            })
            .collect();

        Self {
            sample_rate,
            frame_len,
            fft_size,
            window,
            spectrum_fft: planner.plan_fft_forward(fft_size),
            acf_size,
            acf_forward: planner.plan_fft_forward(acf_size),
            acf_inverse: planner.plan_fft_inverse(acf_size),
            mel_bank: mel_filterbank(mel_bands, fft_size, sample_rate),
        }
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Magnitude spectrum of the Hann-windowed frame, `fft_size / 2 + 1` bins.
    pub fn magnitudes(&self, frame: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .take(self.frame_len)
            .zip(self.window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));
        self.spectrum_fft.process(&mut buffer);
        buffer[..self.fft_size / 2 + 1]
            .iter()
            .map(|c| c.norm())
            .collect()
    }

    /// Log mel band energies of a magnitude spectrum.
    pub fn log_mel(&self, magnitudes: &[f32]) -> Vec<f32> {
        self.mel_bank
            .iter()
            .map(|filter| {
                let energy: f32 = filter
                    .iter()
                    .zip(magnitudes.iter())
                    .map(|(w, m)| w * m * m)
                    .sum();
                energy.max(EPSILON).ln()
            })
            .collect()
    }

    /// Frequency of the strongest bin inside `[lo_hz, hi_hz]`.
    pub fn peak_frequency(&self, magnitudes: &[f32], lo_hz: f32, hi_hz: f32) -> Option<f32> {
        let bin_hz = self.bin_hz();
        let lo = (lo_hz / bin_hz).ceil() as usize;
        let hi = ((hi_hz / bin_hz).floor() as usize).min(magnitudes.len().saturating_sub(1));
        if lo > hi {
            return None;
        }
        let (idx, mag) = magnitudes[lo..=hi]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        (*mag > EPSILON).then(|| (lo + idx) as f32 * bin_hz)
    }

    /// Unbiased autocorrelation of the raw frame, normalized by lag zero.
    fn autocorrelation(&self, frame: &[f32]) -> Vec<f32> {
        let n = frame.len().min(self.frame_len);
        let mean = frame[..n].iter().sum::<f32>() / n.max(1) as f32;
        let mut buffer: Vec<Complex<f32>> = frame[..n]
            .iter()
            .map(|s| Complex::new(s - mean, 0.0))
            .collect();
        buffer.resize(self.acf_size, Complex::new(0.0, 0.0));
        self.acf_forward.process(&mut buffer);
        for c in buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.acf_inverse.process(&mut buffer);

        let r0 = buffer[0].re;
        if r0 <= EPSILON {
            return vec![0.0; n];
        }
        (0..n)
            .map(|lag| {
                let unbiased = buffer[lag].re / (n - lag) as f32;
                (unbiased / (r0 / n as f32)).clamp(-1.0, 1.0)
            })
            .collect()
    }

    /// Fundamental frequency by autocorrelation peak picking in
    /// `[fmin_hz, fmax_hz]`; `None` when the frame is unvoiced.
    pub fn pitch(&self, frame: &[f32], fmin_hz: f32, fmax_hz: f32, threshold: f32) -> Option<PitchEstimate> {
        let acf = self.autocorrelation(frame);
        let sr = self.sample_rate as f32;
        let min_lag = ((sr / fmax_hz).floor() as usize).max(1);
        // Long lags have too little overlap for the unbiased estimate.
        let max_lag = ((sr / fmin_hz).ceil() as usize).min(acf.len() / 2);
        if min_lag + 1 >= max_lag {
            return None;
        }

        let is_peak = |lag: usize| acf[lag] >= acf[lag - 1] && acf[lag] >= acf[lag + 1];
        let best = (min_lag..max_lag)
            .filter(|&lag| is_peak(lag))
            .map(|lag| acf[lag])
            .fold(f32::MIN, f32::max);
        if best < threshold {
            return None;
        }
        let lag = (min_lag..max_lag).find(|&lag| is_peak(lag) && acf[lag] >= OCTAVE_TOLERANCE * best)?;

        let (a, b, c) = (acf[lag - 1], acf[lag], acf[lag + 1]);
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > EPSILON {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };

        Some(PitchEstimate {
            hz: sr / (lag as f32 + offset),
            strength: b.clamp(EPSILON, 1.0),
        })
    }
}

/// Triangular filters spaced evenly on the mel scale.
pub(crate) fn mel_filterbank(bands: usize, fft_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let bins = fft_size / 2 + 1;
    let nyquist = sample_rate as f32 / 2.0;
    let fmax = MEL_FMAX_HZ.min(nyquist);
    let (mel_lo, mel_hi) = (hz_to_mel(MEL_FMIN_HZ), hz_to_mel(fmax));
    let edges: Vec<f32> = (0..bands + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (bands + 1) as f32))
        .collect();
    let bin_hz = sample_rate as f32 / fft_size as f32;

    (0..bands)
        .map(|b| {
            let (left, center, right) = (edges[b], edges[b + 1], edges[b + 2]);
            (0..bins)
                .map(|k| {
                    let f = k as f32 * bin_hz;
                    if f <= left || f >= right {
                        0.0
                    } else if f <= center {
                        (f - left) / (center - left)
                    } else {
                        (right - f) / (right - center)
                    }
                })
                .collect()
        })
        .collect()
}

/// DCT-II coefficient `k` of the log mel energies.
pub(crate) fn cepstral_coefficient(log_mel: &[f32], k: usize) -> f32 {
    let m = log_mel.len() as f32;
    log_mel
        .iter()
        .enumerate()
        .map(|(i, e)| e * (std::f32::consts::PI * k as f32 * (i as f32 + 0.5) / m).cos())
        .sum()
}

/// Half-wave rectified L2 difference of two L1-normalized spectra.
pub(crate) fn spectral_flux(previous: &[f32], current: &[f32]) -> f32 {
    let norm = |s: &[f32]| s.iter().sum::<f32>().max(EPSILON);
    let (np, nc) = (norm(previous), norm(current));
    current
        .iter()
        .zip(previous.iter())
        .map(|(c, p)| (c / nc - p / np).max(0.0).powi(2))
        .sum::<f32>()
        .sqrt()
}
