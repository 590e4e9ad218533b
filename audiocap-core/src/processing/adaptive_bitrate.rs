use std::f32::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::models::audio_frame::AudioFrame;
use crate::models::compression::{MAX_BITRATE_KBPS, MIN_BITRATE_KBPS};
use crate::processing::channel_mixer::ChannelMixer;

/// Standard bitrates suggestions are snapped to, in kbps.
pub const BITRATE_LADDER: [u32; 8] = [64, 96, 128, 160, 192, 224, 256, 320];

/// Ceiling for content that gains nothing from a high bitrate.
pub const LOW_COMPLEXITY_CAP_KBPS: u32 = 128;

const QUIET_RMS: f32 = 0.01;
const NOISY_FLATNESS: f32 = 0.85;
const LOUDNESS_REFERENCE_RMS: f32 = 0.2;
const LOUDNESS_WEIGHT: f32 = 0.5;
const CENTROID_WEIGHT: f32 = 0.3;
const TONALITY_WEIGHT: f32 = 0.2;
const RESPONSIVE_ALPHA: f64 = 0.7;
const STABLE_ALPHA: f64 = 0.4;
const MAX_FFT_SIZE: usize = 8192;

/// Signal descriptors for one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityMetrics {
    pub rms: f32,
    pub spectral_centroid_hz: f32,
    /// Geometric over arithmetic mean of the magnitude spectrum: 0 tonal, 1 noise.
    pub spectral_flatness: f32,
    pub sample_rate: u32,
}

impl ComplexityMetrics {
    /// Weighted complexity score in `[0, 1]`.
    pub fn score(&self) -> f32 {
        let loudness = (self.rms / LOUDNESS_REFERENCE_RMS).clamp(0.0, 1.0);
        let centroid = if self.sample_rate == 0 {
            0.0
        } else {
            (self.spectral_centroid_hz / (self.sample_rate as f32 / 4.0)).clamp(0.0, 1.0)
        };
        let tonality = (1.0 - self.spectral_flatness).clamp(0.0, 1.0);
        LOUDNESS_WEIGHT * loudness + CENTROID_WEIGHT * centroid + TONALITY_WEIGHT * tonality
    }

    fn is_low_complexity(&self) -> bool {
        self.rms < QUIET_RMS || self.spectral_flatness > NOISY_FLATNESS
    }
}

/// Suggests encoder bitrates from the measured complexity of the signal.
pub struct AdaptiveBitrateController {
    min_kbps: u32,
    max_kbps: u32,
    load_pressure: bool,
    windows: u64,
    smoothed_kbps: Option<f64>,
    last_suggestion: Option<u32>,
    planner: FftPlanner<f32>,
}

impl AdaptiveBitrateController {
    pub fn new(min_kbps: u32, max_kbps: u32) -> Self {
        let min_kbps = min_kbps.clamp(MIN_BITRATE_KBPS, MAX_BITRATE_KBPS);
        Self {
            min_kbps,
            max_kbps: max_kbps.clamp(min_kbps, MAX_BITRATE_KBPS),
            load_pressure: false,
            windows: 0,
            smoothed_kbps: None,
            last_suggestion: None,
            planner: FftPlanner::new(),
        }
    }

    /// Measure loudness, spectral centroid and flatness of a frame.
    ///
    /// The frame is mixed to mono over the channels that carry signal, so
    /// silent output slots do not dilute the loudness of the active ones.
    pub fn analyze(&mut self, frame: &AudioFrame) -> ComplexityMetrics {
        let mono = active_mono_mix(frame);
        let rms = ChannelMixer::rms_level(&mono);

        let (spectral_centroid_hz, spectral_flatness) = if ChannelMixer::peak_level(&mono) > 0.0 {
            self.spectral_shape(&mono, frame.sample_rate)
        } else {
            (0.0, 1.0)
        };
        ComplexityMetrics {
            rms,
            spectral_centroid_hz,
            spectral_flatness,
            sample_rate: frame.sample_rate,
        }
    }

    /// Turn metrics into a smoothed, ladder-snapped bitrate.
    pub fn suggest(&mut self, metrics: &ComplexityMetrics) -> u32 {
        self.windows += 1;
        let span = (self.max_kbps - self.min_kbps) as f64;
        let target = self.min_kbps as f64 + metrics.score() as f64 * span;

        let alpha = if self.windows % 3 == 0 {
            RESPONSIVE_ALPHA
        } else {
            STABLE_ALPHA
        };
        let smoothed = match self.smoothed_kbps {
            Some(previous) => alpha * target + (1.0 - alpha) * previous,
            None => target,
        };
        self.smoothed_kbps = Some(smoothed);

        let mut kbps = snap_to_ladder(smoothed).clamp(self.min_kbps, self.ceiling());
        if metrics.is_low_complexity() {
            kbps = kbps.min(LOW_COMPLEXITY_CAP_KBPS);
        }
        self.last_suggestion = Some(kbps);
        kbps
    }

    /// Analyze a frame and return the resulting suggestion.
    pub fn observe(&mut self, frame: &AudioFrame) -> u32 {
        let metrics = self.analyze(frame);
        self.suggest(&metrics)
    }

    /// Under sustained encoder load the ceiling drops one ladder step.
    pub fn set_load_pressure(&mut self, under_pressure: bool) {
        if under_pressure != self.load_pressure {
            log::debug!("adaptive bitrate load pressure: {}", under_pressure);
        }
        self.load_pressure = under_pressure;
    }

    pub fn last_suggestion(&self) -> Option<u32> {
        self.last_suggestion
    }

    pub fn reset(&mut self) {
        self.windows = 0;
        self.smoothed_kbps = None;
        self.last_suggestion = None;
        self.load_pressure = false;
    }

    fn ceiling(&self) -> u32 {
        if !self.load_pressure {
            return self.max_kbps;
        }
        BITRATE_LADDER
            .iter()
            .rev()
            .copied()
            .find(|&step| step < self.max_kbps)
            .unwrap_or(self.min_kbps)
            .max(self.min_kbps)
    }

    fn spectral_shape(&mut self, mono: &[f32], sample_rate: u32) -> (f32, f32) {
        if mono.len() < 2 || sample_rate == 0 {
            return (0.0, 1.0);
        }

        let window = &mono[mono.len().saturating_sub(MAX_FFT_SIZE)..];
        let size = window.len().next_power_of_two();
        let last = (window.len() - 1) as f32;

        let mut spectrum: Vec<Complex<f32>> = window
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let hann = 0.5 - 0.5 * (2.0 * PI * i as f32 / last).cos();
                Complex { re: s * hann, im: 0.0 }
            })
            .collect();
        spectrum.resize(size, Complex { re: 0.0, im: 0.0 });

        let fft = self.planner.plan_fft_forward(size);
        fft.process(&mut spectrum);

        let bins = size / 2;
        let bin_hz = sample_rate as f32 / size as f32;
        let magnitudes: Vec<f32> = spectrum[1..=bins].iter().map(|c| c.norm()).collect();

        let total: f32 = magnitudes.iter().sum();
        if total <= f32::EPSILON {
            return (0.0, 1.0);
        }

        let centroid = magnitudes
            .iter()
            .enumerate()
            .map(|(i, m)| (i + 1) as f32 * bin_hz * m)
            .sum::<f32>()
            / total;

        let arithmetic = total / magnitudes.len() as f32;
        let log_mean = magnitudes.iter().map(|m| (m + 1e-10).ln()).sum::<f32>() / magnitudes.len() as f32;
        let flatness = (log_mean.exp() / arithmetic).clamp(0.0, 1.0);

        (centroid, flatness)
    }
}

impl Default for AdaptiveBitrateController {
    fn default() -> Self {
        Self::new(MIN_BITRATE_KBPS, MAX_BITRATE_KBPS)
    }
}

/// Nearest entry of [`BITRATE_LADDER`].
pub fn snap_to_ladder(kbps: f64) -> u32 {
    let mut best = BITRATE_LADDER[0];
    for step in BITRATE_LADDER {
        if (step as f64 - kbps).abs() < (best as f64 - kbps).abs() {
            best = step;
        }
    }
    best
}

fn active_mono_mix(frame: &AudioFrame) -> Vec<f32> {
    if frame.channels <= 1 {
        return frame.samples.clone();
    }

    let planar = frame.to_planar();
    let active: Vec<&[f32]> = planar
        .iter()
        .filter(|c| ChannelMixer::peak_level(c) > 0.0)
        .map(Vec::as_slice)
        .collect();
    if active.is_empty() {
        return vec![0.0; frame.frame_count()];
    }
    ChannelMixer::downmix_to_mono(&ChannelMixer::interleave(&active), active.len())
}
