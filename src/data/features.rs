//! Log-mel spectrogram features, one row per hop.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::FeatureConfig;
use crate::error::CtcError;
use crate::types::FeatureSequence;

const LOG_FLOOR: f32 = 1e-10;

pub struct LogMelExtractor {
    config: FeatureConfig,
    window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for LogMelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMelExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LogMelExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let window = hann_window(config.n_fft);
        let mel_filters = htk_mel_filterbank(
            config.mel_bins,
            config.n_fft,
            config.sample_rate_hz as f32,
            0.0,
            config.sample_rate_hz as f32 / 2.0,
        );
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft);
        Self {
            config,
            window,
            mel_filters,
            fft,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.config.mel_bins
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Computes `(frames, mel_bins)` features; frames are centered on multiples of the hop.
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureSequence, CtcError> {
        if samples.is_empty() {
            return Err(CtcError::invalid_input("cannot extract features from empty audio"));
        }
        let frames = self
            .power_spectrogram(samples)
            .iter()
            .map(|power| {
                self.mel_filters
                    .iter()
                    .map(|filter| {
                        let energy: f32 = power.iter().zip(filter).map(|(p, w)| p * w).sum();
                        energy.max(LOG_FLOOR).ln()
                    })
                    .collect()
            })
            .collect();
        FeatureSequence::from_frames(frames, self.config.mel_bins)
    }

    fn power_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_frames = samples.len() / hop + 1;
        let pad = (n_fft / 2) as isize;
        let n = samples.len() as isize;

        let mut spectrogram = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        for frame_idx in 0..num_frames {
            let start = frame_idx as isize * hop as isize - pad;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let idx = start + i as isize;
                // Zero padding outside the signal.
                let sample = if (0..n).contains(&idx) {
                    samples[idx as usize] * self.window[i]
                } else {
                    0.0
                };
                *slot = Complex::new(sample, 0.0);
            }
            self.fft.process(&mut buffer);
            spectrogram.push(
                buffer
                    .iter()
                    .take(n_fft / 2 + 1)
                    .map(|c| c.re * c.re + c.im * c.im)
                    .collect(),
            );
        }
        spectrogram
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / length as f32).cos()))
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters, `[n_mels][n_fft / 2 + 1]`, evenly spaced on the HTK mel scale.
fn htk_mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f32, f_min: f32, f_max: f32) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;
    let bin_hz: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sample_rate / n_fft as f32)
        .collect();
    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            bin_hz
                .iter()
                .map(|&f| {
                    let rising = (f - lo) / (center - lo);
                    let falling = (hi - f) / (hi - center);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}
