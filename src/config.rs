use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CtcError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate_hz: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub mel_bins: usize,
}

impl FeatureConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            n_fft: 512,
            hop_length: 160,
            mel_bins: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub hidden_width: usize,
    pub num_layers: usize,
    pub dropout: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            hidden_width: 128,
            num_layers: 2,
            dropout: 0.1,
        }
    }
}

/// How per-sample CTC losses are folded into the batch scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Every sample weighs the same: sum of NLL / batch size.
    #[default]
    Mean,
    /// Each NLL is divided by its target length before averaging.
    MeanByTargetLength,
    Sum,
}

/// What the trainer does with a sample whose audio cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub features: FeatureConfig,
    pub encoder: EncoderConfig,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub reduction: Reduction,
    pub skip_policy: SkipPolicy,
    /// Seed for batch-order shuffling; `None` keeps the harvested order.
    pub shuffle_seed: Option<u64>,
    pub exclude_speakers: Vec<String>,
    pub device: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            encoder: EncoderConfig::default(),
            batch_size: 8,
            epochs: 10,
            learning_rate: 1e-3,
            reduction: Reduction::default(),
            skip_policy: SkipPolicy::default(),
            shuffle_seed: None,
            exclude_speakers: Vec::new(),
            device: "cpu".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, CtcError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CtcError::io("read training config", e))?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| CtcError::json("parse training config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CtcError> {
        if self.batch_size == 0 {
            return Err(CtcError::invalid_input("batch_size must be >= 1"));
        }
        if self.features.sample_rate_hz == 0 {
            return Err(CtcError::invalid_input("sample_rate_hz must be > 0"));
        }
        if self.features.mel_bins == 0 {
            return Err(CtcError::invalid_input("mel_bins must be >= 1"));
        }
        if self.features.hop_length == 0 || self.features.n_fft < 2 {
            return Err(CtcError::invalid_input(
                "hop_length must be >= 1 and n_fft >= 2",
            ));
        }
        if self.encoder.hidden_width == 0 || self.encoder.num_layers == 0 {
            return Err(CtcError::invalid_input(
                "hidden_width and num_layers must be >= 1",
            ));
        }
        if !(0.0..1.0).contains(&self.encoder.dropout) {
            return Err(CtcError::invalid_input(format!(
                "dropout must be in [0, 1), got {}",
                self.encoder.dropout
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(CtcError::invalid_input(format!(
                "learning_rate must be finite and >= 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    /// Milliseconds covered by one feature frame.
    pub fn frame_stride_ms(&self) -> f64 {
        self.features.hop_length as f64 / self.features.sample_rate_hz as f64 * 1000.0
    }
}
