use candle_core::{Device, Tensor};

use crate::error::CtcError;

/// Time-major `(time, feature_dim)` matrix stored row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    data: Vec<f32>,
    time: usize,
    feature_dim: usize,
}

impl FeatureSequence {
    pub fn new(data: Vec<f32>, time: usize, feature_dim: usize) -> Result<Self, CtcError> {
        if data.len() != time * feature_dim {
            return Err(CtcError::length_mismatch(format!(
                "feature buffer holds {} values, expected {time} x {feature_dim}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            time,
            feature_dim,
        })
    }

    pub fn from_frames(frames: Vec<Vec<f32>>, feature_dim: usize) -> Result<Self, CtcError> {
        let time = frames.len();
        let mut data = Vec::with_capacity(time * feature_dim);
        for frame in frames {
            data.extend(frame);
        }
        Self::new(data, time, feature_dim)
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn frame(&self, t: usize) -> &[f32] {
        &self.data[t * self.feature_dim..(t + 1) * self.feature_dim]
    }
}

/// Ground-truth label indices; never contains the blank index.
pub type LabelSequence = Vec<u32>;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: FeatureSequence,
    pub labels: LabelSequence,
}

/// Padded batch of samples plus the true per-sample lengths.
///
/// `padded_features` is laid out as `(batch, max_time, feature_dim)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub padded_features: Vec<f32>,
    pub max_time: usize,
    pub feature_dim: usize,
    pub flattened_labels: Vec<u32>,
    pub input_lengths: Vec<usize>,
    pub target_lengths: Vec<usize>,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.input_lengths.len()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch_size(), self.max_time, self.feature_dim)
    }

    /// Checks the length invariants tying the four fields together.
    pub fn validate(&self) -> Result<(), CtcError> {
        let b = self.batch_size();
        if self.target_lengths.len() != b {
            return Err(CtcError::length_mismatch(format!(
                "{} target lengths for {b} inputs",
                self.target_lengths.len()
            )));
        }
        let label_total: usize = self.target_lengths.iter().sum();
        if label_total != self.flattened_labels.len() {
            return Err(CtcError::length_mismatch(format!(
                "target lengths sum to {label_total} but {} labels were flattened",
                self.flattened_labels.len()
            )));
        }
        if self.padded_features.len() != b * self.max_time * self.feature_dim {
            return Err(CtcError::length_mismatch(format!(
                "padded buffer holds {} values, expected {b} x {} x {}",
                self.padded_features.len(),
                self.max_time,
                self.feature_dim
            )));
        }
        if let Some(&longest) = self.input_lengths.iter().max() {
            if longest != self.max_time {
                return Err(CtcError::length_mismatch(format!(
                    "longest input is {longest} frames but batch is padded to {}",
                    self.max_time
                )));
            }
        }
        Ok(())
    }

    /// Labels of row `index`, sliced out of the flat buffer.
    pub fn labels_of(&self, index: usize) -> &[u32] {
        let start: usize = self.target_lengths[..index].iter().sum();
        &self.flattened_labels[start..start + self.target_lengths[index]]
    }

    pub fn to_tensors(&self, device: &Device) -> Result<BatchTensors, CtcError> {
        self.validate()?;
        let features = Tensor::from_vec(self.padded_features.clone(), self.shape(), device)
            .map_err(|e| CtcError::runtime("batch feature tensor", e))?;
        Ok(BatchTensors {
            features,
            flattened_labels: self.flattened_labels.clone(),
            input_lengths: self.input_lengths.clone(),
            target_lengths: self.target_lengths.clone(),
        })
    }
}

/// Device-resident features with host-side label metadata.
#[derive(Debug, Clone)]
pub struct BatchTensors {
    pub features: Tensor,
    pub flattened_labels: Vec<u32>,
    pub input_lengths: Vec<usize>,
    pub target_lengths: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_batch() -> Batch {
        Batch {
            padded_features: vec![0.0; 2 * 3 * 2],
            max_time: 3,
            feature_dim: 2,
            flattened_labels: vec![1, 2, 3],
            input_lengths: vec![3, 2],
            target_lengths: vec![2, 1],
        }
    }

    #[test]
    fn feature_sequence_rejects_bad_buffer() {
        let result = FeatureSequence::new(vec![0.0; 5], 2, 3);
        assert!(matches!(result, Err(CtcError::LengthMismatch { .. })));
    }

    #[test]
    fn feature_sequence_frames_are_time_major() {
        let seq = FeatureSequence::from_frames(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 2)
            .expect("valid frames");
        assert_eq!(seq.time(), 2);
        assert_eq!(seq.frame(1), &[3.0, 4.0]);
    }

    #[test]
    fn valid_batch_passes() {
        let batch = tiny_batch();
        assert!(batch.validate().is_ok());
        assert_eq!(batch.labels_of(0), &[1, 2]);
        assert_eq!(batch.labels_of(1), &[3]);
    }

    #[test]
    fn label_sum_mismatch_is_detected() {
        let mut batch = tiny_batch();
        batch.flattened_labels.push(4);
        assert!(matches!(
            batch.validate(),
            Err(CtcError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn padding_mismatch_is_detected() {
        let mut batch = tiny_batch();
        batch.input_lengths = vec![2, 2];
        assert!(batch.validate().is_err());
    }

    #[test]
    fn to_tensors_keeps_shape() {
        let tensors = tiny_batch().to_tensors(&Device::Cpu).expect("tensors");
        assert_eq!(tensors.features.dims(), &[2, 3, 2]);
        assert_eq!(tensors.input_lengths, vec![3, 2]);
    }
}
