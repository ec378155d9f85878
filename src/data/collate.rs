use crate::error::CtcError;
use crate::types::{Batch, Sample};

/// Right-pads features with zeros to the longest sample and flattens labels in
/// input order. Pure: the same slice always yields the same batch.
pub fn collate(samples: &[Sample]) -> Result<Batch, CtcError> {
    let first = samples.first().ok_or(CtcError::EmptyBatch)?;
    let feature_dim = first.features.feature_dim();
    if let Some(other) = samples
        .iter()
        .find(|s| s.features.feature_dim() != feature_dim)
    {
        return Err(CtcError::length_mismatch(format!(
            "mixed feature widths in one batch: {feature_dim} and {}",
            other.features.feature_dim()
        )));
    }

    let max_time = samples
        .iter()
        .map(|s| s.features.time())
        .max()
        .unwrap_or(0);
    let row_len = max_time * feature_dim;

    let mut padded_features = vec![0.0f32; samples.len() * row_len];
    let mut flattened_labels = Vec::with_capacity(samples.iter().map(|s| s.labels.len()).sum());
    let mut input_lengths = Vec::with_capacity(samples.len());
    let mut target_lengths = Vec::with_capacity(samples.len());

    for (row, sample) in samples.iter().enumerate() {
        let src = sample.features.as_slice();
        padded_features[row * row_len..row * row_len + src.len()].copy_from_slice(src);
        flattened_labels.extend_from_slice(&sample.labels);
        input_lengths.push(sample.features.time());
        target_lengths.push(sample.labels.len());
    }

    let batch = Batch {
        padded_features,
        max_time,
        feature_dim,
        flattened_labels,
        input_lengths,
        target_lengths,
    };
    batch.validate()?;
    Ok(batch)
}

/// Splits `0..len` into consecutive groups of at most `batch_size` indices.
pub fn batch_indices(len: usize, batch_size: usize) -> Vec<Vec<usize>> {
    let batch_size = batch_size.max(1);
    (0..len)
        .collect::<Vec<_>>()
        .chunks(batch_size)
        .map(<[usize]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::types::FeatureSequence;

    fn sample(time: usize, dim: usize, labels: usize, seed: u64) -> Sample {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..time * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Sample {
            features: FeatureSequence::new(data, time, dim).unwrap(),
            labels: (0..labels).map(|_| rng.gen_range(1..29)).collect(),
        }
    }

    #[test]
    fn grid_shaped_batch() {
        let samples = vec![sample(50, 40, 5, 1), sample(30, 40, 3, 2)];
        let batch = collate(&samples).unwrap();
        assert_eq!(batch.shape(), (2, 50, 40));
        assert_eq!(batch.flattened_labels.len(), 8);
        assert_eq!(batch.input_lengths, vec![50, 30]);
        assert_eq!(batch.target_lengths, vec![5, 3]);
        assert_eq!(
            batch.target_lengths.iter().sum::<usize>(),
            batch.flattened_labels.len()
        );
        assert_eq!(batch.input_lengths.iter().max(), Some(&batch.max_time));
    }

    #[test]
    fn short_rows_are_right_padded_with_zeros() {
        let samples = vec![sample(4, 2, 1, 3), sample(2, 2, 1, 4)];
        let batch = collate(&samples).unwrap();
        let row1 = &batch.padded_features[8..16];
        assert_eq!(&row1[..4], samples[1].features.as_slice());
        assert!(row1[4..].iter().all(|&v| v == 0.0));
        assert_eq!(&batch.padded_features[..8], samples[0].features.as_slice());
    }

    #[test]
    fn labels_keep_input_order() {
        let samples = vec![sample(5, 2, 2, 5), sample(5, 2, 3, 6)];
        let batch = collate(&samples).unwrap();
        assert_eq!(batch.labels_of(0), samples[0].labels.as_slice());
        assert_eq!(batch.labels_of(1), samples[1].labels.as_slice());
    }

    #[test]
    fn collation_is_deterministic() {
        let samples: Vec<Sample> = (0..4).map(|i| sample(10 + i * 3, 8, 2 + i, i as u64)).collect();
        let a = collate(&samples).unwrap();
        let b = collate(&samples).unwrap();
        assert_eq!(a, b);
        let bits = |batch: &Batch| batch.padded_features.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn empty_list_is_an_error() {
        assert!(matches!(collate(&[]), Err(CtcError::EmptyBatch)));
    }

    #[test]
    fn mixed_feature_widths_are_rejected() {
        let samples = vec![sample(3, 40, 1, 7), sample(3, 13, 1, 8)];
        assert!(matches!(
            collate(&samples),
            Err(CtcError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn batch_indices_chunk_in_order() {
        assert_eq!(batch_indices(5, 2), vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert!(batch_indices(0, 3).is_empty());
    }
}
