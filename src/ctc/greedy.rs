use candle_core::Tensor;

use crate::ctc::alphabet::Alphabet;
use crate::error::CtcError;

/// Best-path CTC decoding: per-frame argmax, then collapse repeats and drop blanks.
///
/// This is an approximation of the most likely labelling; there is no beam
/// search and no language model.
#[derive(Debug, Clone)]
pub struct GreedyDecoder {
    alphabet: Alphabet,
}

impl GreedyDecoder {
    pub fn new(alphabet: &Alphabet) -> Self {
        Self {
            alphabet: alphabet.clone(),
        }
    }

    /// Decodes every row of `(batch, time, classes)` scores over the full time axis.
    pub fn decode(&self, scores: &Tensor) -> Result<Vec<String>, CtcError> {
        let rows = scores_to_host(scores)?;
        Ok(rows
            .iter()
            .map(|frames| self.decode_frames(frames))
            .collect())
    }

    /// Like [`decode`](Self::decode) but ignores frames past each row's true length.
    pub fn decode_with_lengths(
        &self,
        scores: &Tensor,
        input_lengths: &[usize],
    ) -> Result<Vec<String>, CtcError> {
        let rows = scores_to_host(scores)?;
        if rows.len() != input_lengths.len() {
            return Err(CtcError::length_mismatch(format!(
                "{} score rows for {} input lengths",
                rows.len(),
                input_lengths.len()
            )));
        }
        Ok(rows
            .iter()
            .zip(input_lengths)
            .map(|(frames, &len)| self.decode_frames(&frames[..len.min(frames.len())]))
            .collect())
    }

    pub fn decode_frames(&self, frames: &[Vec<f32>]) -> String {
        let path: Vec<u32> = frames.iter().map(|row| argmax(row)).collect();
        self.alphabet
            .decode_labels(&collapse_path(&path, self.alphabet.blank_id()))
    }
}

/// Collapses a frame-level label path: repeats merge, blanks vanish and reset
/// repeat tracking so `a a _ a` yields two `a`.
pub fn collapse_path(path: &[u32], blank_id: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut prev = blank_id;
    for &id in path {
        if id != blank_id && id != prev {
            out.push(id);
        }
        prev = id;
    }
    out
}

/// Index of the highest score; ties go to the lowest index.
fn argmax(row: &[f32]) -> u32 {
    let mut best = 0usize;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best as u32
}

fn scores_to_host(scores: &Tensor) -> Result<Vec<Vec<Vec<f32>>>, CtcError> {
    scores
        .to_dtype(candle_core::DType::F32)
        .and_then(|t| t.to_vec3::<f32>())
        .map_err(|e| CtcError::runtime("scores to host", e))
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    const A: u32 = 1;
    const B: u32 = 2;

    fn one_hot_rows(path: &[u32], classes: usize) -> Vec<Vec<f32>> {
        path.iter()
            .map(|&id| {
                let mut row = vec![-5.0f32; classes];
                row[id as usize] = 5.0;
                row
            })
            .collect()
    }

    #[test]
    fn blank_between_repeats_allows_second_emission() {
        assert_eq!(collapse_path(&[A, A, 0, A], 0), vec![A, A]);
    }

    #[test]
    fn plain_repeats_collapse() {
        assert_eq!(collapse_path(&[A, A, A], 0), vec![A]);
    }

    #[test]
    fn blanks_only_path_is_empty() {
        assert!(collapse_path(&[0, 0, 0], 0).is_empty());
    }

    #[test]
    fn leading_symbol_is_emitted() {
        assert_eq!(collapse_path(&[B, 0, A, A, B], 0), vec![B, A, B]);
    }

    #[test]
    fn argmax_tie_prefers_lowest_index() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), 1);
        assert_eq!(argmax(&[2.0, 2.0]), 0);
    }

    #[test]
    fn decode_frames_renders_text() {
        let decoder = GreedyDecoder::new(&Alphabet::grid());
        let frames = one_hot_rows(&[A, A, 0, A], 29);
        assert_eq!(decoder.decode_frames(&frames), "aa");
        let frames = one_hot_rows(&[A, A, A], 29);
        assert_eq!(decoder.decode_frames(&frames), "a");
    }

    #[test]
    fn decode_batch_tensor() {
        let decoder = GreedyDecoder::new(&Alphabet::grid());
        let mut data = Vec::new();
        for row in one_hot_rows(&[3, 0, 1, 20, 20], 29) {
            data.extend(row);
        }
        for row in one_hot_rows(&[2, 2, 0, 0, 0], 29) {
            data.extend(row);
        }
        let scores = Tensor::from_vec(data, (2, 5, 29), &Device::Cpu).unwrap();
        assert_eq!(decoder.decode(&scores).unwrap(), vec!["cat", "b"]);
    }

    #[test]
    fn decode_with_lengths_ignores_padding() {
        let decoder = GreedyDecoder::new(&Alphabet::grid());
        let mut data = Vec::new();
        for row in one_hot_rows(&[1, 0, 2, 3], 29) {
            data.extend(row);
        }
        let scores = Tensor::from_vec(data, (1, 4, 29), &Device::Cpu).unwrap();
        assert_eq!(
            decoder.decode_with_lengths(&scores, &[2]).unwrap(),
            vec!["a"]
        );
        assert!(decoder.decode_with_lengths(&scores, &[2, 2]).is_err());
    }
}
