use candle_core::{DType, Device, Tensor, D};

use crate::config::Reduction;
use crate::error::CtcError;

/// Finite stand-in for log(0); keeps the lattice free of `inf - inf`.
const LOG_ZERO: f32 = -1.0e30;
/// Any per-sample NLL above this only reached the end state through `LOG_ZERO`.
const SATURATED_NLL: f32 = 1.0e29;

/// Frames needed to emit `labels`: one per label plus a separating blank
/// between each pair of identical neighbours.
pub fn min_frames_required(labels: &[u32]) -> usize {
    let repeats = labels.windows(2).filter(|w| w[0] == w[1]).count();
    labels.len() + repeats
}

/// Connectionist temporal classification loss over a padded batch.
///
/// Scores are unnormalized `(batch, time, classes)`; the forward algorithm runs
/// batch-major on the blank-extended targets, each row frozen once its input
/// length is reached. Samples whose targets cannot fit their input length
/// contribute zero loss and zero gradient.
#[derive(Debug, Clone)]
pub struct CtcLoss {
    blank: u32,
    reduction: Reduction,
}

impl CtcLoss {
    pub fn new(blank: u32, reduction: Reduction) -> Self {
        Self { blank, reduction }
    }

    pub fn blank(&self) -> u32 {
        self.blank
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Reduced scalar loss.
    pub fn forward(
        &self,
        scores: &Tensor,
        flattened_labels: &[u32],
        input_lengths: &[usize],
        target_lengths: &[usize],
    ) -> Result<Tensor, CtcError> {
        let nll = self.per_sample(scores, flattened_labels, input_lengths, target_lengths)?;
        let batch_size = input_lengths.len() as f64;
        let reduced = match self.reduction {
            Reduction::Mean => nll.sum_all().and_then(|s| s / batch_size),
            Reduction::Sum => nll.sum_all(),
            Reduction::MeanByTargetLength => {
                let denom: Vec<f32> = target_lengths.iter().map(|&u| u.max(1) as f32).collect();
                Tensor::from_vec(denom, input_lengths.len(), nll.device())
                    .and_then(|d| nll.div(&d))
                    .and_then(|t| t.mean_all())
            }
        };
        reduced.map_err(|e| CtcError::runtime("ctc reduction", e))
    }

    /// Negative log-likelihood per batch row, shape `(batch,)`.
    pub fn per_sample(
        &self,
        scores: &Tensor,
        flattened_labels: &[u32],
        input_lengths: &[usize],
        target_lengths: &[usize],
    ) -> Result<Tensor, CtcError> {
        let (b, t_max, classes) = scores
            .dims3()
            .map_err(|e| CtcError::runtime("ctc scores dims3", e))?;
        self.check_inputs(b, t_max, classes, flattened_labels, input_lengths, target_lengths)?;
        if t_max == 0 {
            tracing::debug!(batch = b, "ctc batch has no frames; zeroing its loss");
            return Tensor::zeros(b, DType::F32, scores.device())
                .map_err(|e| CtcError::runtime("ctc zero-frame loss", e));
        }

        let log_probs = scores
            .to_dtype(DType::F32)
            .and_then(|s| candle_nn::ops::log_softmax(&s, D::Minus1))
            .map_err(|e| CtcError::runtime("ctc log_softmax", e))?;

        let lattice = Lattice::build(self.blank, flattened_labels, input_lengths, target_lengths);
        let nll = lattice
            .run(&log_probs, t_max)
            .map_err(|e| CtcError::runtime("ctc forward lattice", e))?;

        let host = nll
            .to_vec1::<f32>()
            .map_err(|e| CtcError::runtime("ctc nll to host", e))?;
        let keep: Vec<u8> = host
            .iter()
            .zip(&lattice.feasible)
            .enumerate()
            .map(|(row, (&v, &feasible))| {
                let ok = feasible && v.is_finite() && v < SATURATED_NLL;
                if !ok {
                    tracing::debug!(
                        row,
                        input_len = input_lengths[row],
                        target_len = target_lengths[row],
                        "ctc sample infeasible; zeroing its loss"
                    );
                }
                u8::from(ok)
            })
            .collect();
        let device = nll.device().clone();
        Tensor::from_vec(keep, b, &device)
            .and_then(|mask| {
                let zeros = Tensor::zeros(b, DType::F32, &device)?;
                mask.where_cond(&nll, &zeros)
            })
            .map_err(|e| CtcError::runtime("ctc zero infinity", e))
    }

    fn check_inputs(
        &self,
        b: usize,
        t_max: usize,
        classes: usize,
        flattened_labels: &[u32],
        input_lengths: &[usize],
        target_lengths: &[usize],
    ) -> Result<(), CtcError> {
        if b == 0 {
            return Err(CtcError::EmptyBatch);
        }
        if self.blank as usize >= classes {
            return Err(CtcError::invalid_input(format!(
                "blank index {} must be below class count {classes}",
                self.blank
            )));
        }
        if input_lengths.len() != b || target_lengths.len() != b {
            return Err(CtcError::length_mismatch(format!(
                "batch of {b} rows with {} input lengths and {} target lengths",
                input_lengths.len(),
                target_lengths.len()
            )));
        }
        let total: usize = target_lengths.iter().sum();
        if total != flattened_labels.len() {
            return Err(CtcError::length_mismatch(format!(
                "target lengths sum to {total} but {} labels were given",
                flattened_labels.len()
            )));
        }
        if let Some(&len) = input_lengths.iter().find(|&&len| len > t_max) {
            return Err(CtcError::length_mismatch(format!(
                "input length {len} exceeds padded time {t_max}"
            )));
        }
        if let Some(&label) = flattened_labels
            .iter()
            .find(|&&l| l == self.blank || l as usize >= classes)
        {
            return Err(CtcError::invalid_input(format!(
                "target label {label} is blank or outside {classes} classes"
            )));
        }
        Ok(())
    }
}

/// Host-side description of the extended-label lattice for one batch.
struct Lattice {
    batch: usize,
    states: usize,
    extended: Vec<u32>,
    skip: Vec<u8>,
    input_lengths: Vec<usize>,
    target_lengths: Vec<usize>,
    feasible: Vec<bool>,
}

impl Lattice {
    fn build(
        blank: u32,
        flattened_labels: &[u32],
        input_lengths: &[usize],
        target_lengths: &[usize],
    ) -> Self {
        let batch = input_lengths.len();
        let max_u = target_lengths.iter().copied().max().unwrap_or(0);
        let states = 2 * max_u + 1;
        let mut extended = vec![blank; batch * states];
        let mut skip = vec![0u8; batch * states];
        let mut feasible = Vec::with_capacity(batch);

        let mut offset = 0;
        for row in 0..batch {
            let labels = &flattened_labels[offset..offset + target_lengths[row]];
            offset += target_lengths[row];
            let ext = &mut extended[row * states..(row + 1) * states];
            for (k, &label) in labels.iter().enumerate() {
                ext[2 * k + 1] = label;
            }
            for s in 2..states {
                if ext[s] != blank && ext[s] != ext[s - 2] {
                    skip[row * states + s] = 1;
                }
            }
            feasible.push(input_lengths[row] > 0 && min_frames_required(labels) <= input_lengths[row]);
        }

        Self {
            batch,
            states,
            extended,
            skip,
            input_lengths: input_lengths.to_vec(),
            target_lengths: target_lengths.to_vec(),
            feasible,
        }
    }

    fn row_mask(&self, device: &Device, pred: impl Fn(usize, usize) -> bool) -> candle_core::Result<Tensor> {
        let mut mask = Vec::with_capacity(self.batch * self.states);
        for row in 0..self.batch {
            for s in 0..self.states {
                mask.push(u8::from(pred(row, s)));
            }
        }
        Tensor::from_vec(mask, (self.batch, self.states), device)
    }

    fn run(&self, log_probs: &Tensor, t_max: usize) -> candle_core::Result<Tensor> {
        let device = log_probs.device();
        let (b, s_len) = (self.batch, self.states);

        let index = Tensor::from_vec(self.extended.clone(), (b, 1, s_len), device)?
            .broadcast_as((b, t_max, s_len))?
            .contiguous()?;
        // (batch, time, states): log-prob of each extended label at each frame.
        let emissions = log_probs.contiguous()?.gather(&index, 2)?;

        let log_zero = Tensor::full(LOG_ZERO, (b, s_len), device)?;
        let skip_mask = Tensor::from_vec(self.skip.clone(), (b, s_len), device)?;

        let init_mask = self.row_mask(device, |row, s| {
            s == 0 || (s == 1 && self.target_lengths[row] > 0)
        })?;
        let mut alpha = init_mask.where_cond(&emissions.narrow(1, 0, 1)?.squeeze(1)?, &log_zero)?;

        let longest = self.input_lengths.iter().copied().max().unwrap_or(0);
        for t in 1..longest.min(t_max) {
            let stay = alpha.clone();
            let advance = shift_right(&alpha, 1, &log_zero)?;
            let skip = skip_mask.where_cond(&shift_right(&alpha, 2, &log_zero)?, &log_zero)?;
            let candidate = (log_add_exp(&[&stay, &advance, &skip])?
                + emissions.narrow(1, t, 1)?.squeeze(1)?)?;
            let alive = self.row_mask(device, |row, _| self.input_lengths[row] > t)?;
            alpha = alive.where_cond(&candidate, &alpha)?;
        }

        let end_blank: Vec<u32> = self.target_lengths.iter().map(|&u| (2 * u) as u32).collect();
        let end_label: Vec<u32> = self
            .target_lengths
            .iter()
            .map(|&u| (2 * u).saturating_sub(1) as u32)
            .collect();
        let has_label: Vec<u8> = self.target_lengths.iter().map(|&u| u8::from(u > 0)).collect();

        let last_blank = alpha
            .gather(&Tensor::from_vec(end_blank, (b, 1), device)?, 1)?
            .squeeze(1)?;
        let last_label = alpha
            .gather(&Tensor::from_vec(end_label, (b, 1), device)?, 1)?
            .squeeze(1)?;
        let last_label = Tensor::from_vec(has_label, b, device)?
            .where_cond(&last_label, &Tensor::full(LOG_ZERO, b, device)?)?;

        log_add_exp(&[&last_blank, &last_label])?.neg()
    }
}

/// Shifts columns right by `by`, filling the vacated columns from `fill`.
fn shift_right(alpha: &Tensor, by: usize, fill: &Tensor) -> candle_core::Result<Tensor> {
    let (_, s_len) = alpha.dims2()?;
    if by >= s_len {
        return Ok(fill.clone());
    }
    Tensor::cat(&[&fill.narrow(1, 0, by)?, &alpha.narrow(1, 0, s_len - by)?], 1)
}

/// Element-wise `log(sum(exp(x_i)))` with the max factored out.
fn log_add_exp(xs: &[&Tensor]) -> candle_core::Result<Tensor> {
    let mut m = xs[0].clone();
    for x in &xs[1..] {
        m = m.maximum(*x)?;
    }
    let mut acc = (xs[0] - &m)?.exp()?;
    for x in &xs[1..] {
        acc = (acc + (*x - &m)?.exp()?)?;
    }
    m + acc.log()?
}

/// Reference forward algorithm for one sequence of log-probabilities.
///
/// Returns `f64::INFINITY` when the labels cannot be emitted in `log_probs.len()` frames.
pub fn ctc_nll_host(log_probs: &[Vec<f32>], labels: &[u32], blank: u32) -> f64 {
    let t_len = log_probs.len();
    if t_len == 0 {
        return f64::INFINITY;
    }
    let mut ext = vec![blank; 2 * labels.len() + 1];
    for (k, &label) in labels.iter().enumerate() {
        ext[2 * k + 1] = label;
    }
    let s_len = ext.len();

    let mut prev = vec![f64::NEG_INFINITY; s_len];
    let mut curr = vec![f64::NEG_INFINITY; s_len];
    prev[0] = log_probs[0][ext[0] as usize] as f64;
    if s_len > 1 {
        prev[1] = log_probs[0][ext[1] as usize] as f64;
    }

    for row in &log_probs[1..] {
        for s in 0..s_len {
            let mut acc = prev[s];
            if s >= 1 {
                acc = log_add(acc, prev[s - 1]);
            }
            if s >= 2 && ext[s] != blank && ext[s] != ext[s - 2] {
                acc = log_add(acc, prev[s - 2]);
            }
            curr[s] = acc + row[ext[s] as usize] as f64;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let mut ll = prev[s_len - 1];
    if s_len >= 2 {
        ll = log_add(ll, prev[s_len - 2]);
    }
    -ll
}

fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Var};

    use super::*;

    fn log_softmax_rows(scores: &Tensor) -> Vec<Vec<Vec<f32>>> {
        candle_nn::ops::log_softmax(scores, D::Minus1)
            .unwrap()
            .to_vec3()
            .unwrap()
    }

    #[test]
    fn host_single_frame_single_label() {
        let lp = vec![vec![0.5f32.ln(), 0.5f32.ln()]];
        let nll = ctc_nll_host(&lp, &[1], 0);
        assert!((nll - 2f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn host_two_frames_sums_three_paths() {
        // a a, _ a, a _ each with probability 0.25.
        let lp = vec![vec![0.5f32.ln(), 0.5f32.ln()]; 2];
        let nll = ctc_nll_host(&lp, &[1], 0);
        assert!((nll + 0.75f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn host_repeat_needs_separating_blank() {
        let lp = vec![vec![0.5f32.ln(), 0.5f32.ln()]; 2];
        assert!(ctc_nll_host(&lp, &[1, 1], 0).is_infinite());
        assert_eq!(min_frames_required(&[1, 1]), 3);
        assert_eq!(min_frames_required(&[1, 2, 2, 2]), 6);
    }

    #[test]
    fn batch_lattice_matches_host_reference() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (2, 7, 5), &device).unwrap();
        let labels = [1u32, 2, 2, 3, 4];
        let input_lengths = [7usize, 5];
        let target_lengths = [3usize, 2];

        let loss = CtcLoss::new(0, Reduction::Sum);
        let per_sample: Vec<f32> = loss
            .per_sample(&scores, &labels, &input_lengths, &target_lengths)
            .unwrap()
            .to_vec1()
            .unwrap();

        let lp = log_softmax_rows(&scores);
        let first = ctc_nll_host(&lp[0][..7], &[1, 2, 2], 0);
        let second = ctc_nll_host(&lp[1][..5], &[3, 4], 0);
        assert!((per_sample[0] as f64 - first).abs() < 1e-3, "{} vs {first}", per_sample[0]);
        assert!((per_sample[1] as f64 - second).abs() < 1e-3, "{} vs {second}", per_sample[1]);
    }

    #[test]
    fn empty_target_is_all_blank_path() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (1, 4, 3), &device).unwrap();
        let loss = CtcLoss::new(0, Reduction::Sum);
        let nll: Vec<f32> = loss
            .per_sample(&scores, &[], &[4], &[0])
            .unwrap()
            .to_vec1()
            .unwrap();
        let lp = log_softmax_rows(&scores);
        let expected = ctc_nll_host(&lp[0], &[], 0);
        assert!((nll[0] as f64 - expected).abs() < 1e-4);
    }

    #[test]
    fn degenerate_sample_is_zeroed_not_infinite() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (1, 2, 4), &device).unwrap();
        let loss = CtcLoss::new(0, Reduction::Mean);
        // Three repeated labels need five frames.
        let value: f32 = loss
            .forward(&scores, &[2, 2, 2], &[2], &[3])
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(value.is_finite());
        assert!(value >= 0.0);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn zero_frame_batch_has_zero_loss() {
        let scores = Tensor::zeros((2, 0, 4), DType::F32, &Device::Cpu).unwrap();
        let loss = CtcLoss::new(0, Reduction::Mean);
        let per: Vec<f32> = loss
            .per_sample(&scores, &[1], &[0, 0], &[1, 0])
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(per, vec![0.0, 0.0]);
        let value: f32 = loss
            .forward(&scores, &[1], &[0, 0], &[1, 0])
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn degenerate_row_does_not_poison_the_batch() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (2, 6, 4), &device).unwrap();
        let labels = [1u32, 2, 3, 3, 3, 3];
        let loss = CtcLoss::new(0, Reduction::Mean);
        let per: Vec<f32> = loss
            .per_sample(&scores, &labels, &[6, 3], &[2, 4])
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(per[0] > 0.0 && per[0].is_finite());
        assert_eq!(per[1], 0.0);

        let mean: f32 = loss
            .forward(&scores, &labels, &[6, 3], &[2, 4])
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((mean - per[0] / 2.0).abs() < 1e-5);
    }

    #[test]
    fn gradients_are_finite_and_zero_for_infeasible_rows() {
        let device = Device::Cpu;
        let var = Var::from_tensor(&Tensor::randn(0f32, 1f32, (2, 3, 4), &device).unwrap()).unwrap();
        let loss = CtcLoss::new(0, Reduction::Mean)
            .forward(var.as_tensor(), &[1, 2, 3, 3, 3], &[3, 3], &[2, 3])
            .unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(var.as_tensor()).expect("scores gradient");
        let rows: Vec<Vec<Vec<f32>>> = grad.to_vec3().unwrap();
        assert!(rows.iter().flatten().flatten().all(|g| g.is_finite()));
        assert!(rows[0].iter().flatten().any(|g| *g != 0.0));
        assert!(rows[1].iter().flatten().all(|g| *g == 0.0));
    }

    #[test]
    fn padded_frames_do_not_change_the_loss() {
        let device = Device::Cpu;
        let short = Tensor::randn(0f32, 1f32, (1, 4, 5), &device).unwrap();
        let padding = Tensor::randn(0f32, 1f32, (1, 3, 5), &device).unwrap();
        let padded = Tensor::cat(&[&short, &padding], 1).unwrap();
        let loss = CtcLoss::new(0, Reduction::Sum);
        let a: f32 = loss.forward(&short, &[1, 2], &[4], &[2]).unwrap().to_scalar().unwrap();
        let b: f32 = loss.forward(&padded, &[1, 2], &[4], &[2]).unwrap().to_scalar().unwrap();
        assert!((a - b).abs() < 1e-5);
    }

    #[test]
    fn grid_sized_batch_gives_one_finite_scalar() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (2, 50, 29), &device).unwrap();
        let labels = [19u32, 5, 20, 1, 2, 9, 14, 5];
        let loss = CtcLoss::new(0, Reduction::Mean)
            .forward(&scores, &labels, &[50, 30], &[5, 3])
            .unwrap();
        assert_eq!(loss.rank(), 0);
        let value: f32 = loss.to_scalar().unwrap();
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn reduction_by_target_length() {
        let device = Device::Cpu;
        let scores = Tensor::randn(0f32, 1f32, (2, 6, 4), &device).unwrap();
        let labels = [1u32, 2, 3, 1, 2, 3];
        let per: Vec<f32> = CtcLoss::new(0, Reduction::Sum)
            .per_sample(&scores, &labels, &[6, 6], &[2, 4])
            .unwrap()
            .to_vec1()
            .unwrap();
        let scaled: f32 = CtcLoss::new(0, Reduction::MeanByTargetLength)
            .forward(&scores, &labels, &[6, 6], &[2, 4])
            .unwrap()
            .to_scalar()
            .unwrap();
        let expected = (per[0] / 2.0 + per[1] / 4.0) / 2.0;
        assert!((scaled - expected).abs() < 1e-5);
    }

    #[test]
    fn rejects_inconsistent_lengths_and_blank_targets() {
        let device = Device::Cpu;
        let scores = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        let loss = CtcLoss::new(0, Reduction::Mean);
        assert!(matches!(
            loss.forward(&scores, &[1, 2], &[3], &[1]),
            Err(CtcError::LengthMismatch { .. })
        ));
        assert!(matches!(
            loss.forward(&scores, &[1], &[4], &[1]),
            Err(CtcError::LengthMismatch { .. })
        ));
        assert!(matches!(
            loss.forward(&scores, &[0], &[3], &[1]),
            Err(CtcError::InvalidInput { .. })
        ));
    }
}
