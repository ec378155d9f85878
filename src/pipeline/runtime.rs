use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::{SkipPolicy, TrainingConfig};
use crate::ctc::alphabet::Alphabet;
use crate::ctc::greedy::GreedyDecoder;
use crate::ctc::loss::CtcLoss;
use crate::ctc::metrics::character_error_rate;
use crate::data::collate::{batch_indices, collate};
use crate::error::CtcError;
use crate::pipeline::device::ComputeContext;
use crate::pipeline::traits::{
    BatchReport, EpochSummary, SampleSource, SequenceEncoder, TrainingObserver,
};
use crate::types::{Batch, Sample};

/// Where the trainer is in its epoch/batch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Forward,
    Loss,
    Backward,
    OptimizerStep,
    EpochComplete,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtteranceResult {
    pub id: String,
    pub reference: String,
    pub hypothesis: String,
    /// `None` when the reference transcript encodes to nothing.
    pub cer: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub utterances: Vec<UtteranceResult>,
    pub skipped_samples: usize,
    pub mean_cer: Option<f64>,
}

/// Single-threaded trainer: the only writer of the encoder's parameters.
pub struct Trainer {
    config: TrainingConfig,
    context: ComputeContext,
    alphabet: Alphabet,
    encoder: Box<dyn SequenceEncoder>,
    observer: Box<dyn TrainingObserver>,
    optimizer: AdamW,
    loss: CtcLoss,
    decoder: GreedyDecoder,
    state: TrainerState,
    epochs_completed: usize,
}

pub(crate) struct TrainerParts {
    pub config: TrainingConfig,
    pub context: ComputeContext,
    pub alphabet: Alphabet,
    pub encoder: Box<dyn SequenceEncoder>,
    pub observer: Box<dyn TrainingObserver>,
    pub optimizer: AdamW,
}

struct LoadedBatch {
    samples: Vec<Sample>,
    ids: Vec<String>,
    skipped: usize,
}

impl Trainer {
    pub(crate) fn from_parts(parts: TrainerParts) -> Self {
        let loss = CtcLoss::new(parts.alphabet.blank_id(), parts.config.reduction);
        let decoder = GreedyDecoder::new(&parts.alphabet);
        Self {
            config: parts.config,
            context: parts.context,
            alphabet: parts.alphabet,
            encoder: parts.encoder,
            observer: parts.observer,
            optimizer: parts.optimizer,
            loss,
            decoder,
            state: TrainerState::Idle,
            epochs_completed: 0,
        }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn encoder(&self) -> &dyn SequenceEncoder {
        self.encoder.as_ref()
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    /// Runs `config.epochs` epochs and ends in [`TrainerState::Done`].
    pub fn train<S: SampleSource>(&mut self, sources: &[S]) -> Result<Vec<EpochSummary>, CtcError> {
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for _ in 0..self.config.epochs {
            summaries.push(self.train_epoch(sources)?);
        }
        self.state = TrainerState::Done;
        Ok(summaries)
    }

    /// One pass over `sources`, one optimizer step per batch.
    pub fn train_epoch<S: SampleSource>(&mut self, sources: &[S]) -> Result<EpochSummary, CtcError> {
        if sources.is_empty() {
            return Err(CtcError::invalid_input("no training samples"));
        }
        let epoch = self.epochs_completed;
        let order = self.epoch_order(sources.len(), epoch);
        let groups: Vec<Vec<usize>> = batch_indices(order.len(), self.config.batch_size)
            .into_iter()
            .map(|group| group.into_iter().map(|i| order[i]).collect())
            .collect();
        self.observer.on_epoch_start(epoch, groups.len());

        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        let mut skipped_samples = 0usize;
        for (batch_index, group) in groups.iter().enumerate() {
            let loaded = self.load_group(sources, group)?;
            skipped_samples += loaded.skipped;
            if loaded.samples.is_empty() {
                continue;
            }
            let batch = collate(&loaded.samples)?;
            let loss = self.step(&batch)?;
            loss_sum += f64::from(loss);
            batches += 1;
            self.observer.on_batch_end(&BatchReport {
                epoch,
                batch_index,
                batch_count: groups.len(),
                batch_size: batch.batch_size(),
                loss,
            });
        }
        if batches == 0 {
            return Err(CtcError::invalid_input(format!(
                "every sample of epoch {epoch} was skipped"
            )));
        }

        let summary = EpochSummary {
            epoch,
            average_loss: (loss_sum / batches as f64) as f32,
            batches,
            skipped_samples,
        };
        self.epochs_completed += 1;
        self.state = TrainerState::EpochComplete;
        self.observer.on_epoch_end(&summary);
        Ok(summary)
    }

    /// Forward, loss, backward and one AdamW update on a collated batch.
    /// Returns the loss computed with the pre-update parameters.
    /// A failed step leaves the trainer `Idle`.
    pub fn step(&mut self, batch: &Batch) -> Result<f32, CtcError> {
        self.run_step(batch).inspect_err(|_| self.state = TrainerState::Idle)
    }

    fn run_step(&mut self, batch: &Batch) -> Result<f32, CtcError> {
        let tensors = batch.to_tensors(self.context.device())?;

        self.state = TrainerState::Forward;
        let scores = self.encoder.forward(&tensors.features, true)?;

        self.state = TrainerState::Loss;
        let loss = self.loss.forward(
            &scores,
            &tensors.flattened_labels,
            &tensors.input_lengths,
            &tensors.target_lengths,
        )?;
        let value = scalar(&loss)?;

        // A fresh gradient store per step stands in for zeroing accumulators.
        self.state = TrainerState::Backward;
        let grads = loss
            .backward()
            .map_err(|e| CtcError::runtime("ctc backward", e))?;

        self.state = TrainerState::OptimizerStep;
        self.optimizer
            .step(&grads)
            .map_err(|e| CtcError::runtime("optimizer step", e))?;

        self.state = TrainerState::Idle;
        Ok(value)
    }

    /// Loss of `batch` in inference mode, without touching parameters.
    pub fn batch_loss(&self, batch: &Batch) -> Result<f32, CtcError> {
        let tensors = batch.to_tensors(self.context.device())?;
        let scores = self.encoder.forward(&tensors.features, false)?;
        let loss = self.loss.forward(
            &scores,
            &tensors.flattened_labels,
            &tensors.input_lengths,
            &tensors.target_lengths,
        )?;
        scalar(&loss)
    }

    /// Greedy transcripts for already-loaded samples, in input order.
    pub fn transcribe(&self, samples: &[Sample]) -> Result<Vec<String>, CtcError> {
        let mut out = Vec::with_capacity(samples.len());
        for chunk in samples.chunks(self.config.batch_size.max(1)) {
            let batch = collate(chunk)?;
            let tensors = batch.to_tensors(self.context.device())?;
            let scores = self.encoder.forward(&tensors.features, false)?;
            out.extend(
                self.decoder
                    .decode_with_lengths(&scores, &tensors.input_lengths)?,
            );
        }
        Ok(out)
    }

    /// Decodes every source in inference mode and scores it against its own labels.
    pub fn evaluate<S: SampleSource>(&mut self, sources: &[S]) -> Result<EvaluationReport, CtcError> {
        let mut utterances = Vec::with_capacity(sources.len());
        let mut skipped_samples = 0;
        for group in batch_indices(sources.len(), self.config.batch_size) {
            let loaded = self.load_group(sources, &group)?;
            skipped_samples += loaded.skipped;
            if loaded.samples.is_empty() {
                continue;
            }
            let hypotheses = self.transcribe(&loaded.samples)?;
            for ((id, sample), hypothesis) in loaded.ids.into_iter().zip(&loaded.samples).zip(hypotheses) {
                let reference = self.alphabet.decode_labels(&sample.labels);
                let cer = character_error_rate(&reference, &hypothesis);
                utterances.push(UtteranceResult {
                    id,
                    reference,
                    hypothesis,
                    cer,
                });
            }
        }

        let scored: Vec<f64> = utterances.iter().filter_map(|u| u.cer).collect();
        let mean_cer = (!scored.is_empty()).then(|| scored.iter().sum::<f64>() / scored.len() as f64);
        tracing::info!(
            utterances = utterances.len(),
            skipped_samples,
            mean_cer = mean_cer.unwrap_or(f64::NAN),
            "evaluation complete"
        );
        Ok(EvaluationReport {
            utterances,
            skipped_samples,
            mean_cer,
        })
    }

    fn epoch_order(&self, len: usize, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if let Some(seed) = self.config.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Loads the sources named by `group`; sample errors follow the skip policy.
    fn load_group<S: SampleSource>(
        &mut self,
        sources: &[S],
        group: &[usize],
    ) -> Result<LoadedBatch, CtcError> {
        let mut loaded = LoadedBatch {
            samples: Vec::with_capacity(group.len()),
            ids: Vec::with_capacity(group.len()),
            skipped: 0,
        };
        for &index in group {
            let source = &sources[index];
            match source.load() {
                Ok(sample) => {
                    loaded.samples.push(sample);
                    loaded.ids.push(source.id());
                }
                Err(err) if err.is_sample_error() && self.config.skip_policy == SkipPolicy::Skip => {
                    self.observer.on_sample_skipped(&source.id(), &err);
                    loaded.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(loaded)
    }
}

fn scalar(loss: &Tensor) -> Result<f32, CtcError> {
    loss.to_scalar::<f32>()
        .map_err(|e| CtcError::runtime("loss to host", e))
}
