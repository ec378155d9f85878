use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use crate::config::TrainingConfig;
use crate::ctc::alphabet::Alphabet;
use crate::error::CtcError;
use crate::model::ctc_model::BiLstmCtcModel;
use crate::pipeline::defaults::TracingObserver;
use crate::pipeline::device::ComputeContext;
use crate::pipeline::runtime::{Trainer, TrainerParts};
use crate::pipeline::traits::{SequenceEncoder, TrainingObserver};

pub struct TrainerBuilder {
    config: TrainingConfig,
    context: Option<ComputeContext>,
    alphabet: Option<Alphabet>,
    encoder: Option<Box<dyn SequenceEncoder>>,
    observer: Option<Box<dyn TrainingObserver>>,
}

impl TrainerBuilder {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            context: None,
            alphabet: None,
            encoder: None,
            observer: None,
        }
    }

    /// Overrides the device named by `config.device`.
    pub fn with_context(mut self, context: ComputeContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_alphabet(mut self, alphabet: Alphabet) -> Self {
        self.alphabet = Some(alphabet);
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn SequenceEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TrainingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Trainer, CtcError> {
        self.config.validate()?;
        let context = match self.context {
            Some(context) => context,
            None => ComputeContext::from_name(&self.config.device)?,
        };
        let alphabet = self.alphabet.unwrap_or_else(Alphabet::grid);
        let feature_dim = self.config.features.mel_bins;

        let encoder = if let Some(encoder) = self.encoder {
            encoder
        } else {
            Box::new(BiLstmCtcModel::new(
                &self.config.encoder,
                feature_dim,
                alphabet.len(),
                &context,
            )?)
        };
        if encoder.num_classes() != alphabet.len() {
            return Err(CtcError::invalid_input(format!(
                "encoder emits {} classes but the alphabet has {}",
                encoder.num_classes(),
                alphabet.len()
            )));
        }
        if encoder.feature_dim() != feature_dim {
            return Err(CtcError::invalid_input(format!(
                "encoder expects {} features per frame but mel_bins is {feature_dim}",
                encoder.feature_dim()
            )));
        }

        let optimizer = AdamW::new(
            encoder.trainable_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                ..ParamsAdamW::default()
            },
        )
        .map_err(|e| CtcError::runtime("create AdamW optimizer", e))?;

        tracing::info!(
            device = context.label(),
            batch_size = self.config.batch_size,
            epochs = self.config.epochs,
            learning_rate = self.config.learning_rate,
            reduction = ?self.config.reduction,
            "trainer ready"
        );

        Ok(Trainer::from_parts(TrainerParts {
            config: self.config,
            context,
            alphabet,
            encoder,
            observer: self
                .observer
                .unwrap_or_else(|| Box::new(TracingObserver)),
            optimizer,
        }))
    }
}
