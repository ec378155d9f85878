use std::path::Path;

use candle_core::{DType, Module, Tensor, Var};
use candle_nn::{Dropout, Linear, VarBuilder, VarMap};

use crate::config::EncoderConfig;
use crate::error::CtcError;
use crate::model::encoder::BiLstmEncoder;
use crate::pipeline::device::ComputeContext;
use crate::pipeline::traits::SequenceEncoder;

/// Bidirectional LSTM stack with a per-frame linear head over the alphabet.
pub struct BiLstmCtcModel {
    varmap: VarMap,
    encoder: BiLstmEncoder,
    dropout: Dropout,
    head: Linear,
    feature_dim: usize,
    num_classes: usize,
}

impl BiLstmCtcModel {
    pub fn new(
        cfg: &EncoderConfig,
        feature_dim: usize,
        num_classes: usize,
        ctx: &ComputeContext,
    ) -> Result<Self, CtcError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, ctx.device());
        let encoder = BiLstmEncoder::load(cfg, feature_dim, vb.pp("encoder"))
            .map_err(|e| CtcError::runtime("build encoder", e))?;
        let head = candle_nn::linear(encoder.output_dim(), num_classes, vb.pp("head"))
            .map_err(|e| CtcError::runtime("build ctc head", e))?;

        tracing::info!(
            feature_dim,
            num_classes,
            hidden_width = cfg.hidden_width,
            layers = cfg.num_layers,
            parameters = count_parameters(&varmap),
            "bidirectional LSTM CTC model initialized"
        );

        Ok(Self {
            varmap,
            encoder,
            dropout: Dropout::new(cfg.dropout),
            head,
            feature_dim,
            num_classes,
        })
    }

    /// Overwrites the parameters with a safetensors checkpoint written by [`save`](Self::save).
    pub fn load_weights(&mut self, path: &Path) -> Result<(), CtcError> {
        self.varmap
            .load(path)
            .map_err(|e| CtcError::runtime("load safetensors", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), CtcError> {
        self.varmap
            .save(path)
            .map_err(|e| CtcError::runtime("save safetensors", e))
    }

    pub fn parameter_count(&self) -> usize {
        count_parameters(&self.varmap)
    }
}

fn count_parameters(varmap: &VarMap) -> usize {
    varmap
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum()
}

impl SequenceEncoder for BiLstmCtcModel {
    fn forward(&self, features: &Tensor, train: bool) -> Result<Tensor, CtcError> {
        let (_, _, f) = features
            .dims3()
            .map_err(|e| CtcError::runtime("encoder input dims3", e))?;
        if f != self.feature_dim {
            return Err(CtcError::invalid_input(format!(
                "model expects {} features per frame, got {f}",
                self.feature_dim
            )));
        }
        self.encoder
            .forward(features, train)
            .and_then(|h| self.dropout.forward(&h, train))
            .and_then(|h| self.head.forward(&h))
            .map_err(|e| CtcError::runtime("forward pass", e))
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn save_weights(&self, path: &Path) -> Result<(), CtcError> {
        self.save(path)
    }
}
