use candle_core::Tensor;
use candle_nn::rnn::Direction;
use candle_nn::{Dropout, LSTMConfig, VarBuilder, LSTM, RNN};

use crate::config::EncoderConfig;

fn lstm_config(layer_idx: usize, direction: Direction) -> LSTMConfig {
    let mut config = LSTMConfig::default();
    config.layer_idx = layer_idx;
    config.direction = direction;
    config
}

/// A forward and a backward LSTM sharing one input; weights follow the
/// PyTorch layout (`weight_ih_l{n}`, `weight_ih_l{n}_reverse`, ...).
struct BiLstmLayer {
    forward_dir: LSTM,
    backward_dir: LSTM,
}

impl BiLstmLayer {
    fn load(layer_idx: usize, in_dim: usize, hidden: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            forward_dir: candle_nn::lstm(
                in_dim,
                hidden,
                lstm_config(layer_idx, Direction::Forward),
                vb.clone(),
            )?,
            backward_dir: candle_nn::lstm(
                in_dim,
                hidden,
                lstm_config(layer_idx, Direction::Backward),
                vb,
            )?,
        })
    }

    /// `(batch, time, in)` -> `(batch, time, 2 * hidden)`; every frame sees past and future.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = xs.contiguous()?;
        let forward_states = self.forward_dir.seq(&xs)?;
        let backward_states = self.backward_dir.seq(&xs)?;
        self.forward_dir
            .bidirectional_states_to_tensor(&forward_states, &backward_states)
    }
}

pub(crate) struct BiLstmEncoder {
    layers: Vec<BiLstmLayer>,
    dropout: Dropout,
    output_dim: usize,
}

impl BiLstmEncoder {
    pub(crate) fn load(
        cfg: &EncoderConfig,
        feature_dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            let in_dim = if i == 0 { feature_dim } else { 2 * cfg.hidden_width };
            layers.push(BiLstmLayer::load(i, in_dim, cfg.hidden_width, vb.clone())?);
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(cfg.dropout),
            output_dim: 2 * cfg.hidden_width,
        })
    }

    pub(crate) fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub(crate) fn forward(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                h = self.dropout.forward(&h, train)?;
            }
            h = layer.forward(&h)?;
        }
        Ok(h)
    }
}
