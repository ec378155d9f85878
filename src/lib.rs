pub mod config;
pub mod ctc;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod types;

pub use config::{EncoderConfig, FeatureConfig, Reduction, SkipPolicy, TrainingConfig};
pub use ctc::alphabet::{Alphabet, Symbol, BLANK_ID};
pub use ctc::greedy::GreedyDecoder;
pub use ctc::loss::CtcLoss;
pub use data::collate::collate;
pub use data::corpus::{SampleHarvester, SamplePaths};
pub use data::loader::SampleLoader;
pub use error::CtcError;
pub use model::ctc_model::BiLstmCtcModel;
pub use pipeline::builder::TrainerBuilder;
pub use pipeline::device::ComputeContext;
pub use pipeline::runtime::{EvaluationReport, Trainer, TrainerState, UtteranceResult};
pub use pipeline::traits::{
    BatchReport, EpochSummary, SampleSource, SequenceEncoder, TrainingObserver,
};
pub use types::{Batch, FeatureSequence, LabelSequence, Sample};
