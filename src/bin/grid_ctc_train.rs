use std::path::PathBuf;

use clap::Parser;
use grid_ctc::pipeline::defaults::TracingObserver;
use grid_ctc::{
    Alphabet, BatchReport, BiLstmCtcModel, ComputeContext, CtcError, EpochSummary,
    SampleHarvester, SampleLoader, SequenceEncoder, SkipPolicy, TrainerBuilder, TrainingConfig,
    TrainingObserver,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "grid-ctc-train")]
#[command(about = "Train a bidirectional LSTM CTC recognizer on a GRID-style corpus")]
struct Args {
    #[arg(long, env = "GRID_CTC_AUDIO_ROOT", default_value = "data/audio")]
    audio_root: PathBuf,
    #[arg(long, env = "GRID_CTC_TRANSCRIPT_ROOT", default_value = "data/transcripts")]
    transcript_root: PathBuf,
    /// JSON training config; flags below override its fields.
    #[arg(long, env = "GRID_CTC_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "GRID_CTC_EPOCHS")]
    epochs: Option<usize>,
    #[arg(long, env = "GRID_CTC_BATCH_SIZE")]
    batch_size: Option<usize>,
    #[arg(long, env = "GRID_CTC_LEARNING_RATE")]
    learning_rate: Option<f64>,
    #[arg(long, env = "GRID_CTC_DEVICE")]
    device: Option<String>,
    #[arg(long, env = "GRID_CTC_SHUFFLE_SEED")]
    shuffle_seed: Option<u64>,
    /// Speaker directory to leave out, e.g. `s21`. Repeatable.
    #[arg(long = "exclude-speaker")]
    exclude_speakers: Vec<String>,
    #[arg(long, env = "GRID_CTC_SKIP_BAD_SAMPLES", default_value_t = false)]
    skip_bad_samples: bool,
    #[arg(long, env = "GRID_CTC_LIMIT")]
    limit: Option<usize>,
    #[arg(long, env = "GRID_CTC_INIT_WEIGHTS")]
    init_weights: Option<PathBuf>,
    #[arg(long, env = "GRID_CTC_SAVE_WEIGHTS")]
    save_weights: Option<PathBuf>,
    /// Writes a per-utterance greedy decoding report after training.
    #[arg(long, env = "GRID_CTC_EVAL_REPORT")]
    eval_report: Option<PathBuf>,
}

/// Progress bar per epoch, with every event also forwarded to tracing.
struct ProgressObserver {
    bar: Option<ProgressBar>,
    inner: TracingObserver,
}

impl ProgressObserver {
    fn new() -> Self {
        Self {
            bar: None,
            inner: TracingObserver,
        }
    }
}

impl TrainingObserver for ProgressObserver {
    fn on_epoch_start(&mut self, epoch: usize, batch_count: usize) {
        self.inner.on_epoch_start(epoch, batch_count);
        let bar = ProgressBar::new(batch_count as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        bar.set_message(format!("epoch {epoch}"));
        self.bar = Some(bar);
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        self.inner.on_batch_end(report);
        if let Some(bar) = &self.bar {
            bar.set_message(format!("epoch {} loss {:.4}", report.epoch, report.loss));
            bar.inc(1);
        }
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!(
                "epoch {} average loss {:.4}",
                summary.epoch, summary.average_loss
            ));
        }
        self.inner.on_epoch_end(summary);
    }

    fn on_sample_skipped(&mut self, sample_id: &str, error: &CtcError) {
        match &self.bar {
            Some(bar) => bar.suspend(|| self.inner.on_sample_skipped(sample_id, error)),
            None => self.inner.on_sample_skipped(sample_id, error),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "training failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    let harvester = SampleHarvester::new(&args.audio_root, &args.transcript_root)
        .with_excluded_speakers(&config.exclude_speakers);
    let mut pairs = harvester
        .harvest()
        .map_err(|err| format!("Failed to harvest corpus: {err}"))?;
    if let Some(limit) = args.limit {
        pairs.truncate(limit);
    }
    if pairs.is_empty() {
        return Err(format!(
            "No utterances found under '{}' and '{}'",
            args.audio_root.display(),
            args.transcript_root.display()
        ));
    }

    let context = ComputeContext::from_name(&config.device)
        .map_err(|err| format!("Failed to select device: {err}"))?;
    let alphabet = Alphabet::grid();
    let mut model = BiLstmCtcModel::new(
        &config.encoder,
        config.features.mel_bins,
        alphabet.len(),
        &context,
    )
    .map_err(|err| format!("Failed to build model: {err}"))?;
    if let Some(path) = &args.init_weights {
        model
            .load_weights(path)
            .map_err(|err| format!("Failed to load weights '{}': {err}", path.display()))?;
    }

    let loader = SampleLoader::new(&alphabet, &config.features);
    let sources = loader.sources(&pairs);

    let mut trainer = TrainerBuilder::new(config)
        .with_context(context)
        .with_alphabet(alphabet)
        .with_encoder(Box::new(model))
        .with_observer(Box::new(ProgressObserver::new()))
        .build()
        .map_err(|err| format!("Failed to build trainer: {err}"))?;

    let summaries = trainer
        .train(&sources)
        .map_err(|err| format!("Training failed: {err}"))?;
    if let Some(last) = summaries.last() {
        tracing::info!(
            epochs = summaries.len(),
            final_loss = last.average_loss,
            "training finished"
        );
    }

    if let Some(path) = &args.save_weights {
        trainer
            .encoder()
            .save_weights(path)
            .map_err(|err| format!("Failed to save weights '{}': {err}", path.display()))?;
        tracing::info!(path = %path.display(), "weights saved");
    }

    if let Some(path) = &args.eval_report {
        let report = trainer
            .evaluate(&sources)
            .map_err(|err| format!("Evaluation failed: {err}"))?;
        let json = serde_json::to_string_pretty(&report)
            .map_err(|err| format!("Failed to serialize report: {err}"))?;
        std::fs::write(path, json)
            .map_err(|err| format!("Failed to write report '{}': {err}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            mean_cer = report.mean_cer.unwrap_or(f64::NAN),
            "evaluation report written"
        );
    }

    Ok(())
}

fn resolve_config(args: &Args) -> Result<TrainingConfig, String> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if args.shuffle_seed.is_some() {
        config.shuffle_seed = args.shuffle_seed;
    }
    if !args.exclude_speakers.is_empty() {
        config.exclude_speakers = args.exclude_speakers.clone();
    }
    if args.skip_bad_samples {
        config.skip_policy = SkipPolicy::Skip;
    }
    config
        .validate()
        .map_err(|err| format!("Invalid configuration: {err}"))?;
    Ok(config)
}
