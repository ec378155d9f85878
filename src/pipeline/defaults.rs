use crate::error::CtcError;
use crate::pipeline::traits::{BatchReport, EpochSummary, TrainingObserver};

/// Emits training progress as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TrainingObserver for TracingObserver {
    fn on_epoch_start(&mut self, epoch: usize, batch_count: usize) {
        tracing::info!(epoch, batch_count, "epoch started");
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        tracing::debug!(
            epoch = report.epoch,
            batch = report.batch_index,
            of = report.batch_count,
            batch_size = report.batch_size,
            loss = report.loss,
            "batch done"
        );
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) {
        tracing::info!(
            epoch = summary.epoch,
            average_loss = summary.average_loss,
            batches = summary.batches,
            skipped_samples = summary.skipped_samples,
            "epoch complete"
        );
    }

    fn on_sample_skipped(&mut self, sample_id: &str, error: &CtcError) {
        tracing::warn!(sample = sample_id, error = %error, "skipping sample");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl TrainingObserver for SilentObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_observer_accepts_every_event() {
        let mut observer = TracingObserver;
        observer.on_epoch_start(0, 3);
        observer.on_batch_end(&BatchReport {
            epoch: 0,
            batch_index: 0,
            batch_count: 3,
            batch_size: 2,
            loss: 1.5,
        });
        observer.on_sample_skipped("s1/bbaf2n", &CtcError::EmptyBatch);
        observer.on_epoch_end(&EpochSummary {
            epoch: 0,
            average_loss: 1.5,
            batches: 3,
            skipped_samples: 1,
        });
    }

    #[test]
    fn observers_are_usable_as_trait_objects() {
        let observers: Vec<Box<dyn TrainingObserver>> =
            vec![Box::new(TracingObserver), Box::new(SilentObserver)];
        for mut observer in observers {
            observer.on_epoch_start(1, 0);
        }
    }
}
