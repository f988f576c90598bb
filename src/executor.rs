//! Applies a deletion plan, or simulates it in a dry run.

use crate::classifier::{CandidatePlan, DeletionCandidate};
use crate::report::{Outcome, RunReport};
use crate::runtime::{Runtime, RuntimeError};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

pub struct Executor<'a> {
    runtime: &'a dyn Runtime,
    dry_run: bool,
    progress: ProgressBar,
}

impl<'a> Executor<'a> {
    pub fn new(runtime: &'a dyn Runtime, dry_run: bool) -> Self {
        Executor {
            runtime,
            dry_run,
            progress: ProgressBar::hidden(),
        }
    }

    /// Show a progress bar on stderr while removing
    pub fn with_progress(mut self, show: bool) -> Self {
        if show {
            self.progress = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
            {
                self.progress.set_style(style);
            }
        }
        self
    }

    /// Process every candidate in plan order, at most once each, recording outcomes in `report`.
    ///
    /// A gone or busy resource is skipped and the batch continues. Losing the
    /// runtime aborts the rest of the batch; `report` still reflects every
    /// removal that already happened.
    pub fn execute(&self, plan: &CandidatePlan, report: &mut RunReport) -> Result<(), RuntimeError> {
        self.progress.set_length(plan.len() as u64);

        let result = plan
            .iter()
            .try_for_each(|candidate| self.process(candidate, report));

        self.progress.finish_and_clear();
        result
    }

    /// Log with the progress bar cleared so the console line isn't drawn over it
    fn log(&self, event: impl FnOnce()) {
        self.progress.suspend(event);
    }

    fn process(&self, candidate: &DeletionCandidate, report: &mut RunReport) -> Result<(), RuntimeError> {
        let kind = candidate.kind();
        self.progress.set_message(candidate.removal.to_string());

        let outcome = if self.dry_run {
            self.log(|| info!("Would remove {}", candidate));
            Outcome::WouldRemove
        } else {
            match self.runtime.remove(&candidate.removal) {
                Ok(()) => {
                    self.log(|| info!("Removed {}", candidate));
                    Outcome::Removed
                }
                Err(RuntimeError::NotFound(_)) => {
                    self.log(|| info!("Already gone, skipping {}", candidate.removal));
                    Outcome::Skipped
                }
                Err(RuntimeError::Busy(message)) => {
                    self.log(|| warn!("Still in use, skipping {}: {}", candidate.removal, message));
                    Outcome::Skipped
                }
                Err(err) if err.is_connection_lost() => {
                    self.progress.abandon();
                    return Err(err);
                }
                Err(err) => {
                    self.log(|| warn!("Failed to remove {}: {}", candidate.removal, err));
                    Outcome::Failed
                }
            }
        };

        report.record(kind, outcome);
        self.progress.inc(1);
        Ok(())
    }
}
