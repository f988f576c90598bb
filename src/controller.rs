//! Drives one end-to-end cleanup pass.
//!
//! ```text
//! Init -> Checking -> Classifying -> Executing -> Reporting -> Done
//!            |             |             |
//!            +-------------+-------------+--> Failed
//! ```
//!
//! Nothing destructive happens before `Executing`, so a failed check or
//! inventory fetch leaves the host untouched.

use crate::classifier::{classify_with, ClassifyOptions, Mode};
use crate::executor::Executor;
use crate::inventory::{Inventory, ResourceKind};
use crate::report::RunReport;
use crate::runtime::{ApiVersion, Runtime, RuntimeError};
use crate::time::AgeFilter;

use std::fmt;
use std::time::Instant;
use tracing::{error, info, warn};

/// Everything a run needs to know, fixed before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub mode: Mode,
    pub dry_run: bool,
    pub age_filter: AgeFilter,
    pub min_volume_api: ApiVersion,
    /// Abort instead of degrading when volume cleanup is unsupported
    pub strict_volume_support: bool,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: Mode::Conservative,
            dry_run: false,
            age_filter: AgeFilter::default(),
            min_volume_api: ApiVersion::new(1, 21),
            strict_volume_support: false,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Checking,
    Classifying,
    Executing,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Checking => "checking",
            RunPhase::Classifying => "classifying",
            RunPhase::Executing => "executing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("runtime check failed: {0}")]
    Check(RuntimeError),

    #[error("could not read runtime inventory: {0}")]
    Inventory(RuntimeError),

    #[error("runtime lost after {} of {} removals: {source}", .report.processed(), .report.candidates())]
    Execution {
        source: RuntimeError,
        /// What had been done before the runtime went away
        report: Box<RunReport>,
    },
}

impl FatalError {
    /// The phase the run was in when it failed
    pub fn phase(&self) -> RunPhase {
        match self {
            FatalError::Check(_) => RunPhase::Checking,
            FatalError::Inventory(_) => RunPhase::Classifying,
            FatalError::Execution { .. } => RunPhase::Executing,
        }
    }

    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            FatalError::Execution { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub struct RunController<'a> {
    runtime: &'a dyn Runtime,
    config: &'a RunConfig,
    phase: RunPhase,
}

impl<'a> RunController<'a> {
    pub fn new(runtime: &'a dyn Runtime, config: &'a RunConfig) -> Self {
        RunController {
            runtime,
            config,
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, next: RunPhase) {
        tracing::debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    fn fail(&mut self, err: FatalError) -> FatalError {
        error!(phase = %self.phase, "{}", err);
        self.enter(RunPhase::Failed);
        err
    }

    pub fn run(&mut self) -> Result<RunReport, FatalError> {
        let started = Instant::now();
        let config = self.config;
        info!(
            mode = %config.mode,
            dry_run = config.dry_run,
            "Starting cleanup run"
        );
        if let Some(cutoff) = config.age_filter.cutoff() {
            info!("Only removing resources created before {}", cutoff.to_rfc3339());
        }

        self.enter(RunPhase::Checking);
        let volumes_supported = self.check()?;

        self.enter(RunPhase::Classifying);
        let include_volumes = config.mode.sweeps_volumes() && volumes_supported;
        let inventory = match Inventory::fetch(self.runtime, include_volumes) {
            Ok(inventory) => inventory,
            Err(err) => return Err(self.fail(FatalError::Inventory(err))),
        };
        info!(
            containers = inventory.containers.len(),
            images = inventory.images.len(),
            volumes = inventory.volumes.len(),
            "Inventory captured"
        );
        let options = ClassifyOptions {
            age_filter: config.age_filter,
            volumes_supported,
        };
        let plan = classify_with(&inventory, config.mode, &options);
        info!(
            containers = plan.of_kind(ResourceKind::Container).len(),
            images = plan.of_kind(ResourceKind::Image).len(),
            volumes = plan.of_kind(ResourceKind::Volume).len(),
            "Removal candidates selected"
        );

        self.enter(RunPhase::Executing);
        let mut report = RunReport::new(config.mode, config.dry_run);
        report.volumes_skipped = config.mode.sweeps_volumes() && !volumes_supported;
        report.plan(&plan);

        let executor = Executor::new(self.runtime, config.dry_run).with_progress(config.show_progress);
        if let Err(source) = executor.execute(&plan, &mut report) {
            report.elapsed = started.elapsed();
            return Err(self.fail(FatalError::Execution {
                source,
                report: Box::new(report),
            }));
        }

        self.enter(RunPhase::Reporting);
        report.elapsed = started.elapsed();
        for line in report.summary_lines() {
            info!("{}", line);
        }

        self.enter(RunPhase::Done);
        Ok(report)
    }

    /// Liveness and feature-level check. Returns whether volume operations are available.
    fn check(&mut self) -> Result<bool, FatalError> {
        let version = match self.runtime.api_version() {
            Ok(version) => version,
            Err(err) => return Err(self.fail(FatalError::Check(err))),
        };
        info!(api_version = %version, "Container runtime reachable");

        let required = self.config.min_volume_api;
        if version >= required {
            return Ok(true);
        }
        if !self.config.mode.sweeps_volumes() {
            return Ok(false);
        }

        let err = RuntimeError::VersionUnsupported {
            found: version,
            required,
        };
        if self.config.strict_volume_support {
            return Err(self.fail(FatalError::Check(err)));
        }
        warn!("{}; skipping volume cleanup (degraded mode)", err);
        Ok(false)
    }
}

/// Run one cleanup pass against `runtime`
pub fn run(runtime: &dyn Runtime, config: &RunConfig) -> Result<RunReport, FatalError> {
    RunController::new(runtime, config).run()
}
