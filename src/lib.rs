//! docker-sweep - Disk Space Reclamation for Container Hosts
//!
//! docker-sweep removes stopped containers, unused images and, in deep-clean mode,
//! orphaned volumes. It only removes what the current runtime state proves is
//! unused: nothing a surviving container references is ever a candidate.
//!
//! ## Architecture
//!
//! - `runtime` / `docker`: typed access to the container runtime
//! - `classifier`: pure decision logic over one inventory snapshot
//! - `executor`: applies or simulates removals in container → image → volume order
//! - `controller`: check → classify → execute → report, as an explicit state machine

pub mod classifier;
pub mod config;
pub mod controller;
pub mod docker;
pub mod executor;
pub mod inventory;
pub mod logging;
pub mod report;
pub mod runtime;
pub mod time;

// Re-export commonly used items
pub use classifier::{classify, classify_with, CandidatePlan, ClassifyOptions, DeletionCandidate, Mode, Reason};
pub use config::Config;
pub use controller::{run, FatalError, RunConfig, RunController, RunPhase};
pub use docker::DockerCli;
pub use executor::Executor;
pub use inventory::{ContainerRecord, ContainerState, ImageRecord, Inventory, ResourceKind, VolumeRecord};
pub use report::{KindCounts, Outcome, RunReport};
pub use runtime::{ApiVersion, Removal, Runtime, RuntimeError};
pub use time::AgeFilter;
