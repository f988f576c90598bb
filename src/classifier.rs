//! Decides which resources are safe to delete.
//!
//! Classification is a pure function of one inventory snapshot and the run's
//! mode. The result is a [`CandidatePlan`] holding one list per resource kind,
//! so the container → image → volume removal order is part of the type rather
//! than an accident of call order.
//!
//! ## Rules
//!
//! 1. Containers that are `exited` or `dead` are candidates. `created`
//!    containers never ran and are left alone.
//! 2. Every other container *survives*; the images they run on and the volumes
//!    they mount are off limits.
//! 3. Conservative mode removes dangling images only: untagged, not the parent
//!    of another image, not backing a survivor. Deep-clean mode removes every
//!    image no survivor references, tagged or not.
//! 4. Volumes are only touched in deep-clean mode, and only when dangling.

use crate::inventory::{images_used_by, short_id, ContainerState, Inventory, ResourceKind};
use crate::runtime::Removal;
use crate::time::AgeFilter;

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Stopped containers and dangling images; volumes are never touched
    #[default]
    Conservative,
    /// Also unreferenced tagged images and dangling volumes
    DeepClean,
}

impl Mode {
    pub fn sweeps_volumes(self) -> bool {
        self == Mode::DeepClean
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Conservative => f.write_str("conservative"),
            Mode::DeepClean => f.write_str("deep-clean"),
        }
    }
}

/// Why a resource was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    StoppedContainer(ContainerState),
    DanglingImage,
    UnreferencedImage,
    DanglingVolume,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::StoppedContainer(state) => write!(f, "container is {}", state),
            Reason::DanglingImage => f.write_str("untagged image with no children"),
            Reason::UnreferencedImage => f.write_str("no container uses this image"),
            Reason::DanglingVolume => f.write_str("volume is not attached to any container"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    pub removal: Removal,
    pub reason: Reason,
}

impl DeletionCandidate {
    pub fn kind(&self) -> ResourceKind {
        self.removal.kind()
    }
}

impl fmt::Display for DeletionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.removal, self.reason)
    }
}

/// Knobs beyond the mode that narrow what gets classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub age_filter: AgeFilter,
    /// False when the runtime is too old for volume operations
    pub volumes_supported: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        ClassifyOptions {
            age_filter: AgeFilter::default(),
            volumes_supported: true,
        }
    }
}

/// Ordered deletion plan: every container, then every image, then every volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    containers: Vec<DeletionCandidate>,
    images: Vec<DeletionCandidate>,
    volumes: Vec<DeletionCandidate>,
    held_back_by_age: usize,
    reclaimable_bytes: u64,
}

impl CandidatePlan {
    /// Candidates in removal order.
    pub fn iter(&self) -> impl Iterator<Item = &DeletionCandidate> {
        self.containers
            .iter()
            .chain(self.images.iter())
            .chain(self.volumes.iter())
    }

    pub fn of_kind(&self, kind: ResourceKind) -> &[DeletionCandidate] {
        match kind {
            ResourceKind::Container => &self.containers,
            ResourceKind::Image => &self.images,
            ResourceKind::Volume => &self.volumes,
        }
    }

    pub fn len(&self) -> usize {
        self.containers.len() + self.images.len() + self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Targets in removal order, handy for logging and assertions
    pub fn targets(&self) -> Vec<&str> {
        self.iter().map(|c| c.removal.target()).collect()
    }

    /// Stopped containers and unused images the age filter kept
    pub fn held_back_by_age(&self) -> usize {
        self.held_back_by_age
    }

    /// Upper bound on space freed by the image candidates; shared layers are counted once per image
    pub fn reclaimable_bytes(&self) -> u64 {
        self.reclaimable_bytes
    }
}

pub fn classify(inventory: &Inventory, mode: Mode) -> CandidatePlan {
    classify_with(inventory, mode, &ClassifyOptions::default())
}

pub fn classify_with(inventory: &Inventory, mode: Mode, options: &ClassifyOptions) -> CandidatePlan {
    let mut plan = CandidatePlan::default();
    let age = &options.age_filter;
    let cascade_volumes = mode.sweeps_volumes() && options.volumes_supported;

    let mut survivors = Vec::new();
    for container in &inventory.containers {
        if container.state.is_stopped() {
            if age.passes(container.created_at) {
                plan.containers.push(DeletionCandidate {
                    removal: Removal::Container {
                        id: container.id.clone(),
                        with_anonymous_volumes: cascade_volumes,
                    },
                    reason: Reason::StoppedContainer(container.state),
                });
                continue;
            }
            plan.held_back_by_age += 1;
        }
        survivors.push(container);
    }

    let referenced_images = images_used_by(survivors.iter().copied());
    let mounted_volumes: HashSet<&str> = survivors
        .iter()
        .flat_map(|container| container.volumes.iter().map(String::as_str))
        .collect();

    let parents: HashSet<&str> = inventory
        .images
        .iter()
        .filter_map(|image| image.parent_id.as_deref())
        .collect();

    // Dangling images first, then (deep clean) everything else nobody uses.
    let (dangling, unreferenced): (Vec<_>, Vec<_>) = inventory
        .images
        .iter()
        .filter(|image| !referenced_images.contains(image.id.as_str()))
        .partition(|image| image.is_untagged() && !parents.contains(image.id.as_str()));

    let selected = dangling
        .into_iter()
        .map(|image| (image, Reason::DanglingImage))
        .chain(
            unreferenced
                .into_iter()
                .filter(|_| mode == Mode::DeepClean)
                .map(|image| (image, Reason::UnreferencedImage)),
        );

    for (image, reason) in selected {
        if !age.passes(image.created_at) {
            plan.held_back_by_age += 1;
            continue;
        }
        plan.reclaimable_bytes += image.size;
        // Removing by id fails for an image tagged in several repositories;
        // removing every tag deletes it once the last one goes.
        let tags: Vec<String> = image.tags().map(str::to_string).collect();
        plan.images.push(DeletionCandidate {
            removal: Removal::Image {
                id: image.id.clone(),
                tags: if tags.len() > 1 { tags } else { Vec::new() },
            },
            reason,
        });
    }

    if cascade_volumes {
        for volume in &inventory.volumes {
            if volume.dangling && !mounted_volumes.contains(volume.name.as_str()) {
                plan.volumes.push(DeletionCandidate {
                    removal: Removal::Volume {
                        name: volume.name.clone(),
                    },
                    reason: Reason::DanglingVolume,
                });
            }
        }
    }

    tracing::debug!(
        mode = %mode,
        containers = plan.containers.len(),
        images = plan.images.len(),
        volumes = plan.volumes.len(),
        "classified inventory"
    );
    for candidate in plan.iter() {
        tracing::trace!(resource = short_id(candidate.removal.target()), "{}", candidate);
    }

    plan
}
