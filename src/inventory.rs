//! Point-in-time snapshot of the containers, images and volumes a runtime holds.

use crate::runtime::{Runtime, RuntimeError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The three kinds of resource the sweeper knows how to remove.
///
/// The derived ordering is the removal order: containers hold references
/// that keep images and volumes alive, so they always go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Image,
    Volume,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Container,
        ResourceKind::Image,
        ResourceKind::Volume,
    ];

    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Container => "containers",
            ResourceKind::Image => "images",
            ResourceKind::Volume => "volumes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Container => "container",
            ResourceKind::Image => "image",
            ResourceKind::Volume => "volume",
        };
        f.write_str(name)
    }
}

/// Container lifecycle states as reported by `docker inspect` (`.State.Status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Restarting,
    Running,
    Removing,
    Paused,
    Exited,
    Dead,
}

impl ContainerState {
    /// Exited and dead containers are the only ones eligible for removal.
    /// `created` containers never ran and are left for manual review.
    pub fn is_stopped(self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Dead)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerState::Created => "created",
            ContainerState::Restarting => "restarting",
            ContainerState::Running => "running",
            ContainerState::Removing => "removing",
            ContainerState::Paused => "paused",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub created_at: DateTime<Utc>,
    /// Full image id (`sha256:...`), not the image name the container was started from
    pub image_id: String,
    /// Names of the volumes this container mounts
    pub volumes: Vec<String>,
}

impl ContainerRecord {
    pub fn new(id: &str, state: ContainerState, image_id: &str) -> Self {
        ContainerRecord {
            id: id.to_string(),
            name: id.to_string(),
            state,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            image_id: image_id.to_string(),
            volumes: Vec::new(),
        }
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn mounting(mut self, volumes: &[&str]) -> Self {
        self.volumes = volumes.iter().map(|v| v.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<String>,
    /// Size in bytes, including layers shared with other images
    pub size: u64,
}

impl ImageRecord {
    pub fn new(id: &str, repo_tags: &[&str]) -> Self {
        ImageRecord {
            id: id.to_string(),
            repo_tags: repo_tags.iter().map(|t| t.to_string()).collect(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            parent_id: None,
            size: 0,
        }
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn child_of(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn sized(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// True when the image has no usable repository tag.
    /// Older runtimes report untagged images as `<none>:<none>` instead of an empty list.
    pub fn is_untagged(&self) -> bool {
        self.tags().next().is_none()
    }

    /// Repository tags, without the `<none>:<none>` placeholder.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.repo_tags
            .iter()
            .map(String::as_str)
            .filter(|tag| *tag != "<none>:<none>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    /// False for the 64-hex-digit names the runtime generates for anonymous volumes
    pub is_named: bool,
    /// Not attached to any existing container
    pub dangling: bool,
}

impl VolumeRecord {
    pub fn new(name: &str, dangling: bool) -> Self {
        VolumeRecord {
            name: name.to_string(),
            is_named: !is_generated_volume_name(name),
            dangling,
        }
    }
}

/// Anonymous volumes are named with 64 lowercase hex digits.
pub fn is_generated_volume_name(name: &str) -> bool {
    name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Ids of the images backing `containers`.
pub fn images_used_by<'a>(containers: impl IntoIterator<Item = &'a ContainerRecord>) -> HashSet<&'a str> {
    containers
        .into_iter()
        .map(|container| container.image_id.as_str())
        .collect()
}

/// Shorten a runtime id for display: drop the digest prefix and keep 12 characters.
pub fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    if is_generated_volume_name(id) {
        &id[..12]
    } else {
        id
    }
}

/// Everything the classifier looks at, captured once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub containers: Vec<ContainerRecord>,
    pub images: Vec<ImageRecord>,
    pub volumes: Vec<VolumeRecord>,
}

impl Inventory {
    /// Pull a fresh snapshot from the runtime.
    /// Volumes are only listed when the run is going to sweep them.
    pub fn fetch(runtime: &dyn Runtime, include_volumes: bool) -> Result<Self, RuntimeError> {
        let containers = runtime.list_containers()?;
        let images = runtime.list_images()?;
        let volumes = if include_volumes {
            runtime.list_volumes()?
        } else {
            Vec::new()
        };

        Ok(Inventory {
            containers,
            images,
            volumes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.images.is_empty() && self.volumes.is_empty()
    }
}
