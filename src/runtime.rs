//! The boundary to the container runtime: inventory queries and removals.

use crate::inventory::{images_used_by, short_id, ContainerRecord, ImageRecord, ResourceKind, VolumeRecord};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Runtime API version, e.g. `1.43`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        ApiVersion { major, minor }
    }
}

impl FromStr for ApiVersion {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || RuntimeError::Parse(format!("invalid API version '{}'", s));

        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(ApiVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A single destructive call against the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Container {
        id: String,
        /// Also remove the anonymous volumes this container created (`docker rm -v`)
        with_anonymous_volumes: bool,
    },
    Image {
        id: String,
        /// Repository tags to remove by name. Empty means remove by id, which
        /// the runtime refuses for an image tagged in several repositories.
        tags: Vec<String>,
    },
    Volume {
        name: String,
    },
}

impl Removal {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Removal::Container { .. } => ResourceKind::Container,
            Removal::Image { .. } => ResourceKind::Image,
            Removal::Volume { .. } => ResourceKind::Volume,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Removal::Container { id, .. } | Removal::Image { id, .. } => id,
            Removal::Volume { name } => name,
        }
    }
}

impl fmt::Display for Removal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), short_id(self.target()))?;
        if let Removal::Container {
            with_anonymous_volumes: true,
            ..
        } = self
        {
            f.write_str(" (with anonymous volumes)")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("container runtime did not answer within {}s", .0.as_secs())]
    Unresponsive(Duration),

    #[error("runtime API {found} is older than {required}, the minimum for volume operations")]
    VersionUnsupported {
        found: ApiVersion,
        required: ApiVersion,
    },

    #[error("still in use: {0}")]
    Busy(String),

    #[error("no such resource: {0}")]
    NotFound(String),

    #[error("runtime refused the request: {0}")]
    Failed(String),

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

impl RuntimeError {
    /// Errors that mean the runtime itself is gone, as opposed to one resource misbehaving.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            RuntimeError::Unreachable(_) | RuntimeError::Unresponsive(_)
        )
    }
}

/// Typed access to a container runtime.
///
/// All calls block until the runtime answers. Only `api_version` is bounded
/// by a timeout, so a missing runtime is told apart from a slow one.
pub trait Runtime {
    /// Liveness check that also reports the API feature level.
    fn api_version(&self) -> Result<ApiVersion, RuntimeError>;

    fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError>;

    fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError>;

    fn list_volumes(&self) -> Result<Vec<VolumeRecord>, RuntimeError>;

    /// Image ids backing at least one existing container, whatever its state.
    fn images_referenced_by_containers(&self) -> Result<HashSet<String>, RuntimeError> {
        let containers = self.list_containers()?;
        let referenced = images_used_by(&containers)
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(referenced)
    }

    fn remove(&self, removal: &Removal) -> Result<(), RuntimeError>;
}
