//! In-memory `Runtime` that behaves like a small docker host.
//!
//! Lets the integration tests exercise classification and execution without a
//! daemon. It enforces the same reference rules the real runtime does: an image
//! backing a container or parenting another image cannot be removed, nor can a
//! mounted volume, and an image tagged in several repositories cannot be
//! removed by id. Volume danglingness is derived from container mounts.

#![allow(dead_code)]

use docker_sweep::inventory::is_generated_volume_name;
use docker_sweep::{ApiVersion, ContainerRecord, ImageRecord, Removal, Runtime, RuntimeError, VolumeRecord};

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

#[derive(Default)]
struct HostState {
    containers: Vec<ContainerRecord>,
    images: Vec<ImageRecord>,
    volumes: Vec<String>,
}

pub struct InMemoryRuntime {
    api_version: ApiVersion,
    reachable: bool,
    state: RefCell<HostState>,
    busy: HashSet<String>,
    /// Successful removals allowed before the runtime "goes away"
    disconnect_after: Option<usize>,
    succeeded: Cell<usize>,
    calls: RefCell<Vec<Removal>>,
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        InMemoryRuntime {
            api_version: ApiVersion::new(1, 43),
            reachable: true,
            state: RefCell::new(HostState::default()),
            busy: HashSet::new(),
            disconnect_after: None,
            succeeded: Cell::new(0),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_container(self, container: ContainerRecord) -> Self {
        self.state.borrow_mut().containers.push(container);
        self
    }

    pub fn with_image(self, image: ImageRecord) -> Self {
        self.state.borrow_mut().images.push(image);
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state.borrow_mut().volumes.push(name.to_string());
        self
    }

    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = version;
        self
    }

    /// Every call fails as if the socket were absent
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Removing this resource fails with `Busy`
    pub fn with_busy(mut self, target: &str) -> Self {
        self.busy.insert(target.to_string());
        self
    }

    /// Lose the connection after `removals` successful removals
    pub fn disconnect_after(mut self, removals: usize) -> Self {
        self.disconnect_after = Some(removals);
        self
    }

    /// Every destructive call issued, in order, including ones that failed
    pub fn removal_calls(&self) -> Vec<Removal> {
        self.calls.borrow().clone()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state.borrow().volumes.clone()
    }

    fn check_connection(&self) -> Result<(), RuntimeError> {
        let lost = self
            .disconnect_after
            .is_some_and(|limit| self.succeeded.get() >= limit);
        if !self.reachable || lost {
            return Err(RuntimeError::Unreachable(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&self, removal: &Removal) -> Result<(), RuntimeError> {
        let mut state = self.state.borrow_mut();
        let target = removal.target();

        match removal {
            Removal::Container {
                id,
                with_anonymous_volumes,
            } => {
                let index = state
                    .containers
                    .iter()
                    .position(|c| &c.id == id)
                    .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", id)))?;
                if self.busy.contains(target) {
                    return Err(RuntimeError::Busy(format!("container {} is busy", id)));
                }
                let container = state.containers.remove(index);
                if *with_anonymous_volumes {
                    let still_mounted: HashSet<String> = state
                        .containers
                        .iter()
                        .flat_map(|c| c.volumes.iter().cloned())
                        .collect();
                    state.volumes.retain(|name| {
                        !(container.volumes.contains(name)
                            && is_generated_volume_name(name)
                            && !still_mounted.contains(name))
                    });
                }
            }
            Removal::Image { id, tags } => {
                let index = state
                    .images
                    .iter()
                    .position(|i| &i.id == id)
                    .ok_or_else(|| RuntimeError::NotFound(format!("No such image: {}", id)))?;
                if let Some(user) = state.containers.iter().find(|c| &c.image_id == id) {
                    return Err(RuntimeError::Busy(format!(
                        "conflict: image is being used by container {}",
                        user.id
                    )));
                }
                if state.images.iter().any(|i| i.parent_id.as_ref() == Some(id)) {
                    return Err(RuntimeError::Busy(
                        "conflict: image has dependent child images".to_string(),
                    ));
                }
                if self.busy.contains(target) {
                    return Err(RuntimeError::Busy(format!("image {} is busy", id)));
                }

                let image = &mut state.images[index];
                if tags.is_empty() {
                    if image.tags().count() > 1 {
                        return Err(RuntimeError::Busy(format!(
                            "conflict: unable to delete {} (must be forced) - image is referenced in multiple repositories",
                            id
                        )));
                    }
                } else {
                    if let Some(missing) = tags.iter().find(|tag| !image.repo_tags.contains(tag)) {
                        return Err(RuntimeError::NotFound(format!("No such image: {}", missing)));
                    }
                    image.repo_tags.retain(|tag| !tags.contains(tag));
                    if !image.is_untagged() {
                        return Ok(());
                    }
                }
                state.images.remove(index);
            }
            Removal::Volume { name } => {
                let index = state
                    .volumes
                    .iter()
                    .position(|v| v == name)
                    .ok_or_else(|| RuntimeError::NotFound(format!("No such volume: {}", name)))?;
                if self.busy.contains(target)
                    || state.containers.iter().any(|c| c.volumes.contains(name))
                {
                    return Err(RuntimeError::Busy(format!("volume is in use: {}", name)));
                }
                state.volumes.remove(index);
            }
        }
        Ok(())
    }
}

impl Runtime for InMemoryRuntime {
    fn api_version(&self) -> Result<ApiVersion, RuntimeError> {
        self.check_connection()?;
        Ok(self.api_version)
    }

    fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        self.check_connection()?;
        Ok(self.state.borrow().containers.clone())
    }

    fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError> {
        self.check_connection()?;
        Ok(self.state.borrow().images.clone())
    }

    fn list_volumes(&self) -> Result<Vec<VolumeRecord>, RuntimeError> {
        self.check_connection()?;
        let state = self.state.borrow();
        let mounted: HashSet<&str> = state
            .containers
            .iter()
            .flat_map(|c| c.volumes.iter().map(String::as_str))
            .collect();
        Ok(state
            .volumes
            .iter()
            .map(|name| VolumeRecord::new(name, !mounted.contains(name.as_str())))
            .collect())
    }

    fn remove(&self, removal: &Removal) -> Result<(), RuntimeError> {
        self.calls.borrow_mut().push(removal.clone());
        self.check_connection()?;
        self.apply(removal)?;
        self.succeeded.set(self.succeeded.get() + 1);
        Ok(())
    }
}
