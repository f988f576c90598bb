//! `Runtime` implementation that drives the `docker` CLI.
//!
//! Inventory comes from `docker ... inspect` JSON rather than the human-oriented
//! table output, so nothing downstream ever parses free text. Removal failures
//! are mapped onto `RuntimeError` from the CLI's stderr.

use crate::inventory::{ContainerRecord, ContainerState, ImageRecord, VolumeRecord};
use crate::runtime::{ApiVersion, Removal, Runtime, RuntimeError};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;
use tracing::debug;

pub struct DockerCli {
    binary: PathBuf,
    check_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>, check_timeout: Duration) -> Self {
        DockerCli {
            binary: binary.into(),
            check_timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn spawn_output(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        debug!(binary = %self.binary.display(), ?args, "running runtime command");
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|err| {
                RuntimeError::Unreachable(format!("failed to run {}: {}", self.binary.display(), err))
            })
    }

    /// Run a command and return its stdout, mapping a non-zero exit onto a `RuntimeError`.
    fn stdout(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = self.spawn_output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(error_from_stderr(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    /// `docker inspect` for a batch of ids.
    ///
    /// A resource removed between listing and inspecting makes the CLI exit
    /// non-zero while still printing the others; that case keeps the partial result.
    fn inspect<T: DeserializeOwned>(&self, subcommand: &str, ids: &[String]) -> Result<Vec<T>, RuntimeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec![subcommand, "inspect"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.spawn_output(&args)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let err = error_from_stderr(&String::from_utf8_lossy(&output.stderr));
            if !matches!(err, RuntimeError::NotFound(_)) || stdout.trim().is_empty() {
                return Err(err);
            }
            debug!(error = %err, "some resources vanished before inspection");
        }

        parse_json_array(&stdout)
    }
}

impl Runtime for DockerCli {
    fn api_version(&self) -> Result<ApiVersion, RuntimeError> {
        // The CLI can hang for a long time on a wedged daemon, so the check runs
        // on a helper thread and is abandoned once the timeout passes.
        let (sender, receiver) = bounded(1);
        let binary = self.binary.clone();
        thread::spawn(move || {
            let result = Command::new(&binary)
                .args(["version", "--format", "{{.Server.APIVersion}}"])
                .output();
            sender.send(result).ok();
        });

        let output = match receiver.recv_timeout(self.check_timeout) {
            Ok(result) => result.map_err(|err| {
                RuntimeError::Unreachable(format!("failed to run {}: {}", self.binary.display(), err))
            })?,
            Err(RecvTimeoutError::Timeout) => return Err(RuntimeError::Unresponsive(self.check_timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RuntimeError::Unreachable("version check thread exited".to_string()))
            }
        };

        if !output.status.success() {
            return Err(match error_from_stderr(&String::from_utf8_lossy(&output.stderr)) {
                unreachable @ RuntimeError::Unreachable(_) => unreachable,
                other => RuntimeError::Unreachable(other.to_string()),
            });
        }

        String::from_utf8_lossy(&output.stdout).parse()
    }

    fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let ids = parse_id_list(&self.stdout(&["ps", "--all", "--quiet", "--no-trunc"])?);
        let details: Vec<ContainerInspect> = self.inspect("container", &ids)?;
        Ok(details.into_iter().map(ContainerRecord::from).collect())
    }

    fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError> {
        let ids = parse_id_list(&self.stdout(&["images", "--all", "--quiet", "--no-trunc"])?);
        let details: Vec<ImageInspect> = self.inspect("image", &ids)?;
        Ok(details.into_iter().map(ImageRecord::from).collect())
    }

    fn list_volumes(&self) -> Result<Vec<VolumeRecord>, RuntimeError> {
        let names = parse_id_list(&self.stdout(&["volume", "ls", "--quiet"])?);
        let dangling: HashSet<String> = parse_id_list(&self.stdout(&[
            "volume",
            "ls",
            "--quiet",
            "--filter",
            "dangling=true",
        ])?)
        .into_iter()
        .collect();

        Ok(names
            .iter()
            .map(|name| VolumeRecord::new(name, dangling.contains(name)))
            .collect())
    }

    fn remove(&self, removal: &Removal) -> Result<(), RuntimeError> {
        self.stdout(&removal_args(removal)).map(|_| ())
    }
}

/// CLI arguments for one removal. `rmi` with several tags untags each and
/// deletes the image with the last one.
fn removal_args(removal: &Removal) -> Vec<&str> {
    match removal {
        Removal::Container {
            id,
            with_anonymous_volumes: true,
        } => vec!["rm", "--volumes", id.as_str()],
        Removal::Container { id, .. } => vec!["rm", id.as_str()],
        Removal::Image { id, tags } if tags.is_empty() => vec!["rmi", id.as_str()],
        Removal::Image { tags, .. } => {
            let mut args = vec!["rmi"];
            args.extend(tags.iter().map(String::as_str));
            args
        }
        Removal::Volume { name } => vec!["volume", "rm", name.as_str()],
    }
}

/// Map the CLI's error text onto the error taxonomy.
pub fn error_from_stderr(stderr: &str) -> RuntimeError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
        || lower.contains("connection refused")
        || lower.contains("permission denied while trying to connect")
    {
        RuntimeError::Unreachable(message)
    } else if lower.contains("no such") {
        RuntimeError::NotFound(message)
    } else if lower.contains("conflict")
        || lower.contains("in use")
        || lower.contains("is being used")
        || lower.contains("dependent child images")
        || lower.contains("container is running")
        || lower.contains("running container")
        || lower.contains("already in progress")
    {
        RuntimeError::Busy(message)
    } else {
        RuntimeError::Failed(message)
    }
}

/// One id per line, blanks dropped, duplicates (an image listed once per tag) removed.
fn parse_id_list(stdout: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

fn parse_json_array<T: DeserializeOwned>(stdout: &str) -> Result<Vec<T>, RuntimeError> {
    serde_json::from_str(stdout).map_err(|err| RuntimeError::Parse(err.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    #[serde(default)]
    name: String,
    created: DateTime<Utc>,
    state: ContainerStateInspect,
    image: String,
    #[serde(default)]
    mounts: Option<Vec<MountInspect>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerStateInspect {
    status: ContainerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountInspect {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<ContainerInspect> for ContainerRecord {
    fn from(inspect: ContainerInspect) -> Self {
        let volumes = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter(|mount| mount.kind == "volume")
            .filter_map(|mount| mount.name)
            .collect();

        ContainerRecord {
            name: inspect.name.trim_start_matches('/').to_string(),
            id: inspect.id,
            state: inspect.state.status,
            created_at: inspect.created,
            image_id: inspect.image,
            volumes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageInspect {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    parent: String,
    created: DateTime<Utc>,
    #[serde(default)]
    size: u64,
}

impl From<ImageInspect> for ImageRecord {
    fn from(inspect: ImageInspect) -> Self {
        ImageRecord {
            id: inspect.id,
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            created_at: inspect.created,
            parent_id: Some(inspect.parent).filter(|parent| !parent.is_empty()),
            size: inspect.size,
        }
    }
}
