//! Filesystem-backed resource store.
//!
//! Layout:
//!
//! ```text
//! <config_root>/<pod>/config.json
//! <config_root>/<pod>/<container>/config.json
//! <run_root>/<pod>/{state.json,network.json,lock}
//! <run_root>/<pod>/<container>/state.json
//! ```
//!
//! Writes go to a temporary file that is renamed over the target, so a
//! crash never leaves a truncated resource behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use vpod_core::error::{PodError, Result};
use vpod_core::{ContainerConfig, NetworkInterfacePair, PodConfig, RuntimeConfig, State};

use super::{PodResource, ResourceData, ResourceStorage, DEFAULT_DELETE};

/// Resource store rooted at two directories.
#[derive(Debug, Clone)]
pub struct Filesystem {
    config_root: PathBuf,
    run_root: PathBuf,
}

impl Filesystem {
    pub fn new(config_root: impl Into<PathBuf>, run_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
            run_root: run_root.into(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.config_root, &config.run_root)
    }

    pub fn config_root(&self) -> &Path {
        &self.config_root
    }

    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Directory holding `resource` for a pod, or for one of its
    /// containers when `container_id` is set.
    fn resource_dir(
        &self,
        pod_id: &str,
        container_id: Option<&str>,
        resource: PodResource,
    ) -> Result<PathBuf> {
        if pod_id.is_empty() {
            return Err(PodError::EmptyId("Pod"));
        }

        let root = match resource {
            PodResource::Config => &self.config_root,
            PodResource::State | PodResource::Network | PodResource::Lock => &self.run_root,
        };

        let dir = root.join(pod_id);
        Ok(match container_id {
            Some(id) => dir.join(id),
            None => dir,
        })
    }

    fn resource_uri(
        &self,
        pod_id: &str,
        container_id: Option<&str>,
        resource: PodResource,
    ) -> Result<(PathBuf, PathBuf)> {
        let dir = self.resource_dir(pod_id, container_id, resource)?;
        Ok((dir.join(resource.file_name()), dir))
    }

    fn store_resource(
        &self,
        pod_id: &str,
        container_id: Option<&str>,
        resource: PodResource,
        data: ResourceData,
    ) -> Result<()> {
        if resource == PodResource::Lock {
            return Err(PodError::InvalidResource(
                "lock resources hold no data".to_string(),
            ));
        }
        if data.kind() != resource {
            return Err(PodError::InvalidResource(format!(
                "cannot store {} data as {} resource",
                data.type_name(),
                resource
            )));
        }

        let (path, _) = self.resource_uri(pod_id, container_id, resource)?;
        match &data {
            ResourceData::PodConfig(config) if container_id.is_none() => store_file(&path, config),
            ResourceData::ContainerConfig(config) if container_id.is_some() => {
                store_file(&path, config)
            }
            ResourceData::State(state) => store_file(&path, state),
            ResourceData::Network(pairs) if container_id.is_none() => store_file(&path, pairs),
            other => Err(PodError::InvalidResource(format!(
                "{} data does not belong to a {}",
                other.type_name(),
                if container_id.is_some() { "container" } else { "pod" }
            ))),
        }
    }

    fn delete_resources(
        &self,
        pod_id: &str,
        container_id: Option<&str>,
        resources: Option<&[PodResource]>,
    ) -> Result<()> {
        for resource in resources.unwrap_or(DEFAULT_DELETE) {
            let dir = self.resource_dir(pod_id, container_id, *resource)?;
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PodError::StorageError(format!(
                        "failed to remove {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    fn fetch_state(&self, pod_id: &str, container_id: Option<&str>) -> Result<State> {
        let (path, _) = self.resource_uri(pod_id, container_id, PodResource::State)?;
        let state: State = fetch_file(&path)?;
        if !state.valid() {
            return Err(PodError::StorageError(format!(
                "invalid state in {}",
                path.display()
            )));
        }
        Ok(state)
    }
}

impl ResourceStorage for Filesystem {
    fn create_all_resources(&self, pod_id: &str, containers: &[ContainerConfig]) -> Result<()> {
        let mut created: Vec<PathBuf> = Vec::new();

        let result = (|| -> Result<()> {
            for resource in [PodResource::Config, PodResource::State] {
                let dir = self.resource_dir(pod_id, None, resource)?;
                create_dir(&dir, &mut created)?;
                for container in containers {
                    if container.id.is_empty() {
                        return Err(PodError::EmptyId("Container"));
                    }
                    let dir = self.resource_dir(pod_id, Some(&container.id), resource)?;
                    create_dir(&dir, &mut created)?;
                }
            }

            let (lock_path, _) = self.resource_uri(pod_id, None, PodResource::Lock)?;
            if !lock_path.exists() {
                fs::File::create(&lock_path).map_err(|e| {
                    PodError::StorageError(format!(
                        "failed to create lock file {}: {}",
                        lock_path.display(),
                        e
                    ))
                })?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            // Only undo what this call created; pre-existing pod data stays.
            for dir in created.iter().rev() {
                if let Err(cleanup) = fs::remove_dir_all(dir) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %cleanup,
                        "Failed to remove resource directory"
                    );
                }
            }
            return Err(e);
        }

        tracing::debug!(pod_id, containers = containers.len(), "Created pod resources");
        Ok(())
    }

    fn pod_uri(&self, pod_id: &str, resource: PodResource) -> Result<(PathBuf, PathBuf)> {
        self.resource_uri(pod_id, None, resource)
    }

    fn container_uri(
        &self,
        pod_id: &str,
        container_id: &str,
        resource: PodResource,
    ) -> Result<(PathBuf, PathBuf)> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.resource_uri(pod_id, Some(container_id), resource)
    }

    fn store_pod_resource(
        &self,
        pod_id: &str,
        resource: PodResource,
        data: ResourceData,
    ) -> Result<()> {
        self.store_resource(pod_id, None, resource, data)
    }

    fn delete_pod_resources(&self, pod_id: &str, resources: Option<&[PodResource]>) -> Result<()> {
        self.delete_resources(pod_id, None, resources)
    }

    fn fetch_pod_config(&self, pod_id: &str) -> Result<PodConfig> {
        let (path, _) = self.resource_uri(pod_id, None, PodResource::Config)?;
        fetch_file(&path)
    }

    fn fetch_pod_state(&self, pod_id: &str) -> Result<State> {
        self.fetch_state(pod_id, None)
    }

    fn fetch_pod_network(&self, pod_id: &str) -> Result<Vec<NetworkInterfacePair>> {
        let (path, _) = self.resource_uri(pod_id, None, PodResource::Network)?;
        fetch_file(&path)
    }

    fn store_container_resource(
        &self,
        pod_id: &str,
        container_id: &str,
        resource: PodResource,
        data: ResourceData,
    ) -> Result<()> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.store_resource(pod_id, Some(container_id), resource, data)
    }

    fn delete_container_resources(
        &self,
        pod_id: &str,
        container_id: &str,
        resources: Option<&[PodResource]>,
    ) -> Result<()> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.delete_resources(pod_id, Some(container_id), resources)
    }

    fn fetch_container_config(&self, pod_id: &str, container_id: &str) -> Result<ContainerConfig> {
        let (path, _) = self.container_uri(pod_id, container_id, PodResource::Config)?;
        fetch_file(&path)
    }

    fn fetch_container_state(&self, pod_id: &str, container_id: &str) -> Result<State> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.fetch_state(pod_id, Some(container_id))
    }
}

fn create_dir(dir: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| {
        PodError::StorageError(format!("failed to create directory {}: {}", dir.display(), e))
    })?;
    created.push(dir.to_path_buf());
    Ok(())
}

/// Serialize `value` to `path` through a temporary sibling file.
fn store_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| {
        PodError::StorageError(format!("failed to write {}: {}", tmp_path.display(), e))
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PodError::StorageError(format!(
            "failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })
}

fn fetch_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|e| {
        PodError::StorageError(format!("failed to read {}: {}", path.display(), e))
    })?;
    let value: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
        PodError::StorageError(format!("failed to parse {}: {}", path.display(), e))
    })?;
    // Well-formed JSON of the wrong shape holds some other resource.
    serde_json::from_value(value).map_err(|e| {
        PodError::UnknownResourceType(format!("{}: {}", path.display(), e))
    })
}
