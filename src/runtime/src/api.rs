//! High level pod operations.
//!
//! Each call loads the pod from the resource store, takes the pod lock
//! around the state-mutating part and emits a lifecycle event once it
//! succeeds. Any process sharing the same store roots can drive the same
//! pods.

use std::sync::Arc;

use vpod_core::error::{PodError, Result};
use vpod_core::event::{EventEmitter, PodEvent};
use vpod_core::{NetworkConfig, NetworkInterfacePair, NetworkModel, PodConfig, RuntimeConfig};

use crate::network::new_network;
use crate::pod::Pod;
use crate::storage::{Filesystem, PodLock, PodResource, ResourceStorage};

/// Entry point for pod lifecycle operations.
#[derive(Clone)]
pub struct Runtime {
    storage: Arc<dyn ResourceStorage>,
    events: EventEmitter,
}

impl Runtime {
    /// Runtime backed by the filesystem store at the configured roots.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_storage(Arc::new(Filesystem::from_config(config)))
    }

    pub fn with_storage(storage: Arc<dyn ResourceStorage>) -> Self {
        Self {
            storage,
            events: EventEmitter::default(),
        }
    }

    /// Lifecycle events emitted by this runtime.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn storage(&self) -> &Arc<dyn ResourceStorage> {
        &self.storage
    }

    /// Set up the pod network, create the pod and persist it.
    pub async fn create_pod(&self, mut config: PodConfig) -> Result<Pod> {
        config.validate()?;

        // An existing pod keeps its stored config and network.
        if self.storage.fetch_pod_state(&config.id).is_ok() {
            tracing::debug!(pod_id = %config.id, "Pod already exists");
            return Pod::fetch(&config.id, Arc::clone(&self.storage)).await;
        }

        let (network_config, pairs) =
            add_network(config.network_model, config.network_config.clone()).await?;
        config.network_config = network_config;

        let model = config.network_model;
        let pod = match Pod::create(config.clone(), &pairs, Arc::clone(&self.storage)).await {
            Ok(pod) => pod,
            Err(e) => {
                let cleanup = remove_network(model, config.network_config, pairs).await;
                return Err(e.with_cleanup(cleanup));
            }
        };

        let lock = lock_pod(self.storage.as_ref(), pod.id()).await?;
        let stored = pod.store();
        let unlocked = lock.unlock();
        stored?;
        unlocked?;

        self.events.emit(PodEvent::new("pod.created", pod.id()));
        Ok(pod)
    }

    /// Start a stored pod.
    ///
    /// For interactive pods this returns once the VM has stopped again.
    /// The lock is not held while waiting.
    pub async fn start_pod(&self, pod_id: &str) -> Result<Pod> {
        let mut pod = Pod::fetch(pod_id, Arc::clone(&self.storage)).await?;

        let lock = lock_pod(self.storage.as_ref(), pod_id).await?;
        let booted = pod.boot().await;
        let unlocked = lock.unlock();
        booted?;
        unlocked?;
        self.events.emit(PodEvent::new("pod.started", pod_id));

        if pod.config().is_interactive() {
            pod.wait_vm_stopped().await;

            let lock = lock_pod(self.storage.as_ref(), pod_id).await?;
            let finished = pod.finish_stop();
            let unlocked = lock.unlock();
            finished?;
            unlocked?;
            self.events.emit(PodEvent::new("pod.stopped", pod_id));
        }

        Ok(pod)
    }

    /// Stop a running pod.
    pub async fn stop_pod(&self, pod_id: &str) -> Result<Pod> {
        let mut pod = Pod::fetch(pod_id, Arc::clone(&self.storage)).await?;

        let lock = lock_pod(self.storage.as_ref(), pod_id).await?;
        let stopped = pod.stop().await;
        let unlocked = lock.unlock();
        stopped?;
        unlocked?;

        self.events.emit(PodEvent::new("pod.stopped", pod_id));
        Ok(pod)
    }

    /// Delete a ready pod, its network and all of its resources.
    pub async fn delete_pod(&self, pod_id: &str) -> Result<()> {
        let mut pod = Pod::fetch(pod_id, Arc::clone(&self.storage)).await?;

        let lock = lock_pod(self.storage.as_ref(), pod_id).await?;
        let deleted = self.delete_locked(&mut pod).await;
        let unlocked = lock.unlock();
        deleted?;
        unlocked?;

        self.events.emit(PodEvent::new("pod.deleted", pod_id));
        Ok(())
    }

    async fn delete_locked(&self, pod: &mut Pod) -> Result<()> {
        pod.delete().await?;

        let config = pod.config();
        remove_network(
            config.network_model,
            config.network_config.clone(),
            pod.network_pairs().to_vec(),
        )
        .await?;

        self.storage.delete_pod_resources(
            pod.id(),
            Some(&[PodResource::Network, PodResource::Lock]),
        )
    }
}

/// Take the exclusive lock on a pod.
pub async fn lock_pod(storage: &dyn ResourceStorage, pod_id: &str) -> Result<PodLock> {
    PodLock::acquire(storage, pod_id).await
}

/// Run the network backend's `add` off the async workers. On failure the
/// partially created pairs are removed before returning.
async fn add_network(
    model: NetworkModel,
    config: NetworkConfig,
) -> Result<(NetworkConfig, Vec<NetworkInterfacePair>)> {
    let (config, added) = tokio::task::spawn_blocking(move || {
        let mut config = config;
        let added = new_network(model).add(&mut config);
        (config, added)
    })
    .await
    .map_err(|e| PodError::NetworkError(format!("network task failed: {}", e)))?;

    match added {
        Ok(pairs) => {
            tracing::debug!(model = %model, pairs = pairs.len(), "Pod network added");
            Ok((config, pairs))
        }
        Err(failure) => {
            tracing::warn!(model = %model, error = %failure.error, "Pod network setup failed");
            let cleanup = remove_network(model, config, failure.pairs).await;
            Err(failure.error.with_cleanup(cleanup))
        }
    }
}

async fn remove_network(
    model: NetworkModel,
    config: NetworkConfig,
    pairs: Vec<NetworkInterfacePair>,
) -> Result<()> {
    tokio::task::spawn_blocking(move || new_network(model).remove(&config, &pairs))
        .await
        .map_err(|e| PodError::NetworkError(format!("network task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use vpod_core::{ContainerConfig, HypervisorType, StateString};

    fn runtime() -> (TempDir, Runtime) {
        let tmp = TempDir::new().unwrap();
        let runtime = Runtime::new(&RuntimeConfig {
            config_root: tmp.path().join("config"),
            run_root: tmp.path().join("run"),
        });
        (tmp, runtime)
    }

    fn config(id: &str) -> PodConfig {
        PodConfig {
            id: id.to_string(),
            hypervisor_type: HypervisorType::Mock,
            network_model: NetworkModel::Noop,
            containers: vec![ContainerConfig {
                id: "c1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<PodEvent>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Ok(event) = rx.try_recv() {
            keys.push(event.key);
        }
        keys
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (_tmp, runtime) = runtime();
        let mut events = runtime.events().subscribe();

        let pod = runtime.create_pod(config("p1")).await.unwrap();
        assert_eq!(pod.state().state, StateString::Ready);
        assert_eq!(runtime.storage().fetch_pod_config("p1").unwrap().id, "p1");

        let pod = runtime.start_pod("p1").await.unwrap();
        assert_eq!(pod.state().state, StateString::Running);

        let pod = runtime.stop_pod("p1").await.unwrap();
        assert_eq!(pod.state().state, StateString::Ready);

        runtime.delete_pod("p1").await.unwrap();
        assert!(runtime.storage().fetch_pod_config("p1").is_err());
        assert!(runtime.storage().fetch_pod_state("p1").is_err());

        assert_eq!(
            drain(&mut events),
            vec!["pod.created", "pod.started", "pod.stopped", "pod.deleted"]
        );
    }

    #[tokio::test]
    async fn test_create_generates_id() {
        let (_tmp, runtime) = runtime();
        let pod = runtime.create_pod(config("")).await.unwrap();
        assert!(!pod.id().is_empty());
        assert!(runtime.storage().fetch_pod_config(pod.id()).is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_tmp, runtime) = runtime();
        runtime.create_pod(config("p1")).await.unwrap();
        runtime.start_pod("p1").await.unwrap();

        let err = runtime.start_pod("p1").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid state running (expecting ready)");
    }

    #[tokio::test]
    async fn test_delete_running_pod_fails() {
        let (_tmp, runtime) = runtime();
        runtime.create_pod(config("p1")).await.unwrap();
        runtime.start_pod("p1").await.unwrap();

        assert!(matches!(
            runtime.delete_pod("p1").await,
            Err(PodError::NotReady(_))
        ));
        assert!(runtime.storage().fetch_pod_config("p1").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_pod() {
        let (_tmp, runtime) = runtime();
        assert!(matches!(
            runtime.start_pod("missing").await,
            Err(PodError::StorageError(_))
        ));
        assert!(runtime.stop_pod("missing").await.is_err());
        assert!(runtime.delete_pod("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_start_waits_for_lock() {
        let (_tmp, runtime) = runtime();
        runtime.create_pod(config("p1")).await.unwrap();

        let lock = lock_pod(runtime.storage().as_ref(), "p1").await.unwrap();
        let handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.start_pod("p1").await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert_eq!(
            runtime.storage().fetch_pod_state("p1").unwrap().state,
            StateString::Ready
        );

        lock.unlock().unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(
            runtime.storage().fetch_pod_state("p1").unwrap().state,
            StateString::Running
        );
    }

    #[tokio::test]
    async fn test_create_invalid_config_leaves_nothing() {
        let (tmp, runtime) = runtime();
        let mut config = config("p1");
        config.containers.push(ContainerConfig {
            id: "c1".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            runtime.create_pod(config).await,
            Err(PodError::ConfigError(_))
        ));
        assert!(!tmp.path().join("config").join("p1").exists());
    }

    #[tokio::test]
    async fn test_create_existing_pod_keeps_stored_config() {
        let (_tmp, runtime) = runtime();
        let mut events = runtime.events().subscribe();
        runtime.create_pod(config("p1")).await.unwrap();
        runtime.start_pod("p1").await.unwrap();
        drain(&mut events);

        let mut again = config("p1");
        again.containers[0].id = "c2".to_string();
        let pod = runtime.create_pod(again).await.unwrap();
        assert_eq!(pod.config().containers[0].id, "c1");
        assert!(drain(&mut events).is_empty());

        let storage = runtime.storage();
        assert_eq!(storage.fetch_pod_state("p1").unwrap().state, StateString::Running);
        assert_eq!(storage.fetch_pod_config("p1").unwrap().containers[0].id, "c1");
        assert!(storage.fetch_container_state("p1", "c2").is_err());

        runtime.stop_pod("p1").await.unwrap();
        assert_eq!(storage.fetch_pod_state("p1").unwrap().state, StateString::Ready);
    }
}
