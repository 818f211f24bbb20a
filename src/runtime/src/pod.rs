//! Pod lifecycle orchestration.
//!
//! A [`Pod`] drives its hypervisor and agent through create, start, stop
//! and delete, persisting the pod and container state machines in the
//! resource store. Every gate reads the persisted state right before
//! mutating it. Pod methods never take the pod lock themselves (except
//! while creating); callers sequencing operations across processes hold
//! it, see [`crate::api`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use vpod_core::error::{PodError, Result};
use vpod_core::{AgentConfig, NetworkInterfacePair, PodConfig, State, StateString};

use crate::agent::{new_agent, Agent};
use crate::hypervisor::{new_hypervisor, Hypervisor};
use crate::storage::{PodLock, PodResource, ResourceStorage};

/// How long `start` waits for the hypervisor to report the VM as started.
pub const START_TIMEOUT: Duration = Duration::from_secs(1);

/// A pod: one VM holding a set of containers.
pub struct Pod {
    id: String,
    config: PodConfig,
    agent_config: AgentConfig,
    hypervisor: Arc<dyn Hypervisor>,
    agent: Arc<dyn Agent>,
    storage: Arc<dyn ResourceStorage>,
    net_pairs: Vec<NetworkInterfacePair>,
    state: State,
    vm_stopped: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod")
            .field("id", &self.id)
            .field("state", &self.state.state)
            .field("containers", &self.config.containers.len())
            .field("net_pairs", &self.net_pairs.len())
            .finish()
    }
}

impl Pod {
    /// Create a pod, or load it when it already exists in `storage`.
    ///
    /// The hypervisor and agent are selected from the configuration.
    pub async fn create(
        mut config: PodConfig,
        net_pairs: &[NetworkInterfacePair],
        storage: Arc<dyn ResourceStorage>,
    ) -> Result<Pod> {
        config.validate()?;
        let (_, run_path) = storage.pod_uri(&config.id, PodResource::State)?;
        let hypervisor = new_hypervisor(config.hypervisor_type, &run_path)?;
        let agent = new_agent(&config.resolve_agent_config()?);

        Self::create_with(config, net_pairs, storage, hypervisor, agent).await
    }

    /// [`Pod::create`] with explicit hypervisor and agent drivers.
    pub async fn create_with(
        mut config: PodConfig,
        net_pairs: &[NetworkInterfacePair],
        storage: Arc<dyn ResourceStorage>,
        hypervisor: Arc<dyn Hypervisor>,
        agent: Arc<dyn Agent>,
    ) -> Result<Pod> {
        config.validate()?;
        let agent_config = config.resolve_agent_config()?;

        hypervisor.init(&config.hypervisor_config).await?;

        let existing = storage.fetch_pod_state(&config.id).ok();
        storage.create_all_resources(&config.id, &config.containers)?;

        let mut pod = Pod {
            id: config.id.clone(),
            config,
            agent_config,
            hypervisor,
            agent,
            storage,
            net_pairs: net_pairs.to_vec(),
            state: existing.unwrap_or(State::new(StateString::Unknown)),
            vm_stopped: None,
        };

        if let Err(e) = pod.setup(existing.is_some()).await {
            // Never remove resources of a pod that existed before this call.
            if existing.is_some() {
                return Err(e);
            }
            let cleanup = pod.storage.delete_pod_resources(&pod.id, None);
            return Err(e.with_cleanup(cleanup));
        }

        tracing::info!(pod_id = %pod.id, state = %pod.state.state, "Pod created");
        Ok(pod)
    }

    /// Steps of `create` running once resources are allocated.
    async fn setup(&mut self, existing: bool) -> Result<()> {
        self.hypervisor.create_pod(&self.config).await?;
        self.agent.init(&self.config, &self.agent_config).await?;

        if existing {
            tracing::debug!(pod_id = %self.id, "Pod already exists");
            return Ok(());
        }

        let lock = PodLock::acquire(self.storage.as_ref(), &self.id).await?;
        let result = self.create_set_states();
        let unlocked = lock.unlock();
        result?;
        unlocked
    }

    /// Reload a stored pod.
    pub async fn fetch(pod_id: &str, storage: Arc<dyn ResourceStorage>) -> Result<Pod> {
        let config = storage.fetch_pod_config(pod_id)?;
        let net_pairs = match storage.fetch_pod_network(pod_id) {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::debug!(pod_id, error = %e, "No stored network pairs");
                Vec::new()
            }
        };
        Self::create(config, &net_pairs, storage).await
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &PodConfig {
        &self.config
    }

    /// State as last written by this instance. Gates never rely on it.
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn network_pairs(&self) -> &[NetworkInterfacePair] {
        &self.net_pairs
    }

    /// Persist the pod configuration, the container configurations and
    /// the network interface pairs.
    pub fn store(&self) -> Result<()> {
        self.storage
            .store_pod_resource(&self.id, PodResource::Config, self.config.clone().into())?;

        for container in &self.config.containers {
            self.storage.store_container_resource(
                &self.id,
                &container.id,
                PodResource::Config,
                container.clone().into(),
            )?;
        }

        self.storage
            .store_pod_resource(&self.id, PodResource::Network, self.net_pairs.clone().into())
    }

    /// Boot the VM and start the containers.
    ///
    /// Interactive pods stay attached until the VM stops, then return to
    /// `ready`.
    pub async fn start(&mut self) -> Result<()> {
        self.boot().await?;
        if self.config.is_interactive() {
            self.wait_vm_stopped().await;
            self.finish_stop()?;
        }
        Ok(())
    }

    /// The part of [`Pod::start`] that needs the pod lock: everything up to
    /// marking the pod `running`.
    pub async fn boot(&mut self) -> Result<()> {
        self.start_check_states()?;

        let (started_tx, started_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let hypervisor = Arc::clone(&self.hypervisor);
        let vm = tokio::spawn(async move { hypervisor.start_pod(started_tx, stopped_tx).await });

        match tokio::time::timeout(START_TIMEOUT, started_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // The hypervisor gave up before signalling.
                return Err(match vm.await {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => {
                        PodError::HypervisorError("VM exited before it started".to_string())
                    }
                    Err(e) => PodError::HypervisorError(format!("VM task failed: {}", e)),
                });
            }
            Err(_) => {
                vm.abort();
                // The task must be gone before stop_pod looks for the VM.
                let _ = vm.await;
                tracing::warn!(pod_id = %self.id, "Timed out waiting for the VM to start");
                let error = PodError::TimeoutError(
                    "Did not receive the pod started notification".to_string(),
                );
                return Err(error.with_cleanup(self.hypervisor.stop_pod().await));
            }
        }
        tracing::debug!(pod_id = %self.id, "VM started");

        if let Err(e) = self.start_payload().await {
            tracing::warn!(pod_id = %self.id, error = %e, "Pod start failed, stopping VM");
            return Err(e.with_cleanup(self.abort_start().await));
        }

        self.vm_stopped = Some(stopped_rx);
        tracing::info!(pod_id = %self.id, "Pod started");
        Ok(())
    }

    async fn start_payload(&mut self) -> Result<()> {
        self.agent.start_agent().await?;
        self.agent.start_pod(&self.config).await?;
        self.start_set_states()
    }

    /// Undo a start that failed after the VM came up. States have not
    /// moved to `running` (or only partially), so the state gate of
    /// [`Pod::stop`] does not apply.
    async fn abort_start(&mut self) -> Result<()> {
        let agent = self.agent.stop_agent().await;
        let hypervisor = self.hypervisor.stop_pod().await;
        agent.and(hypervisor)
    }

    /// Wait until the VM started by [`Pod::boot`] stops.
    pub async fn wait_vm_stopped(&mut self) {
        if let Some(stopped) = self.vm_stopped.take() {
            tracing::info!(pod_id = %self.id, "Waiting for the VM to stop");
            // A dropped sender also means the VM is gone.
            let _ = stopped.await;
        }
    }

    /// Return a pod whose VM stopped on its own to `ready`.
    pub fn finish_stop(&mut self) -> Result<()> {
        let state = self.storage.fetch_pod_state(&self.id)?;
        if state.state != StateString::Running {
            return Ok(());
        }
        self.stop_set_states()?;
        tracing::info!(pod_id = %self.id, "Pod stopped");
        Ok(())
    }

    /// Stop the containers and shut the VM down.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop_check_states()?;

        self.agent.start_agent().await?;
        self.agent.stop_pod(&self.config).await?;
        self.stop_set_states()?;
        self.agent.stop_agent().await?;
        self.hypervisor.stop_pod().await?;

        tracing::info!(pod_id = %self.id, "Pod stopped");
        Ok(())
    }

    /// Remove a `ready` pod's resources.
    pub async fn delete(&mut self) -> Result<()> {
        let state = self.storage.fetch_pod_state(&self.id)?;
        if state.state != StateString::Ready {
            return Err(PodError::NotReady(self.id.clone()));
        }

        self.storage.delete_pod_resources(&self.id, None)?;
        tracing::info!(pod_id = %self.id, "Pod deleted");
        Ok(())
    }

    /// Close the agent session.
    pub async fn end_session(&self) -> Result<()> {
        self.agent.stop_agent().await
    }

    fn create_set_states(&mut self) -> Result<()> {
        self.set_pod_state(StateString::Ready)?;
        self.set_containers_state(StateString::Ready)
    }

    fn start_check_states(&self) -> Result<()> {
        let state = self.storage.fetch_pod_state(&self.id)?;
        state.valid_transition(StateString::Ready, StateString::Running)?;
        self.check_containers_state(StateString::Ready)
    }

    fn start_set_states(&mut self) -> Result<()> {
        self.set_pod_state(StateString::Running)?;
        self.set_containers_state(StateString::Running)
    }

    fn stop_check_states(&self) -> Result<()> {
        self.check_containers_state(StateString::Running)?;
        let state = self.storage.fetch_pod_state(&self.id)?;
        state.valid_transition(StateString::Running, StateString::Ready)
    }

    fn stop_set_states(&mut self) -> Result<()> {
        self.set_containers_state(StateString::Ready)?;
        self.set_pod_state(StateString::Ready)
    }

    /// Persist the pod state.
    pub fn set_pod_state(&mut self, state: StateString) -> Result<()> {
        if self.id.is_empty() {
            return Err(PodError::EmptyId("Pod"));
        }
        let state = State::new(state);
        self.storage
            .store_pod_resource(&self.id, PodResource::State, state.clone().into())?;
        tracing::debug!(pod_id = %self.id, state = %state.state, "Pod state changed");
        self.state = state;
        Ok(())
    }

    /// Persist the state of one container.
    pub fn set_container_state(&self, container_id: &str, state: StateString) -> Result<()> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.storage.store_container_resource(
            &self.id,
            container_id,
            PodResource::State,
            State::new(state).into(),
        )
    }

    /// Persist `state` for every container, stopping at the first failure.
    pub fn set_containers_state(&self, state: StateString) -> Result<()> {
        for container in &self.config.containers {
            self.set_container_state(&container.id, state)?;
        }
        Ok(())
    }

    /// Check that a container's persisted state is `expected`.
    pub fn check_container_state(&self, container_id: &str, expected: StateString) -> Result<()> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        let state = self.storage.fetch_container_state(&self.id, container_id)?;
        if state.state != expected {
            return Err(PodError::ContainerState {
                container: container_id.to_string(),
                expected,
            });
        }
        Ok(())
    }

    pub fn check_containers_state(&self, expected: StateString) -> Result<()> {
        for container in &self.config.containers {
            self.check_container_state(&container.id, expected)?;
        }
        Ok(())
    }

    /// Remove a container's persisted state.
    pub fn delete_container_state(&self, container_id: &str) -> Result<()> {
        if container_id.is_empty() {
            return Err(PodError::EmptyId("Container"));
        }
        self.storage
            .delete_container_resources(&self.id, container_id, Some(&[PodResource::State]))
    }

    pub fn delete_containers_state(&self) -> Result<()> {
        for container in &self.config.containers {
            self.delete_container_state(&container.id)?;
        }
        Ok(())
    }
}
