//! Namespace-and-bridge engine shared by the CNI and CNM backends.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use vpod_core::error::{PodError, Result};
use vpod_core::{NetworkConfig, NetworkInterfacePair, NetworkModel, PluginConfig};

use super::bridge::{Bridge, IpBridge};
use super::namespace::{netns_name, HostNamespaces, NamespaceOps};
use super::pairs::create_network_interface_pairs;
use super::{AddResult, CniPlugin, CnmPlugin, Network, NetworkFailure};

/// External program creating the virtual side of interface pairs.
pub trait NetworkPlugin: Send + Sync {
    /// Create interface `ifname` inside the namespace at `netns`.
    fn add_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()>;

    /// Remove interface `ifname` from the namespace at `netns`.
    fn remove_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()>;
}

/// Plugin-driven network backend.
///
/// `add` creates a fresh namespace unless one is configured, lets the
/// plugin create one virtual interface per pair, then bridges each pair
/// inside the namespace.
pub struct PluginNetwork {
    model: NetworkModel,
    namespaces: Box<dyn NamespaceOps>,
    bridge: Box<dyn Bridge>,
}

impl PluginNetwork {
    pub fn new(
        model: NetworkModel,
        namespaces: Box<dyn NamespaceOps>,
        bridge: Box<dyn Bridge>,
    ) -> Self {
        Self {
            model,
            namespaces,
            bridge,
        }
    }

    /// Backend operating on the host's namespaces with iproute2.
    pub fn host(model: NetworkModel) -> Self {
        Self::new(model, Box::new(HostNamespaces), Box::new(IpBridge))
    }

    pub fn model(&self) -> NetworkModel {
        self.model
    }

    fn plugin(&self, config: &NetworkConfig) -> Option<Box<dyn NetworkPlugin>> {
        config.plugin.as_ref().map(|plugin| -> Box<dyn NetworkPlugin> {
            match self.model {
                NetworkModel::Cnm => Box::new(CnmPlugin::new(plugin)),
                NetworkModel::Cni | NetworkModel::Noop => Box::new(CniPlugin::new(plugin)),
            }
        })
    }

    fn add_virt_interfaces(
        &self,
        config: &NetworkConfig,
        netns: &Path,
        pairs: &[NetworkInterfacePair],
    ) -> Result<()> {
        netns_name(netns)?;

        let Some(plugin) = self.plugin(config) else {
            tracing::debug!(model = %self.model, "No network plugin configured");
            return Ok(());
        };
        for pair in pairs {
            plugin.add_interface(&pair.id, netns, &pair.virt_iface.name)?;
        }
        Ok(())
    }

    fn remove_virt_interfaces(
        &self,
        config: &NetworkConfig,
        netns: &Path,
        pairs: &[NetworkInterfacePair],
    ) -> Result<()> {
        netns_name(netns)?;

        let Some(plugin) = self.plugin(config) else {
            return Ok(());
        };
        for pair in pairs {
            plugin.remove_interface(&pair.id, netns, &pair.virt_iface.name)?;
        }
        Ok(())
    }

    fn bridge_pairs(&self, netns: &Path, pairs: &[NetworkInterfacePair]) -> Result<()> {
        self.namespaces.run_in(netns, &mut || {
            for pair in pairs {
                self.bridge.bridge(pair)?;
            }
            Ok(())
        })
    }

    fn unbridge_pairs(&self, netns: &Path, pairs: &[NetworkInterfacePair]) -> Result<()> {
        self.namespaces.run_in(netns, &mut || {
            for pair in pairs {
                self.bridge.unbridge(pair)?;
            }
            Ok(())
        })
    }
}

impl Network for PluginNetwork {
    fn add(&self, config: &mut NetworkConfig) -> AddResult {
        let netns = match config.netns_path.clone() {
            Some(netns) => netns,
            None => {
                let netns = self.namespaces.create().map_err(|error| NetworkFailure {
                    pairs: Vec::new(),
                    error,
                })?;
                config.netns_path = Some(netns.clone());
                netns
            }
        };

        let pairs =
            create_network_interface_pairs(config.num_interfaces).map_err(|error| {
                NetworkFailure {
                    pairs: Vec::new(),
                    error,
                }
            })?;

        let result = self
            .add_virt_interfaces(config, &netns, &pairs)
            .and_then(|()| self.bridge_pairs(&netns, &pairs));
        if let Err(error) = result {
            return Err(NetworkFailure { pairs, error });
        }

        tracing::info!(
            model = %self.model,
            netns = %netns.display(),
            interfaces = pairs.len(),
            "Pod network added"
        );
        Ok(pairs)
    }

    fn join(&self, config: &NetworkConfig) -> Result<()> {
        let netns = netns_path(config)?;
        self.namespaces.enter(netns)
    }

    fn remove(&self, config: &NetworkConfig, pairs: &[NetworkInterfacePair]) -> Result<()> {
        let Some(netns) = config.netns_path.as_deref() else {
            return Ok(());
        };

        let result = self
            .unbridge_pairs(netns, pairs)
            .and_then(|()| self.remove_virt_interfaces(config, netns, pairs));
        let deleted = self.namespaces.delete(netns);

        match result {
            Ok(()) => deleted?,
            Err(e) => return Err(e.with_cleanup(deleted)),
        }

        tracing::info!(model = %self.model, netns = %netns.display(), "Pod network removed");
        Ok(())
    }
}

fn netns_path(config: &NetworkConfig) -> Result<&Path> {
    config
        .netns_path
        .as_deref()
        .ok_or_else(|| PodError::NetworkError("pod has no network namespace".to_string()))
}

/// Run a plugin executable with `input` on stdin.
pub(crate) fn run_plugin(mut command: Command, input: &[u8]) -> Result<Output> {
    let program = PathBuf::from(command.get_program());
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            PodError::NetworkError(format!(
                "failed to spawn network plugin {}: {}",
                program.display(),
                e
            ))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A plugin may exit without reading its input.
        if let Err(e) = stdin.write_all(input) {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(PodError::NetworkError(format!(
                    "failed to write to network plugin {}: {}",
                    program.display(),
                    e
                )));
            }
        }
    }

    child.wait_with_output().map_err(|e| {
        PodError::NetworkError(format!(
            "failed to wait for network plugin {}: {}",
            program.display(),
            e
        ))
    })
}

/// Plugin configuration serialized for stdin.
pub(crate) fn plugin_input(plugin: &PluginConfig) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&plugin.config)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeNamespaces {
        log: Log,
    }

    impl NamespaceOps for FakeNamespaces {
        fn create(&self) -> Result<PathBuf> {
            self.log.lock().unwrap().push("create".to_string());
            Ok(PathBuf::from("/fake/netns/vpod-test"))
        }

        fn enter(&self, path: &Path) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("enter {}", path.display()));
            Ok(())
        }

        fn run_in(&self, path: &Path, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("run_in {}", path.display()));
            f()
        }

        fn delete(&self, path: &Path) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("delete {}", path.display()));
            Ok(())
        }
    }

    struct FakeBridge {
        log: Log,
        fail_on: Option<String>,
    }

    impl Bridge for FakeBridge {
        fn bridge(&self, pair: &NetworkInterfacePair) -> Result<()> {
            if self.fail_on.as_deref() == Some(pair.name.as_str()) {
                return Err(PodError::NetworkError(format!("cannot bridge {}", pair.name)));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("bridge {}", pair.name));
            Ok(())
        }

        fn unbridge(&self, pair: &NetworkInterfacePair) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("unbridge {}", pair.name));
            Ok(())
        }
    }

    fn network(fail_on: Option<&str>) -> (PluginNetwork, Log) {
        let log: Log = Arc::default();
        let network = PluginNetwork::new(
            NetworkModel::Cni,
            Box::new(FakeNamespaces { log: log.clone() }),
            Box::new(FakeBridge {
                log: log.clone(),
                fail_on: fail_on.map(str::to_string),
            }),
        );
        (network, log)
    }

    /// Write an executable shell script into `dir`.
    pub(crate) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_add_creates_namespace_and_bridges() {
        let (network, log) = network(None);
        let mut config = NetworkConfig {
            num_interfaces: 2,
            ..Default::default()
        };

        let pairs = network.add(&mut config).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(
            config.netns_path.as_deref(),
            Some(Path::new("/fake/netns/vpod-test"))
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "create",
                "run_in /fake/netns/vpod-test",
                "bridge br0",
                "bridge br1",
            ]
        );
    }

    #[test]
    fn test_add_uses_existing_namespace() {
        let (network, log) = network(None);
        let mut config = NetworkConfig {
            netns_path: Some(PathBuf::from("/fake/netns/given")),
            num_interfaces: 1,
            ..Default::default()
        };

        network.add(&mut config).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["run_in /fake/netns/given", "bridge br0"]
        );
    }

    #[test]
    fn test_add_with_zero_interfaces_fails() {
        let (network, _log) = network(None);
        let mut config = NetworkConfig::default();

        let failure = network.add(&mut config).unwrap_err();
        assert!(failure.pairs.is_empty());
        assert!(matches!(failure.error, PodError::NetworkError(_)));
        // The namespace was created and is recorded for cleanup.
        assert!(config.netns_path.is_some());
    }

    #[test]
    fn test_add_bridge_failure_returns_pairs() {
        let (network, _log) = network(Some("br1"));
        let mut config = NetworkConfig {
            num_interfaces: 3,
            ..Default::default()
        };

        let failure = network.add(&mut config).unwrap_err();
        assert_eq!(failure.pairs.len(), 3);
        assert!(failure.error.to_string().contains("cannot bridge br1"));
    }

    #[test]
    fn test_add_plugin_failure_returns_pairs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let plugin = script(tmp.path(), "fail-plugin", "echo '{\"msg\":\"no IPs left\"}'; exit 1");

        let (network, log) = network(None);
        let mut config = NetworkConfig {
            num_interfaces: 1,
            plugin: Some(PluginConfig {
                path: plugin,
                config: serde_json::json!({"cniVersion": "0.4.0", "name": "test"}),
            }),
            ..Default::default()
        };

        let failure = network.add(&mut config).unwrap_err();
        assert_eq!(failure.pairs.len(), 1);
        assert!(failure.error.to_string().contains("no IPs left"));
        // Bridging never started.
        assert_eq!(*log.lock().unwrap(), vec!["create"]);
    }

    #[test]
    fn test_remove_unbridges_and_deletes() {
        let (network, log) = network(None);
        let mut config = NetworkConfig {
            num_interfaces: 2,
            ..Default::default()
        };
        let pairs = network.add(&mut config).unwrap();
        log.lock().unwrap().clear();

        network.remove(&config, &pairs).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "run_in /fake/netns/vpod-test",
                "unbridge br0",
                "unbridge br1",
                "delete /fake/netns/vpod-test",
            ]
        );
    }

    #[test]
    fn test_remove_without_namespace_is_noop() {
        let (network, log) = network(None);
        network.remove(&NetworkConfig::default(), &[]).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_join() {
        let (network, log) = network(None);
        assert!(network.join(&NetworkConfig::default()).is_err());

        let config = NetworkConfig {
            netns_path: Some(PathBuf::from("/fake/netns/other")),
            ..Default::default()
        };
        network.join(&config).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["enter /fake/netns/other"]);
    }
}
