use vpod_core::{NetworkConfig, NetworkInterfacePair, Result};

use super::{AddResult, Network};

/// Network backend for pods sharing the host network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNetwork;

impl Network for NoopNetwork {
    fn add(&self, _config: &mut NetworkConfig) -> AddResult {
        Ok(Vec::new())
    }

    fn join(&self, _config: &NetworkConfig) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _config: &NetworkConfig, _pairs: &[NetworkInterfacePair]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_network() {
        let network = NoopNetwork;
        let mut config = NetworkConfig {
            num_interfaces: 3,
            ..Default::default()
        };

        assert!(network.add(&mut config).unwrap().is_empty());
        assert!(config.netns_path.is_none());
        network.join(&config).unwrap();
        network.remove(&config, &[]).unwrap();
    }
}
