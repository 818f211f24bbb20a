//! Network types for pod networking.
//!
//! A pod gets its own network namespace holding one bridge per requested
//! interface. Each bridge joins a virtual interface (the namespace side)
//! to a TAP device handed to the hypervisor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PodError;

/// Network backend model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkModel {
    /// No network isolation, every operation is a no-op.
    #[default]
    #[serde(rename = "noop")]
    Noop,

    /// Container Network Interface plugins.
    #[serde(rename = "CNI")]
    Cni,

    /// Container Network Model plugins.
    #[serde(rename = "CNM")]
    Cnm,
}

impl fmt::Display for NetworkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkModel::Noop => write!(f, "noop"),
            NetworkModel::Cni => write!(f, "CNI"),
            NetworkModel::Cnm => write!(f, "CNM"),
        }
    }
}

impl FromStr for NetworkModel {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noop" => Ok(NetworkModel::Noop),
            "CNI" => Ok(NetworkModel::Cni),
            "CNM" => Ok(NetworkModel::Cnm),
            _ => Err(PodError::ConfigError(format!(
                "unknown network type '{}' (supported: noop, CNI, CNM)",
                s
            ))),
        }
    }
}

/// External plugin used by the CNI and CNM backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin executable.
    pub path: PathBuf,

    /// Network configuration handed to the plugin on stdin.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Network configuration for a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Namespace of the pod. A fresh one is created when unset.
    #[serde(default)]
    pub netns_path: Option<PathBuf>,

    /// Number of interface pairs to create.
    #[serde(default)]
    pub num_interfaces: i32,

    /// Plugin for the CNI/CNM models.
    #[serde(default)]
    pub plugin: Option<PluginConfig>,
}

/// Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddr(pub [u8; 6]);

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for HardwareAddr {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(PodError::ConfigError(format!("invalid MAC address: {}", s)));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| PodError::ConfigError(format!("invalid MAC address: {}", s)))?;
        }

        Ok(HardwareAddr(bytes))
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_addr: Option<HardwareAddr>,
}

/// A TAP interface bridged to a virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfacePair {
    /// `<unique prefix>-<ordinal>`, shared prefix across one pod's pairs.
    pub id: String,

    /// Bridge name.
    pub name: String,

    pub virt_iface: NetworkInterface,
    pub tap_iface: NetworkInterface,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_model_parse() {
        assert_eq!("noop".parse::<NetworkModel>().unwrap(), NetworkModel::Noop);
        assert_eq!("CNI".parse::<NetworkModel>().unwrap(), NetworkModel::Cni);
        assert_eq!("CNM".parse::<NetworkModel>().unwrap(), NetworkModel::Cnm);
    }

    #[test]
    fn test_network_model_parse_unknown() {
        let err = "cni".parse::<NetworkModel>().unwrap_err();
        assert!(matches!(err, PodError::ConfigError(_)));
        assert!("".parse::<NetworkModel>().is_err());
    }

    #[test]
    fn test_network_model_display_round_trip() {
        for model in [NetworkModel::Noop, NetworkModel::Cni, NetworkModel::Cnm] {
            assert_eq!(model.to_string().parse::<NetworkModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_network_model_serde_rejects_unknown() {
        assert_eq!(
            serde_json::from_str::<NetworkModel>(r#""CNM""#).unwrap(),
            NetworkModel::Cnm
        );
        assert!(serde_json::from_str::<NetworkModel>(r#""bridge""#).is_err());
    }

    #[test]
    fn test_hardware_addr_format() {
        let mac = HardwareAddr([0x02, 0x00, 0xCA, 0xFE, 0x01, 0x0A]);
        assert_eq!(mac.to_string(), "02:00:ca:fe:01:0a");
        assert_eq!("02:00:ca:fe:01:0a".parse::<HardwareAddr>().unwrap(), mac);
    }

    #[test]
    fn test_hardware_addr_invalid() {
        assert!("02:00:ca:fe:01".parse::<HardwareAddr>().is_err());
        assert!("02:00:ca:fe:01:zz".parse::<HardwareAddr>().is_err());
    }

    #[test]
    fn test_network_config_defaults() {
        let config: NetworkConfig = serde_json::from_str("{}").unwrap();
        assert!(config.netns_path.is_none());
        assert_eq!(config.num_interfaces, 0);
        assert!(config.plugin.is_none());
    }

    #[test]
    fn test_tap_interface_omits_mac() {
        let tap = NetworkInterface {
            name: "tap0".to_string(),
            hard_addr: None,
        };
        assert_eq!(serde_json::to_string(&tap).unwrap(), r#"{"name":"tap0"}"#);
    }
}
