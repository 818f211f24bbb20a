//! Host/guest shared volumes and sockets.
//!
//! Both have a compact string form used on the command line:
//! volumes are `tag:path` entries, sockets are `devID:id:hostPath:name`
//! entries, separated by single spaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PodError;

/// A volume shared between the host and the VM, identified by its
/// mount tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Label used as a hint to the guest.
    pub mount_tag: String,

    /// Host filesystem path for this volume.
    pub host_path: String,
}

/// Ordered volume list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volumes(pub Vec<Volume>);

impl FromStr for Volumes {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut volumes = Vec::new();

        for vol in s.split(' ') {
            let args: Vec<&str> = vol.split(':').collect();
            if args.len() != 2 {
                return Err(PodError::ConfigError(format!(
                    "wrong volume format: {}, expecting only 2 parameters separated with ':'",
                    vol
                )));
            }
            if args[0].is_empty() || args[1].is_empty() {
                return Err(PodError::ConfigError(
                    "volume parameters cannot be empty".to_string(),
                ));
            }

            volumes.push(Volume {
                mount_tag: args[0].to_string(),
                host_path: args[1].to_string(),
            });
        }

        Ok(Volumes(volumes))
    }
}

impl fmt::Display for Volumes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}:{}", v.mount_tag, v.host_path))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// A socket used to communicate between the host and a process inside
/// the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socket {
    pub device_id: String,
    pub id: String,
    pub host_path: String,
    pub name: String,
}

/// Ordered socket list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sockets(pub Vec<Socket>);

impl FromStr for Sockets {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut sockets = Vec::new();

        for sock in s.split(' ') {
            let args: Vec<&str> = sock.split(':').collect();
            if args.len() != 4 {
                return Err(PodError::ConfigError(format!(
                    "wrong socket format: {}, expecting only 4 parameters separated with ':'",
                    sock
                )));
            }
            if args.iter().any(|a| a.is_empty()) {
                return Err(PodError::ConfigError(
                    "socket parameters cannot be empty".to_string(),
                ));
            }

            sockets.push(Socket {
                device_id: args[0].to_string(),
                id: args[1].to_string(),
                host_path: args[2].to_string(),
                name: args[3].to_string(),
            });
        }

        Ok(Sockets(sockets))
    }
}

impl fmt::Display for Sockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|s| format!("{}:{}:{}:{}", s.device_id, s.id, s.host_path, s.name))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volumes_parse() {
        let vols: Volumes = "share:/tmp/share data:/srv/data".parse().unwrap();
        assert_eq!(vols.0.len(), 2);
        assert_eq!(vols.0[0].mount_tag, "share");
        assert_eq!(vols.0[0].host_path, "/tmp/share");
        assert_eq!(vols.0[1].mount_tag, "data");
        assert_eq!(vols.to_string(), "share:/tmp/share data:/srv/data");
    }

    #[test]
    fn test_volumes_wrong_arity() {
        assert!("share".parse::<Volumes>().is_err());
        assert!("a:b:c".parse::<Volumes>().is_err());
    }

    #[test]
    fn test_volumes_empty_parameter() {
        let err = ":/tmp".parse::<Volumes>().unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
        assert!("tag:".parse::<Volumes>().is_err());
    }

    #[test]
    fn test_sockets_parse() {
        let socks: Sockets = "dev0:id0:/tmp/ctl.sock:ctl dev1:id1:/tmp/tty.sock:tty"
            .parse()
            .unwrap();
        assert_eq!(socks.0.len(), 2);
        assert_eq!(socks.0[0].device_id, "dev0");
        assert_eq!(socks.0[0].host_path, "/tmp/ctl.sock");
        assert_eq!(socks.0[1].name, "tty");
        assert_eq!(
            socks.to_string(),
            "dev0:id0:/tmp/ctl.sock:ctl dev1:id1:/tmp/tty.sock:tty"
        );
    }

    #[test]
    fn test_sockets_invalid() {
        assert!("dev0:id0:/tmp/ctl.sock".parse::<Sockets>().is_err());
        assert!("dev0::/tmp/ctl.sock:ctl".parse::<Sockets>().is_err());
    }

    #[test]
    fn test_volumes_serialize_as_list() {
        let vols: Volumes = "share:/tmp/share".parse().unwrap();
        let json = serde_json::to_string(&vols).unwrap();
        assert_eq!(json, r#"[{"mount_tag":"share","host_path":"/tmp/share"}]"#);
    }
}
