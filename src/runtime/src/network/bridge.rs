//! Bridging of interface pairs with iproute2.

use std::process::Command;

use vpod_core::error::{PodError, Result};
use vpod_core::NetworkInterfacePair;

/// Joins the two sides of an interface pair in the current namespace.
pub trait Bridge: Send + Sync {
    fn bridge(&self, pair: &NetworkInterfacePair) -> Result<()>;
    fn unbridge(&self, pair: &NetworkInterfacePair) -> Result<()>;
}

/// [`Bridge`] driving the `ip` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpBridge;

impl Bridge for IpBridge {
    /// Create the bridge and the TAP device, then enslave the TAP and the
    /// virtual interface (created by the plugin) to the bridge.
    fn bridge(&self, pair: &NetworkInterfacePair) -> Result<()> {
        let bridge = pair.name.as_str();
        let tap = pair.tap_iface.name.as_str();
        let virt = pair.virt_iface.name.as_str();

        ip(&["link", "add", "name", bridge, "type", "bridge"])?;
        ip(&["tuntap", "add", "dev", tap, "mode", "tap"])?;
        ip(&["link", "set", "dev", tap, "master", bridge])?;
        ip(&["link", "set", "dev", virt, "master", bridge])?;
        for dev in [tap, virt, bridge] {
            ip(&["link", "set", "dev", dev, "up"])?;
        }

        tracing::debug!(pair = %pair.id, bridge, tap, virt, "Bridged interface pair");
        Ok(())
    }

    /// Detach the virtual interface and remove the TAP and the bridge.
    /// Devices that are already gone are skipped.
    fn unbridge(&self, pair: &NetworkInterfacePair) -> Result<()> {
        ip_if_present(&["link", "set", "dev", &pair.virt_iface.name, "nomaster"])?;
        ip_if_present(&["link", "del", "dev", &pair.tap_iface.name])?;
        ip_if_present(&["link", "del", "dev", &pair.name])?;

        tracing::debug!(pair = %pair.id, "Unbridged interface pair");
        Ok(())
    }
}

fn ip(args: &[&str]) -> Result<()> {
    run_ip(args, false)
}

fn ip_if_present(args: &[&str]) -> Result<()> {
    run_ip(args, true)
}

fn run_ip(args: &[&str], allow_missing: bool) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| PodError::NetworkError(format!("failed to run ip: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if allow_missing && is_missing_device(&stderr) {
        return Ok(());
    }
    Err(PodError::NetworkError(format!(
        "ip {} failed: {}",
        args.join(" "),
        stderr.trim()
    )))
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("Cannot find device") || stderr.contains("does not exist")
}
