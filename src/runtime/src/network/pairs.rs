use uuid::Uuid;
use vpod_core::error::{PodError, Result};
use vpod_core::{HardwareAddr, NetworkInterface, NetworkInterfacePair};

/// Locally administered unicast prefix of generated MAC addresses.
const MAC_PREFIX: [u8; 4] = [0x02, 0x00, 0xCA, 0xFE];

/// MAC address of the virtual interface with ordinal `index`.
pub fn interface_mac(index: u16) -> HardwareAddr {
    let [hi, lo] = index.to_be_bytes();
    HardwareAddr([MAC_PREFIX[0], MAC_PREFIX[1], MAC_PREFIX[2], MAC_PREFIX[3], hi, lo])
}

/// Compute `num` interface pairs sharing one freshly generated prefix.
///
/// Pair `i` is bridge `br<i>` joining `eth<i>` to `tap<i>`.
pub fn create_network_interface_pairs(num: i32) -> Result<Vec<NetworkInterfacePair>> {
    if num < 1 {
        return Err(PodError::NetworkError(format!(
            "invalid number of network interfaces: {}",
            num
        )));
    }
    if num > i32::from(u16::MAX) + 1 {
        return Err(PodError::NetworkError(format!(
            "too many network interfaces: {}",
            num
        )));
    }

    let prefix = Uuid::new_v4();
    let pairs = (0..num)
        .map(|i| NetworkInterfacePair {
            id: format!("{}-{}", prefix, i),
            name: format!("br{}", i),
            virt_iface: NetworkInterface {
                name: format!("eth{}", i),
                hard_addr: Some(interface_mac(i as u16)),
            },
            tap_iface: NetworkInterface {
                name: format!("tap{}", i),
                hard_addr: None,
            },
        })
        .collect();

    Ok(pairs)
}
