//! Machine configuration translation.
//!
//! Pure mapping from an instance record to the hypervisor's configuration
//! document. The JSON shape follows firecracker's `--config-file` schema:
//! kebab-case section names, snake_case fields.

use std::path::PathBuf;

use serde::Serialize;

use crate::types::{VmId, VmRecord};

/// Kernel command line for every guest.
pub const KERNEL_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off";

#[derive(Debug, Clone, Serialize)]
pub struct MachineConfig {
    #[serde(rename = "boot-source")]
    pub boot_source: BootSource,

    pub drives: Vec<Drive>,

    #[serde(rename = "network-interfaces")]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(rename = "machine-config")]
    pub machine: MachineSizing,

    /// Hypervisor control socket; part of the process invocation, not the
    /// configuration document.
    #[serde(skip)]
    pub socket_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootSource {
    pub kernel_image_path: PathBuf,
    pub boot_args: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    pub iface_id: String,
    pub guest_mac: String,
    pub host_dev_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineSizing {
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
}

/// Build the machine configuration for one instance: a single read-write
/// root drive, one network interface on the leased tap device, and sizing
/// from the creation request.
pub fn machine_config_for<H>(record: &VmRecord<H>) -> MachineConfig {
    MachineConfig {
        boot_source: BootSource {
            kernel_image_path: record.kernel_path.clone(),
            boot_args: KERNEL_ARGS.to_string(),
        },
        drives: vec![Drive {
            drive_id: "rootfs".to_string(),
            path_on_host: record.rootfs_path.clone(),
            is_root_device: true,
            is_read_only: false,
        }],
        network_interfaces: vec![NetworkInterface {
            iface_id: "eth0".to_string(),
            guest_mac: derive_mac(&record.id),
            host_dev_name: record.tap_device.clone(),
        }],
        machine: MachineSizing {
            vcpu_count: record.spec.vcpus,
            mem_size_mib: record.spec.memory_mib,
        },
        socket_path: record.socket_path.clone(),
    }
}

/// Derive a guest MAC from the instance id.
///
/// `06` has the locally-administered bit set and the multicast bit clear;
/// the remaining five octets come from the id, so the address is unique per
/// instance and stable across restarts (unlike a clock-derived value, which
/// can collide for instances started within the same clock tick).
pub fn derive_mac(id: &VmId) -> String {
    let b = id.as_bytes();
    format!(
        "06:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4]
    )
}
