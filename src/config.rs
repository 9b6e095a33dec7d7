//! Orchestrator configuration.
//!
//! All knobs live in [`OrchestratorOptions`]. `Default` gives a working
//! local setup under `~/.kindling`; [`OrchestratorOptions::from_env`]
//! layers `KINDLING_*` environment variables on top for daemon deployments.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{KindlingError, KindlingResult};
use crate::types::VmSpec;

/// Environment variable names recognized by [`OrchestratorOptions::from_env`].
pub mod env {
    pub const HOME: &str = "KINDLING_HOME";
    pub const KERNEL: &str = "KINDLING_KERNEL";
    pub const BRIDGE: &str = "KINDLING_BRIDGE";
    pub const SUBNET: &str = "KINDLING_SUBNET";
    pub const MAX_VMS: &str = "KINDLING_MAX_VMS";
}

/// Per-request resource bounds enforced before any resource is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub min_vcpus: u8,
    pub max_vcpus: u8,
    pub min_memory_mib: u32,
    pub max_memory_mib: u32,
    pub min_disk_gib: u32,
    pub max_disk_gib: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            min_vcpus: 1,
            max_vcpus: 8,
            min_memory_mib: 128,
            max_memory_mib: 8192,
            min_disk_gib: 1,
            max_disk_gib: 100,
        }
    }
}

impl ResourceLimits {
    /// Validate a creation request against these bounds.
    ///
    /// Returns [`KindlingError::Validation`] naming the offending field.
    pub fn validate(&self, spec: &VmSpec) -> KindlingResult<()> {
        if spec.name.trim().is_empty() {
            return Err(KindlingError::Validation("name must not be empty".into()));
        }
        if spec.vcpus < self.min_vcpus || spec.vcpus > self.max_vcpus {
            return Err(KindlingError::Validation(format!(
                "vcpus {} out of bounds [{}, {}]",
                spec.vcpus, self.min_vcpus, self.max_vcpus
            )));
        }
        if spec.memory_mib < self.min_memory_mib || spec.memory_mib > self.max_memory_mib {
            return Err(KindlingError::Validation(format!(
                "memory {} MiB out of bounds [{}, {}]",
                spec.memory_mib, self.min_memory_mib, self.max_memory_mib
            )));
        }
        if spec.disk_gib < self.min_disk_gib || spec.disk_gib > self.max_disk_gib {
            return Err(KindlingError::Validation(format!(
                "disk {} GiB out of bounds [{}, {}]",
                spec.disk_gib, self.min_disk_gib, self.max_disk_gib
            )));
        }
        if spec.image.trim().is_empty() {
            return Err(KindlingError::Validation("image must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration for an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Home directory holding base images, VM working directories, and logs.
    pub home_dir: PathBuf,

    /// Guest kernel image handed to every machine configuration.
    pub kernel_path: PathBuf,

    /// Host bridge device that tap devices are enslaved to.
    pub bridge: String,

    /// Guest subnet in `a.b.c.0/24` notation; the IP pool leases from its
    /// usable host range.
    pub subnet: String,

    /// Hard cap on simultaneously registered VMs.
    pub max_vms: usize,

    /// Per-request resource bounds.
    pub limits: ResourceLimits,

    /// Upper bound on a single hypervisor start call.
    pub start_timeout: Duration,

    /// Upper bound on a single hypervisor shutdown call.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join(".kindling");
        Self {
            kernel_path: home_dir.join("vmlinux.bin"),
            home_dir,
            bridge: "br0".to_string(),
            subnet: "192.168.100.0/24".to_string(),
            max_vms: 100,
            limits: ResourceLimits::default(),
            start_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorOptions {
    /// Build options from the environment, falling back to defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(home) = env_nonempty(env::HOME) {
            options.home_dir = PathBuf::from(&home);
            options.kernel_path = PathBuf::from(home).join("vmlinux.bin");
        }
        if let Some(kernel) = env_nonempty(env::KERNEL) {
            options.kernel_path = PathBuf::from(kernel);
        }
        if let Some(bridge) = env_nonempty(env::BRIDGE) {
            options.bridge = bridge;
        }
        if let Some(subnet) = env_nonempty(env::SUBNET) {
            options.subnet = subnet;
        }
        if let Some(max) = env_nonempty(env::MAX_VMS) {
            if let Ok(parsed) = max.parse() {
                options.max_vms = parsed;
            } else {
                tracing::warn!(value = %max, "ignoring unparseable {}", env::MAX_VMS);
            }
        }
        options
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
