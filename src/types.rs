//! Core data types for VM lifecycle management.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// VM ID
// ============================================================================

/// VM identifier (UUID v4), generated at creation and immutable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmId(Uuid);

impl VmId {
    /// Length of the short form used in derived names (tap devices).
    pub const SHORT_LENGTH: usize = 8;

    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its hyphenated string form.
    ///
    /// Returns `None` if the string is not a valid UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// First [`Self::SHORT_LENGTH`] hex characters, for derived device names
    /// and log display.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..Self::SHORT_LENGTH].to_string()
    }

    /// Raw id bytes, used for deterministic MAC derivation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for VmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmId({})", self.0.hyphenated())
    }
}

// ============================================================================
// LIFECYCLE STATUS
// ============================================================================

/// Lifecycle status of a VM.
///
/// State machine:
/// ```text
/// create() → Created (registered, resources leased, no process)
/// start()  → Running (hypervisor process launched)
/// stop()   → Stopped (process terminated, can restart)
/// delete() → removed from the registry, reachable from any state
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// Registered with leased IP/tap and a provisioned rootfs, no process.
    Created,

    /// Hypervisor process is up and holds the instance's tap device.
    Running,

    /// Process terminated; rootfs and leases preserved, can restart.
    Stopped,
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, VmStatus::Running)
    }

    /// Created VMs need a first start, Stopped VMs can restart.
    pub fn can_start(&self) -> bool {
        matches!(self, VmStatus::Created | VmStatus::Stopped)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, VmStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Created => "created",
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VmStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(VmStatus::Created),
            "running" => Ok(VmStatus::Running),
            "stopped" => Ok(VmStatus::Stopped),
            _ => Err(()),
        }
    }
}

/// Lifecycle state with the hypervisor handle embedded in the `Running` arm.
///
/// Making the handle part of the variant means a handle cannot exist while
/// the status disagrees: `status()` is derived, never stored separately.
#[derive(Debug)]
pub enum Lifecycle<H> {
    Created,
    Running(H),
    Stopped,
}

impl<H> Lifecycle<H> {
    pub fn status(&self) -> VmStatus {
        match self {
            Lifecycle::Created => VmStatus::Created,
            Lifecycle::Running(_) => VmStatus::Running,
            Lifecycle::Stopped => VmStatus::Stopped,
        }
    }
}

// ============================================================================
// CREATION REQUEST
// ============================================================================

/// Caller-supplied VM attributes, immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    /// Display name.
    pub name: String,
    /// Virtual CPU count.
    pub vcpus: u8,
    /// Memory size in MiB.
    pub memory_mib: u32,
    /// Requested disk size in GiB.
    pub disk_gib: u32,
    /// Base image reference, resolved under the images directory.
    pub image: String,
}

// ============================================================================
// INSTANCE RECORD
// ============================================================================

/// The authoritative per-VM record held by the registry.
///
/// Derived attributes (leased IP, tap name, paths) are assigned by the
/// lifecycle manager at creation; only `lifecycle` mutates afterwards.
#[derive(Debug)]
pub struct VmRecord<H> {
    pub id: VmId,
    pub spec: VmSpec,
    pub ip: Ipv4Addr,
    pub tap_device: String,
    pub vm_dir: PathBuf,
    pub socket_path: PathBuf,
    pub rootfs_path: PathBuf,
    pub kernel_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub lifecycle: Lifecycle<H>,
}

impl<H> VmRecord<H> {
    /// Snapshot for callers; drops the non-clonable hypervisor handle.
    pub fn to_info(&self) -> VmInfo {
        VmInfo {
            id: self.id,
            name: self.spec.name.clone(),
            vcpus: self.spec.vcpus,
            memory_mib: self.spec.memory_mib,
            disk_gib: self.spec.disk_gib,
            image: self.spec.image.clone(),
            status: self.lifecycle.status(),
            ip_address: self.ip,
            tap_device: self.tap_device.clone(),
            socket_path: self.socket_path.clone(),
            rootfs_path: self.rootfs_path.clone(),
            kernel_path: self.kernel_path.clone(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a VM record, returned by get/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: VmId,
    pub name: String,
    pub vcpus: u8,
    pub memory_mib: u32,
    pub disk_gib: u32,
    pub image: String,
    pub status: VmStatus,
    pub ip_address: Ipv4Addr,
    pub tap_device: String,
    pub socket_path: PathBuf,
    pub rootfs_path: PathBuf,
    pub kernel_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_short_is_stable_prefix() {
        let id = VmId::new();
        let short = id.short();
        assert_eq!(short.len(), VmId::SHORT_LENGTH);
        assert!(id.0.simple().to_string().starts_with(&short));
    }

    #[test]
    fn test_id_parse_round_trip() {
        let id = VmId::new();
        let parsed = VmId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(VmId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn test_status_can_start() {
        assert!(VmStatus::Created.can_start());
        assert!(VmStatus::Stopped.can_start());
        assert!(!VmStatus::Running.can_start());
    }

    #[test]
    fn test_status_can_stop() {
        assert!(!VmStatus::Created.can_stop());
        assert!(VmStatus::Running.can_stop());
        assert!(!VmStatus::Stopped.can_stop());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [VmStatus::Created, VmStatus::Running, VmStatus::Stopped] {
            assert_eq!(status.as_str().parse::<VmStatus>(), Ok(status));
        }
        assert!("paused".parse::<VmStatus>().is_err());
    }

    #[test]
    fn test_lifecycle_status_is_derived_from_variant() {
        assert_eq!(Lifecycle::<u32>::Created.status(), VmStatus::Created);
        assert_eq!(Lifecycle::Running(7u32).status(), VmStatus::Running);
        assert_eq!(Lifecycle::<u32>::Stopped.status(), VmStatus::Stopped);
    }
}
