//! Tap device allocation and bridge plumbing.

use std::collections::HashSet;
use std::process::Command;
use std::sync::Mutex;

use crate::errors::{KindlingError, KindlingResult};
use crate::types::VmId;

/// OS-level network primitives, one discrete step each.
///
/// The allocator composes these into attach/detach; the seam exists so
/// alternative implementations (netlink bindings, test doubles) can stand
/// in for the `ip(8)` command.
pub trait NetOps: Send + Sync {
    fn create_tap(&self, name: &str) -> KindlingResult<()>;
    fn link_up(&self, name: &str) -> KindlingResult<()>;
    fn enslave(&self, name: &str, bridge: &str) -> KindlingResult<()>;
    fn delete_link(&self, name: &str) -> KindlingResult<()>;
}

/// Production [`NetOps`] backed by the `ip(8)` command.
#[derive(Debug, Default)]
pub struct IpCommandOps;

impl IpCommandOps {
    fn run(&self, args: &[&str]) -> KindlingResult<()> {
        let output = Command::new("ip").args(args).output().map_err(|e| {
            KindlingError::Network(format!("failed to execute ip {}: {}", args.join(" "), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KindlingError::Network(format!(
                "ip {} failed with exit code {:?}: {}",
                args.join(" "),
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl NetOps for IpCommandOps {
    fn create_tap(&self, name: &str) -> KindlingResult<()> {
        self.run(&["tuntap", "add", name, "mode", "tap"])
    }

    fn link_up(&self, name: &str) -> KindlingResult<()> {
        self.run(&["link", "set", name, "up"])
    }

    fn enslave(&self, name: &str, bridge: &str) -> KindlingResult<()> {
        self.run(&["link", "set", name, "master", bridge])
    }

    fn delete_link(&self, name: &str) -> KindlingResult<()> {
        self.run(&["link", "delete", name])
    }
}

/// Allocates tap device names and drives their host-side plumbing.
///
/// Names derive deterministically from the VM id, so concurrent creates
/// cannot collide without a search; the lease table still guards against
/// the allocator reporting a device free while its VM exists.
pub struct TapAllocator {
    bridge: String,
    ops: Box<dyn NetOps>,
    leased: Mutex<HashSet<String>>,
}

impl TapAllocator {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self::with_ops(bridge, Box::new(IpCommandOps))
    }

    pub fn with_ops(bridge: impl Into<String>, ops: Box<dyn NetOps>) -> Self {
        Self {
            bridge: bridge.into(),
            ops,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Lease the device name for a VM: `tap-<first 8 id chars>`.
    pub fn allocate(&self, id: &VmId) -> String {
        let name = format!("tap-{}", id.short());
        match self.leased.lock() {
            Ok(mut leased) => {
                leased.insert(name.clone());
            }
            Err(e) => tracing::error!(tap = %name, error = %e, "tap lease table lock poisoned"),
        }
        tracing::debug!(tap = %name, "leased tap device name");
        name
    }

    /// Return a device name to the pool. No-op if it was not leased.
    pub fn release(&self, name: &str) {
        if let Ok(mut leased) = self.leased.lock() {
            if leased.remove(name) {
                tracing::debug!(tap = %name, "released tap device name");
            }
        }
    }

    /// Whether a device name is currently leased.
    pub fn is_leased(&self, name: &str) -> bool {
        self.leased
            .lock()
            .map(|l| l.contains(name))
            .unwrap_or(false)
    }

    /// Create the tap device, bring it up, and enslave it to the bridge.
    ///
    /// On a sub-step failure the error is returned as-is; the caller owns
    /// rollback and must call [`TapAllocator::detach`] so a half-configured
    /// device is never left on the bridge.
    pub fn attach(&self, name: &str) -> KindlingResult<()> {
        self.ops.create_tap(name)?;
        self.ops.link_up(name)?;
        self.ops.enslave(name, &self.bridge)?;
        tracing::info!(tap = %name, bridge = %self.bridge, "attached tap device");
        Ok(())
    }

    /// Remove the tap device from the host.
    ///
    /// Callers on teardown paths log failures and continue; a device that
    /// is already gone must not block a deletion flow.
    pub fn detach(&self, name: &str) -> KindlingResult<()> {
        self.ops.delete_link(name)?;
        tracing::info!(tap = %name, "detached tap device");
        Ok(())
    }
}

impl std::fmt::Debug for TapAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapAllocator")
            .field("bridge", &self.bridge)
            .finish()
    }
}
