//! Lifecycle manager: composes the allocators, the provisioner, and the
//! hypervisor adapter into create/start/stop/delete.
//!
//! One `RwLock` protects the registry. Every mutating operation holds the
//! write lock for its entire multi-step sequence, so operations on the same
//! instance are observed in submission order and a failed create can
//! release its provisional leases before any other thread sees them as
//! free. Reads (`get`, `list`) take the shared lock.

use std::fs;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::config::OrchestratorOptions;
use crate::errors::{KindlingError, KindlingResult};
use crate::layout::FilesystemLayout;
use crate::logging;
use crate::net::{IpPool, NetOps, TapAllocator};
use crate::rootfs::RootfsProvisioner;
use crate::types::{Lifecycle, VmId, VmInfo, VmRecord, VmSpec};
use crate::vmm::{machine_config_for, Hypervisor};

mod registry;

pub use registry::Registry;

/// The orchestration core. Cheaply cloneable via `Arc`; all clones share
/// the same registry and lease tables.
pub struct Orchestrator<H: Hypervisor> {
    inner: Arc<OrchestratorInner<H>>,
}

impl<H: Hypervisor> Clone for Orchestrator<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct OrchestratorInner<H: Hypervisor> {
    options: OrchestratorOptions,
    layout: FilesystemLayout,
    registry: RwLock<Registry<H::Handle>>,
    ip_pool: IpPool,
    taps: TapAllocator,
    provisioner: RootfsProvisioner,
    hypervisor: H,
}

impl<H: Hypervisor> Orchestrator<H> {
    /// Create an orchestrator with production network plumbing (`ip(8)`).
    pub fn new(options: OrchestratorOptions, hypervisor: H) -> KindlingResult<Self> {
        let taps = TapAllocator::new(options.bridge.clone());
        Self::build(options, hypervisor, taps)
    }

    /// Create an orchestrator with custom [`NetOps`], for alternative
    /// netlink backends or tests.
    pub fn with_net_ops(
        options: OrchestratorOptions,
        hypervisor: H,
        ops: Box<dyn NetOps>,
    ) -> KindlingResult<Self> {
        let taps = TapAllocator::with_ops(options.bridge.clone(), ops);
        Self::build(options, hypervisor, taps)
    }

    fn build(
        options: OrchestratorOptions,
        hypervisor: H,
        taps: TapAllocator,
    ) -> KindlingResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(KindlingError::Validation(format!(
                "home_dir must be an absolute path, got {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;
        logging::init_for(&layout);

        let ip_pool = IpPool::new(&options.subnet)?;

        tracing::debug!(home = %layout.home_dir().display(), "initialized orchestrator");

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                layout,
                registry: RwLock::new(Registry::new()),
                ip_pool,
                taps,
                provisioner: RootfsProvisioner::new(),
                hypervisor,
                options,
            }),
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Create a VM: validate, lease IP and tap name, materialize the
    /// working directory and rootfs, and register in `Created`.
    ///
    /// Any failure after the IP lease rolls back everything acquired so
    /// far, in reverse acquisition order, before the error is returned: a
    /// failed create leaks nothing.
    pub fn create(&self, spec: VmSpec) -> KindlingResult<VmInfo> {
        // Validation rejects before any resource is touched.
        self.inner.options.limits.validate(&spec)?;

        let mut registry = self.acquire_write()?;
        if registry.len() >= self.inner.options.max_vms {
            return Err(KindlingError::Exhausted(format!(
                "vm cap reached ({} registered, max {})",
                registry.len(),
                self.inner.options.max_vms
            )));
        }

        let id = VmId::new();
        let ip = self.inner.ip_pool.allocate()?;
        let tap_device = self.inner.taps.allocate(&id);

        if let Err(e) = self.materialize(&id, &spec) {
            self.compensate_create(&id, ip, &tap_device);
            return Err(e);
        }

        let record = VmRecord {
            id,
            ip,
            vm_dir: self.inner.layout.vm_dir(&id),
            socket_path: self.inner.layout.socket_path(&id),
            rootfs_path: self.inner.layout.rootfs_path(&id),
            kernel_path: self.inner.options.kernel_path.clone(),
            created_at: Utc::now(),
            lifecycle: Lifecycle::Created,
            tap_device,
            spec,
        };
        let info = record.to_info();

        if let Err(e) = registry.register(record) {
            self.compensate_create(&id, ip, &info.tap_device);
            return Err(e);
        }

        tracing::info!(vm_id = %id, name = %info.name, ip = %ip, "vm created");
        Ok(info)
    }

    /// Start a VM: build the machine configuration from the stored record,
    /// attach its tap device, and hand off to the hypervisor.
    ///
    /// On failure the tap is detached and the record keeps its prior state,
    /// so start can be retried without recreating the instance.
    pub fn start(&self, id: &VmId) -> KindlingResult<()> {
        let mut registry = self.acquire_write()?;
        let record = registry
            .get_mut(id)
            .ok_or_else(|| KindlingError::NotFound(id.to_string()))?;

        if record.lifecycle.status().is_running() {
            return Err(KindlingError::AlreadyRunning(id.to_string()));
        }

        let machine = machine_config_for(record);
        if let Err(e) = self.inner.taps.attach(&record.tap_device) {
            // A sub-step may have left a half-plumbed device behind; remove
            // it so a retry does not fail at device creation.
            if let Err(detach_err) = self.inner.taps.detach(&record.tap_device) {
                tracing::warn!(
                    vm_id = %id,
                    error = %detach_err,
                    "failed to detach tap after attach failure"
                );
            }
            return Err(e);
        }

        match self
            .inner
            .hypervisor
            .start(&machine, self.inner.options.start_timeout)
        {
            Ok(handle) => {
                record.lifecycle = Lifecycle::Running(handle);
                tracing::info!(vm_id = %id, tap = %record.tap_device, "vm started");
                Ok(())
            }
            Err(e) => {
                if let Err(detach_err) = self.inner.taps.detach(&record.tap_device) {
                    tracing::warn!(
                        vm_id = %id,
                        error = %detach_err,
                        "failed to detach tap after launch failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Stop a running VM.
    ///
    /// A shutdown failure is surfaced and the record stays `Running`; the
    /// state never silently diverges from the process it describes.
    pub fn stop(&self, id: &VmId) -> KindlingResult<()> {
        let mut registry = self.acquire_write()?;
        let record = registry
            .get_mut(id)
            .ok_or_else(|| KindlingError::NotFound(id.to_string()))?;

        match &mut record.lifecycle {
            Lifecycle::Running(handle) => {
                self.inner
                    .hypervisor
                    .shutdown(handle, self.inner.options.shutdown_timeout)?;
            }
            _ => return Err(KindlingError::NotRunning(id.to_string())),
        }

        record.lifecycle = Lifecycle::Stopped;
        tracing::info!(vm_id = %id, "vm stopped");
        Ok(())
    }

    /// Delete a VM from any state.
    ///
    /// Only an unknown id fails. Every teardown step is independent and
    /// best-effort: failures are collected and logged in aggregate, never
    /// aborted on, so the instance's resources are reclaimed even when it
    /// was already partially broken.
    pub fn delete(&self, id: &VmId) -> KindlingResult<()> {
        let mut registry = self.acquire_write()?;
        // The record leaves the registry first, so removal can never be
        // blocked by a cleanup failure.
        let mut record = registry
            .remove(id)
            .ok_or_else(|| KindlingError::NotFound(id.to_string()))?;

        let mut failures: Vec<String> = Vec::new();

        if let Lifecycle::Running(handle) = &mut record.lifecycle {
            if let Err(e) = self
                .inner
                .hypervisor
                .shutdown(handle, self.inner.options.shutdown_timeout)
            {
                failures.push(format!("shutdown: {}", e));
            }
        }

        self.inner.ip_pool.release(record.ip);
        self.inner.taps.release(&record.tap_device);

        if let Err(e) = self.inner.taps.detach(&record.tap_device) {
            failures.push(format!("detach {}: {}", record.tap_device, e));
        }

        if record.vm_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&record.vm_dir) {
                failures.push(format!("remove {}: {}", record.vm_dir.display(), e));
            }
        }

        if failures.is_empty() {
            tracing::info!(vm_id = %id, "vm deleted");
        } else {
            tracing::warn!(
                vm_id = %id,
                failures = ?failures,
                "vm deleted with best-effort cleanup failures"
            );
        }
        Ok(())
    }

    /// Snapshot of one VM, `None` if unknown. No side effects.
    pub fn get(&self, id: &VmId) -> KindlingResult<Option<VmInfo>> {
        Ok(self.acquire_read()?.get(id).map(|r| r.to_info()))
    }

    /// Snapshots of all VMs, newest first. No side effects.
    pub fn list(&self) -> KindlingResult<Vec<VmInfo>> {
        Ok(self.acquire_read()?.infos())
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Create the working directory and provision the private rootfs.
    fn materialize(&self, id: &VmId, spec: &VmSpec) -> KindlingResult<()> {
        let vm_dir = self.inner.layout.vm_dir(id);
        fs::create_dir_all(&vm_dir).map_err(|e| {
            KindlingError::Internal(format!(
                "failed to create vm directory {}: {}",
                vm_dir.display(),
                e
            ))
        })?;

        let base_image = self.inner.layout.base_image_path(&spec.image);
        let rootfs = self.inner.layout.rootfs_path(id);
        self.inner
            .provisioner
            .provision(&base_image, &rootfs, spec.disk_gib as u64)?;
        Ok(())
    }

    /// Roll back a failed create in reverse acquisition order: working
    /// directory, tap lease, IP lease. Runs before the create error is
    /// returned, while the write lock is still held.
    fn compensate_create(&self, id: &VmId, ip: Ipv4Addr, tap_device: &str) {
        let vm_dir = self.inner.layout.vm_dir(id);
        if vm_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&vm_dir) {
                tracing::warn!(
                    vm_id = %id,
                    error = %e,
                    "failed to remove directory of partially created vm"
                );
            }
        }
        self.inner.taps.release(tap_device);
        self.inner.ip_pool.release(ip);
        tracing::debug!(vm_id = %id, "rolled back partially created vm");
    }

    fn acquire_read(&self) -> KindlingResult<RwLockReadGuard<'_, Registry<H::Handle>>> {
        self.inner
            .registry
            .read()
            .map_err(|e| KindlingError::Internal(format!("registry lock poisoned (read): {}", e)))
    }

    fn acquire_write(&self) -> KindlingResult<RwLockWriteGuard<'_, Registry<H::Handle>>> {
        self.inner
            .registry
            .write()
            .map_err(|e| KindlingError::Internal(format!("registry lock poisoned (write): {}", e)))
    }
}

impl<H: Hypervisor> std::fmt::Debug for Orchestrator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("home_dir", &self.inner.layout.home_dir())
            .finish()
    }
}

// Compile-time assertion: the orchestrator must be shareable across
// request-handling threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Orchestrator<crate::vmm::FirecrackerAdapter>>()
};
