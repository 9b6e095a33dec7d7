//! Integration tests for the VM lifecycle: create, start, stop, delete,
//! get, list, and the compensation paths around them.

use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kindling::net::NetOps;
use kindling::vmm::{Hypervisor, MachineConfig};
use kindling::{
    KindlingError, KindlingResult, Orchestrator, OrchestratorOptions, VmSpec, VmStatus,
};
use tempfile::TempDir;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Scripted hypervisor: counts starts and can be told to fail either call.
#[derive(Clone, Default)]
struct FakeHypervisor {
    starts: Arc<AtomicUsize>,
    fail_start: Arc<AtomicBool>,
    fail_shutdown: Arc<AtomicBool>,
}

struct FakeHandle;

impl Hypervisor for FakeHypervisor {
    type Handle = FakeHandle;

    fn start(&self, _machine: &MachineConfig, _timeout: Duration) -> KindlingResult<FakeHandle> {
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(KindlingError::Launch("injected launch failure".into()));
        }
        self.starts.fetch_add(1, Ordering::Relaxed);
        Ok(FakeHandle)
    }

    fn shutdown(&self, _handle: &mut FakeHandle, _timeout: Duration) -> KindlingResult<()> {
        if self.fail_shutdown.load(Ordering::Relaxed) {
            return Err(KindlingError::Shutdown("injected shutdown failure".into()));
        }
        Ok(())
    }
}

/// Records tap plumbing calls instead of touching the host.
#[derive(Clone, Default)]
struct RecordingNetOps {
    calls: Arc<Mutex<Vec<String>>>,
}

impl NetOps for RecordingNetOps {
    fn create_tap(&self, name: &str) -> KindlingResult<()> {
        self.calls.lock().unwrap().push(format!("create {}", name));
        Ok(())
    }
    fn link_up(&self, name: &str) -> KindlingResult<()> {
        self.calls.lock().unwrap().push(format!("up {}", name));
        Ok(())
    }
    fn enslave(&self, name: &str, bridge: &str) -> KindlingResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("enslave {} {}", name, bridge));
        Ok(())
    }
    fn delete_link(&self, name: &str) -> KindlingResult<()> {
        self.calls.lock().unwrap().push(format!("delete {}", name));
        Ok(())
    }
}

/// Tracks which devices exist on the "host": creating a device twice
/// fails the way `ip tuntap add` does, and `enslave` can be told to fail
/// once to simulate a transiently missing bridge.
#[derive(Clone, Default)]
struct HostNetOps {
    devices: Arc<Mutex<HashSet<String>>>,
    fail_enslave_once: Arc<AtomicBool>,
}

impl NetOps for HostNetOps {
    fn create_tap(&self, name: &str) -> KindlingResult<()> {
        if !self.devices.lock().unwrap().insert(name.to_string()) {
            return Err(KindlingError::Network(format!(
                "device {} already exists",
                name
            )));
        }
        Ok(())
    }
    fn link_up(&self, _name: &str) -> KindlingResult<()> {
        Ok(())
    }
    fn enslave(&self, _name: &str, bridge: &str) -> KindlingResult<()> {
        if self.fail_enslave_once.swap(false, Ordering::Relaxed) {
            return Err(KindlingError::Network(format!("bridge {} is down", bridge)));
        }
        Ok(())
    }
    fn delete_link(&self, name: &str) -> KindlingResult<()> {
        self.devices.lock().unwrap().remove(name);
        Ok(())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    orchestrator: Orchestrator<FakeHypervisor>,
    hypervisor: FakeHypervisor,
    net_calls: Arc<Mutex<Vec<String>>>,
    _temp: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_max_vms(100)
    }

    fn with_max_vms(max_vms: usize) -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        let options = OrchestratorOptions {
            home_dir: temp.path().to_path_buf(),
            kernel_path: temp.path().join("vmlinux.bin"),
            bridge: "br-test".into(),
            subnet: "192.168.100.0/24".into(),
            max_vms,
            start_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(200),
            ..OrchestratorOptions::default()
        };

        let hypervisor = FakeHypervisor::default();
        let net = RecordingNetOps::default();
        let net_calls = Arc::clone(&net.calls);
        let orchestrator =
            Orchestrator::with_net_ops(options, hypervisor.clone(), Box::new(net))
                .expect("failed to create orchestrator");

        // Base image the provisioner can copy.
        fs::write(
            temp.path().join("images").join("base-a.ext4"),
            vec![0xabu8; 1024 * 1024],
        )
        .expect("failed to seed base image");

        Self {
            orchestrator,
            hypervisor,
            net_calls,
            _temp: temp,
        }
    }

    fn spec(&self) -> VmSpec {
        VmSpec {
            name: "web-1".into(),
            vcpus: 2,
            memory_mib: 1024,
            disk_gib: 1,
            image: "base-a".into(),
        }
    }
}

// ============================================================================
// CREATE
// ============================================================================

#[test]
fn create_leases_unique_ip_and_tap() {
    let ctx = TestContext::new();
    let a = ctx.orchestrator.create(ctx.spec()).unwrap();
    let b = ctx.orchestrator.create(ctx.spec()).unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.ip_address, b.ip_address);
    assert_ne!(a.tap_device, b.tap_device);
    assert_eq!(a.status, VmStatus::Created);

    // Deterministic low-to-high allocation from the usable range.
    assert_eq!(a.ip_address, Ipv4Addr::new(192, 168, 100, 10));
    assert_eq!(b.ip_address, Ipv4Addr::new(192, 168, 100, 11));
}

#[test]
fn create_materializes_working_directory() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();

    assert!(vm.rootfs_path.is_file());
    assert!(vm.socket_path.starts_with(vm.rootfs_path.parent().unwrap()));
    // disk_gib=1 exceeds the 1 MiB base, so the image grows to 1 GiB.
    assert_eq!(fs::metadata(&vm.rootfs_path).unwrap().len(), 1 << 30);
}

#[test]
fn create_rejects_invalid_spec_without_leasing() {
    let ctx = TestContext::new();
    let mut bad = ctx.spec();
    bad.vcpus = 0;

    assert!(matches!(
        ctx.orchestrator.create(bad),
        Err(KindlingError::Validation(_))
    ));
    assert!(ctx.orchestrator.list().unwrap().is_empty());

    // The first address is still free.
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    assert_eq!(vm.ip_address, Ipv4Addr::new(192, 168, 100, 10));
}

#[test]
fn failed_provisioning_leaks_nothing() {
    let ctx = TestContext::new();
    let mut missing = ctx.spec();
    missing.image = "does-not-exist".into();

    let err = ctx.orchestrator.create(missing).unwrap_err();
    assert!(matches!(err, KindlingError::Provision(_)));
    assert!(err.to_string().contains("does-not-exist"));

    // Registry unchanged, working directory removed.
    assert!(ctx.orchestrator.list().unwrap().is_empty());
    let vms_dir = ctx._temp.path().join("vms");
    assert_eq!(fs::read_dir(&vms_dir).unwrap().count(), 0);

    // Leases released: the next create gets the first address again.
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    assert_eq!(vm.ip_address, Ipv4Addr::new(192, 168, 100, 10));
}

#[test]
fn create_enforces_vm_cap() {
    let ctx = TestContext::with_max_vms(1);
    ctx.orchestrator.create(ctx.spec()).unwrap();

    assert!(matches!(
        ctx.orchestrator.create(ctx.spec()),
        Err(KindlingError::Exhausted(_))
    ));
}

#[test]
fn concurrent_creates_never_share_resources() {
    let ctx = TestContext::new();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = ctx.orchestrator.clone();
        let spec = ctx.spec();
        handles.push(std::thread::spawn(move || {
            (0..3)
                .map(|_| orchestrator.create(spec.clone()).unwrap())
                .collect::<Vec<_>>()
        }));
    }

    let vms: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let mut ips: Vec<_> = vms.iter().map(|v| v.ip_address).collect();
    let mut taps: Vec<_> = vms.iter().map(|v| v.tap_device.clone()).collect();
    ips.sort();
    ips.dedup();
    taps.sort();
    taps.dedup();
    assert_eq!(ips.len(), 24);
    assert_eq!(taps.len(), 24);
}

// ============================================================================
// START / STOP
// ============================================================================

#[test]
fn start_stop_restart_cycle() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();

    ctx.orchestrator.start(&vm.id).unwrap();
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );

    ctx.orchestrator.stop(&vm.id).unwrap();
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Stopped
    );

    // A stopped VM restarts directly.
    ctx.orchestrator.start(&vm.id).unwrap();
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );
    assert_eq!(ctx.hypervisor.starts.load(Ordering::Relaxed), 2);
}

#[test]
fn start_on_running_vm_does_not_reinvoke_hypervisor() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    ctx.orchestrator.start(&vm.id).unwrap();

    let err = ctx.orchestrator.start(&vm.id).unwrap_err();
    assert!(matches!(err, KindlingError::AlreadyRunning(_)));
    assert_eq!(ctx.hypervisor.starts.load(Ordering::Relaxed), 1);
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );
}

#[test]
fn stop_on_never_started_vm_fails_without_side_effects() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();

    assert!(matches!(
        ctx.orchestrator.stop(&vm.id),
        Err(KindlingError::NotRunning(_))
    ));
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Created
    );
}

#[test]
fn launch_failure_detaches_tap_and_stays_retryable() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();

    ctx.hypervisor.fail_start.store(true, Ordering::Relaxed);
    let err = ctx.orchestrator.start(&vm.id).unwrap_err();
    assert!(matches!(err, KindlingError::Launch(_)));

    // The attach was rolled back and the record is still Created.
    let calls = ctx.net_calls.lock().unwrap().clone();
    assert!(calls.contains(&format!("delete {}", vm.tap_device)));
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Created
    );

    // Retry without recreating the instance.
    ctx.hypervisor.fail_start.store(false, Ordering::Relaxed);
    ctx.orchestrator.start(&vm.id).unwrap();
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );
}

#[test]
fn attach_failure_removes_host_device_and_stays_retryable() {
    let temp = TempDir::new().unwrap();
    let options = OrchestratorOptions {
        home_dir: temp.path().to_path_buf(),
        kernel_path: temp.path().join("vmlinux.bin"),
        bridge: "br-test".into(),
        subnet: "192.168.100.0/24".into(),
        start_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_millis(200),
        ..OrchestratorOptions::default()
    };
    let net = HostNetOps::default();
    let devices = Arc::clone(&net.devices);
    let fail_enslave = Arc::clone(&net.fail_enslave_once);
    let orchestrator =
        Orchestrator::with_net_ops(options, FakeHypervisor::default(), Box::new(net)).unwrap();
    fs::write(
        temp.path().join("images").join("base-a.ext4"),
        vec![0xabu8; 1024],
    )
    .unwrap();

    let vm = orchestrator
        .create(VmSpec {
            name: "web-1".into(),
            vcpus: 1,
            memory_mib: 128,
            disk_gib: 1,
            image: "base-a".into(),
        })
        .unwrap();

    // The tap is created but the bridge enslave fails.
    fail_enslave.store(true, Ordering::Relaxed);
    let err = orchestrator.start(&vm.id).unwrap_err();
    assert!(matches!(err, KindlingError::Network(_)));

    // The half-plumbed device was removed from the host and the record is
    // still Created.
    assert!(devices.lock().unwrap().is_empty());
    assert_eq!(
        orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Created
    );

    // The retry recreates the device; a leftover one would fail it.
    orchestrator.start(&vm.id).unwrap();
    assert_eq!(
        orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );
    assert!(devices.lock().unwrap().contains(&vm.tap_device));
}

#[test]
fn shutdown_failure_keeps_vm_running() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    ctx.orchestrator.start(&vm.id).unwrap();

    ctx.hypervisor.fail_shutdown.store(true, Ordering::Relaxed);
    assert!(matches!(
        ctx.orchestrator.stop(&vm.id),
        Err(KindlingError::Shutdown(_))
    ));
    // No silent state corruption.
    assert_eq!(
        ctx.orchestrator.get(&vm.id).unwrap().unwrap().status,
        VmStatus::Running
    );
}

// ============================================================================
// DELETE
// ============================================================================

#[test]
fn delete_frees_leases_for_reuse() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    let vm_dir = vm.rootfs_path.parent().unwrap().to_path_buf();

    ctx.orchestrator.delete(&vm.id).unwrap();

    assert!(ctx.orchestrator.list().unwrap().is_empty());
    assert!(!vm_dir.exists());

    // Conservation: the released address is observably free.
    let next = ctx.orchestrator.create(ctx.spec()).unwrap();
    assert_eq!(next.ip_address, vm.ip_address);
}

#[test]
fn delete_running_vm_survives_failing_shutdown() {
    let ctx = TestContext::new();
    let vm = ctx.orchestrator.create(ctx.spec()).unwrap();
    ctx.orchestrator.start(&vm.id).unwrap();

    ctx.hypervisor.fail_shutdown.store(true, Ordering::Relaxed);
    ctx.orchestrator.delete(&vm.id).unwrap();

    assert!(ctx.orchestrator.get(&vm.id).unwrap().is_none());
    let next = ctx.orchestrator.create(ctx.spec()).unwrap();
    assert_eq!(next.ip_address, vm.ip_address);
}

#[test]
fn delete_unknown_id_is_not_found() {
    let ctx = TestContext::new();
    let ghost = kindling::VmId::new();
    assert!(matches!(
        ctx.orchestrator.delete(&ghost),
        Err(KindlingError::NotFound(_))
    ));
}

// ============================================================================
// GET / LIST
// ============================================================================

#[test]
fn get_returns_none_for_unknown_id() {
    let ctx = TestContext::new();
    assert!(ctx.orchestrator.get(&kindling::VmId::new()).unwrap().is_none());
}

#[test]
fn list_returns_all_instances() {
    let ctx = TestContext::new();
    assert!(ctx.orchestrator.list().unwrap().is_empty());

    let a = ctx.orchestrator.create(ctx.spec()).unwrap();
    let b = ctx.orchestrator.create(ctx.spec()).unwrap();

    let infos = ctx.orchestrator.list().unwrap();
    assert_eq!(infos.len(), 2);
    let ids: Vec<_> = infos.iter().map(|i| i.id).collect();
    assert!(ids.contains(&a.id));
    assert!(ids.contains(&b.id));
}
