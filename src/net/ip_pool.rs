//! Guest IP address leasing for one configured /24 subnet.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::errors::{KindlingError, KindlingResult};

/// First usable host number; lower addresses are reserved for the gateway
/// and other infrastructure.
const FIRST_HOST: u8 = 10;

/// Last usable host number (.254 is conventionally the broadcast neighbor,
/// .255 the broadcast address).
const LAST_HOST: u8 = 253;

/// Leases guest addresses from the usable host range of a /24 subnet.
///
/// Allocation scans the range low-to-high and returns the first free
/// address, so allocation order is reproducible. Release is idempotent:
/// cleanup paths may release defensively.
#[derive(Debug)]
pub struct IpPool {
    network: [u8; 3],
    leased: Mutex<HashSet<Ipv4Addr>>,
}

impl IpPool {
    /// Create a pool for a subnet in `a.b.c.0/24` notation.
    ///
    /// Only /24 subnets are supported; anything else is a validation error.
    pub fn new(subnet: &str) -> KindlingResult<Self> {
        let (base, prefix) = subnet
            .split_once('/')
            .ok_or_else(|| invalid_subnet(subnet))?;
        if prefix != "24" {
            return Err(invalid_subnet(subnet));
        }
        let addr: Ipv4Addr = base.parse().map_err(|_| invalid_subnet(subnet))?;
        let octets = addr.octets();
        if octets[3] != 0 {
            return Err(invalid_subnet(subnet));
        }

        Ok(Self {
            network: [octets[0], octets[1], octets[2]],
            leased: Mutex::new(HashSet::new()),
        })
    }

    /// Lease the lowest free address in the usable range.
    ///
    /// Returns [`KindlingError::Exhausted`] when every usable address is
    /// leased; the caller must treat this as resource exhaustion, not retry.
    pub fn allocate(&self) -> KindlingResult<Ipv4Addr> {
        let mut leased = self.lock()?;
        for host in FIRST_HOST..=LAST_HOST {
            let addr = Ipv4Addr::new(self.network[0], self.network[1], self.network[2], host);
            if leased.insert(addr) {
                tracing::debug!(ip = %addr, "leased guest address");
                return Ok(addr);
            }
        }
        Err(KindlingError::Exhausted(format!(
            "no free addresses in {}.{}.{}.0/24",
            self.network[0], self.network[1], self.network[2]
        )))
    }

    /// Return an address to the pool. No-op if it was not leased.
    pub fn release(&self, addr: Ipv4Addr) {
        match self.lock() {
            Ok(mut leased) => {
                if leased.remove(&addr) {
                    tracing::debug!(ip = %addr, "released guest address");
                }
            }
            Err(e) => tracing::error!(ip = %addr, error = %e, "failed to release address"),
        }
    }

    /// Whether an address is currently leased (test and introspection aid).
    pub fn is_leased(&self, addr: Ipv4Addr) -> bool {
        self.lock().map(|l| l.contains(&addr)).unwrap_or(false)
    }

    fn lock(&self) -> KindlingResult<std::sync::MutexGuard<'_, HashSet<Ipv4Addr>>> {
        self.leased
            .lock()
            .map_err(|e| KindlingError::Internal(format!("ip lease table lock poisoned: {}", e)))
    }
}

fn invalid_subnet(subnet: &str) -> KindlingError {
    KindlingError::Validation(format!(
        "subnet must be in a.b.c.0/24 notation, got {:?}",
        subnet
    ))
}
