// ABOUTME: Host port pool leasing fixed-width port blocks from a bounded range
// ABOUTME: Allocation is a linear scan under a process-wide lock; release is idempotent

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("no free port block in {start}-{end} ({leased} leased)")]
    Exhausted { start: u16, end: u16, leased: usize },
}

/// Leases blocks of `block_size` consecutive host ports.
///
/// Block bases sit at `start + k * block_size`, so two leases never overlap.
/// `allocate` hands out a base port; every other port in the block belongs to
/// the same lease. Each lease remembers its holder, and only that holder can
/// release it.
pub struct PortPool {
    start: u16,
    end: u16,
    block_size: u16,
    probe_host: bool,
    leased: Mutex<BTreeMap<u16, String>>,
}

impl PortPool {
    /// Pool over the inclusive range `start..=end` with single-port blocks.
    pub fn new(start: u16, end: u16) -> Self {
        Self::with_block_size(start, end, 1)
    }

    pub fn with_block_size(start: u16, end: u16, block_size: u16) -> Self {
        Self {
            start,
            end,
            block_size: block_size.max(1),
            probe_host: false,
            leased: Mutex::new(BTreeMap::new()),
        }
    }

    /// Skip blocks that some other process already has bound on the host.
    pub fn probe_host_ports(mut self, probe: bool) -> Self {
        self.probe_host = probe;
        self
    }

    /// Reserve the base port of one free block for `holder`.
    pub fn allocate(&self, holder: &str) -> Result<u16, PoolError> {
        let mut leased = self.lock();

        for base in self.bases() {
            if leased.contains_key(&base) {
                continue;
            }
            if self.probe_host && !block_is_bindable(base, self.block_size) {
                debug!("Port block at {} is bound on the host, skipping", base);
                continue;
            }
            leased.insert(base, holder.to_string());
            debug!(
                "Leased port block {} (+{}) to {}",
                base,
                self.block_size - 1,
                holder
            );
            return Ok(base);
        }

        warn!(
            "Port pool {}-{} exhausted with {} leases",
            self.start,
            self.end,
            leased.len()
        );
        Err(PoolError::Exhausted {
            start: self.start,
            end: self.end,
            leased: leased.len(),
        })
    }

    /// Return `holder`'s block to the pool. Free ports and ports leased to
    /// someone else are left alone. Returns whether a lease was dropped.
    pub fn release(&self, port: u16, holder: &str) -> bool {
        let mut leased = self.lock();
        match leased.get(&port) {
            Some(current) if current == holder => {
                leased.remove(&port);
                debug!("Released port block {} from {}", port, holder);
                true
            }
            Some(current) => {
                warn!(
                    "Ignoring release of port {} by {}: leased to {}",
                    port, holder, current
                );
                false
            }
            None => false,
        }
    }

    /// Mark an existing lease as taken without scanning, e.g. when re-adopting
    /// a port recorded before a restart. Returns `false` if `port` is not a
    /// block base in this pool or is already leased.
    pub fn reserve(&self, port: u16, holder: &str) -> bool {
        if !self.is_base(port) {
            return false;
        }
        let mut leased = self.lock();
        if leased.contains_key(&port) {
            return false;
        }
        leased.insert(port, holder.to_string());
        true
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.lock().contains_key(&port)
    }

    pub fn holder(&self, port: u16) -> Option<String> {
        self.lock().get(&port).cloned()
    }

    /// Total number of blocks the range can hold.
    pub fn capacity(&self) -> usize {
        self.bases().count()
    }

    pub fn leased(&self) -> usize {
        self.lock().len()
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.leased())
    }

    fn bases(&self) -> impl Iterator<Item = u16> {
        let last_base = u32::from(self.end) + 1;
        let step = u32::from(self.block_size);
        (u32::from(self.start)..)
            .step_by(step as usize)
            .take_while(move |base| base + step <= last_base)
            .map(|base| base as u16)
    }

    fn is_base(&self, port: u16) -> bool {
        port >= self.start
            && (port - self.start) % self.block_size == 0
            && u32::from(port) + u32::from(self.block_size) <= u32::from(self.end) + 1
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u16, String>> {
        // A panic while holding the guard cannot leave the set half-updated.
        self.leased.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn block_is_bindable(base: u16, block_size: u16) -> bool {
    (0..block_size).all(|offset| {
        std::net::TcpListener::bind(("0.0.0.0", base.saturating_add(offset))).is_ok()
    })
}
