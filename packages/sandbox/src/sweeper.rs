// ABOUTME: Reclamation sweeper evicting idle or over-age sandboxes on a fixed interval
// ABOUTME: Each eviction stops the container, releases its port and deletes the record

use crate::error::Result;
use crate::runtime::SandboxRuntime;
use crate::service::reclaim;
use crate::storage::{Sandbox, SandboxRegistry};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Idle,
    Lifetime,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Lifetime => "lifetime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub sandbox_id: String,
    pub project_id: String,
    pub reason: EvictionReason,
}

pub struct Sweeper {
    registry: SandboxRegistry,
    runtime: Arc<SandboxRuntime>,
    idle_timeout: Duration,
    max_lifetime: Duration,
    interval: std::time::Duration,
    running: Arc<RwLock<bool>>,
    /// Bumped by every `start`; a loop exits once it no longer matches
    generation: AtomicU64,
    loops: AtomicUsize,
}

impl Sweeper {
    pub fn new(
        registry: SandboxRegistry,
        runtime: Arc<SandboxRuntime>,
        idle_timeout: Duration,
        max_lifetime: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            idle_timeout,
            max_lifetime,
            interval,
            running: Arc::new(RwLock::new(false)),
            generation: AtomicU64::new(0),
            loops: AtomicUsize::new(0),
        }
    }

    /// Why `sandbox` should go at `now`, if at all. Idle time and age are
    /// checked independently.
    pub fn verdict(&self, sandbox: &Sandbox, now: DateTime<Utc>) -> Option<EvictionReason> {
        if now - sandbox.last_activity_at > self.idle_timeout {
            Some(EvictionReason::Idle)
        } else if now - sandbox.created_at > self.max_lifetime {
            Some(EvictionReason::Lifetime)
        } else {
            None
        }
    }

    /// One pass over every record as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<Eviction>> {
        let mut evictions = Vec::new();

        for sandbox in self.registry.list_all().await? {
            let Some(reason) = self.verdict(&sandbox, now) else {
                continue;
            };

            match reclaim(&self.registry, &self.runtime, &sandbox).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!("Failed to evict sandbox {}: {}", sandbox.id, e);
                    continue;
                }
            }

            info!(
                sandbox_id = %sandbox.id,
                project_id = %sandbox.project_id,
                reason = reason.as_str(),
                idle_secs = (now - sandbox.last_activity_at).num_seconds(),
                age_secs = (now - sandbox.created_at).num_seconds(),
                "Evicted sandbox"
            );
            evictions.push(Eviction {
                sandbox_id: sandbox.id,
                project_id: sandbox.project_id,
                reason,
            });
        }

        Ok(evictions)
    }

    pub async fn sweep(&self) -> Result<Vec<Eviction>> {
        self.sweep_at(Utc::now()).await
    }

    /// Start the background loop. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(running);

        info!(
            "Starting sandbox sweeper (every {:?}, idle {}s, lifetime {}s)",
            self.interval,
            self.idle_timeout.num_seconds(),
            self.max_lifetime.num_seconds()
        );

        let sweeper = Arc::clone(self);
        self.loops.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = time::interval(sweeper.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !*sweeper.running.read().await
                    || sweeper.generation.load(Ordering::SeqCst) != generation
                {
                    debug!("Sandbox sweeper loop {} stopped", generation);
                    break;
                }

                match sweeper.sweep().await {
                    Ok(evictions) if !evictions.is_empty() => {
                        debug!("Sweep evicted {} sandboxes", evictions.len());
                    }
                    Ok(_) => {}
                    Err(e) => error!("Sandbox sweep failed: {}", e),
                }
            }
            sweeper.loops.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping sandbox sweeper");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Background loops that have not exited yet.
    pub fn active_loops(&self) -> usize {
        self.loops.load(Ordering::SeqCst)
    }
}
