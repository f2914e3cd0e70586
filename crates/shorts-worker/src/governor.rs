//! Encoder concurrency limits.
//!
//! Two counting semaphores gate every encode: one shared by all jobs and one
//! private to each job. A job slot is always taken before a global slot, so
//! a job waiting on its own limit never sits on a global slot.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// System-wide encoder limit. Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct ResourceGovernor {
    global: Arc<Semaphore>,
    global_limit: usize,
    per_job_limit: usize,
}

impl ResourceGovernor {
    /// Limits below one are raised to one.
    pub fn new(global_limit: usize, per_job_limit: usize) -> Self {
        let global_limit = global_limit.max(1);
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            global_limit,
            per_job_limit: per_job_limit.max(1),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_concurrent_encodes, config.max_encodes_per_job)
    }

    /// Slots for a new job.
    pub fn job_slots(&self) -> JobSlots {
        JobSlots {
            global: Arc::clone(&self.global),
            local: Arc::new(Semaphore::new(self.per_job_limit)),
            per_job_limit: self.per_job_limit,
        }
    }

    pub fn global_limit(&self) -> usize {
        self.global_limit
    }

    pub fn per_job_limit(&self) -> usize {
        self.per_job_limit
    }

    /// Global slots not currently held.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Global slots currently held.
    pub fn in_use(&self) -> usize {
        self.global_limit - self.available()
    }
}

/// The encoder slots of one job.
#[derive(Debug, Clone)]
pub struct JobSlots {
    global: Arc<Semaphore>,
    local: Arc<Semaphore>,
    per_job_limit: usize,
}

impl JobSlots {
    /// Wait for a job slot, then a global slot. Waiters are served in FIFO
    /// order on both semaphores.
    pub async fn acquire(&self) -> WorkerResult<EncodePermit> {
        let local = Arc::clone(&self.local)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Cancelled)?;
        let global = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Cancelled)?;
        trace!(
            job_available = self.local.available_permits(),
            global_available = self.global.available_permits(),
            "Encoder slot acquired"
        );
        Ok(EncodePermit {
            _global: global,
            _local: local,
        })
    }

    /// Job slots not currently held.
    pub fn available(&self) -> usize {
        self.local.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.per_job_limit - self.available()
    }
}

/// Holds one job slot and one global slot. Dropping it releases both.
#[derive(Debug)]
pub struct EncodePermit {
    _global: OwnedSemaphorePermit,
    _local: OwnedSemaphorePermit,
}

impl EncodePermit {
    pub fn release(self) {}
}
