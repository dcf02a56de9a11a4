// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces to the external cluster collaborators.
//!
//! The engine never talks to the cluster API directly: it consumes snapshots
//! from the [`Cache`] and emits decisions through the [`Binder`], [`Evictor`],
//! [`StatusUpdater`] and [`VolumeBinder`] seams. Production wires these to
//! the API machinery; tests wire them to an in-memory double.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{ClusterSnapshot, GroupCondition, JobInfo, PodGroup, TaskCondition, TaskInfo};

/// Failures crossing the cluster boundary. These are transient by contract:
/// the affected decision is rolled back where possible and the cycle
/// proceeds.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cluster API error: {0}")]
    Api(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("conflicting update: {0}")]
    Conflict(String),
}

/// Watches the cluster and produces consistent snapshots.
pub trait Cache: Send + Sync {
    /// Start the cache's own watchers. Returns immediately; the watchers run
    /// until `stop` fires.
    fn run(&self, stop: CancellationToken);

    /// Block until the watchers have synced, or `stop` fires. Returns false
    /// when interrupted before sync.
    fn wait_for_cache_sync(&self, stop: &CancellationToken) -> bool;

    /// Deep-copy the current cluster state.
    fn snapshot(&self) -> ClusterSnapshot;

    /// Bind a task to a host (bookkeeping path used by the bind workers).
    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError>;

    /// Evict a task to release its resources.
    fn evict(&self, task: &TaskInfo, reason: &str) -> Result<(), CacheError>;

    /// Publish updated job status. The cache may keep the job in a short
    /// backlog and defer visible updates; callers may retry next cycle.
    fn update_job_status(&self, job: &JobInfo) -> Result<JobInfo, CacheError>;
}

/// Binds a task's pod to a host.
pub trait Binder: Send + Sync {
    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError>;
}

/// Evicts a task's pod.
pub trait Evictor: Send + Sync {
    fn evict(&self, task: &TaskInfo, reason: &str) -> Result<(), CacheError>;
}

/// Publishes pod group and per-task conditions back to the cluster.
pub trait StatusUpdater: Send + Sync {
    fn update_pod_group(&self, pg: &PodGroup) -> Result<PodGroup, CacheError>;

    fn update_task_condition(
        &self,
        task: &TaskInfo,
        condition: &TaskCondition,
    ) -> Result<(), CacheError>;

    /// Event-style fallback for jobs without a pod group (the legacy PDB
    /// route), which have no object to carry a condition.
    fn record_job_status_event(&self, job: &JobInfo, condition: &GroupCondition);
}

/// Allocates and binds volumes ahead of pod binding.
pub trait VolumeBinder: Send + Sync {
    fn allocate_volumes(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError>;
    fn bind_volumes(&self, task: &TaskInfo) -> Result<(), CacheError>;
}

/// The effector handles a session is opened with.
#[derive(Clone)]
pub struct Effectors {
    pub cache: Arc<dyn Cache>,
    pub binder: Arc<dyn Binder>,
    pub evictor: Arc<dyn Evictor>,
    pub status_updater: Arc<dyn StatusUpdater>,
    pub volume_binder: Arc<dyn VolumeBinder>,
}
