// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Standalone cluster connector.
//!
//! Deployment builds wire the API-backed cache and effectors through
//! [`Effectors`]; this in-process connector backs standalone runs (demos,
//! soak tests of the loop and metrics surface) with an initially empty
//! cluster that accepts decisions and logs them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cohort_scheduler::api::{ClusterSnapshot, GroupCondition, JobInfo, PodGroup, QueueInfo, TaskInfo};
use cohort_scheduler::cache::{
    Binder, Cache, CacheError, Effectors, Evictor, StatusUpdater, VolumeBinder,
};

#[derive(Clone)]
pub struct StandaloneCluster {
    state: Arc<Mutex<ClusterSnapshot>>,
}

impl StandaloneCluster {
    pub fn new(default_queue: &str) -> Self {
        let mut cluster = ClusterSnapshot::default();
        cluster.add_queue(QueueInfo::new(default_queue));
        Self {
            state: Arc::new(Mutex::new(cluster)),
        }
    }

    pub fn effectors(&self) -> Effectors {
        Effectors {
            cache: Arc::new(self.clone()),
            binder: Arc::new(self.clone()),
            evictor: Arc::new(self.clone()),
            status_updater: Arc::new(self.clone()),
            volume_binder: Arc::new(self.clone()),
        }
    }
}

impl Cache for StandaloneCluster {
    fn run(&self, _stop: CancellationToken) {}

    fn wait_for_cache_sync(&self, _stop: &CancellationToken) -> bool {
        true
    }

    fn snapshot(&self) -> ClusterSnapshot {
        self.state.lock().clone()
    }

    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError> {
        tracing::info!(task = %task.id, node = hostname, "bind recorded");
        Ok(())
    }

    fn evict(&self, task: &TaskInfo, reason: &str) -> Result<(), CacheError> {
        tracing::info!(task = %task.id, reason, "eviction recorded");
        Ok(())
    }

    fn update_job_status(&self, job: &JobInfo) -> Result<JobInfo, CacheError> {
        let mut state = self.state.lock();
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job.clone())
    }
}

impl Binder for StandaloneCluster {
    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError> {
        tracing::info!(task = %task.id, node = hostname, "task bound");
        Ok(())
    }
}

impl Evictor for StandaloneCluster {
    fn evict(&self, task: &TaskInfo, reason: &str) -> Result<(), CacheError> {
        tracing::info!(task = %task.id, reason, "task evicted");
        Ok(())
    }
}

impl StatusUpdater for StandaloneCluster {
    fn update_pod_group(&self, pg: &PodGroup) -> Result<PodGroup, CacheError> {
        tracing::debug!(group = %pg.name, namespace = %pg.namespace, "pod group updated");
        Ok(pg.clone())
    }

    fn update_task_condition(
        &self,
        task: &TaskInfo,
        condition: &cohort_scheduler::api::TaskCondition,
    ) -> Result<(), CacheError> {
        tracing::debug!(task = %task.id, reason = %condition.reason, "task condition updated");
        Ok(())
    }

    fn record_job_status_event(&self, job: &JobInfo, condition: &GroupCondition) {
        tracing::info!(job = %job.id, reason = %condition.reason, message = %condition.message, "job status event");
    }
}

impl VolumeBinder for StandaloneCluster {
    fn allocate_volumes(&self, _task: &TaskInfo, _hostname: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn bind_volumes(&self, _task: &TaskInfo) -> Result<(), CacheError> {
        Ok(())
    }
}
