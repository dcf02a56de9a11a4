// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory doubles for exercising the engine without a cluster.
//!
//! [`FakeCluster`] implements every collaborator trait over a shared
//! in-memory state and records binds, evictions and published conditions for
//! assertions. Binds mark the task `Bound` in the backing state; evictions
//! remove the task outright, as if its grace period elapsed between cycles.
//! [`RecordingRecorder`] captures metric calls for the same purpose.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{
    ClusterSnapshot, GroupCondition, JobId, JobInfo, NodeInfo, QueueInfo, TaskId, TaskInfo,
    TaskStatus,
};
use crate::cache::{Binder, Cache, CacheError, Effectors, Evictor, StatusUpdater, VolumeBinder};
use crate::metrics::{Recorder, ScheduleResult};

#[derive(Default)]
struct FakeClusterState {
    cluster: ClusterSnapshot,
    binds: Vec<(TaskId, String)>,
    evictions: Vec<(TaskId, String)>,
    conditions: Vec<(JobId, GroupCondition)>,
    task_conditions: Vec<(TaskId, crate::api::TaskCondition)>,
    fail_bind: bool,
    fail_evict: bool,
}

/// A cluster double backing all five collaborator traits.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&self, job: JobInfo) {
        self.state.lock().cluster.add_job(job);
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.state.lock().cluster.add_node(node);
    }

    pub fn add_queue(&self, queue: QueueInfo) {
        self.state.lock().cluster.add_queue(queue);
    }

    /// Make subsequent binds fail with an API error.
    pub fn fail_binds(&self, fail: bool) {
        self.state.lock().fail_bind = fail;
    }

    /// Make subsequent evictions fail with an API error.
    pub fn fail_evictions(&self, fail: bool) {
        self.state.lock().fail_evict = fail;
    }

    pub fn binds(&self) -> Vec<(TaskId, String)> {
        self.state.lock().binds.clone()
    }

    pub fn evictions(&self) -> Vec<(TaskId, String)> {
        self.state.lock().evictions.clone()
    }

    pub fn conditions(&self) -> Vec<(JobId, GroupCondition)> {
        self.state.lock().conditions.clone()
    }

    pub fn task_conditions(&self) -> Vec<(TaskId, crate::api::TaskCondition)> {
        self.state.lock().task_conditions.clone()
    }

    pub fn job(&self, id: &JobId) -> Option<JobInfo> {
        self.state.lock().cluster.jobs.get(id).cloned()
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

impl Cache for FakeCluster {
    fn run(&self, _stop: CancellationToken) {}

    fn wait_for_cache_sync(&self, _stop: &CancellationToken) -> bool {
        true
    }

    fn snapshot(&self) -> ClusterSnapshot {
        self.state.lock().cluster.clone()
    }

    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock();

        let mut bound = None;
        if let Some(job) = state.cluster.jobs.get_mut(&task.job) {
            if let Ok(mut t) = job.delete_task(&task.id) {
                t.status = TaskStatus::Bound;
                t.node_name = hostname.to_string();
                bound = Some(t.clone());
                job.add_task(t);
            }
        }

        // Reflect the consumption on the backing node so the next snapshot
        // sees it, the way a synced cache would.
        if let Some(bound) = bound {
            if let Some(node) = state.cluster.nodes.get_mut(hostname) {
                let _ = node.add_task(bound);
            }
        }
        Ok(())
    }

    fn evict(&self, _task: &TaskInfo, _reason: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn update_job_status(&self, job: &JobInfo) -> Result<JobInfo, CacheError> {
        let mut state = self.state.lock();
        state.cluster.jobs.insert(job.id.clone(), job.clone());
        Ok(job.clone())
    }
}

impl Binder for FakeCluster {
    fn bind(&self, task: &TaskInfo, hostname: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.fail_bind {
            return Err(CacheError::Api("bind refused by test".to_string()));
        }
        state.binds.push((task.id.clone(), hostname.to_string()));
        Ok(())
    }
}

impl Evictor for FakeCluster {
    fn evict(&self, task: &TaskInfo, reason: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.fail_evict {
            return Err(CacheError::Api("evict refused by test".to_string()));
        }
        state.evictions.push((task.id.clone(), reason.to_string()));

        // Model the grace period as already elapsed: the task is gone from
        // the backing state, so the next snapshot sees the capacity free.
        let node_name = task.node_name.clone();
        if let Some(job) = state.cluster.jobs.get_mut(&task.job) {
            let _ = job.delete_task(&task.id);
        }
        if !node_name.is_empty() {
            if let Some(node) = state.cluster.nodes.get_mut(&node_name) {
                let _ = node.remove_task(&task.id);
            }
        }
        Ok(())
    }
}

impl StatusUpdater for FakeCluster {
    fn update_pod_group(
        &self,
        pg: &crate::api::PodGroup,
    ) -> Result<crate::api::PodGroup, CacheError> {
        let mut state = self.state.lock();
        let job_id = JobId::derive(&pg.namespace, &pg.name);
        for condition in &pg.conditions {
            state.conditions.push((job_id.clone(), condition.clone()));
        }
        if let Some(job) = state.cluster.jobs.get_mut(&job_id) {
            job.pod_group = Some(pg.clone());
        }
        Ok(pg.clone())
    }

    fn update_task_condition(
        &self,
        task: &TaskInfo,
        condition: &crate::api::TaskCondition,
    ) -> Result<(), CacheError> {
        self.state
            .lock()
            .task_conditions
            .push((task.id.clone(), condition.clone()));
        Ok(())
    }

    fn record_job_status_event(&self, job: &JobInfo, condition: &GroupCondition) {
        self.state
            .lock()
            .conditions
            .push((job.id.clone(), condition.clone()));
    }
}

impl VolumeBinder for FakeCluster {
    fn allocate_volumes(&self, _task: &TaskInfo, _hostname: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn bind_volumes(&self, _task: &TaskInfo) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Captures every metric call for assertions.
#[derive(Default)]
pub struct RecordingRecorder {
    state: Arc<Mutex<RecorderState>>,
}

#[derive(Default)]
struct RecorderState {
    schedule_attempts: BTreeMap<&'static str, u64>,
    preemption_attempts: u64,
    preemption_victims: usize,
    unschedulable_tasks: BTreeMap<String, u32>,
    unschedulable_jobs: usize,
    job_retries: BTreeMap<String, u64>,
}

impl RecordingRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn schedule_attempts(&self, result: ScheduleResult) -> u64 {
        self.state
            .lock()
            .schedule_attempts
            .get(result.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn preemption_attempts(&self) -> u64 {
        self.state.lock().preemption_attempts
    }

    pub fn preemption_victims(&self) -> usize {
        self.state.lock().preemption_victims
    }

    pub fn unschedulable_tasks(&self, job: &str) -> u32 {
        self.state
            .lock()
            .unschedulable_tasks
            .get(job)
            .copied()
            .unwrap_or(0)
    }

    pub fn unschedulable_jobs(&self) -> usize {
        self.state.lock().unschedulable_jobs
    }

    pub fn job_retries(&self, job: &str) -> u64 {
        self.state.lock().job_retries.get(job).copied().unwrap_or(0)
    }
}

impl Recorder for RecordingRecorder {
    fn observe_e2e_duration(&self, _: std::time::Duration) {}
    fn observe_plugin_duration(&self, _: &str, _: &str, _: std::time::Duration) {}
    fn observe_action_duration(&self, _: &str, _: std::time::Duration) {}
    fn observe_task_schedule_duration(&self, _: std::time::Duration) {}

    fn count_schedule_attempts(&self, result: ScheduleResult, count: u64) {
        *self
            .state
            .lock()
            .schedule_attempts
            .entry(result.as_str())
            .or_insert(0) += count;
    }

    fn set_preemption_victims(&self, count: usize) {
        self.state.lock().preemption_victims = count;
    }

    fn count_preemption_attempt(&self) {
        self.state.lock().preemption_attempts += 1;
    }

    fn set_unschedulable_task_count(&self, job_id: &str, count: u32) {
        self.state
            .lock()
            .unschedulable_tasks
            .insert(job_id.to_string(), count);
    }

    fn set_unschedulable_job_count(&self, count: usize) {
        self.state.lock().unschedulable_jobs = count;
    }

    fn count_job_retry(&self, job_id: &str) {
        *self
            .state
            .lock()
            .job_retries
            .entry(job_id.to_string())
            .or_insert(0) += 1;
    }
}
