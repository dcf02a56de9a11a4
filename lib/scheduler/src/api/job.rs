// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Job model: task table, per-status index, running aggregates.
//!
//! Invariants maintained by every mutation:
//! - the task table and the union of the status index hold exactly the same
//!   task ids, and empty status buckets are removed;
//! - `allocated` is the sum of `resreq` over tasks whose status holds
//!   resources; `total_request` is the sum over all tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::group::{GroupPhase, PodDisruptionBudget, PodGroup};
use super::resource::{FitDelta, Resource, CPU_DIMENSION, GPU_RESOURCE_NAME, MEMORY_DIMENSION};
use super::task::{validate_status_update, TaskInfo, TaskStatus};
use super::{JobId, QueueId, TaskId};
use crate::error::SchedulingError;

/// A gang of related tasks scheduled together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub namespace: String,

    pub queue: QueueId,
    pub priority: i32,

    pub node_selector: BTreeMap<String, String>,
    /// Gang threshold; zero means no gang semantics.
    pub min_available: u32,

    /// Per-node shortfall recorded during the last placement attempt.
    pub nodes_fit_delta: BTreeMap<String, FitDelta>,

    tasks: BTreeMap<TaskId, TaskInfo>,
    status_index: BTreeMap<TaskStatus, BTreeSet<TaskId>>,

    /// Sum of `resreq` over tasks holding resources.
    pub allocated: Resource,
    /// Sum of `resreq` over all tasks.
    pub total_request: Resource,

    pub creation_timestamp: SystemTime,
    pub pod_group: Option<PodGroup>,
    /// Legacy source; never set together with `pod_group`.
    pub pdb: Option<PodDisruptionBudget>,
}

impl Default for JobInfo {
    fn default() -> Self {
        Self {
            id: JobId::default(),
            name: String::new(),
            namespace: String::new(),
            queue: QueueId::default(),
            priority: 0,
            node_selector: BTreeMap::new(),
            min_available: 0,
            nodes_fit_delta: BTreeMap::new(),
            tasks: BTreeMap::new(),
            status_index: BTreeMap::new(),
            allocated: Resource::empty(),
            total_request: Resource::empty(),
            creation_timestamp: SystemTime::UNIX_EPOCH,
            pod_group: None,
            pdb: None,
        }
    }
}

impl JobInfo {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_tasks(id: impl Into<JobId>, tasks: Vec<TaskInfo>) -> Self {
        let mut job = Self::new(id);
        for task in tasks {
            job.add_task(task);
        }
        job
    }

    /// Bind this job to its pod group, adopting identity, queue, threshold
    /// and timestamp.
    pub fn set_pod_group(&mut self, pg: PodGroup) {
        self.name = pg.name.clone();
        self.namespace = pg.namespace.clone();
        self.min_available = pg.min_member;
        self.queue = pg.queue.clone();
        self.creation_timestamp = pg.creation_timestamp;
        self.pod_group = Some(pg);
    }

    /// Bind this job to a legacy PDB source.
    pub fn set_pdb(&mut self, pdb: PodDisruptionBudget) {
        self.name = pdb.name.clone();
        self.namespace = pdb.namespace.clone();
        self.min_available = pdb.min_available;
        self.creation_timestamp = pdb.creation_timestamp;
        self.pdb = Some(pdb);
    }

    /// Admission phase. Jobs without a pod group (the legacy path) carry no
    /// phase and are treated as already admitted.
    pub fn phase(&self) -> GroupPhase {
        self.pod_group
            .as_ref()
            .map(|pg| pg.phase)
            .unwrap_or(GroupPhase::Inqueue)
    }

    pub fn add_task(&mut self, task: TaskInfo) {
        self.total_request.add(&task.resreq);
        if task.status.is_allocated() {
            self.allocated.add(&task.resreq);
        }
        self.status_index
            .entry(task.status)
            .or_default()
            .insert(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn delete_task(&mut self, id: &TaskId) -> Result<TaskInfo, SchedulingError> {
        let task = self.tasks.remove(id).ok_or_else(|| SchedulingError::UnknownTask {
            task: id.clone(),
            job: self.id.clone(),
        })?;

        self.total_request.saturating_sub(&task.resreq);
        if task.status.is_allocated() {
            self.allocated.saturating_sub(&task.resreq);
        }
        if let Some(bucket) = self.status_index.get_mut(&task.status) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.status_index.remove(&task.status);
            }
        }
        Ok(task)
    }

    /// Move a task to `status`, guarded by the legal-transition table.
    pub fn update_task_status(
        &mut self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<(), SchedulingError> {
        let from = self
            .tasks
            .get(id)
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: id.clone(),
                job: self.id.clone(),
            })?
            .status;

        if !validate_status_update(from, status) {
            return Err(SchedulingError::IllegalStatusTransition {
                task: id.clone(),
                from,
                to: status,
            });
        }

        let mut task = self.delete_task(id)?;
        task.status = status;
        self.add_task(task);
        Ok(())
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }

    /// Mutable access for bookkeeping fields (node name, volume flag).
    /// Status and resources must go through [`Self::update_task_status`] and
    /// the add/delete pair so the aggregates stay consistent.
    pub(crate) fn task_mut(&mut self, id: &TaskId) -> Option<&mut TaskInfo> {
        self.tasks.get_mut(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&TaskInfo> {
        self.status_index
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.status_index.get(&status).map_or(0, BTreeSet::len)
    }

    /// Number of tasks counting toward gang readiness: holding resources or
    /// already succeeded.
    pub fn ready_task_num(&self) -> u32 {
        self.status_index
            .iter()
            .filter(|(status, _)| status.is_allocated() || **status == TaskStatus::Succeeded)
            .map(|(_, bucket)| bucket.len() as u32)
            .sum()
    }

    /// Number of tasks that could still count toward readiness this cycle.
    pub fn valid_task_num(&self) -> u32 {
        self.status_index
            .iter()
            .filter(|(status, _)| {
                status.is_allocated()
                    || **status == TaskStatus::Succeeded
                    || **status == TaskStatus::Pending
            })
            .map(|(_, bucket)| bucket.len() as u32)
            .sum()
    }

    pub fn record_fit_delta(&mut self, node_name: &str, delta: FitDelta) {
        self.nodes_fit_delta.insert(node_name.to_string(), delta);
    }

    /// Human-readable summary of why the job's tasks failed to fit each
    /// candidate node, e.g. `0/3 nodes are available, 2 insufficient cpu.`
    pub fn fit_error(&self) -> String {
        if self.nodes_fit_delta.is_empty() {
            return "0 nodes are available".to_string();
        }

        let mut reasons: BTreeMap<&str, usize> = BTreeMap::new();
        for delta in self.nodes_fit_delta.values() {
            for dimension in [CPU_DIMENSION, MEMORY_DIMENSION, GPU_RESOURCE_NAME] {
                if delta.get(dimension) < 0.0 {
                    *reasons.entry(short_dimension_name(dimension)).or_insert(0) += 1;
                }
            }
        }

        let mut parts: Vec<String> = reasons
            .into_iter()
            .map(|(dimension, count)| format!("{count} insufficient {dimension}"))
            .collect();
        parts.sort();

        format!(
            "0/{} nodes are available, {}.",
            self.nodes_fit_delta.len(),
            parts.join(", ")
        )
    }
}

/// Display name of a dimension inside FitError messages.
fn short_dimension_name(dimension: &str) -> &'static str {
    match dimension {
        CPU_DIMENSION => "cpu",
        MEMORY_DIMENSION => "memory",
        GPU_RESOURCE_NAME => "GPU",
        _ => "resource",
    }
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job ({}): namespace {} ({}), name {}, minAvailable {}, tasks {}",
            self.id,
            self.namespace,
            self.queue,
            self.name,
            self.min_available,
            self.tasks.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::resource::FitDelta;

    fn task(id: &str, status: TaskStatus, milli_cpu: f64) -> TaskInfo {
        TaskInfo::new(id, "ns/job", Resource::new(milli_cpu, 0.0)).with_status(status)
    }

    fn assert_aggregates(job: &JobInfo) {
        let mut allocated = Resource::empty();
        let mut total = Resource::empty();
        for t in job.tasks() {
            total.add(&t.resreq);
            if t.status.is_allocated() {
                allocated.add(&t.resreq);
            }
        }
        assert_eq!(job.allocated, allocated, "allocated aggregate drifted");
        assert_eq!(job.total_request, total, "total_request aggregate drifted");

        let indexed: usize = [
            TaskStatus::Pending,
            TaskStatus::Allocated,
            TaskStatus::Pipelined,
            TaskStatus::Binding,
            TaskStatus::Bound,
            TaskStatus::Running,
            TaskStatus::Releasing,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Unknown,
        ]
        .iter()
        .map(|s| job.count_status(*s))
        .sum();
        assert_eq!(indexed, job.task_count(), "status index lost or duplicated tasks");
    }

    #[test]
    fn test_add_delete_round_trip() {
        let mut job = JobInfo::with_tasks(
            "ns/job",
            vec![task("t1", TaskStatus::Running, 1000.0)],
        );
        let before_allocated = job.allocated.clone();
        let before_total = job.total_request.clone();

        job.add_task(task("t2", TaskStatus::Pending, 500.0));
        job.delete_task(&TaskId::from("t2")).unwrap();

        assert_eq!(job.allocated, before_allocated);
        assert_eq!(job.total_request, before_total);
        assert_aggregates(&job);
    }

    #[test]
    fn test_status_update_moves_index_buckets() {
        let mut job = JobInfo::with_tasks("ns/job", vec![task("t1", TaskStatus::Pending, 1000.0)]);

        job.update_task_status(&TaskId::from("t1"), TaskStatus::Allocated)
            .unwrap();

        assert_eq!(job.count_status(TaskStatus::Allocated), 1);
        assert_eq!(
            job.count_status(TaskStatus::Pending),
            0,
            "old bucket must be emptied and removed"
        );
        assert_eq!(job.allocated.milli_cpu, 1000.0);
        assert_aggregates(&job);
    }

    #[test]
    fn test_illegal_transition_is_an_error() {
        let mut job = JobInfo::with_tasks("ns/job", vec![task("t1", TaskStatus::Succeeded, 1.0)]);
        let err = job.update_task_status(&TaskId::from("t1"), TaskStatus::Running);
        assert!(matches!(
            err,
            Err(SchedulingError::IllegalStatusTransition { .. })
        ));
        assert_aggregates(&job);
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let mut job = JobInfo::new("ns/job");
        assert!(matches!(
            job.delete_task(&TaskId::from("missing")),
            Err(SchedulingError::UnknownTask { .. })
        ));
    }

    #[test]
    fn test_clone_is_deep_equal() {
        let mut job = JobInfo::with_tasks(
            "ns/job",
            vec![
                task("t1", TaskStatus::Running, 1000.0),
                task("t2", TaskStatus::Pending, 500.0),
            ],
        );
        job.set_pod_group(PodGroup::new("ns", "job", 2));

        let copy = job.clone();
        assert_eq!(job, copy);

        // Mutating the copy must not affect the original.
        let mut copy = copy;
        copy.update_task_status(&TaskId::from("t2"), TaskStatus::Allocated)
            .unwrap();
        assert_eq!(job.count_status(TaskStatus::Pending), 1);
    }

    #[test]
    fn test_ready_and_valid_task_num() {
        let job = JobInfo::with_tasks(
            "ns/job",
            vec![
                task("t1", TaskStatus::Running, 1.0),
                task("t2", TaskStatus::Pipelined, 1.0),
                task("t3", TaskStatus::Succeeded, 1.0),
                task("t4", TaskStatus::Pending, 1.0),
                task("t5", TaskStatus::Failed, 1.0),
            ],
        );
        assert_eq!(job.ready_task_num(), 3);
        assert_eq!(job.valid_task_num(), 4);
    }

    #[test]
    fn test_fit_error_empty() {
        let job = JobInfo::new("ns/job");
        assert_eq!(job.fit_error(), "0 nodes are available");
    }

    #[test]
    fn test_fit_error_histogram_sorted() {
        let mut job = JobInfo::new("ns/job");
        job.record_fit_delta("n1", FitDelta::from_dimensions(&[(CPU_DIMENSION, -1.0)]));
        job.record_fit_delta("n2", FitDelta::from_dimensions(&[(MEMORY_DIMENSION, -2.0)]));
        job.record_fit_delta(
            "n3",
            FitDelta::from_dimensions(&[(CPU_DIMENSION, -1.0), (GPU_RESOURCE_NAME, -1.0)]),
        );

        assert_eq!(
            job.fit_error(),
            "0/3 nodes are available, 1 insufficient GPU, 1 insufficient memory, 2 insufficient cpu."
        );
    }
}
