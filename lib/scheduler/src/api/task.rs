// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Task model and lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::Resource;
use super::{JobId, TaskId};

/// Lifecycle status of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TaskStatus {
    /// Observed but not yet placed.
    Pending,
    /// Placed on a node by the current session.
    Allocated,
    /// Tentatively placed pending a future release (e.g. a preemption
    /// victim's eviction).
    Pipelined,
    /// Bind dispatched, not yet acknowledged.
    Binding,
    /// Bound to a node by the cluster.
    Bound,
    Running,
    /// Eviction requested; resources will return once released.
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// True for statuses that hold resources on a node.
    pub fn is_allocated(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated
                | TaskStatus::Pipelined
                | TaskStatus::Binding
                | TaskStatus::Bound
                | TaskStatus::Running
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Whether a task may move from `from` to `to`.
///
/// The session only ever drives a handful of edges (allocate, pipeline,
/// dispatch, evict, rollback); the cluster drives the rest through fresh
/// snapshots. `Unknown` is reachable from and escapes to anywhere, because
/// the cluster may report a pod in a phase we cannot map.
pub fn validate_status_update(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    if from == to || from == Unknown || to == Unknown {
        return true;
    }

    matches!(
        (from, to),
        (Pending, Allocated)
            | (Pending, Pipelined)
            | (Allocated, Binding)
            | (Allocated, Bound)
            | (Allocated, Running)
            | (Allocated, Releasing)
            | (Allocated, Pending)
            | (Pipelined, Binding)
            | (Pipelined, Bound)
            | (Pipelined, Running)
            | (Pipelined, Pending)
            | (Binding, Bound)
            | (Binding, Pending)
            | (Bound, Running)
            | (Bound, Releasing)
            | (Running, Releasing)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Releasing, Pending)
            | (Releasing, Succeeded)
            | (Releasing, Failed)
    )
}

/// Condition reason published on tasks that could not be placed.
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";

/// Scheduling condition published on a task's pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCondition {
    /// False when the task could not be placed this cycle.
    pub scheduled: bool,
    pub reason: String,
    pub message: String,
}

/// A single schedulable unit of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub job: JobId,
    pub name: String,
    pub namespace: String,

    /// Resources used at steady state.
    pub resreq: Resource,
    /// Resources used to launch the task; may exceed `resreq` when init
    /// containers demand more than the steady-state containers.
    pub init_resreq: Resource,

    /// Target node; empty while unbound.
    pub node_name: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub volume_ready: bool,
}

impl TaskInfo {
    pub fn new(id: impl Into<TaskId>, job: impl Into<JobId>, resreq: Resource) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            namespace: "default".to_string(),
            job: job.into(),
            init_resreq: resreq.clone(),
            resreq,
            node_name: String::new(),
            status: TaskStatus::Pending,
            priority: 1,
            volume_ready: false,
            id,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    /// Tasks with no resource request at all; only these are eligible for
    /// backfill.
    pub fn is_best_effort(&self) -> bool {
        self.resreq.is_empty() && self.init_resreq.is_empty()
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task ({}:{}/{}): job {}, status {}, pri {}",
            self.id, self.namespace, self.name, self.job, self.status, self.priority
        )
    }
}
