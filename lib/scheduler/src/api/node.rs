// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Node model: capacity pools and per-task bookkeeping.
//!
//! Pools:
//! - `idle = allocatable − used` is what allocate may consume now;
//! - `releasing` accumulates the requests of tasks being evicted and is
//!   drained by pipelined tasks claiming that future capacity;
//! - `future_idle = idle + releasing` is what pipelining may count on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resource::Resource;
use super::task::{TaskInfo, TaskStatus};
use super::TaskId;
use crate::error::SchedulingError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,

    pub capacity: Resource,
    pub allocatable: Resource,
    /// Held by tasks in allocated or releasing statuses.
    pub used: Resource,
    /// Will return once releasing tasks terminate, minus what pipelined
    /// tasks have already claimed.
    pub releasing: Resource,
    /// Free right now.
    pub idle: Resource,

    pub labels: BTreeMap<String, String>,

    tasks: BTreeMap<TaskId, TaskInfo>,
    /// Portion of each pipelined task's claim drawn from idle because the
    /// releasing pool could not cover it; removal must credit the same
    /// pools the addition charged.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pipelined_overdraft: BTreeMap<TaskId, Resource>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, allocatable: Resource) -> Self {
        Self {
            name: name.into(),
            capacity: allocatable.clone(),
            idle: allocatable.clone(),
            allocatable,
            used: Resource::empty(),
            releasing: Resource::empty(),
            labels: BTreeMap::new(),
            tasks: BTreeMap::new(),
            pipelined_overdraft: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Capacity a pipelined task may count on once releases complete.
    pub fn future_idle(&self) -> Resource {
        let mut future = self.idle.clone();
        future.add(&self.releasing);
        future
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Account a task against the node's pools according to its status.
    pub fn add_task(&mut self, task: TaskInfo) -> Result<(), SchedulingError> {
        if self.tasks.contains_key(&task.id) {
            return Err(SchedulingError::DuplicateTask {
                task: task.id.clone(),
                node: self.name.clone(),
            });
        }

        match task.status {
            TaskStatus::Releasing => {
                // Still occupying resources, but they are on their way back.
                self.idle.checked_sub(&task.resreq)?;
                self.used.add(&task.resreq);
                self.releasing.add(&task.resreq);
            }
            TaskStatus::Pipelined => {
                // Claims future capacity; draw from the releasing pool first
                // and fall back to idle for any remainder. Compute the split
                // before touching the pools so a failure leaves them intact;
                // the remainder is recorded so removal can invert the split.
                let mut releasing = self.releasing.clone();
                let remainder = releasing.sub_with_remainder(&task.resreq);
                if !remainder.is_empty() {
                    self.idle.checked_sub(&remainder)?;
                    self.used.add(&remainder);
                    self.pipelined_overdraft
                        .insert(task.id.clone(), remainder);
                }
                self.releasing = releasing;
            }
            status if status.is_allocated() => {
                self.idle.checked_sub(&task.resreq)?;
                self.used.add(&task.resreq);
            }
            _ => {}
        }

        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Remove a task and return its resources to the pools it charged.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<TaskInfo, SchedulingError> {
        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulingError::UnknownTaskOnNode {
                task: id.clone(),
                node: self.name.clone(),
            })?;

        match task.status {
            TaskStatus::Releasing => {
                self.idle.add(&task.resreq);
                self.used.saturating_sub(&task.resreq);
                self.releasing.saturating_sub(&task.resreq);
            }
            TaskStatus::Pipelined => {
                // Invert the add-time split: the overdraft goes back to
                // idle/used, only the rest was ever drawn from releasing.
                let overdraft = self
                    .pipelined_overdraft
                    .remove(&task.id)
                    .unwrap_or_default();
                let mut from_releasing = task.resreq.clone();
                from_releasing.saturating_sub(&overdraft);
                self.releasing.add(&from_releasing);
                if !overdraft.is_empty() {
                    self.idle.add(&overdraft);
                    self.used.saturating_sub(&overdraft);
                }
            }
            status if status.is_allocated() => {
                self.idle.add(&task.resreq);
                self.used.saturating_sub(&task.resreq);
            }
            _ => {}
        }

        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(milli_cpu: f64) -> NodeInfo {
        NodeInfo::new("n1", Resource::new(milli_cpu, 8192.0))
    }

    fn task(id: &str, status: TaskStatus, milli_cpu: f64) -> TaskInfo {
        TaskInfo::new(id, "ns/job", Resource::new(milli_cpu, 0.0))
            .with_status(status)
            .with_node("n1")
    }

    #[test]
    fn test_allocated_task_consumes_idle() {
        let mut n = node(4000.0);
        n.add_task(task("t1", TaskStatus::Allocated, 1000.0)).unwrap();

        assert_eq!(n.idle.milli_cpu, 3000.0);
        assert_eq!(n.used.milli_cpu, 1000.0);
    }

    #[test]
    fn test_remove_restores_pools() {
        let mut n = node(4000.0);
        n.add_task(task("t1", TaskStatus::Running, 1500.0)).unwrap();
        n.remove_task(&TaskId::from("t1")).unwrap();

        assert_eq!(n.idle.milli_cpu, 4000.0);
        assert_eq!(n.used.milli_cpu, 0.0);
    }

    #[test]
    fn test_releasing_feeds_future_idle() {
        let mut n = node(4000.0);
        n.add_task(task("t1", TaskStatus::Releasing, 3000.0)).unwrap();

        assert_eq!(n.idle.milli_cpu, 1000.0);
        assert_eq!(n.future_idle().milli_cpu, 4000.0);
    }

    #[test]
    fn test_pipelined_claims_releasing_then_idle() {
        let mut n = node(4000.0);
        n.add_task(task("victim", TaskStatus::Releasing, 2000.0)).unwrap();
        n.add_task(task("incoming", TaskStatus::Pipelined, 3000.0)).unwrap();

        // 2000 drawn from releasing, the remaining 1000 from idle.
        assert_eq!(n.releasing.milli_cpu, 0.0);
        assert_eq!(n.idle.milli_cpu, 1000.0);
    }

    #[test]
    fn test_remove_pipelined_restores_split_pools() {
        let mut n = node(4000.0);
        n.add_task(task("victim", TaskStatus::Releasing, 1000.0)).unwrap();

        // Claim exceeds the releasing pool: 1000 comes from releasing, the
        // remaining 1500 overdrafts idle.
        n.add_task(task("incoming", TaskStatus::Pipelined, 2500.0)).unwrap();
        assert_eq!(n.releasing.milli_cpu, 0.0);
        assert_eq!(n.idle.milli_cpu, 1500.0);
        assert_eq!(n.used.milli_cpu, 2500.0);

        // Removal must credit each pool with exactly what the addition
        // charged it, back to the pre-add values.
        n.remove_task(&TaskId::from("incoming")).unwrap();
        assert_eq!(n.releasing.milli_cpu, 1000.0, "releasing-pool share restored");
        assert_eq!(n.idle.milli_cpu, 3000.0, "idle overdraft restored");
        assert_eq!(n.used.milli_cpu, 1000.0, "used overdraft restored");
    }

    #[test]
    fn test_remove_pipelined_without_overdraft() {
        let mut n = node(4000.0);
        n.add_task(task("victim", TaskStatus::Releasing, 2000.0)).unwrap();
        n.add_task(task("incoming", TaskStatus::Pipelined, 1500.0)).unwrap();

        // Fully covered by releasing; idle and used were never touched.
        n.remove_task(&TaskId::from("incoming")).unwrap();
        assert_eq!(n.releasing.milli_cpu, 2000.0);
        assert_eq!(n.idle.milli_cpu, 2000.0);
        assert_eq!(n.used.milli_cpu, 2000.0);
    }

    #[test]
    fn test_overcommitted_allocation_is_rejected() {
        let mut n = node(1000.0);
        let err = n.add_task(task("t1", TaskStatus::Allocated, 2000.0));
        assert!(err.is_err(), "allocation beyond idle must be an invariant error");
        assert_eq!(n.task_count(), 0, "rejected task must not be recorded");
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let mut n = node(4000.0);
        n.add_task(task("t1", TaskStatus::Allocated, 100.0)).unwrap();
        assert!(matches!(
            n.add_task(task("t1", TaskStatus::Allocated, 100.0)),
            Err(SchedulingError::DuplicateTask { .. })
        ));
    }
}
