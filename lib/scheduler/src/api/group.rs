// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! External grouping objects that give a job its identity and gang threshold.
//!
//! A job is sourced from exactly one of two objects: the [`PodGroup`] API, or
//! the legacy [`PodDisruptionBudget`] route kept for backward compatibility.
//! Both produce the same job shape; the two paths never interleave inside the
//! engine.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::QueueId;

/// Condition reason published when a job has fewer valid tasks than its gang
/// threshold.
pub const REASON_NOT_ENOUGH_PODS: &str = "NotEnoughPods";
/// Condition reason published when a gang cannot be placed on the cluster.
pub const REASON_NOT_ENOUGH_RESOURCES: &str = "NotEnoughResources";

/// Admission phase of a pod group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupPhase {
    /// Created but not yet admitted for scheduling.
    #[default]
    Pending,
    /// Admitted; the allocate action may consider its tasks.
    Inqueue,
    Running,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupConditionType {
    Unschedulable,
}

/// A status condition published back to the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCondition {
    pub condition_type: GroupConditionType,
    pub status: bool,
    /// Session id of the cycle that produced this condition.
    pub transition_id: String,
    pub last_transition_time: SystemTime,
    pub reason: String,
    pub message: String,
}

/// The API object expressing a job's identity and gang threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodGroup {
    pub name: String,
    pub namespace: String,
    /// Gang threshold: the minimum number of members that must be placed
    /// together.
    pub min_member: u32,
    pub queue: QueueId,
    pub phase: GroupPhase,
    pub conditions: Vec<GroupCondition>,
    pub creation_timestamp: SystemTime,
}

impl PodGroup {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, min_member: u32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            min_member,
            queue: QueueId::from("default"),
            phase: GroupPhase::Pending,
            conditions: Vec::new(),
            creation_timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<QueueId>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_phase(mut self, phase: GroupPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_creation_timestamp(mut self, ts: SystemTime) -> Self {
        self.creation_timestamp = ts;
        self
    }

    /// Replace the condition of the same type, or append it.
    pub fn set_condition(&mut self, condition: GroupCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn condition(&self, condition_type: GroupConditionType) -> Option<&GroupCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Legacy grouping source. Deprecated; produces the same job shape as
/// [`PodGroup`] but carries no phase or conditions, so jobs sourced from it
/// surface their status through events only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDisruptionBudget {
    pub name: String,
    pub namespace: String,
    pub min_available: u32,
    pub creation_timestamp: SystemTime,
}

impl PodDisruptionBudget {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, min_available: u32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            min_available,
            creation_timestamp: SystemTime::UNIX_EPOCH,
        }
    }
}
