// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cluster data model: resources, tasks, jobs, nodes, queues, snapshots.
//!
//! Everything in this module is a value type. The cache deep-copies the model
//! into a [`ClusterSnapshot`] once per cycle and the session is the sole
//! writer of that copy thereafter; nothing here is shared or locked.

pub mod cluster;
pub mod group;
pub mod job;
pub mod node;
pub mod queue;
pub mod resource;
pub mod task;

pub use cluster::ClusterSnapshot;
pub use group::{
    GroupCondition, GroupConditionType, GroupPhase, PodDisruptionBudget, PodGroup,
    REASON_NOT_ENOUGH_PODS, REASON_NOT_ENOUGH_RESOURCES,
};
pub use job::JobInfo;
pub use node::NodeInfo;
pub use queue::QueueInfo;
pub use resource::{FitDelta, Resource, ResourceError, GPU_RESOURCE_NAME};
pub use task::{
    validate_status_update, TaskCondition, TaskInfo, TaskStatus, REASON_UNSCHEDULABLE,
};

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique id of a task (the originating pod's UID).
    TaskId
);
string_id!(
    /// Unique id of a job, derived as `namespace/groupName`.
    JobId
);
string_id!(
    /// Unique id of a queue.
    QueueId
);

impl JobId {
    /// Derive a job id from the pod group's namespace and name.
    pub fn derive(namespace: &str, group_name: &str) -> Self {
        Self(format!("{namespace}/{group_name}"))
    }
}

/// Outcome of a job validity check. `None` from a validity callback means
/// the plugin has no objection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub pass: bool,
    pub reason: String,
    pub message: String,
}
