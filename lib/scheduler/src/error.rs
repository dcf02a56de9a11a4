// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Engine error types.
//!
//! [`SchedulingError`] covers invariant violations inside a cycle: they abort
//! the session but must never crash the process. Transient effector failures
//! are [`crate::cache::CacheError`] and are handled where they occur.

use thiserror::Error;

use crate::api::resource::ResourceError;
use crate::api::{JobId, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("illegal status transition for task {task}: {from} -> {to}")]
    IllegalStatusTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task} not found in job {job}")]
    UnknownTask { task: TaskId, job: JobId },

    #[error("job {0} not found in snapshot")]
    UnknownJob(JobId),

    #[error("node {0} not found in snapshot")]
    UnknownNode(String),

    #[error("task {task} not found on node {node}")]
    UnknownTaskOnNode { task: TaskId, node: String },

    #[error("task {task} already present on node {node}")]
    DuplicateTask { task: TaskId, node: String },

    #[error("task {task} does not fit node {node}")]
    DoesNotFit { task: TaskId, node: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}
