// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time view of the cluster handed to a session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::job::JobInfo;
use super::node::NodeInfo;
use super::queue::QueueInfo;
use super::{JobId, QueueId};

/// Deep copy of the cache state, produced once per cycle under the cache's
/// own lock. The session owns and mutates this copy exclusively; nothing is
/// written back to the cache except through the effector interfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub queues: BTreeMap<QueueId, QueueInfo>,
}

impl ClusterSnapshot {
    pub fn add_job(&mut self, job: JobInfo) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn add_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn add_queue(&mut self, queue: QueueInfo) {
        self.queues.insert(queue.id.clone(), queue);
    }
}
