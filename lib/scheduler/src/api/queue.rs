// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Queue model. Ordering between queues is supplied by plugins; the engine
//! itself only routes jobs by queue id.

use serde::{Deserialize, Serialize};

use super::resource::Resource;
use super::QueueId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub id: QueueId,
    pub name: String,
    /// Relative share weight, consulted by share-based plugins.
    pub weight: i32,
    /// Optional hard cap on the queue's total allocation.
    pub capability: Option<Resource>,
}

impl QueueInfo {
    pub fn new(id: impl Into<QueueId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            weight: 1,
            capability: None,
            id,
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}
