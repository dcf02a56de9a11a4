// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backfill action: place best-effort tasks the primary passes skipped.
//!
//! Only tasks with no resource request at all are eligible; they consume no
//! tracked capacity, which is the no-starvation gate — backfilled work can
//! never displace or delay a primary workload.

use crate::api::{GroupPhase, TaskStatus};
use crate::error::SchedulingError;
use crate::framework::Session;

use super::Action;

pub struct BackfillAction;

impl Action for BackfillAction {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError> {
        let mut candidates: Vec<(crate::api::JobId, crate::api::TaskInfo)> = Vec::new();
        for job in ssn.jobs().values() {
            if job.phase() == GroupPhase::Pending || ssn.job_valid(job).is_some() {
                continue;
            }
            for task in job.tasks_with_status(TaskStatus::Pending) {
                if task.is_best_effort() {
                    candidates.push((job.id.clone(), task.clone()));
                }
            }
        }

        for (job_id, task) in candidates {
            let node_names: Vec<String> = ssn.nodes().keys().cloned().collect();
            for node_name in node_names {
                let passes = ssn
                    .node(&node_name)
                    .map(|node| ssn.predicates(&task, node))
                    .unwrap_or(false);
                if !passes {
                    continue;
                }
                ssn.allocate(&job_id, &task.id, &node_name)?;
                tracing::debug!(task = %task.id, node = %node_name, "best-effort task backfilled");
                break;
            }
        }

        Ok(())
    }
}
