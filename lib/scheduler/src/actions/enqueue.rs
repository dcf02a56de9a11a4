// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Enqueue action: admit pending groups into scheduling consideration.

use crate::api::GroupPhase;
use crate::error::SchedulingError;
use crate::framework::Session;

use super::Action;

/// Moves jobs whose group phase is `Pending` to `Inqueue` when every
/// enqueueable callback agrees. Jobs not yet in queue stay invisible to the
/// allocate action.
pub struct EnqueueAction;

impl Action for EnqueueAction {
    fn name(&self) -> &'static str {
        "enqueue"
    }

    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError> {
        let mut queues = ssn.queue_priority_queue();
        queues.extend(ssn.queues().values().cloned());

        while let Some(queue) = queues.pop() {
            let mut jobs = ssn.job_priority_queue();
            jobs.extend(
                ssn.jobs()
                    .values()
                    .filter(|job| job.queue == queue.id && job.phase() == GroupPhase::Pending)
                    .cloned(),
            );

            while let Some(job) = jobs.pop() {
                if !ssn.job_enqueueable(&job) {
                    tracing::debug!(job = %job.id, "job not enqueueable this cycle");
                    continue;
                }
                ssn.set_job_phase(&job.id, GroupPhase::Inqueue)?;
                tracing::debug!(job = %job.id, queue = %queue.id, "job enqueued");
            }
        }

        Ok(())
    }
}
