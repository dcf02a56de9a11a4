// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Allocate action: greedy placement of pending tasks.
//!
//! Iterates queues by queue order, jobs by job order, and each job's pending
//! tasks by task order, placing every task on the first node that passes the
//! node selector, the plugin predicates and the resource fit check. Fit
//! failures record the per-node shortfall on the job for close-time
//! reporting.
//!
//! Queues and jobs are revisited through their priority queues after every
//! single placement, so order-sensitive policies (gang readiness, shares)
//! see fresh state between decisions.

use std::collections::HashMap;
use std::time::Instant;

use crate::api::{GroupPhase, JobId, JobInfo, NodeInfo, TaskInfo, TaskStatus};
use crate::error::SchedulingError;
use crate::framework::{PriorityQueue, Session};

use super::Action;

pub struct AllocateAction;

impl Action for AllocateAction {
    fn name(&self) -> &'static str {
        "allocate"
    }

    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError> {
        let mut queues = ssn.queue_priority_queue();
        queues.extend(ssn.queues().values().cloned());

        // Jobs grouped by queue; each job's pending tasks are queued once and
        // consumed across revisits.
        let mut jobs_by_queue: HashMap<_, PriorityQueue<JobInfo>> = HashMap::new();
        for job in ssn.jobs().values() {
            if job.phase() == GroupPhase::Pending {
                continue;
            }
            if job.count_status(TaskStatus::Pending) == 0 {
                continue;
            }
            if let Some(result) = ssn.job_valid(job) {
                tracing::debug!(
                    job = %job.id,
                    reason = %result.reason,
                    message = %result.message,
                    "skipping invalid job"
                );
                continue;
            }
            jobs_by_queue
                .entry(job.queue.clone())
                .or_insert_with(|| ssn.job_priority_queue())
                .push(job.clone());
        }

        let mut pending_tasks: HashMap<JobId, PriorityQueue<TaskInfo>> = HashMap::new();

        while let Some(queue) = queues.pop() {
            if ssn.overused(&queue) {
                tracing::debug!(queue = %queue.id, "queue overused; skipping this cycle");
                continue;
            }

            let Some(jobs) = jobs_by_queue.get_mut(&queue.id) else {
                continue;
            };
            let Some(job) = jobs.pop() else {
                continue;
            };

            let tasks = pending_tasks.entry(job.id.clone()).or_insert_with(|| {
                let mut tasks = ssn.task_priority_queue();
                if let Some(job) = ssn.job(&job.id) {
                    tasks.extend(
                        job.tasks_with_status(TaskStatus::Pending)
                            .into_iter()
                            .cloned(),
                    );
                }
                tasks
            });

            if let Some(task) = tasks.pop() {
                let start = Instant::now();
                allocate_task(ssn, &job.id, &task)?;
                ssn.recorder().observe_task_schedule_duration(start.elapsed());
            }

            // Revisit while work remains, re-ordering on fresh state.
            let more_tasks = pending_tasks
                .get(&job.id)
                .map(|tasks| !tasks.is_empty())
                .unwrap_or(false);
            if more_tasks {
                if let (Some(fresh), Some(jobs)) =
                    (ssn.job(&job.id), jobs_by_queue.get_mut(&queue.id))
                {
                    jobs.push(fresh.clone());
                }
            }
            let more_jobs = jobs_by_queue
                .get(&queue.id)
                .map(|jobs| !jobs.is_empty())
                .unwrap_or(false);
            if more_jobs {
                queues.push(queue);
            }
        }

        Ok(())
    }
}

/// Try each node in name order; allocate on the first fit, recording the
/// shortfall on every node that rejects the task.
fn allocate_task(
    ssn: &mut Session,
    job_id: &JobId,
    task: &TaskInfo,
) -> Result<(), SchedulingError> {
    let node_names: Vec<String> = ssn.nodes().keys().cloned().collect();

    for node_name in node_names {
        let Some(node) = ssn.node(&node_name) else {
            continue;
        };

        let selector_matches = ssn
            .job(job_id)
            .map(|job| node_selector_matches(job, node))
            .unwrap_or(false);
        if !selector_matches {
            continue;
        }

        if !ssn.predicates(task, node) {
            tracing::debug!(task = %task.id, node = %node_name, "predicates rejected node");
            continue;
        }

        if task.init_resreq.less_equal(&node.idle) {
            ssn.allocate(job_id, &task.id, &node_name)?;
            return Ok(());
        }

        let delta = node.idle.fit_delta(&task.init_resreq);
        if let Some(job) = ssn.job_mut(job_id) {
            job.record_fit_delta(&node_name, delta);
        }
    }

    tracing::debug!(task = %task.id, job = %job_id, "no node fits task");
    Ok(())
}

fn node_selector_matches(job: &JobInfo, node: &NodeInfo) -> bool {
    job.node_selector
        .iter()
        .all(|(key, value)| node.labels.get(key) == Some(value))
}
