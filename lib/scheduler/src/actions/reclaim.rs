// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reclaim action: the across-queue variant of preemption.
//!
//! Victims come from running tasks owned by other queues and pass through
//! the `Reclaimable` reduction instead of `Preemptable`; otherwise the
//! evict-then-pipeline flow mirrors the preempt action.

use crate::api::{GroupPhase, JobInfo, TaskInfo, TaskStatus};
use crate::error::SchedulingError;
use crate::framework::Session;

use super::Action;

pub struct ReclaimAction;

impl Action for ReclaimAction {
    fn name(&self) -> &'static str {
        "reclaim"
    }

    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError> {
        let mut claimants = ssn.job_priority_queue();
        claimants.extend(
            ssn.jobs()
                .values()
                .filter(|job| is_claimant(ssn, job))
                .cloned(),
        );

        while let Some(job) = claimants.pop() {
            let mut tasks = ssn.task_priority_queue();
            tasks.extend(
                job.tasks_with_status(TaskStatus::Pending)
                    .into_iter()
                    .cloned(),
            );

            loop {
                let ready = match ssn.job(&job.id) {
                    Some(fresh) => ssn.job_ready(fresh),
                    None => break,
                };
                if ready {
                    break;
                }
                let Some(task) = tasks.pop() else {
                    break;
                };
                reclaim_for_task(ssn, &job, &task)?;
            }
        }

        Ok(())
    }
}

fn is_claimant(ssn: &Session, job: &JobInfo) -> bool {
    job.phase() != GroupPhase::Pending
        && job.count_status(TaskStatus::Pending) > 0
        && ssn.job_valid(job).is_none()
        && !ssn.job_ready(job)
}

fn reclaim_for_task(
    ssn: &mut Session,
    job: &JobInfo,
    task: &TaskInfo,
) -> Result<bool, SchedulingError> {
    let node_names: Vec<String> = ssn.nodes().keys().cloned().collect();

    for node_name in node_names {
        let candidates = victim_candidates(ssn, job, &node_name);
        let accepted = ssn.reclaimable(task, &candidates);

        let mut victims: Vec<&TaskInfo> = candidates
            .iter()
            .filter(|t| accepted.contains(&t.id))
            .collect();
        victims.sort_by(|l, r| l.priority.cmp(&r.priority).then_with(|| l.id.cmp(&r.id)));

        let Some(node) = ssn.node(&node_name) else {
            continue;
        };
        let mut available = node.future_idle();
        let mut chosen: Vec<TaskInfo> = Vec::new();
        for victim in victims {
            if task.init_resreq.less_equal(&available) {
                break;
            }
            available.add(&victim.resreq);
            chosen.push((*victim).clone());
        }
        if !task.init_resreq.less_equal(&available) {
            continue;
        }

        let reason = format!("reclaimed for task {} of queue {}", task.id, job.queue);
        for victim in &chosen {
            ssn.evict(&victim.job, &victim.id, &reason)?;
        }

        let fits = ssn
            .node(&node_name)
            .map(|node| task.init_resreq.less_equal(&node.future_idle()))
            .unwrap_or(false);
        if !fits {
            continue;
        }

        ssn.pipeline(&job.id, &task.id, &node_name)?;
        tracing::debug!(
            task = %task.id,
            node = %node_name,
            victims = chosen.len(),
            "task pipelined after reclaim"
        );
        return Ok(true);
    }

    Ok(false)
}

/// Running tasks on `node_name` owned by queues other than the claimant's.
fn victim_candidates(ssn: &Session, job: &JobInfo, node_name: &str) -> Vec<TaskInfo> {
    let Some(node) = ssn.node(node_name) else {
        return Vec::new();
    };
    node.tasks()
        .filter(|t| t.status == TaskStatus::Running)
        .filter(|t| {
            ssn.job(&t.job)
                .map(|owner| owner.queue != job.queue)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
