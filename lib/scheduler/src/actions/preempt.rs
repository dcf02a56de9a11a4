// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Preempt action: make room for gangs that allocation left short.
//!
//! For each job still short of readiness, victims are gathered from running
//! tasks in the same queue with strictly lower priority, filtered through the
//! `Preemptable` reduction, and evicted until the node's future capacity
//! covers the claimant, which is then pipelined against that capacity.

use crate::api::{GroupPhase, JobInfo, TaskInfo, TaskStatus};
use crate::error::SchedulingError;
use crate::framework::Session;

use super::Action;

pub struct PreemptAction;

impl Action for PreemptAction {
    fn name(&self) -> &'static str {
        "preempt"
    }

    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError> {
        let mut preemptors = ssn.job_priority_queue();
        preemptors.extend(
            ssn.jobs()
                .values()
                .filter(|job| is_claimant(ssn, job))
                .cloned(),
        );

        let mut total_victims = 0usize;

        while let Some(job) = preemptors.pop() {
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
                total_victims += preempt_for_task(ssn, &job, &task)?;
            }
        }

        ssn.recorder().set_preemption_victims(total_victims);
        Ok(())
    }
}

fn is_claimant(ssn: &Session, job: &JobInfo) -> bool {
    job.phase() != GroupPhase::Pending
        && job.count_status(TaskStatus::Pending) > 0
        && ssn.job_valid(job).is_none()
        && !ssn.job_ready(job)
}

/// Try each node in turn; returns the number of victims evicted.
fn preempt_for_task(
    ssn: &mut Session,
    job: &JobInfo,
    task: &TaskInfo,
) -> Result<usize, SchedulingError> {
    let node_names: Vec<String> = ssn.nodes().keys().cloned().collect();

    for node_name in node_names {
        let candidates = victim_candidates(ssn, job, task, &node_name);
        let accepted = ssn.preemptable(task, &candidates);

        // Victims evicted lowest priority first; ties broken by id so the
        // selection is deterministic.
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

        if !chosen.is_empty() {
            ssn.recorder().count_preemption_attempt();
        }
        let reason = format!("preempted to make room for task {} of job {}", task.id, job.id);
        for victim in &chosen {
            ssn.evict(&victim.job, &victim.id, &reason)?;
        }

        // Evictions can fail transiently and leave victims running; only
        // pipeline when the released capacity actually covers the claimant.
        let fits = ssn
            .node(&node_name)
            .map(|node| task.init_resreq.less_equal(&node.future_idle()))
            .unwrap_or(false);
        if !fits {
            tracing::debug!(
                task = %task.id,
                node = %node_name,
                "eviction did not release enough capacity"
            );
            continue;
        }

        ssn.pipeline(&job.id, &task.id, &node_name)?;
        tracing::debug!(
            task = %task.id,
            node = %node_name,
            victims = chosen.len(),
            "task pipelined after preemption"
        );
        return Ok(chosen.len());
    }

    Ok(0)
}

/// Running tasks on `node_name` in the claimant's queue with strictly lower
/// priority.
fn victim_candidates(
    ssn: &Session,
    job: &JobInfo,
    task: &TaskInfo,
    node_name: &str,
) -> Vec<TaskInfo> {
    let Some(node) = ssn.node(node_name) else {
        return Vec::new();
    };
    node.tasks()
        .filter(|t| t.status == TaskStatus::Running)
        .filter(|t| t.priority < task.priority)
        .filter(|t| {
            ssn.job(&t.job)
                .map(|owner| owner.queue == job.queue)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
