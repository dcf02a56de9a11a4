// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Gang plugin: all-or-nothing admission by `min_available`.
//!
//! Contributes four callbacks:
//! - validity: a job with fewer valid tasks than its threshold is rejected
//!   with `NotEnoughPods`;
//! - readiness: at least `min_available` tasks hold resources or succeeded;
//! - job order: jobs still short of their gang sort before satisfied ones;
//! - victim gate: a task may only be preempted or reclaimed if its owning
//!   job stays ready without it, or the job is a singleton.
//!
//! At close, every job still short of readiness gets a `PodGroupUnschedulable`
//! condition carrying the FitError summary, plus retry and shortfall metrics.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use crate::api::{
    ClusterSnapshot, GroupCondition, GroupConditionType, JobInfo, TaskId, TaskInfo,
    ValidateResult, REASON_NOT_ENOUGH_PODS, REASON_NOT_ENOUGH_RESOURCES,
};
use crate::framework::{Plugin, PluginArgs, Session};

pub const PLUGIN_NAME: &str = "gang";

/// Condition reason published once a formerly unschedulable gang is ready.
const REASON_SCHEDULED: &str = "Scheduled";

#[derive(Default)]
pub struct GangPlugin;

impl GangPlugin {
    pub fn factory(_args: &PluginArgs) -> Box<dyn Plugin> {
        Box::new(GangPlugin)
    }
}

/// Readiness of a single job under gang semantics.
fn job_ready(job: &JobInfo) -> bool {
    job.ready_task_num() >= job.min_available
}

/// Jobs short of their gang sort before satisfied ones; otherwise equal.
fn gang_job_order(l: &JobInfo, r: &JobInfo) -> Ordering {
    match (job_ready(l), job_ready(r)) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn validate_job(job: &JobInfo) -> Option<ValidateResult> {
    let valid = job.valid_task_num();
    if valid < job.min_available {
        return Some(ValidateResult {
            pass: false,
            reason: REASON_NOT_ENOUGH_PODS.to_string(),
            message: format!(
                "Not enough valid tasks for gang-scheduling, valid: {}, min: {}",
                valid, job.min_available
            ),
        });
    }
    None
}

/// Accept only victims whose owning job survives their removal, or whose
/// owning job is a singleton gang.
fn filter_victims(snapshot: &ClusterSnapshot, candidates: &[TaskInfo]) -> Vec<TaskId> {
    let mut victims = Vec::new();
    for candidate in candidates {
        let Some(owner) = snapshot.jobs.get(&candidate.job) else {
            continue;
        };
        let ready = owner.ready_task_num();
        let preemptable =
            owner.min_available <= ready.saturating_sub(1) || owner.min_available == 1;
        if preemptable {
            victims.push(candidate.id.clone());
        } else {
            tracing::debug!(
                task = %candidate.id,
                job = %owner.id,
                "victim rejected to protect gang integrity"
            );
        }
    }
    victims
}

impl Plugin for GangPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_job_valid_fn(PLUGIN_NAME, Arc::new(validate_job));
        ssn.add_job_ready_fn(PLUGIN_NAME, Arc::new(job_ready));
        ssn.add_job_order_fn(PLUGIN_NAME, Arc::new(gang_job_order));

        let victim_gate = Arc::new(
            |snapshot: &ClusterSnapshot, _claimant: &TaskInfo, candidates: &[TaskInfo]| {
                filter_victims(snapshot, candidates)
            },
        );
        ssn.add_preemptable_fn(PLUGIN_NAME, victim_gate.clone());
        ssn.add_reclaimable_fn(PLUGIN_NAME, victim_gate);
    }

    fn on_session_close(&mut self, ssn: &mut Session) {
        let job_ids: Vec<_> = ssn.jobs().keys().cloned().collect();
        let mut unschedulable_jobs = 0usize;

        for job_id in job_ids {
            let Some(job) = ssn.job(&job_id) else {
                continue;
            };
            let label = if job.name.is_empty() {
                job.id.to_string()
            } else {
                job.name.clone()
            };

            if job_ready(job) {
                // Clear a previously published condition once the gang is
                // admitted.
                let was_unschedulable = job
                    .pod_group
                    .as_ref()
                    .and_then(|pg| pg.condition(GroupConditionType::Unschedulable))
                    .map(|cond| cond.status)
                    .unwrap_or(false);
                if was_unschedulable {
                    let cleared = GroupCondition {
                        condition_type: GroupConditionType::Unschedulable,
                        status: false,
                        transition_id: ssn.id().to_string(),
                        last_transition_time: SystemTime::now(),
                        reason: REASON_SCHEDULED.to_string(),
                        message: "gang is ready".to_string(),
                    };
                    if let Err(e) = ssn.update_job_condition(&job_id, cleared) {
                        tracing::error!(job = %job_id, error = %e, "failed to clear condition");
                    }
                }
                ssn.recorder().set_unschedulable_task_count(&label, 0);
                continue;
            }

            let shortfall = job.min_available.saturating_sub(job.ready_task_num());
            let message = format!(
                "{}/{} tasks in gang unschedulable: {}",
                shortfall,
                job.task_count(),
                job.fit_error()
            );
            unschedulable_jobs += 1;

            ssn.recorder().set_unschedulable_task_count(&label, shortfall);
            ssn.recorder().count_job_retry(&label);

            let condition = GroupCondition {
                condition_type: GroupConditionType::Unschedulable,
                status: true,
                transition_id: ssn.id().to_string(),
                last_transition_time: SystemTime::now(),
                reason: REASON_NOT_ENOUGH_RESOURCES.to_string(),
                message,
            };
            if let Err(e) = ssn.update_job_condition(&job_id, condition) {
                tracing::error!(job = %job_id, error = %e, "failed to update job condition");
            }
        }

        ssn.recorder().set_unschedulable_job_count(unschedulable_jobs);
    }
}
