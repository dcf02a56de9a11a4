// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The session: mutable per-cycle context between plugins, actions and
//! effectors.
//!
//! A session owns the cycle's snapshot exclusively. Plugins register
//! callbacks during `on_session_open`; actions consult the aggregated
//! callbacks and emit decisions; `close` runs the close hooks in reverse
//! order and publishes terminal accounting. Close must be total: no error
//! raised there propagates.
//!
//! Reduction rules over registered callbacks:
//! - ordering comparators: first non-equal result wins, consulted in tier
//!   order then registration order; full ties fall back to
//!   (creation timestamp, id) for jobs and id for tasks and queues;
//! - all-agree predicates (`JobValid`, `JobReady`, `JobPipelined`,
//!   `JobEnqueueable`, `Predicate`): short-circuit on the first negative;
//! - victim filters (`Preemptable`, `Reclaimable`): each callback prunes the
//!   survivor set; the result is the intersection of all gates;
//! - `Overused`: any positive answer wins.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::{
    ClusterSnapshot, GroupCondition, GroupPhase, JobId, JobInfo, NodeInfo, QueueId, QueueInfo,
    TaskCondition, TaskId, TaskInfo, TaskStatus, ValidateResult, REASON_UNSCHEDULABLE,
};
use crate::cache::Effectors;
use crate::config::{Capability, TierConf};
use crate::dispatch::BindRequest;
use crate::error::SchedulingError;
use crate::framework::{CompareFn, Plugin, PriorityQueue};
use crate::metrics::{Recorder, ScheduleResult, ON_SESSION_CLOSE, ON_SESSION_OPEN};

pub type JobOrderFn = Arc<dyn Fn(&JobInfo, &JobInfo) -> Ordering + Send + Sync>;
pub type TaskOrderFn = Arc<dyn Fn(&TaskInfo, &TaskInfo) -> Ordering + Send + Sync>;
pub type QueueOrderFn = Arc<dyn Fn(&QueueInfo, &QueueInfo) -> Ordering + Send + Sync>;
pub type JobValidFn = Arc<dyn Fn(&JobInfo) -> Option<ValidateResult> + Send + Sync>;
pub type JobReadyFn = Arc<dyn Fn(&JobInfo) -> bool + Send + Sync>;
pub type JobPipelinedFn = Arc<dyn Fn(&JobInfo) -> bool + Send + Sync>;
pub type JobEnqueueableFn = Arc<dyn Fn(&JobInfo) -> bool + Send + Sync>;
pub type OverusedFn = Arc<dyn Fn(&ClusterSnapshot, &QueueInfo) -> bool + Send + Sync>;
/// Given a read view of the snapshot, the claimant task and the candidate
/// victims, return the accepted subset by id.
pub type VictimFilterFn =
    Arc<dyn Fn(&ClusterSnapshot, &TaskInfo, &[TaskInfo]) -> Vec<TaskId> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&TaskInfo, &NodeInfo) -> bool + Send + Sync>;

struct NamedFn<F> {
    plugin: String,
    f: F,
}

pub struct Session {
    id: Uuid,
    snapshot: ClusterSnapshot,
    effectors: Effectors,
    recorder: Arc<dyn Recorder>,
    bind_tx: mpsc::UnboundedSender<BindRequest>,
    rollback_partial_gangs: bool,

    tiers: Vec<TierConf>,
    current_tier: usize,
    plugins: Vec<Box<dyn Plugin>>,
    failed_plugins: Vec<String>,

    job_order_fns: Vec<NamedFn<JobOrderFn>>,
    task_order_fns: Vec<NamedFn<TaskOrderFn>>,
    queue_order_fns: Vec<NamedFn<QueueOrderFn>>,
    job_valid_fns: Vec<NamedFn<JobValidFn>>,
    job_ready_fns: Vec<NamedFn<JobReadyFn>>,
    job_pipelined_fns: Vec<NamedFn<JobPipelinedFn>>,
    job_enqueueable_fns: Vec<NamedFn<JobEnqueueableFn>>,
    overused_fns: Vec<NamedFn<OverusedFn>>,
    preemptable_fns: Vec<NamedFn<VictimFilterFn>>,
    reclaimable_fns: Vec<NamedFn<VictimFilterFn>>,
    predicate_fns: Vec<NamedFn<PredicateFn>>,

    /// Tasks whose bind has been handed to the dispatcher this cycle.
    dispatched: BTreeSet<TaskId>,
}

impl Session {
    /// Open a session over `snapshot`, running every plugin's open hook in
    /// tier order.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        snapshot: ClusterSnapshot,
        tiered_plugins: Vec<Vec<Box<dyn Plugin>>>,
        tiers: Vec<TierConf>,
        effectors: Effectors,
        recorder: Arc<dyn Recorder>,
        bind_tx: mpsc::UnboundedSender<BindRequest>,
        rollback_partial_gangs: bool,
    ) -> Self {
        let mut ssn = Session {
            id: Uuid::new_v4(),
            snapshot,
            effectors,
            recorder,
            bind_tx,
            rollback_partial_gangs,
            tiers,
            current_tier: 0,
            plugins: Vec::new(),
            failed_plugins: Vec::new(),
            job_order_fns: Vec::new(),
            task_order_fns: Vec::new(),
            queue_order_fns: Vec::new(),
            job_valid_fns: Vec::new(),
            job_ready_fns: Vec::new(),
            job_pipelined_fns: Vec::new(),
            job_enqueueable_fns: Vec::new(),
            overused_fns: Vec::new(),
            preemptable_fns: Vec::new(),
            reclaimable_fns: Vec::new(),
            predicate_fns: Vec::new(),
            dispatched: BTreeSet::new(),
        };

        for (tier_index, tier_plugins) in tiered_plugins.into_iter().enumerate() {
            ssn.current_tier = tier_index;
            for mut plugin in tier_plugins {
                ssn.run_hook(plugin.as_mut(), ON_SESSION_OPEN);
                ssn.plugins.push(plugin);
            }
        }

        tracing::debug!(
            session = %ssn.id,
            jobs = ssn.snapshot.jobs.len(),
            nodes = ssn.snapshot.nodes.len(),
            queues = ssn.snapshot.queues.len(),
            "session opened"
        );
        ssn
    }

    /// Run close hooks in reverse registration order, then publish terminal
    /// accounting. Never fails.
    pub fn close(mut self) {
        if self.rollback_partial_gangs {
            self.rollback_unready_gangs();
        }

        let mut plugins = std::mem::take(&mut self.plugins);
        for plugin in plugins.iter_mut().rev() {
            self.run_hook(plugin.as_mut(), ON_SESSION_CLOSE);
        }

        // Terminal accounting: every pending task of an unready job counts
        // as an unschedulable attempt and gets its condition refreshed.
        let mut unschedulable = 0u64;
        for job in self.snapshot.jobs.values() {
            if self.job_ready(job) {
                continue;
            }
            let condition = TaskCondition {
                scheduled: false,
                reason: REASON_UNSCHEDULABLE.to_string(),
                message: job.fit_error(),
            };
            for task in job.tasks_with_status(TaskStatus::Pending) {
                unschedulable += 1;
                if let Err(e) = self
                    .effectors
                    .status_updater
                    .update_task_condition(task, &condition)
                {
                    tracing::warn!(task = %task.id, error = %e, "task condition update failed");
                }
            }
        }
        if unschedulable > 0 {
            self.recorder
                .count_schedule_attempts(ScheduleResult::Unschedulable, unschedulable);
        }

        tracing::debug!(session = %self.id, "session closed");
    }

    fn run_hook(&mut self, plugin: &mut dyn Plugin, phase: &'static str) {
        let name = plugin.name().to_string();
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if phase == ON_SESSION_OPEN {
                plugin.on_session_open(self);
            } else {
                plugin.on_session_close(self);
            }
        }));
        self.recorder
            .observe_plugin_duration(&name, phase, start.elapsed());

        if outcome.is_err() {
            tracing::error!(
                plugin = %name,
                phase,
                "plugin hook panicked; disabling plugin for this cycle"
            );
            self.remove_plugin_fns(&name);
            self.failed_plugins.push(name);
        }
    }

    fn remove_plugin_fns(&mut self, name: &str) {
        self.job_order_fns.retain(|nf| nf.plugin != name);
        self.task_order_fns.retain(|nf| nf.plugin != name);
        self.queue_order_fns.retain(|nf| nf.plugin != name);
        self.job_valid_fns.retain(|nf| nf.plugin != name);
        self.job_ready_fns.retain(|nf| nf.plugin != name);
        self.job_pipelined_fns.retain(|nf| nf.plugin != name);
        self.job_enqueueable_fns.retain(|nf| nf.plugin != name);
        self.overused_fns.retain(|nf| nf.plugin != name);
        self.preemptable_fns.retain(|nf| nf.plugin != name);
        self.reclaimable_fns.retain(|nf| nf.plugin != name);
        self.predicate_fns.retain(|nf| nf.plugin != name);
    }

    /// Plugins that panicked this cycle.
    pub fn failed_plugins(&self) -> &[String] {
        &self.failed_plugins
    }

    // ==================== Registration ====================

    fn capability_enabled(&self, plugin: &str, capability: Capability) -> bool {
        self.tiers
            .get(self.current_tier)
            .and_then(|tier| tier.plugins.iter().find(|opt| opt.name == plugin))
            .map(|opt| opt.enabled(capability))
            // Plugins registered outside configuration (tests) default on.
            .unwrap_or(true)
    }

    pub fn add_job_order_fn(&mut self, plugin: &str, f: JobOrderFn) {
        if self.capability_enabled(plugin, Capability::JobOrder) {
            self.job_order_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_task_order_fn(&mut self, plugin: &str, f: TaskOrderFn) {
        if self.capability_enabled(plugin, Capability::TaskOrder) {
            self.task_order_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_queue_order_fn(&mut self, plugin: &str, f: QueueOrderFn) {
        if self.capability_enabled(plugin, Capability::QueueOrder) {
            self.queue_order_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_job_valid_fn(&mut self, plugin: &str, f: JobValidFn) {
        if self.capability_enabled(plugin, Capability::JobValid) {
            self.job_valid_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_job_ready_fn(&mut self, plugin: &str, f: JobReadyFn) {
        if self.capability_enabled(plugin, Capability::JobReady) {
            self.job_ready_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_job_pipelined_fn(&mut self, plugin: &str, f: JobPipelinedFn) {
        if self.capability_enabled(plugin, Capability::JobPipelined) {
            self.job_pipelined_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_job_enqueueable_fn(&mut self, plugin: &str, f: JobEnqueueableFn) {
        if self.capability_enabled(plugin, Capability::JobEnqueueable) {
            self.job_enqueueable_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_overused_fn(&mut self, plugin: &str, f: OverusedFn) {
        if self.capability_enabled(plugin, Capability::Overused) {
            self.overused_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_preemptable_fn(&mut self, plugin: &str, f: VictimFilterFn) {
        if self.capability_enabled(plugin, Capability::Preemptable) {
            self.preemptable_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_reclaimable_fn(&mut self, plugin: &str, f: VictimFilterFn) {
        if self.capability_enabled(plugin, Capability::Reclaimable) {
            self.reclaimable_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    pub fn add_predicate_fn(&mut self, plugin: &str, f: PredicateFn) {
        if self.capability_enabled(plugin, Capability::Predicate) {
            self.predicate_fns.push(NamedFn { plugin: plugin.to_string(), f });
        }
    }

    // ==================== Views ====================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn recorder(&self) -> &dyn Recorder {
        self.recorder.as_ref()
    }

    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    pub fn jobs(&self) -> &BTreeMap<JobId, JobInfo> {
        &self.snapshot.jobs
    }

    pub fn job(&self, id: &JobId) -> Option<&JobInfo> {
        self.snapshot.jobs.get(id)
    }

    /// Mutable job access for actions recording bookkeeping (fit deltas).
    /// Decisions go through [`Self::allocate`] and friends.
    pub(crate) fn job_mut(&mut self, id: &JobId) -> Option<&mut JobInfo> {
        self.snapshot.jobs.get_mut(id)
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeInfo> {
        &self.snapshot.nodes
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.snapshot.nodes.get(name)
    }

    pub fn queues(&self) -> &BTreeMap<QueueId, QueueInfo> {
        &self.snapshot.queues
    }

    // ==================== Aggregated callbacks ====================

    pub fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Ordering {
        for nf in &self.job_order_fns {
            match (nf.f)(l, r) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        job_order_fallback(l, r)
    }

    pub fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Ordering {
        for nf in &self.task_order_fns {
            match (nf.f)(l, r) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        l.id.cmp(&r.id)
    }

    pub fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Ordering {
        for nf in &self.queue_order_fns {
            match (nf.f)(l, r) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        l.id.cmp(&r.id)
    }

    /// First failing validity result, or `None` when every plugin passes.
    pub fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        for nf in &self.job_valid_fns {
            if let Some(result) = (nf.f)(job) {
                if !result.pass {
                    return Some(result);
                }
            }
        }
        None
    }

    pub fn job_ready(&self, job: &JobInfo) -> bool {
        self.job_ready_fns.iter().all(|nf| (nf.f)(job))
    }

    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        self.job_pipelined_fns.iter().all(|nf| (nf.f)(job))
    }

    pub fn job_enqueueable(&self, job: &JobInfo) -> bool {
        self.job_enqueueable_fns.iter().all(|nf| (nf.f)(job))
    }

    pub fn overused(&self, queue: &QueueInfo) -> bool {
        self.overused_fns
            .iter()
            .any(|nf| (nf.f)(&self.snapshot, queue))
    }

    pub fn predicates(&self, task: &TaskInfo, node: &NodeInfo) -> bool {
        self.predicate_fns.iter().all(|nf| (nf.f)(task, node))
    }

    pub fn preemptable(&self, preemptor: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskId> {
        Self::filter_victims(&self.preemptable_fns, &self.snapshot, preemptor, candidates)
    }

    pub fn reclaimable(&self, reclaimer: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskId> {
        Self::filter_victims(&self.reclaimable_fns, &self.snapshot, reclaimer, candidates)
    }

    fn filter_victims(
        fns: &[NamedFn<VictimFilterFn>],
        snapshot: &ClusterSnapshot,
        claimant: &TaskInfo,
        candidates: &[TaskInfo],
    ) -> Vec<TaskId> {
        let mut survivors: Vec<TaskInfo> = candidates.to_vec();
        for nf in fns {
            if survivors.is_empty() {
                break;
            }
            let accepted: BTreeSet<TaskId> =
                (nf.f)(snapshot, claimant, &survivors).into_iter().collect();
            survivors.retain(|task| accepted.contains(&task.id));
        }
        survivors.into_iter().map(|task| task.id).collect()
    }

    // ==================== Queue factories ====================

    pub fn job_priority_queue(&self) -> PriorityQueue<JobInfo> {
        let fns: Vec<JobOrderFn> = self.job_order_fns.iter().map(|nf| Arc::clone(&nf.f)).collect();
        let cmp: CompareFn<JobInfo> = Arc::new(move |l, r| {
            for f in &fns {
                match f(l, r) {
                    Ordering::Equal => continue,
                    ordering => return ordering,
                }
            }
            job_order_fallback(l, r)
        });
        PriorityQueue::new(cmp)
    }

    pub fn task_priority_queue(&self) -> PriorityQueue<TaskInfo> {
        let fns: Vec<TaskOrderFn> =
            self.task_order_fns.iter().map(|nf| Arc::clone(&nf.f)).collect();
        let cmp: CompareFn<TaskInfo> = Arc::new(move |l, r| {
            for f in &fns {
                match f(l, r) {
                    Ordering::Equal => continue,
                    ordering => return ordering,
                }
            }
            l.id.cmp(&r.id)
        });
        PriorityQueue::new(cmp)
    }

    pub fn queue_priority_queue(&self) -> PriorityQueue<QueueInfo> {
        let fns: Vec<QueueOrderFn> =
            self.queue_order_fns.iter().map(|nf| Arc::clone(&nf.f)).collect();
        let cmp: CompareFn<QueueInfo> = Arc::new(move |l, r| {
            for f in &fns {
                match f(l, r) {
                    Ordering::Equal => continue,
                    ordering => return ordering,
                }
            }
            l.id.cmp(&r.id)
        });
        PriorityQueue::new(cmp)
    }

    // ==================== Decisions ====================

    /// Place a pending task on a node. Once the owning job reaches
    /// readiness, every allocated task of the job is dispatched for binding
    /// in one batch.
    pub fn allocate(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> Result<(), SchedulingError> {
        {
            let job = self
                .snapshot
                .jobs
                .get(job_id)
                .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
            let task = job.task(task_id).ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;
            let node = self
                .snapshot
                .nodes
                .get(hostname)
                .ok_or_else(|| SchedulingError::UnknownNode(hostname.to_string()))?;
            if !task.init_resreq.less_equal(&node.idle) {
                return Err(SchedulingError::DoesNotFit {
                    task: task_id.clone(),
                    node: hostname.to_string(),
                });
            }
        }

        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
        if let Some(task) = job.task_mut(task_id) {
            task.node_name = hostname.to_string();
        }
        job.update_task_status(task_id, TaskStatus::Allocated)?;
        let task_clone = job
            .task(task_id)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;

        let node = self
            .snapshot
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| SchedulingError::UnknownNode(hostname.to_string()))?;
        node.add_task(task_clone)?;

        tracing::debug!(task = %task_id, job = %job_id, node = hostname, "task allocated");

        self.dispatch_if_ready(job_id);
        Ok(())
    }

    /// Tentatively place a task against capacity that a release will
    /// materialize.
    pub fn pipeline(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> Result<(), SchedulingError> {
        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
        if let Some(task) = job.task_mut(task_id) {
            task.node_name = hostname.to_string();
        }
        job.update_task_status(task_id, TaskStatus::Pipelined)?;
        let task_clone = job
            .task(task_id)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;

        let node = self
            .snapshot
            .nodes
            .get_mut(hostname)
            .ok_or_else(|| SchedulingError::UnknownNode(hostname.to_string()))?;
        node.add_task(task_clone)?;

        tracing::debug!(task = %task_id, job = %job_id, node = hostname, "task pipelined");
        Ok(())
    }

    /// Evict a running task. An effector failure leaves the task in place
    /// and is not fatal; illegal state is.
    pub fn evict(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        reason: &str,
    ) -> Result<(), SchedulingError> {
        let task_clone = self
            .snapshot
            .jobs
            .get(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?
            .task(task_id)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;

        if let Err(e) = self.effectors.evictor.evict(&task_clone, reason) {
            tracing::warn!(task = %task_id, error = %e, "eviction failed; leaving task in place");
            self.recorder
                .count_schedule_attempts(ScheduleResult::Error, 1);
            return Ok(());
        }
        if let Err(e) = self.effectors.cache.evict(&task_clone, reason) {
            tracing::warn!(task = %task_id, error = %e, "cache evict bookkeeping failed");
        }

        let node_name = task_clone.node_name.clone();
        if !node_name.is_empty() {
            if let Some(node) = self.snapshot.nodes.get_mut(&node_name) {
                node.remove_task(task_id)?;
            }
        }

        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
        job.update_task_status(task_id, TaskStatus::Releasing)?;
        let released = job
            .task(task_id)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;

        if !node_name.is_empty() {
            if let Some(node) = self.snapshot.nodes.get_mut(&node_name) {
                node.add_task(released)?;
            }
        }

        tracing::debug!(task = %task_id, job = %job_id, reason, "task evicted");
        Ok(())
    }

    /// Publish a condition on the job's group object, or as an event for
    /// legacy-sourced jobs.
    pub fn update_job_condition(
        &mut self,
        job_id: &JobId,
        condition: GroupCondition,
    ) -> Result<(), SchedulingError> {
        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;

        match job.pod_group.as_mut() {
            Some(pg) => {
                pg.set_condition(condition);
                if let Err(e) = self.effectors.status_updater.update_pod_group(pg) {
                    tracing::warn!(job = %job_id, error = %e, "pod group status update failed");
                    self.recorder
                        .count_schedule_attempts(ScheduleResult::Error, 1);
                }
            }
            None => {
                self.effectors
                    .status_updater
                    .record_job_status_event(job, &condition);
            }
        }
        Ok(())
    }

    /// Move a job's group to `phase` and forward the change to the cache's
    /// status backlog.
    pub fn set_job_phase(
        &mut self,
        job_id: &JobId,
        phase: GroupPhase,
    ) -> Result<(), SchedulingError> {
        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;

        if let Some(pg) = job.pod_group.as_mut() {
            pg.phase = phase;
            if let Err(e) = self.effectors.cache.update_job_status(job) {
                tracing::warn!(job = %job_id, error = %e, "job status update deferred");
            }
        }
        Ok(())
    }

    // ==================== Dispatch ====================

    fn dispatch_if_ready(&mut self, job_id: &JobId) {
        let to_dispatch: Vec<TaskInfo> = {
            let Some(job) = self.snapshot.jobs.get(job_id) else {
                return;
            };
            if !self.job_ready(job) {
                return;
            }
            job.tasks()
                .filter(|t| t.status == TaskStatus::Allocated && !self.dispatched.contains(&t.id))
                .cloned()
                .collect()
        };

        for task in to_dispatch {
            self.dispatch_task(job_id, task);
        }
    }

    fn dispatch_task(&mut self, job_id: &JobId, task: TaskInfo) {
        let hostname = task.node_name.clone();

        if !task.volume_ready {
            if let Err(e) = self
                .effectors
                .volume_binder
                .allocate_volumes(&task, &hostname)
            {
                tracing::warn!(task = %task.id, error = %e, "volume allocation failed; rolling back");
                self.recorder
                    .count_schedule_attempts(ScheduleResult::Error, 1);
                if let Err(rollback) = self.rollback_allocation(job_id, &task.id) {
                    tracing::error!(task = %task.id, error = %rollback, "allocation rollback failed");
                }
                return;
            }
        }

        if let Err(e) = self.transition_task(job_id, &task.id, TaskStatus::Binding) {
            tracing::error!(task = %task.id, error = %e, "bind transition failed");
            self.recorder
                .count_schedule_attempts(ScheduleResult::Error, 1);
            return;
        }

        let mut task = task;
        task.status = TaskStatus::Binding;
        let task_id = task.id.clone();
        if self
            .bind_tx
            .send(BindRequest { task, hostname })
            .is_err()
        {
            tracing::error!(job = %job_id, "bind dispatcher unavailable");
            self.recorder
                .count_schedule_attempts(ScheduleResult::Error, 1);
            return;
        }

        self.dispatched.insert(task_id);
        self.recorder
            .count_schedule_attempts(ScheduleResult::Scheduled, 1);
    }

    /// Move a task's status in the job table and refresh the node's copy.
    fn transition_task(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<(), SchedulingError> {
        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
        job.update_task_status(task_id, status)?;
        let updated = job
            .task(task_id)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTask {
                task: task_id.clone(),
                job: job_id.clone(),
            })?;

        let node_name = updated.node_name.clone();
        if !node_name.is_empty() {
            if let Some(node) = self.snapshot.nodes.get_mut(&node_name) {
                node.remove_task(task_id)?;
                node.add_task(updated)?;
            }
        }
        Ok(())
    }

    fn rollback_allocation(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
    ) -> Result<(), SchedulingError> {
        let node_name = self
            .snapshot
            .jobs
            .get(job_id)
            .and_then(|job| job.task(task_id))
            .map(|task| task.node_name.clone())
            .unwrap_or_default();

        if !node_name.is_empty() {
            if let Some(node) = self.snapshot.nodes.get_mut(&node_name) {
                node.remove_task(task_id)?;
            }
        }

        let job = self
            .snapshot
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::UnknownJob(job_id.clone()))?;
        job.update_task_status(task_id, TaskStatus::Pending)?;
        if let Some(task) = job.task_mut(task_id) {
            task.node_name.clear();
        }
        Ok(())
    }

    /// Return allocated-but-unready gangs to pending at close time.
    fn rollback_unready_gangs(&mut self) {
        let to_rollback: Vec<(JobId, Vec<TaskId>)> = self
            .snapshot
            .jobs
            .values()
            .filter(|job| !self.job_ready(job))
            .map(|job| {
                let tasks: Vec<TaskId> = job
                    .tasks_with_status(TaskStatus::Allocated)
                    .into_iter()
                    .map(|t| t.id.clone())
                    .collect();
                (job.id.clone(), tasks)
            })
            .filter(|(_, tasks)| !tasks.is_empty())
            .collect();

        for (job_id, task_ids) in to_rollback {
            tracing::debug!(
                job = %job_id,
                tasks = task_ids.len(),
                "rolling back allocations of unready gang"
            );
            for task_id in task_ids {
                if let Err(e) = self.rollback_allocation(&job_id, &task_id) {
                    tracing::error!(task = %task_id, error = %e, "gang rollback failed");
                }
            }
        }
    }
}

/// Determinism fallback when every comparator ties.
fn job_order_fallback(l: &JobInfo, r: &JobInfo) -> Ordering {
    l.creation_timestamp
        .cmp(&r.creation_timestamp)
        .then_with(|| l.id.cmp(&r.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Resource;
    use crate::metrics::NoopRecorder;
    use crate::testing::FakeCluster;

    fn open_session(snapshot: ClusterSnapshot) -> Session {
        let (bind_tx, _bind_rx) = mpsc::unbounded_channel();
        Session::open(
            snapshot,
            Vec::new(),
            Vec::new(),
            FakeCluster::new().effectors(),
            Arc::new(NoopRecorder),
            bind_tx,
            false,
        )
    }

    fn job(id: &str) -> JobInfo {
        JobInfo::new(id)
    }

    fn task(id: &str, job: &str) -> TaskInfo {
        TaskInfo::new(id, job, Resource::new(100.0, 0.0))
    }

    #[test]
    fn test_first_non_equal_comparator_wins() {
        let mut ssn = open_session(ClusterSnapshot::default());

        // First comparator always ties; the second decides; a third never
        // runs because the second already returned non-equal.
        ssn.add_job_order_fn("ties", Arc::new(|_: &JobInfo, _: &JobInfo| Ordering::Equal));
        ssn.add_job_order_fn(
            "by-name-desc",
            Arc::new(|l: &JobInfo, r: &JobInfo| r.id.cmp(&l.id)),
        );
        ssn.add_job_order_fn("never", Arc::new(|_: &JobInfo, _: &JobInfo| Ordering::Less));

        let a = job("a");
        let b = job("b");
        assert_eq!(ssn.job_order(&a, &b), Ordering::Greater);
        assert_eq!(ssn.job_order(&b, &a), Ordering::Less);
        ssn.close();
    }

    #[test]
    fn test_fallback_is_creation_then_id() {
        let ssn = open_session(ClusterSnapshot::default());

        let mut early = job("b");
        early.creation_timestamp = std::time::SystemTime::UNIX_EPOCH;
        let mut late = job("a");
        late.creation_timestamp =
            std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1);

        assert_eq!(ssn.job_order(&early, &late), Ordering::Less);

        // Same timestamp: ids decide.
        late.creation_timestamp = early.creation_timestamp;
        assert_eq!(ssn.job_order(&late, &early), Ordering::Less);
        ssn.close();
    }

    #[test]
    fn test_job_valid_short_circuits_on_first_failure() {
        let mut ssn = open_session(ClusterSnapshot::default());

        ssn.add_job_valid_fn("pass", Arc::new(|_: &JobInfo| None));
        ssn.add_job_valid_fn(
            "reject",
            Arc::new(|_: &JobInfo| {
                Some(ValidateResult {
                    pass: false,
                    reason: "first".to_string(),
                    message: String::new(),
                })
            }),
        );
        ssn.add_job_valid_fn(
            "later-reject",
            Arc::new(|_: &JobInfo| {
                Some(ValidateResult {
                    pass: false,
                    reason: "second".to_string(),
                    message: String::new(),
                })
            }),
        );

        let result = ssn.job_valid(&job("a")).expect("job must be rejected");
        assert_eq!(result.reason, "first");
        ssn.close();
    }

    #[test]
    fn test_victim_filters_intersect() {
        let mut ssn = open_session(ClusterSnapshot::default());

        // One gate accepts {v1, v2}, the other {v2, v3}; only v2 survives.
        ssn.add_preemptable_fn(
            "first",
            Arc::new(|_: &ClusterSnapshot, _: &TaskInfo, candidates: &[TaskInfo]| {
                candidates
                    .iter()
                    .filter(|t| t.id.0 != "v3")
                    .map(|t| t.id.clone())
                    .collect()
            }),
        );
        ssn.add_preemptable_fn(
            "second",
            Arc::new(|_: &ClusterSnapshot, _: &TaskInfo, candidates: &[TaskInfo]| {
                candidates
                    .iter()
                    .filter(|t| t.id.0 != "v1")
                    .map(|t| t.id.clone())
                    .collect()
            }),
        );

        let claimant = task("p", "ns/p");
        let candidates = vec![task("v1", "ns/a"), task("v2", "ns/a"), task("v3", "ns/a")];
        let victims = ssn.preemptable(&claimant, &candidates);
        assert_eq!(victims, vec![TaskId::from("v2")]);
        ssn.close();
    }

    #[test]
    fn test_job_ready_requires_all_agree() {
        let mut ssn = open_session(ClusterSnapshot::default());
        ssn.add_job_ready_fn("yes", Arc::new(|_: &JobInfo| true));
        ssn.add_job_ready_fn("no", Arc::new(|_: &JobInfo| false));

        assert!(!ssn.job_ready(&job("a")), "one dissent must veto readiness");
        ssn.close();
    }

    #[test]
    fn test_allocate_updates_job_and_node_aggregates() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.add_node(crate::api::NodeInfo::new("n1", Resource::new(1000.0, 0.0)));
        snapshot.add_job(JobInfo::with_tasks("ns/j", vec![task("t1", "ns/j")]));

        let mut ssn = open_session(snapshot);
        ssn.allocate(&JobId::from("ns/j"), &TaskId::from("t1"), "n1")
            .expect("allocation must succeed");

        let job = ssn.job(&JobId::from("ns/j")).expect("job exists");
        assert_eq!(job.allocated.milli_cpu, 100.0);
        assert_eq!(job.count_status(TaskStatus::Allocated), 1);

        let node = ssn.node("n1").expect("node exists");
        assert_eq!(node.idle.milli_cpu, 900.0);
        ssn.close();
    }

    #[test]
    fn test_allocate_rejects_oversized_task() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.add_node(crate::api::NodeInfo::new("n1", Resource::new(10.0, 0.0)));
        snapshot.add_job(JobInfo::with_tasks("ns/j", vec![task("t1", "ns/j")]));

        let mut ssn = open_session(snapshot);
        let err = ssn.allocate(&JobId::from("ns/j"), &TaskId::from("t1"), "n1");
        assert!(matches!(err, Err(SchedulingError::DoesNotFit { .. })));
        ssn.close();
    }
}
