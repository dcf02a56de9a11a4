// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end cycles against the in-memory cluster double.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use cohort_scheduler::api::{
    GroupConditionType, GroupPhase, JobId, JobInfo, NodeInfo, PodGroup, QueueInfo, Resource,
    TaskId, TaskInfo, TaskStatus,
};
use cohort_scheduler::cache::Cache;
use cohort_scheduler::config::SchedulerConf;
use cohort_scheduler::framework::{Plugin, Session};
use cohort_scheduler::metrics::ScheduleResult;
use cohort_scheduler::plugins::default_registry;
use cohort_scheduler::testing::{FakeCluster, RecordingRecorder};
use cohort_scheduler::Scheduler;

const CPU: f64 = 1000.0;

fn cpu(millis: f64) -> Resource {
    Resource::new(millis, 0.0)
}

/// A job bound to a pod group, with its tasks named `<job>-t<i>`.
fn gang_job(
    namespace: &str,
    name: &str,
    min_available: u32,
    phase: GroupPhase,
    tasks: Vec<TaskInfo>,
) -> JobInfo {
    let id = JobId::derive(namespace, name);
    let mut job = JobInfo::with_tasks(id, tasks);
    job.set_pod_group(
        PodGroup::new(namespace, name, min_available)
            .with_queue("default")
            .with_phase(phase),
    );
    job
}

fn pending_task(job: &str, index: usize, request: Resource) -> TaskInfo {
    TaskInfo::new(format!("{job}-t{index}").as_str(), format!("default/{job}").as_str(), request)
}

fn running_task(job: &str, index: usize, request: Resource, node: &str) -> TaskInfo {
    pending_task(job, index, request)
        .with_status(TaskStatus::Running)
        .with_node(node)
}

/// A node that already hosts the given running tasks.
fn node_with_tasks(name: &str, allocatable: Resource, tasks: &[TaskInfo]) -> NodeInfo {
    let mut node = NodeInfo::new(name, allocatable);
    for task in tasks {
        node.add_task(task.clone()).expect("fixture task must fit node");
    }
    node
}

fn make_scheduler(fake: &FakeCluster, recorder: Arc<RecordingRecorder>) -> Scheduler {
    Scheduler::new(
        SchedulerConf::default(),
        default_registry(),
        fake.effectors(),
        recorder,
        Duration::from_secs(1),
    )
    .expect("default configuration must validate")
}

#[tokio::test]
async fn test_gang_admission_success() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));
    fake.add_node(NodeInfo::new("n1", cpu(4.0 * CPU)));

    let tasks = (0..3).map(|i| pending_task("j", i, cpu(CPU))).collect();
    fake.add_job(gang_job("default", "j", 3, GroupPhase::Pending, tasks));

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    let binds = fake.binds();
    assert_eq!(binds.len(), 3, "all gang members must bind in one cycle");
    assert!(binds.iter().all(|(_, node)| node == "n1"));

    let job = fake.job(&JobId::derive("default", "j")).expect("job exists");
    assert!(
        job.ready_task_num() >= 3,
        "job must be gang-ready after the cycle, got {}",
        job.ready_task_num()
    );

    assert!(
        fake.conditions().is_empty(),
        "no unschedulable condition for an admitted gang"
    );
    assert_eq!(recorder.schedule_attempts(ScheduleResult::Scheduled), 3);
    assert_eq!(recorder.unschedulable_jobs(), 0);
}

#[tokio::test]
async fn test_gang_admission_shortfall() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));
    fake.add_node(NodeInfo::new("n1", cpu(4.0 * CPU)));

    // Two tasks cannot satisfy a gang of three.
    let tasks = (0..2).map(|i| pending_task("j", i, cpu(CPU))).collect();
    fake.add_job(gang_job("default", "j", 3, GroupPhase::Pending, tasks));

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    assert!(fake.binds().is_empty(), "invalid gang must not allocate");
    assert_eq!(recorder.schedule_attempts(ScheduleResult::Scheduled), 0);

    let conditions = fake.conditions();
    assert_eq!(conditions.len(), 1, "close must publish exactly one condition");
    let (job_id, condition) = &conditions[0];
    assert_eq!(job_id, &JobId::derive("default", "j"));
    assert_eq!(condition.condition_type, GroupConditionType::Unschedulable);
    assert!(condition.status);
    assert_eq!(
        condition.message,
        "3/2 tasks in gang unschedulable: 0 nodes are available"
    );

    assert_eq!(recorder.unschedulable_jobs(), 1);
    assert_eq!(recorder.job_retries("j"), 1, "one retry registered per cycle");
    assert_eq!(recorder.unschedulable_tasks("j"), 3);

    // Each pending task carries its own unschedulable condition.
    let task_conditions = fake.task_conditions();
    assert_eq!(task_conditions.len(), 2);
    assert!(task_conditions.iter().all(|(_, c)| !c.scheduled));
}

#[tokio::test]
async fn test_preemption_gated_by_gang() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));

    // Job A's gang exactly fills the node.
    let a_tasks = vec![
        running_task("a", 0, cpu(CPU), "n1"),
        running_task("a", 1, cpu(CPU), "n1"),
    ];
    fake.add_node(node_with_tasks("n1", cpu(2.0 * CPU), &a_tasks));
    fake.add_job(gang_job("default", "a", 2, GroupPhase::Running, a_tasks));

    let b_task = pending_task("b", 0, cpu(CPU)).with_priority(10);
    fake.add_job(gang_job("default", "b", 1, GroupPhase::Pending, vec![b_task]));

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    assert!(
        fake.evictions().is_empty(),
        "gang integrity must block preemption of job a's members"
    );
    assert!(fake.binds().is_empty());

    let b = fake.job(&JobId::derive("default", "b")).expect("job exists");
    assert_eq!(b.count_status(TaskStatus::Pending), 1, "b stays pending");

    let unschedulable: Vec<_> = fake
        .conditions()
        .into_iter()
        .filter(|(id, cond)| id == &JobId::derive("default", "b") && cond.status)
        .collect();
    assert_eq!(unschedulable.len(), 1, "b must be reported unschedulable");
}

#[tokio::test]
async fn test_preemption_allowed_for_singleton() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));

    let a_tasks = vec![running_task("a", 0, cpu(CPU), "n1")];
    fake.add_node(node_with_tasks("n1", cpu(CPU), &a_tasks));
    fake.add_job(gang_job("default", "a", 1, GroupPhase::Running, a_tasks));

    let b_task = pending_task("b", 0, cpu(CPU)).with_priority(10);
    fake.add_job(gang_job("default", "b", 1, GroupPhase::Pending, vec![b_task]));

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());

    // Cycle one: evict the singleton and pipeline b against the release.
    scheduler.run_once(&CancellationToken::new());

    let evictions = fake.evictions();
    assert_eq!(evictions.len(), 1, "singleton gang may cede its task");
    assert_eq!(evictions[0].0, TaskId::from("a-t0"));
    assert_eq!(recorder.preemption_attempts(), 1);
    assert_eq!(recorder.preemption_victims(), 1);
    assert!(fake.binds().is_empty(), "pipelined tasks do not bind this cycle");

    // Cycle two: the release materialized; b allocates and binds.
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    let binds = fake.binds();
    assert_eq!(binds.len(), 1, "b must bind once capacity is free");
    assert_eq!(binds[0].1, "n1");

    let b = fake.job(&JobId::derive("default", "b")).expect("job exists");
    assert!(b.ready_task_num() >= 1, "b must be ready after cycle two");
}

#[test]
fn test_ordering_determinism_on_full_tie() {
    let make_snapshot = |first_ts: SystemTime, second_ts: SystemTime| {
        let mut j1 = gang_job(
            "default",
            "j1",
            1,
            GroupPhase::Inqueue,
            vec![pending_task("j1", 0, cpu(CPU))],
        );
        j1.creation_timestamp = first_ts;
        let mut j2 = gang_job(
            "default",
            "j2",
            1,
            GroupPhase::Inqueue,
            vec![pending_task("j2", 0, cpu(CPU))],
        );
        j2.creation_timestamp = second_ts;

        let fake = FakeCluster::new();
        fake.add_queue(QueueInfo::new("default"));
        fake.add_job(j1);
        fake.add_job(j2);
        fake
    };

    let t1 = SystemTime::UNIX_EPOCH;
    let t2 = t1 + Duration::from_secs(60);

    let pop_order = |fake: &FakeCluster| {
        let (bind_tx, _bind_rx) = tokio::sync::mpsc::unbounded_channel();
        let conf = SchedulerConf::default();
        let registry = default_registry();
        let plugins: Vec<Vec<Box<dyn Plugin>>> = conf
            .tiers
            .iter()
            .map(|tier| {
                tier.plugins
                    .iter()
                    .filter_map(|opt| registry.build(&opt.name, &opt.arguments))
                    .collect()
            })
            .collect();

        let ssn = Session::open(
            fake.snapshot(),
            plugins,
            conf.tiers.clone(),
            fake.effectors(),
            Arc::new(cohort_scheduler::metrics::NoopRecorder),
            bind_tx,
            false,
        );

        let mut jobs = ssn.job_priority_queue();
        jobs.extend(ssn.jobs().values().cloned());
        let mut order = Vec::new();
        while let Some(job) = jobs.pop() {
            order.push(job.id.to_string());
        }
        ssn.close();
        order
    };

    // Both jobs tie on every comparator (both gangs unready); the older
    // creation timestamp must pop first.
    let fake = make_snapshot(t1, t2);
    assert_eq!(pop_order(&fake), vec!["default/j1", "default/j2"]);

    // Swapping timestamps inverts the order.
    let fake = make_snapshot(t2, t1);
    assert_eq!(pop_order(&fake), vec!["default/j2", "default/j1"]);
}

#[tokio::test]
async fn test_partial_gang_rollback_knob() {
    let run_with_knob = |rollback: bool| async move {
        let fake = FakeCluster::new();
        fake.add_queue(QueueInfo::new("default"));
        // Only two of the three gang members fit.
        fake.add_node(NodeInfo::new("n1", cpu(2.0 * CPU)));
        let tasks = (0..3).map(|i| pending_task("j", i, cpu(CPU))).collect();
        fake.add_job(gang_job("default", "j", 3, GroupPhase::Pending, tasks));

        let recorder = RecordingRecorder::new();
        let conf = SchedulerConf {
            rollback_partial_gangs: rollback,
            ..Default::default()
        };
        let mut scheduler = Scheduler::new(
            conf,
            default_registry(),
            fake.effectors(),
            recorder.clone(),
            Duration::from_secs(1),
        )
        .expect("configuration must validate");
        scheduler.run_once(&CancellationToken::new());
        scheduler.shutdown().await;

        assert!(fake.binds().is_empty(), "incomplete gang must not bind");
        recorder.schedule_attempts(ScheduleResult::Unschedulable)
    };

    // Without rollback one task stays pending at close; with rollback all
    // three return to pending.
    assert_eq!(run_with_knob(false).await, 1);
    assert_eq!(run_with_knob(true).await, 3);
}

#[tokio::test]
async fn test_bind_failure_counts_errors() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));
    fake.add_node(NodeInfo::new("n1", cpu(CPU)));
    fake.add_job(gang_job(
        "default",
        "j",
        1,
        GroupPhase::Pending,
        vec![pending_task("j", 0, cpu(CPU))],
    ));
    fake.fail_binds(true);

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    assert!(fake.binds().is_empty());
    assert_eq!(
        recorder.schedule_attempts(ScheduleResult::Error),
        1,
        "failed bind must surface as an error attempt"
    );
}

#[tokio::test]
async fn test_legacy_pdb_job_reports_through_events() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));
    fake.add_node(NodeInfo::new("n1", cpu(CPU)));

    // A legacy-sourced job: same shape, no pod group to carry a condition.
    let mut job = JobInfo::with_tasks(
        JobId::derive("default", "legacy"),
        vec![pending_task("legacy", 0, cpu(CPU)), pending_task("legacy", 1, cpu(CPU))],
    );
    job.set_pdb(cohort_scheduler::api::PodDisruptionBudget::new("default", "legacy", 2));
    job.queue = cohort_scheduler::api::QueueId::from("default");
    fake.add_job(job);

    let recorder = RecordingRecorder::new();
    let mut scheduler = make_scheduler(&fake, recorder.clone());
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    // Only one task fits; the gang of two stays unready and the status
    // surfaces as an event on the job rather than a pod group condition.
    assert!(fake.binds().is_empty());
    let conditions = fake.conditions();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].0, JobId::derive("default", "legacy"));
    assert_eq!(recorder.job_retries("legacy"), 1);
}

/// A plugin whose open hook panics; the framework must contain it.
struct PanickingPlugin;

impl Plugin for PanickingPlugin {
    fn name(&self) -> &str {
        "chaos"
    }

    fn on_session_open(&mut self, _ssn: &mut Session) {
        panic!("chaos plugin always panics");
    }

    fn on_session_close(&mut self, _ssn: &mut Session) {}
}

#[tokio::test]
async fn test_plugin_panic_is_contained() {
    let fake = FakeCluster::new();
    fake.add_queue(QueueInfo::new("default"));
    fake.add_node(NodeInfo::new("n1", cpu(CPU)));
    fake.add_job(gang_job(
        "default",
        "j",
        1,
        GroupPhase::Pending,
        vec![pending_task("j", 0, cpu(CPU))],
    ));

    let mut registry = default_registry();
    registry.register("chaos", |_| Box::new(PanickingPlugin));

    let mut conf = SchedulerConf::default();
    conf.tiers[0]
        .plugins
        .push(cohort_scheduler::config::PluginOption::new("chaos"));

    let recorder = RecordingRecorder::new();
    let mut scheduler = Scheduler::new(
        conf,
        registry,
        fake.effectors(),
        recorder.clone(),
        Duration::from_secs(1),
    )
    .expect("configuration must validate");

    // The cycle completes and the gang still schedules.
    scheduler.run_once(&CancellationToken::new());
    scheduler.shutdown().await;

    assert_eq!(fake.binds().len(), 1, "scheduling must survive a plugin panic");
}
