// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metrics surface.
//!
//! The engine records through the narrow [`Recorder`] trait so it can be
//! exercised against [`NoopRecorder`] in tests; the process installs
//! [`PrometheusRecorder`] over a shared registry exposed at `/metrics`.

use std::time::Duration;

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry,
};

/// Prometheus metric name constants.
///
/// Centralized so the scrape surface is auditable in one place.
pub mod names {
    /// Namespace prefixed to every metric below.
    pub const NAMESPACE: &str = "cohort";

    pub const E2E_SCHEDULING_LATENCY: &str = "e2e_scheduling_latency_milliseconds";
    pub const PLUGIN_SCHEDULING_LATENCY: &str = "plugin_scheduling_latency_microseconds";
    pub const ACTION_SCHEDULING_LATENCY: &str = "action_scheduling_latency_microseconds";
    pub const TASK_SCHEDULING_LATENCY: &str = "task_scheduling_latency_microseconds";
    pub const SCHEDULE_ATTEMPTS_TOTAL: &str = "schedule_attempts_total";
    pub const POD_PREEMPTION_VICTIMS: &str = "pod_preemption_victims";
    pub const TOTAL_PREEMPTION_ATTEMPTS: &str = "total_preemption_attempts";
    pub const UNSCHEDULE_TASK_COUNT: &str = "unschedule_task_count";
    pub const UNSCHEDULE_JOB_COUNT: &str = "unschedule_job_count";
    pub const JOB_RETRY_COUNTS: &str = "job_retry_counts";
}

/// Label value for plugin latency observed during session open.
pub const ON_SESSION_OPEN: &str = "OnSessionOpen";
/// Label value for plugin latency observed during session close.
pub const ON_SESSION_CLOSE: &str = "OnSessionClose";

/// Result label of `schedule_attempts_total`. This set is closed; no other
/// label values are ever emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleResult {
    Scheduled,
    Unschedulable,
    Error,
}

impl ScheduleResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleResult::Scheduled => "scheduled",
            ScheduleResult::Unschedulable => "unschedulable",
            ScheduleResult::Error => "error",
        }
    }
}

pub fn duration_in_microseconds(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000_000.0
}

pub fn duration_in_milliseconds(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Narrow recording interface consumed by the engine.
pub trait Recorder: Send + Sync {
    fn observe_e2e_duration(&self, duration: Duration);
    fn observe_plugin_duration(&self, plugin: &str, phase: &str, duration: Duration);
    fn observe_action_duration(&self, action: &str, duration: Duration);
    fn observe_task_schedule_duration(&self, duration: Duration);
    fn count_schedule_attempts(&self, result: ScheduleResult, count: u64);
    fn set_preemption_victims(&self, count: usize);
    fn count_preemption_attempt(&self);
    fn set_unschedulable_task_count(&self, job_id: &str, count: u32);
    fn set_unschedulable_job_count(&self, count: usize);
    fn count_job_retry(&self, job_id: &str);
}

/// Discards every observation; used when testing engine semantics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn observe_e2e_duration(&self, _: Duration) {}
    fn observe_plugin_duration(&self, _: &str, _: &str, _: Duration) {}
    fn observe_action_duration(&self, _: &str, _: Duration) {}
    fn observe_task_schedule_duration(&self, _: Duration) {}
    fn count_schedule_attempts(&self, _: ScheduleResult, _: u64) {}
    fn set_preemption_victims(&self, _: usize) {}
    fn count_preemption_attempt(&self) {}
    fn set_unschedulable_task_count(&self, _: &str, _: u32) {}
    fn set_unschedulable_job_count(&self, _: usize) {}
    fn count_job_retry(&self, _: &str) {}
}

/// Prometheus-backed recorder registered against a shared registry.
pub struct PrometheusRecorder {
    e2e_scheduling_latency: Histogram,
    plugin_scheduling_latency: HistogramVec,
    action_scheduling_latency: HistogramVec,
    task_scheduling_latency: Histogram,
    schedule_attempts: IntCounterVec,
    preemption_victims: IntGauge,
    preemption_attempts: IntCounter,
    unschedule_task_count: IntGaugeVec,
    unschedule_job_count: IntGauge,
    job_retry_counts: IntCounterVec,
}

impl PrometheusRecorder {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let buckets = exponential_buckets(5.0, 2.0, 10)?;

        let e2e_scheduling_latency = Histogram::with_opts(
            HistogramOpts::new(
                names::E2E_SCHEDULING_LATENCY,
                "E2e scheduling latency in milliseconds (scheduling algorithm + binding)",
            )
            .namespace(names::NAMESPACE)
            .buckets(buckets.clone()),
        )?;

        let plugin_scheduling_latency = HistogramVec::new(
            HistogramOpts::new(
                names::PLUGIN_SCHEDULING_LATENCY,
                "Plugin scheduling latency in microseconds",
            )
            .namespace(names::NAMESPACE)
            .buckets(buckets.clone()),
            &["plugin", "OnSession"],
        )?;

        let action_scheduling_latency = HistogramVec::new(
            HistogramOpts::new(
                names::ACTION_SCHEDULING_LATENCY,
                "Action scheduling latency in microseconds",
            )
            .namespace(names::NAMESPACE)
            .buckets(buckets.clone()),
            &["action"],
        )?;

        let task_scheduling_latency = Histogram::with_opts(
            HistogramOpts::new(
                names::TASK_SCHEDULING_LATENCY,
                "Task scheduling latency in microseconds",
            )
            .namespace(names::NAMESPACE)
            .buckets(buckets),
        )?;

        let schedule_attempts = IntCounterVec::new(
            Opts::new(
                names::SCHEDULE_ATTEMPTS_TOTAL,
                "Number of attempts to schedule tasks, by result. 'unschedulable' means a \
                 task could not be scheduled, while 'error' means an internal scheduler problem.",
            )
            .namespace(names::NAMESPACE),
            &["result"],
        )?;

        let preemption_victims = IntGauge::with_opts(
            Opts::new(
                names::POD_PREEMPTION_VICTIMS,
                "Number of selected preemption victims",
            )
            .namespace(names::NAMESPACE),
        )?;

        let preemption_attempts = IntCounter::with_opts(
            Opts::new(
                names::TOTAL_PREEMPTION_ATTEMPTS,
                "Total preemption attempts in the cluster till now",
            )
            .namespace(names::NAMESPACE),
        )?;

        let unschedule_task_count = IntGaugeVec::new(
            Opts::new(
                names::UNSCHEDULE_TASK_COUNT,
                "Number of tasks that could not be scheduled",
            )
            .namespace(names::NAMESPACE),
            &["job_id"],
        )?;

        let unschedule_job_count = IntGauge::with_opts(
            Opts::new(
                names::UNSCHEDULE_JOB_COUNT,
                "Number of jobs that could not be scheduled",
            )
            .namespace(names::NAMESPACE),
        )?;

        let job_retry_counts = IntCounterVec::new(
            Opts::new(names::JOB_RETRY_COUNTS, "Number of retry counts for one job")
                .namespace(names::NAMESPACE),
            &["job_id"],
        )?;

        registry.register(Box::new(e2e_scheduling_latency.clone()))?;
        registry.register(Box::new(plugin_scheduling_latency.clone()))?;
        registry.register(Box::new(action_scheduling_latency.clone()))?;
        registry.register(Box::new(task_scheduling_latency.clone()))?;
        registry.register(Box::new(schedule_attempts.clone()))?;
        registry.register(Box::new(preemption_victims.clone()))?;
        registry.register(Box::new(preemption_attempts.clone()))?;
        registry.register(Box::new(unschedule_task_count.clone()))?;
        registry.register(Box::new(unschedule_job_count.clone()))?;
        registry.register(Box::new(job_retry_counts.clone()))?;

        Ok(Self {
            e2e_scheduling_latency,
            plugin_scheduling_latency,
            action_scheduling_latency,
            task_scheduling_latency,
            schedule_attempts,
            preemption_victims,
            preemption_attempts,
            unschedule_task_count,
            unschedule_job_count,
            job_retry_counts,
        })
    }
}

impl Recorder for PrometheusRecorder {
    fn observe_e2e_duration(&self, duration: Duration) {
        self.e2e_scheduling_latency
            .observe(duration_in_milliseconds(duration));
    }

    fn observe_plugin_duration(&self, plugin: &str, phase: &str, duration: Duration) {
        self.plugin_scheduling_latency
            .with_label_values(&[plugin, phase])
            .observe(duration_in_microseconds(duration));
    }

    fn observe_action_duration(&self, action: &str, duration: Duration) {
        self.action_scheduling_latency
            .with_label_values(&[action])
            .observe(duration_in_microseconds(duration));
    }

    fn observe_task_schedule_duration(&self, duration: Duration) {
        self.task_scheduling_latency
            .observe(duration_in_microseconds(duration));
    }

    fn count_schedule_attempts(&self, result: ScheduleResult, count: u64) {
        self.schedule_attempts
            .with_label_values(&[result.as_str()])
            .inc_by(count);
    }

    fn set_preemption_victims(&self, count: usize) {
        self.preemption_victims.set(count as i64);
    }

    fn count_preemption_attempt(&self) {
        self.preemption_attempts.inc();
    }

    fn set_unschedulable_task_count(&self, job_id: &str, count: u32) {
        self.unschedule_task_count
            .with_label_values(&[job_id])
            .set(count as i64);
    }

    fn set_unschedulable_job_count(&self, count: usize) {
        self.unschedule_job_count.set(count as i64);
    }

    fn count_job_retry(&self, job_id: &str) {
        self.job_retry_counts.with_label_values(&[job_id]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_full_metric_set() {
        let registry = Registry::new();
        let recorder = PrometheusRecorder::new(&registry).unwrap();

        recorder.observe_e2e_duration(Duration::from_millis(12));
        recorder.observe_plugin_duration("gang", ON_SESSION_OPEN, Duration::from_micros(40));
        recorder.observe_action_duration("allocate", Duration::from_micros(100));
        recorder.observe_task_schedule_duration(Duration::from_micros(25));
        recorder.count_schedule_attempts(ScheduleResult::Scheduled, 3);
        recorder.set_preemption_victims(1);
        recorder.count_preemption_attempt();
        recorder.set_unschedulable_task_count("ns/job", 2);
        recorder.set_unschedulable_job_count(1);
        recorder.count_job_retry("ns/job");

        let families = registry.gather();
        assert_eq!(families.len(), 10, "all ten metric families must register");
        for family in &families {
            assert!(
                family.get_name().starts_with("cohort_"),
                "metric {} missing namespace",
                family.get_name()
            );
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        PrometheusRecorder::new(&registry).unwrap();
        assert!(
            PrometheusRecorder::new(&registry).is_err(),
            "double registration against one registry must fail"
        );
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(duration_in_microseconds(Duration::from_millis(1)), 1000.0);
        assert_eq!(duration_in_milliseconds(Duration::from_secs(1)), 1000.0);
    }

    #[test]
    fn test_schedule_result_labels_closed_set() {
        assert_eq!(ScheduleResult::Scheduled.as_str(), "scheduled");
        assert_eq!(ScheduleResult::Unschedulable.as_str(), "unschedulable");
        assert_eq!(ScheduleResult::Error.as_str(), "error");
    }
}
