// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Periodic scheduling loop: snapshot → open → actions → close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::{action_by_name, Action, KNOWN_ACTIONS};
use crate::cache::Effectors;
use crate::config::{ConfigError, SchedulerConf};
use crate::dispatch::{BindDispatcher, BindRequest};
use crate::framework::{PluginRegistry, Session};
use crate::metrics::{Recorder, ScheduleResult};

/// Workers draining the bind queue concurrently with scheduling.
const BIND_WORKERS: usize = 4;

pub struct Scheduler {
    conf: SchedulerConf,
    actions: Vec<Box<dyn Action>>,
    registry: PluginRegistry,
    effectors: Effectors,
    recorder: Arc<dyn Recorder>,
    schedule_period: Duration,
    dispatcher: Option<BindDispatcher>,
    bind_tx: mpsc::UnboundedSender<BindRequest>,
}

impl Scheduler {
    /// Validate configuration and wire the bind dispatcher. Must run inside
    /// a tokio runtime.
    pub fn new(
        conf: SchedulerConf,
        registry: PluginRegistry,
        effectors: Effectors,
        recorder: Arc<dyn Recorder>,
        schedule_period: Duration,
    ) -> Result<Self, ConfigError> {
        conf.validate(KNOWN_ACTIONS, &registry)?;

        let actions: Vec<Box<dyn Action>> = conf
            .actions
            .iter()
            .map(|name| {
                action_by_name(name).ok_or_else(|| ConfigError::UnknownAction(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        let dispatcher = BindDispatcher::new(effectors.clone(), Arc::clone(&recorder), BIND_WORKERS);
        let bind_tx = dispatcher.sender();

        Ok(Self {
            conf,
            actions,
            registry,
            effectors,
            recorder,
            schedule_period,
            dispatcher: Some(dispatcher),
            bind_tx,
        })
    }

    /// Run until `stop` fires. The current cycle finishes and pending binds
    /// drain before this returns.
    pub async fn run(mut self, stop: CancellationToken) -> anyhow::Result<()> {
        self.effectors.cache.run(stop.clone());

        let mut ticker = tokio::time::interval(self.schedule_period);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => self.run_once(&stop),
            }
        }

        tracing::info!("scheduler stopping; draining pending binds");
        self.shutdown().await;
        Ok(())
    }

    /// One full scheduling cycle.
    pub fn run_once(&self, stop: &CancellationToken) {
        if !self.effectors.cache.wait_for_cache_sync(stop) {
            tracing::warn!("cache not synced; skipping cycle");
            return;
        }

        let start = Instant::now();
        let snapshot = self.effectors.cache.snapshot();

        let tiered_plugins = self
            .conf
            .tiers
            .iter()
            .map(|tier| {
                tier.plugins
                    .iter()
                    .filter_map(|opt| self.registry.build(&opt.name, &opt.arguments))
                    .collect()
            })
            .collect();

        let mut ssn = Session::open(
            snapshot,
            tiered_plugins,
            self.conf.tiers.clone(),
            self.effectors.clone(),
            Arc::clone(&self.recorder),
            self.bind_tx.clone(),
            self.conf.rollback_partial_gangs,
        );

        for action in &self.actions {
            let action_start = Instant::now();
            let result = action.execute(&mut ssn);
            self.recorder
                .observe_action_duration(action.name(), action_start.elapsed());

            if let Err(e) = result {
                // Invariant violation: abort the cycle, never the process.
                tracing::error!(action = action.name(), error = %e, "action failed; aborting cycle");
                self.recorder
                    .count_schedule_attempts(ScheduleResult::Error, 1);
                break;
            }
        }

        ssn.close();
        self.recorder.observe_e2e_duration(start.elapsed());
    }

    /// Drain outstanding binds. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
    }
}
