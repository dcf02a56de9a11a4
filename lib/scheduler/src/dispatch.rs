// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous bind dispatch.
//!
//! The session is the single producer of bind requests; a small worker pool
//! consumes them concurrently with the rest of the cycle (and possibly with
//! the next one). Shutdown drops the sender and awaits the workers, so
//! pending binds always drain before the process exits.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::api::TaskInfo;
use crate::cache::Effectors;
use crate::metrics::{Recorder, ScheduleResult};

/// A decision queued for asynchronous execution against the cluster API.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub task: TaskInfo,
    pub hostname: String,
}

pub struct BindDispatcher {
    tx: mpsc::UnboundedSender<BindRequest>,
    workers: Vec<JoinHandle<()>>,
}

impl BindDispatcher {
    pub fn new(effectors: Effectors, recorder: Arc<dyn Recorder>, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<BindRequest>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let effectors = effectors.clone();
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    loop {
                        let request = { rx.lock().await.recv().await };
                        let Some(request) = request else {
                            // Sender dropped and queue drained.
                            break;
                        };
                        execute_bind(&effectors, recorder.as_ref(), &request, worker);
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Sender handed to sessions. Enqueueing never blocks.
    pub fn sender(&self) -> mpsc::UnboundedSender<BindRequest> {
        self.tx.clone()
    }

    /// Drain outstanding binds and stop the workers.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "bind worker terminated abnormally");
            }
        }
    }
}

fn execute_bind(effectors: &Effectors, recorder: &dyn Recorder, request: &BindRequest, worker: usize) {
    let task = &request.task;

    if let Err(e) = effectors.volume_binder.bind_volumes(task) {
        tracing::warn!(task = %task.id, error = %e, "volume bind failed; cache will resync the task");
        recorder.count_schedule_attempts(ScheduleResult::Error, 1);
        return;
    }

    if let Err(e) = effectors.binder.bind(task, &request.hostname) {
        tracing::warn!(
            task = %task.id,
            node = %request.hostname,
            error = %e,
            "bind failed; cache will resync the task"
        );
        recorder.count_schedule_attempts(ScheduleResult::Error, 1);
        return;
    }

    // Bookkeeping so the cache can assume the binding before its watchers
    // observe it.
    if let Err(e) = effectors.cache.bind(task, &request.hostname) {
        tracing::warn!(task = %task.id, error = %e, "cache bind bookkeeping failed");
    }

    tracing::debug!(task = %task.id, node = %request.hostname, worker, "task bound");
}
