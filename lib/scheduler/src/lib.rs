// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cohort scheduling engine.
//!
//! A batch-aware scheduler core whose unit of work is a *job*: a gang of
//! related tasks admitted together or not at all. Each cycle deep-copies the
//! cluster into a snapshot, opens a [`framework::Session`] that plugins
//! populate with callbacks, drives the configured [`actions`] pipeline, and
//! closes the session, publishing conditions and metrics for whatever could
//! not be placed.
//!
//! The engine owns no cluster machinery: snapshots come from the
//! [`cache::Cache`] seam and decisions leave through the binder, evictor and
//! status-updater seams, so the whole core runs against in-memory doubles in
//! tests.

pub use anyhow::{Context as ErrorContext, Result};

pub use tokio_util::sync::CancellationToken;

pub mod actions;
pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framework;
pub mod logging;
pub mod metrics;
pub mod plugins;
pub mod scheduler;
pub mod testing;

pub use config::SchedulerConf;
pub use error::SchedulingError;
pub use scheduler::Scheduler;
