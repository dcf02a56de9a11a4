// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduling actions.
//!
//! Actions are named, stateless steps executed once per cycle in
//! configuration order. Each operates on the session and must never undo a
//! previous action's decisions within the same cycle.

mod allocate;
mod backfill;
mod enqueue;
mod preempt;
mod reclaim;

pub use allocate::AllocateAction;
pub use backfill::BackfillAction;
pub use enqueue::EnqueueAction;
pub use preempt::PreemptAction;
pub use reclaim::ReclaimAction;

use crate::error::SchedulingError;
use crate::framework::Session;

/// Names accepted in the `actions` configuration list, in canonical order.
pub const KNOWN_ACTIONS: &[&str] = &["enqueue", "allocate", "preempt", "reclaim", "backfill"];

pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make decisions against the session. Only fatal invariant violations
    /// propagate; predicate and effector failures are handled in place.
    fn execute(&self, ssn: &mut Session) -> Result<(), SchedulingError>;
}

/// Resolve an action by its configured name.
pub fn action_by_name(name: &str) -> Option<Box<dyn Action>> {
    match name {
        "enqueue" => Some(Box::new(EnqueueAction)),
        "allocate" => Some(Box::new(AllocateAction)),
        "preempt" => Some(Box::new(PreemptAction)),
        "reclaim" => Some(Box::new(ReclaimAction)),
        "backfill" => Some(Box::new(BackfillAction)),
        _ => None,
    }
}
