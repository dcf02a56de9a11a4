// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plugin framework: registration, tiered invocation, reduction rules.
//!
//! A plugin is a named value object contributing callbacks to a [`Session`]
//! at open time. Plugins are organized into configuration-declared tiers;
//! callbacks are consulted in tier order, and within a tier in registration
//! order. See [`Session`] for the reduction rules applied to each callback
//! kind.

pub mod queue;
pub mod session;

pub use queue::{CompareFn, PriorityQueue};
pub use session::Session;

use std::collections::BTreeMap;

/// Free-form arguments handed to a plugin factory from configuration.
pub type PluginArgs = BTreeMap<String, String>;

/// Builds a fresh plugin instance for one session.
pub type PluginFactory = fn(&PluginArgs) -> Box<dyn Plugin>;

/// A named scheduling policy. Hooks receive the session explicitly; state a
/// hook needs later must live on the plugin value itself.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Register callbacks and capture whatever the close hook will need.
    fn on_session_open(&mut self, ssn: &mut Session);

    /// Publish terminal state for the cycle. Runs in reverse registration
    /// order; must not assume open succeeded for other plugins.
    fn on_session_close(&mut self, ssn: &mut Session);
}

/// Name-to-factory table resolved against configuration at startup.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn build(&self, name: &str, args: &PluginArgs) -> Option<Box<dyn Plugin>> {
        self.factories.get(name).map(|factory| factory(args))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
