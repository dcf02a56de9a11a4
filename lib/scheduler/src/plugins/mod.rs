// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Built-in plugins and the default registry.
//!
//! Policy plugins beyond gang (priority, DRF, proportional share) register
//! through the same [`PluginRegistry`] from their own crates; the engine
//! only ships the one that defines its semantics.

pub mod gang;

pub use gang::GangPlugin;

use crate::framework::PluginRegistry;

/// Registry with every built-in plugin registered.
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(gang::PLUGIN_NAME, GangPlugin::factory);
    registry
}
