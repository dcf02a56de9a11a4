// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduler configuration.
//!
//! Loaded from an optional TOML file merged with `COHORT_`-prefixed
//! environment variables. Configuration names the action pipeline and the
//! plugin tiers; unknown action or plugin names are startup errors.
//!
//! ```toml
//! actions = ["enqueue", "allocate", "preempt", "reclaim", "backfill"]
//!
//! [[tiers]]
//! [[tiers.plugins]]
//! name = "gang"
//! ```

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::framework::{PluginArgs, PluginRegistry};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "COHORT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("unknown action '{0}' in configuration")]
    UnknownAction(String),

    #[error("unknown plugin '{0}' in configuration")]
    UnknownPlugin(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Callback kinds a plugin can be enabled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    JobOrder,
    TaskOrder,
    QueueOrder,
    JobValid,
    JobReady,
    JobPipelined,
    JobEnqueueable,
    Overused,
    Preemptable,
    Reclaimable,
    Predicate,
}

/// One plugin's entry inside a tier. Every capability defaults to enabled;
/// set a field to `false` to suppress that callback without dropping the
/// plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginOption {
    pub name: String,

    #[serde(default)]
    pub arguments: PluginArgs,

    pub job_order: Option<bool>,
    pub task_order: Option<bool>,
    pub queue_order: Option<bool>,
    pub job_valid: Option<bool>,
    pub job_ready: Option<bool>,
    pub job_pipelined: Option<bool>,
    pub job_enqueueable: Option<bool>,
    pub overused: Option<bool>,
    pub preemptable: Option<bool>,
    pub reclaimable: Option<bool>,
    pub predicate: Option<bool>,
}

impl PluginOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn enabled(&self, capability: Capability) -> bool {
        let flag = match capability {
            Capability::JobOrder => self.job_order,
            Capability::TaskOrder => self.task_order,
            Capability::QueueOrder => self.queue_order,
            Capability::JobValid => self.job_valid,
            Capability::JobReady => self.job_ready,
            Capability::JobPipelined => self.job_pipelined,
            Capability::JobEnqueueable => self.job_enqueueable,
            Capability::Overused => self.overused,
            Capability::Preemptable => self.preemptable,
            Capability::Reclaimable => self.reclaimable,
            Capability::Predicate => self.predicate,
        };
        flag.unwrap_or(true)
    }
}

/// One tier of the plugin pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierConf {
    pub plugins: Vec<PluginOption>,
}

/// Top-level scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConf {
    /// Action pipeline, executed in order once per cycle.
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,

    /// Plugin tiers, consulted in order.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConf>,

    /// Roll back allocations of gangs that could not reach readiness by the
    /// end of the cycle instead of leaving them placed for the next one.
    #[serde(default)]
    pub rollback_partial_gangs: bool,
}

impl Default for SchedulerConf {
    fn default() -> Self {
        Self {
            actions: default_actions(),
            tiers: default_tiers(),
            rollback_partial_gangs: false,
        }
    }
}

fn default_actions() -> Vec<String> {
    ["enqueue", "allocate", "preempt", "reclaim", "backfill"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tiers() -> Vec<TierConf> {
    vec![TierConf {
        plugins: vec![PluginOption::new("gang")],
    }]
}

impl SchedulerConf {
    /// The figment this configuration is extracted from: defaults, then the
    /// optional TOML file, then environment overrides.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(SchedulerConf::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let conf: SchedulerConf = Self::figment(path).extract().map_err(Box::new)?;
        Ok(conf)
    }

    /// Reject unknown action or plugin names before the loop starts.
    pub fn validate(
        &self,
        known_actions: &[&str],
        registry: &PluginRegistry,
    ) -> Result<(), ConfigError> {
        if self.actions.is_empty() {
            return Err(ConfigError::Invalid("no actions configured".to_string()));
        }

        for action in &self.actions {
            if !known_actions.contains(&action.as_str()) {
                return Err(ConfigError::UnknownAction(action.clone()));
            }
        }

        for tier in &self.tiers {
            if tier.plugins.is_empty() {
                return Err(ConfigError::Invalid("tier with no plugins".to_string()));
            }
            for plugin in &tier.plugins {
                if !registry.contains(&plugin.name) {
                    return Err(ConfigError::UnknownPlugin(plugin.name.clone()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::default_registry;
    use std::io::Write;

    const KNOWN_ACTIONS: &[&str] = &["enqueue", "allocate", "preempt", "reclaim", "backfill"];

    #[test]
    fn test_defaults() {
        let conf = SchedulerConf::default();
        assert_eq!(conf.actions.len(), 5);
        assert_eq!(conf.tiers.len(), 1);
        assert_eq!(conf.tiers[0].plugins[0].name, "gang");
        assert!(!conf.rollback_partial_gangs);

        conf.validate(KNOWN_ACTIONS, &default_registry())
            .expect("defaults must validate");
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
actions = ["allocate", "backfill"]
rollback_partial_gangs = true

[[tiers]]
[[tiers.plugins]]
name = "gang"
preemptable = false
"#
        )
        .unwrap();

        let conf = SchedulerConf::load(Some(file.path())).unwrap();
        assert_eq!(conf.actions, vec!["allocate", "backfill"]);
        assert!(conf.rollback_partial_gangs);

        let gang = &conf.tiers[0].plugins[0];
        assert!(!gang.enabled(Capability::Preemptable));
        assert!(gang.enabled(Capability::JobOrder), "unset capability defaults on");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let mut conf = SchedulerConf::default();
        conf.actions.push("defragment".to_string());

        let err = conf.validate(KNOWN_ACTIONS, &default_registry());
        assert!(matches!(err, Err(ConfigError::UnknownAction(name)) if name == "defragment"));
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let mut conf = SchedulerConf::default();
        conf.tiers[0].plugins.push(PluginOption::new("drf"));

        let err = conf.validate(KNOWN_ACTIONS, &default_registry());
        assert!(matches!(err, Err(ConfigError::UnknownPlugin(name)) if name == "drf"));
    }

    #[test]
    fn test_empty_actions_rejected() {
        let conf = SchedulerConf {
            actions: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            conf.validate(KNOWN_ACTIONS, &default_registry()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
