// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-dimensional resource vectors.
//!
//! A [`Resource`] is a vector over named scalar dimensions: milli-cpu, memory
//! bytes, and arbitrarily named extended resources (e.g. GPUs). All components
//! are non-negative; shortfalls are expressed through the signed [`FitDelta`]
//! companion type so the invariant never leaks into the main algebra.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known extended resource name for GPUs.
pub const GPU_RESOURCE_NAME: &str = "nvidia.com/gpu";

/// Dimension names used by [`Resource::get`] and FitError summarization.
pub const CPU_DIMENSION: &str = "cpu";
pub const MEMORY_DIMENSION: &str = "memory";

/// Comparison slack for floating point components.
const EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ResourceError {
    /// Subtracting a resource not dominated by the minuend.
    #[error("resource underflow: cannot subtract {subtrahend} from {minuend}")]
    Underflow { minuend: String, subtrahend: String },
}

/// A non-negative resource vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// CPU in millicores.
    pub milli_cpu: f64,
    /// Memory in bytes.
    pub memory: f64,
    /// Named extended resources (count semantics, e.g. GPUs).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scalars: BTreeMap<String, f64>,
}

impl Resource {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(milli_cpu: f64, memory: f64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    /// Add a named extended resource dimension.
    pub fn with_scalar(mut self, name: impl Into<String>, quantity: f64) -> Self {
        self.scalars.insert(name.into(), quantity);
        self
    }

    /// Look up a dimension by name (`cpu`, `memory`, or an extended name).
    pub fn get(&self, name: &str) -> f64 {
        match name {
            CPU_DIMENSION => self.milli_cpu,
            MEMORY_DIMENSION => self.memory,
            other => self.scalars.get(other).copied().unwrap_or(0.0),
        }
    }

    /// Names of the extended dimensions carried by this vector.
    pub fn scalar_names(&self) -> impl Iterator<Item = &str> {
        self.scalars.keys().map(String::as_str)
    }

    /// True when every component is zero (within floating point slack).
    pub fn is_empty(&self) -> bool {
        self.milli_cpu < EPSILON
            && self.memory < EPSILON
            && self.scalars.values().all(|v| *v < EPSILON)
    }

    pub fn add(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu += other.milli_cpu;
        self.memory += other.memory;
        for (name, quantity) in &other.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += quantity;
        }
        self
    }

    /// Subtract `other`, failing if any component would go negative.
    pub fn checked_sub(&mut self, other: &Resource) -> Result<&mut Self, ResourceError> {
        if !other.less_equal(self) {
            return Err(ResourceError::Underflow {
                minuend: self.to_string(),
                subtrahend: other.to_string(),
            });
        }
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0.0);
        self.memory = (self.memory - other.memory).max(0.0);
        for (name, quantity) in &other.scalars {
            if let Some(v) = self.scalars.get_mut(name) {
                *v = (*v - quantity).max(0.0);
            }
        }
        Ok(self)
    }

    /// Subtract `other`, flooring every component at zero.
    pub fn saturating_sub(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0.0);
        self.memory = (self.memory - other.memory).max(0.0);
        for (name, quantity) in &other.scalars {
            let v = self.scalars.entry(name.clone()).or_insert(0.0);
            *v = (*v - quantity).max(0.0);
        }
        self
    }

    /// Subtract `other`, flooring at zero, and return the unmet remainder.
    pub fn sub_with_remainder(&mut self, other: &Resource) -> Resource {
        let mut unmet = Resource::empty();
        unmet.milli_cpu = (other.milli_cpu - self.milli_cpu).max(0.0);
        unmet.memory = (other.memory - self.memory).max(0.0);
        for (name, quantity) in &other.scalars {
            let have = self.scalars.get(name).copied().unwrap_or(0.0);
            let short = (quantity - have).max(0.0);
            if short > 0.0 {
                unmet.scalars.insert(name.clone(), short);
            }
        }
        self.saturating_sub(other);
        unmet
    }

    /// True when every component of `self` fits within `other`.
    pub fn less_equal(&self, other: &Resource) -> bool {
        if self.milli_cpu > other.milli_cpu + EPSILON {
            return false;
        }
        if self.memory > other.memory + EPSILON {
            return false;
        }
        self.scalars
            .iter()
            .all(|(name, quantity)| *quantity <= other.get(name) + EPSILON)
    }

    /// The dominant share of this vector relative to a cluster total.
    ///
    /// Dimensions absent from (or zero in) the total are ignored.
    pub fn dominant_share(&self, total: &Resource) -> f64 {
        let mut share: f64 = 0.0;
        if total.milli_cpu > 0.0 {
            share = share.max(self.milli_cpu / total.milli_cpu);
        }
        if total.memory > 0.0 {
            share = share.max(self.memory / total.memory);
        }
        for (name, quantity) in &self.scalars {
            let t = total.get(name);
            if t > 0.0 {
                share = share.max(quantity / t);
            }
        }
        share
    }

    /// The signed per-dimension delta `self − request`.
    ///
    /// `self` is the pool under test (a node's idle resources); negative
    /// components mark insufficient dimensions for FitError summarization.
    pub fn fit_delta(&self, request: &Resource) -> FitDelta {
        let mut scalars = BTreeMap::new();
        for name in request.scalars.keys().chain(self.scalars.keys()) {
            scalars
                .entry(name.clone())
                .or_insert_with(|| self.get(name) - request.get(name));
        }
        FitDelta {
            milli_cpu: self.milli_cpu - request.milli_cpu,
            memory: self.memory - request.memory,
            scalars,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {:.0}, memory {:.0}", self.milli_cpu, self.memory)?;
        for (name, quantity) in &self.scalars {
            write!(f, ", {} {:.0}", name, quantity)?;
        }
        Ok(())
    }
}

/// Signed per-dimension shortfall recorded when a task fails to fit a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDelta {
    pub milli_cpu: f64,
    pub memory: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scalars: BTreeMap<String, f64>,
}

impl FitDelta {
    pub fn get(&self, name: &str) -> f64 {
        match name {
            CPU_DIMENSION => self.milli_cpu,
            MEMORY_DIMENSION => self.memory,
            other => self.scalars.get(other).copied().unwrap_or(0.0),
        }
    }

    /// Build a delta directly from per-dimension values; used by tests and
    /// by callers that already know the shortfall.
    pub fn from_dimensions(dimensions: &[(&str, f64)]) -> Self {
        let mut delta = FitDelta::default();
        for (name, value) in dimensions {
            match *name {
                CPU_DIMENSION => delta.milli_cpu = *value,
                MEMORY_DIMENSION => delta.memory = *value,
                other => {
                    delta.scalars.insert(other.to_string(), *value);
                }
            }
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut r = Resource::new(1000.0, 2048.0).with_scalar(GPU_RESOURCE_NAME, 1.0);
        r.add(&Resource::new(500.0, 1024.0).with_scalar(GPU_RESOURCE_NAME, 1.0));

        assert_eq!(r.get(CPU_DIMENSION), 1500.0);
        assert_eq!(r.get(MEMORY_DIMENSION), 3072.0);
        assert_eq!(r.get(GPU_RESOURCE_NAME), 2.0);
        assert_eq!(r.get("unknown"), 0.0);
    }

    #[test]
    fn test_checked_sub_detects_underflow() {
        let mut r = Resource::new(1000.0, 1024.0);
        let err = r.checked_sub(&Resource::new(2000.0, 0.0));
        assert!(err.is_err(), "subtracting a non-dominated resource must fail");

        // The minuend is untouched on failure.
        assert_eq!(r.milli_cpu, 1000.0);
        assert_eq!(r.memory, 1024.0);
    }

    #[test]
    fn test_checked_sub_scalar_underflow() {
        let mut r = Resource::new(4000.0, 4096.0);
        let gpus = Resource::empty().with_scalar(GPU_RESOURCE_NAME, 1.0);
        assert!(
            r.checked_sub(&gpus).is_err(),
            "scalar dimension absent from the minuend must underflow"
        );
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let mut r = Resource::new(1000.0, 1024.0);
        r.saturating_sub(&Resource::new(2000.0, 512.0));
        assert_eq!(r.milli_cpu, 0.0);
        assert_eq!(r.memory, 512.0);
    }

    #[test]
    fn test_sub_with_remainder() {
        let mut r = Resource::new(600.0, 0.0);
        let unmet = r.sub_with_remainder(&Resource::new(1000.0, 0.0));
        assert_eq!(r.milli_cpu, 0.0);
        assert_eq!(unmet.milli_cpu, 400.0);
        assert!(unmet.memory == 0.0);
    }

    #[test]
    fn test_less_equal() {
        let small = Resource::new(1000.0, 1024.0);
        let big = Resource::new(2000.0, 2048.0).with_scalar(GPU_RESOURCE_NAME, 1.0);
        assert!(small.less_equal(&big));
        assert!(!big.less_equal(&small));

        // Equal vectors fit both ways.
        assert!(small.less_equal(&small.clone()));
    }

    #[test]
    fn test_dominant_share() {
        let total = Resource::new(10_000.0, 10_240.0).with_scalar(GPU_RESOURCE_NAME, 8.0);
        let req = Resource::new(1000.0, 5120.0).with_scalar(GPU_RESOURCE_NAME, 1.0);
        let share = req.dominant_share(&total);
        assert!((share - 0.5).abs() < 1e-9, "memory dominates at 0.5, got {share}");
    }

    #[test]
    fn test_fit_delta_marks_shortfalls() {
        let idle = Resource::new(500.0, 4096.0);
        let request = Resource::new(1000.0, 1024.0).with_scalar(GPU_RESOURCE_NAME, 1.0);
        let delta = idle.fit_delta(&request);

        assert!(delta.get(CPU_DIMENSION) < 0.0);
        assert!(delta.get(MEMORY_DIMENSION) > 0.0);
        assert_eq!(delta.get(GPU_RESOURCE_NAME), -1.0);
    }

    #[test]
    fn test_is_empty() {
        assert!(Resource::empty().is_empty());
        assert!(!Resource::new(1.0, 0.0).is_empty());
        assert!(!Resource::empty().with_scalar(GPU_RESOURCE_NAME, 1.0).is_empty());
    }
}
