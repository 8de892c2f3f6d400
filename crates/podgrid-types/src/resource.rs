//! Resource amounts requested by pods and offered by nodes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quantity::{deserialize_bytes, deserialize_cpu};

/// CPU assumed for a container that requests none, for scoring only.
pub const DEFAULT_MILLI_CPU_REQUEST: u64 = 100;

/// Memory assumed for a container that requests none, for scoring only.
pub const DEFAULT_MEMORY_REQUEST: u64 = 200 * 1024 * 1024;

/// A bundle of resource amounts.
///
/// Used both as a pod's request and as a node's allocatable capacity;
/// `pods` is only meaningful for the latter (max pods per node).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    #[serde(deserialize_with = "deserialize_cpu")]
    pub milli_cpu: u64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub memory: u64,
    pub gpu: u64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub ephemeral_storage: u64,
    pub pods: u64,
    /// Extended resources keyed by name.
    pub scalar: BTreeMap<String, u64>,
}

impl Resource {
    pub fn new(milli_cpu: u64, memory: u64) -> Self {
        Self {
            milli_cpu,
            memory,
            ..Self::default()
        }
    }

    pub fn with_pods(mut self, pods: u64) -> Self {
        self.pods = pods;
        self
    }

    pub fn with_gpu(mut self, gpu: u64) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn with_scalar(mut self, name: &str, amount: u64) -> Self {
        self.scalar.insert(name.to_string(), amount);
        self
    }

    pub fn is_zero(&self) -> bool {
        self.milli_cpu == 0
            && self.memory == 0
            && self.gpu == 0
            && self.ephemeral_storage == 0
            && self.scalar.values().all(|v| *v == 0)
    }

    /// Add another resource bundle into this one.
    pub fn add(&mut self, other: &Resource) {
        self.milli_cpu = self.milli_cpu.saturating_add(other.milli_cpu);
        self.memory = self.memory.saturating_add(other.memory);
        self.gpu = self.gpu.saturating_add(other.gpu);
        self.ephemeral_storage = self.ephemeral_storage.saturating_add(other.ephemeral_storage);
        self.pods = self.pods.saturating_add(other.pods);
        for (name, amount) in &other.scalar {
            let entry = self.scalar.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*amount);
        }
    }

    /// Subtract another resource bundle, saturating at zero.
    pub fn sub(&mut self, other: &Resource) {
        self.milli_cpu = self.milli_cpu.saturating_sub(other.milli_cpu);
        self.memory = self.memory.saturating_sub(other.memory);
        self.gpu = self.gpu.saturating_sub(other.gpu);
        self.ephemeral_storage = self.ephemeral_storage.saturating_sub(other.ephemeral_storage);
        self.pods = self.pods.saturating_sub(other.pods);
        for (name, amount) in &other.scalar {
            if let Some(entry) = self.scalar.get_mut(name) {
                *entry = entry.saturating_sub(*amount);
            }
        }
        self.scalar.retain(|_, v| *v > 0);
    }

    /// Raise every component to at least the matching component of `other`.
    pub fn set_max(&mut self, other: &Resource) {
        self.milli_cpu = self.milli_cpu.max(other.milli_cpu);
        self.memory = self.memory.max(other.memory);
        self.gpu = self.gpu.max(other.gpu);
        self.ephemeral_storage = self.ephemeral_storage.max(other.ephemeral_storage);
        self.pods = self.pods.max(other.pods);
        for (name, amount) in &other.scalar {
            let entry = self.scalar.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(*amount);
        }
    }

    /// Same bundle with zero cpu/memory replaced by the scoring defaults.
    pub fn non_zero(&self) -> Resource {
        let mut out = self.clone();
        if out.milli_cpu == 0 {
            out.milli_cpu = DEFAULT_MILLI_CPU_REQUEST;
        }
        if out.memory == 0 {
            out.memory = DEFAULT_MEMORY_REQUEST;
        }
        out
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={}m memory={}", self.milli_cpu, self.memory)?;
        if self.gpu > 0 {
            write!(f, " gpu={}", self.gpu)?;
        }
        if self.ephemeral_storage > 0 {
            write!(f, " ephemeral-storage={}", self.ephemeral_storage)?;
        }
        for (name, amount) in &self.scalar {
            write!(f, " {name}={amount}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_are_inverse() {
        let mut total = Resource::new(1000, 1 << 30).with_scalar("example.com/fpga", 2);
        let other = Resource::new(250, 1 << 20).with_scalar("example.com/fpga", 1);

        total.add(&other);
        assert_eq!(total.milli_cpu, 1250);
        assert_eq!(total.scalar["example.com/fpga"], 3);

        total.sub(&other);
        assert_eq!(total, Resource::new(1000, 1 << 30).with_scalar("example.com/fpga", 2));
    }

    #[test]
    fn sub_saturates_and_drops_empty_scalars() {
        let mut r = Resource::new(100, 100).with_scalar("x", 1);
        r.sub(&Resource::new(500, 50).with_scalar("x", 3));
        assert_eq!(r.milli_cpu, 0);
        assert_eq!(r.memory, 50);
        assert!(r.scalar.is_empty());
    }

    #[test]
    fn set_max_is_elementwise() {
        let mut r = Resource::new(100, 1000);
        r.set_max(&Resource::new(500, 10));
        assert_eq!(r, Resource::new(500, 1000));
    }

    #[test]
    fn non_zero_fills_defaults() {
        let r = Resource::default().non_zero();
        assert_eq!(r.milli_cpu, DEFAULT_MILLI_CPU_REQUEST);
        assert_eq!(r.memory, DEFAULT_MEMORY_REQUEST);

        let explicit = Resource::new(10, 20).non_zero();
        assert_eq!(explicit, Resource::new(10, 20));
    }

    #[test]
    fn deserializes_quantity_strings() {
        let r: Resource = serde_json::from_str(r#"{"milli_cpu": "1.5", "memory": "2Gi"}"#).unwrap();
        assert_eq!(r.milli_cpu, 1500);
        assert_eq!(r.memory, 2 << 30);

        let r: Resource = serde_json::from_str(r#"{"milli_cpu": 250, "pods": 110}"#).unwrap();
        assert_eq!(r.milli_cpu, 250);
        assert_eq!(r.pods, 110);
        assert_eq!(r.memory, 0);
    }
}
