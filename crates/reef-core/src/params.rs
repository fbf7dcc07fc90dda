//! Parameter descriptors and the RT-owned value store

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Parameter index, dense within the owning processor
pub type ParameterIndex = u32;

/// Parameter value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    String,
    Data,
}

/// Static description of a single processor parameter.
///
/// Control-plane values are always in the normalized [0, 1] domain; the
/// descriptor holds the declared numeric domain and the linear maps between
/// the two. The map stays linear even for inverted domains (min > max).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub index: ParameterIndex,
    pub name: String,
    pub label: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
    pub kind: ParameterType,
}

impl ParameterDescriptor {
    pub fn float(index: ParameterIndex, name: &str, label: &str, unit: &str, min: f32, max: f32) -> Self {
        Self {
            index,
            name: name.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            min,
            max,
            kind: ParameterType::Float,
        }
    }

    pub fn int(index: ParameterIndex, name: &str, label: &str, min: i32, max: i32) -> Self {
        Self {
            index,
            name: name.to_string(),
            label: label.to_string(),
            unit: String::new(),
            min: min as f32,
            max: max as f32,
            kind: ParameterType::Int,
        }
    }

    pub fn bool(index: ParameterIndex, name: &str, label: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            label: label.to_string(),
            unit: String::new(),
            min: 0.0,
            max: 1.0,
            kind: ParameterType::Bool,
        }
    }

    /// Map a normalized [0, 1] value into the declared domain
    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }

    /// Map a domain value back to [0, 1]
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        if self.max == self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

/// Maximum parameters per processor the store will hold
pub const MAX_PARAMETERS: usize = 64;

/// RT-owned parameter value store with seqlock snapshots.
///
/// Numeric values are written only by the RT thread. Non-RT readers take a
/// consistent snapshot without locking the writer out: the writer bumps the
/// version to an odd value before a write burst and to the next even value
/// after it, and readers retry while the version is odd or moved under them.
pub struct ParameterStore {
    version: AtomicU64,
    values: Vec<AtomicU32>,
}

impl ParameterStore {
    pub fn new(count: usize) -> Self {
        let values = (0..count.min(MAX_PARAMETERS))
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect();
        Self {
            version: AtomicU64::new(0),
            values,
        }
    }

    /// Build a store preloaded with each descriptor's minimum
    pub fn from_descriptors(descriptors: &[ParameterDescriptor]) -> Self {
        let store = Self::new(descriptors.len());
        for desc in descriptors {
            store.init(desc.index, desc.min);
        }
        store
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Initial value write, before the store is shared with readers
    pub fn init(&self, index: ParameterIndex, value: f32) {
        if let Some(slot) = self.values.get(index as usize) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// RT-thread write. Bumps the seqlock version around the store.
    #[inline]
    pub fn set(&self, index: ParameterIndex, value: f32) {
        let Some(slot) = self.values.get(index as usize) else {
            return;
        };
        self.version.fetch_add(1, Ordering::Release);
        slot.store(value.to_bits(), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// RT-thread read, no synchronization needed on the owning thread
    #[inline]
    pub fn value(&self, index: ParameterIndex) -> f32 {
        self.values
            .get(index as usize)
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Non-RT single-value read using the seqlock protocol
    pub fn read(&self, index: ParameterIndex) -> f32 {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let value = self.value(index);
            if self.version.load(Ordering::Acquire) == before {
                return value;
            }
        }
    }

    /// Non-RT consistent snapshot of all values
    pub fn snapshot(&self, out: &mut Vec<f32>) {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            out.clear();
            for slot in &self.values {
                out.push(f32::from_bits(slot.load(Ordering::Relaxed)));
            }
            if self.version.load(Ordering::Acquire) == before {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("len", &self.values.len())
            .finish()
    }
}
