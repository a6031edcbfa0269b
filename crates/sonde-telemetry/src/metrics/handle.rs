// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Generation-tagged handle arena shared by the metric and ping registries.

use std::sync::Arc;

/// Opaque handle to a registered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricHandle(pub u64);

/// Opaque handle to a registered ping type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PingHandle(pub u64);

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// An arena handing out `u64` handles: slot index in the low 32 bits, slot
/// generation in the high 32 bits. Generations start at 1, so `0` is never a
/// valid handle, and destroying an entry bumps the generation so stale
/// handles to a reused slot do not resolve.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

fn split(raw: u64) -> (u32, u32) {
    ((raw & 0xFFFF_FFFF) as u32, (raw >> 32) as u32)
}

fn join(index: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value and returns its raw handle.
    pub fn insert(&mut self, value: T) -> u64 {
        let value = Some(Arc::new(value));
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = value;
            return join(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value,
        });
        join(index, 1)
    }

    /// Resolves a raw handle.
    pub fn get(&self, raw: u64) -> Option<Arc<T>> {
        let (index, generation) = split(raw);
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.clone()
    }

    /// Removes the value of a raw handle. Returns it if the handle was live.
    pub fn remove(&mut self, raw: u64) -> Option<Arc<T>> {
        let (index, generation) = split(raw);
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(index);
        Some(value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
