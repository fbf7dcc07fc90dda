//! Blob slot table for variable-size payloads crossing the RT boundary
//!
//! `RtEvent` is fixed-size, so string and data parameter values travel as
//! handles into this table. A slot moves Free → Posted (non-RT writer) →
//! Consumed (RT reader) → Free (dispatcher sweep). Values are only ever
//! dropped on the dispatcher thread, never on RT.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Index into the blob slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHandle(pub u32);

/// A string or byte payload in flight
#[derive(Debug, Clone)]
pub enum BlobValue {
    Text(Box<str>),
    Bytes(Box<[u8]>),
}

const SLOT_FREE: u8 = 0;
const SLOT_POSTED: u8 = 1;
const SLOT_CONSUMED: u8 = 2;

struct BlobSlot {
    state: AtomicU8,
    value: Mutex<Option<BlobValue>>,
}

/// Fixed-capacity slot table. Posting fails when full; the caller drops
/// the event and counts the overflow.
pub struct BlobStore {
    slots: Vec<BlobSlot>,
    rejected: AtomicU64,
}

impl BlobStore {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| BlobSlot {
                state: AtomicU8::new(SLOT_FREE),
                value: Mutex::new(None),
            })
            .collect();
        Self {
            slots,
            rejected: AtomicU64::new(0),
        }
    }

    /// Non-RT: claim a free slot and stage a value in it
    pub fn post(&self, value: BlobValue) -> Option<BlobHandle> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .state
                .compare_exchange(SLOT_FREE, SLOT_POSTED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                *slot.value.lock() = Some(value);
                return Some(BlobHandle(index as u32));
            }
        }
        self.rejected.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// RT: read the staged value and retire the slot.
    ///
    /// Uses `try_lock`; the lock is uncontended by construction (the poster
    /// released it before the handle was published), so a failure means a
    /// protocol violation and the value is treated as lost.
    pub fn consume<R>(&self, handle: BlobHandle, f: impl FnOnce(&BlobValue) -> R) -> Option<R> {
        let slot = self.slots.get(handle.0 as usize)?;
        if slot.state.load(Ordering::Acquire) != SLOT_POSTED {
            return None;
        }
        let result = {
            let guard = slot.value.try_lock()?;
            guard.as_ref().map(f)
        };
        slot.state.store(SLOT_CONSUMED, Ordering::Release);
        result
    }

    /// Dispatcher thread: drop consumed values and recycle their slots
    pub fn sweep(&self) {
        for slot in &self.slots {
            if slot.state.load(Ordering::Acquire) == SLOT_CONSUMED {
                slot.value.lock().take();
                slot.state.store(SLOT_FREE, Ordering::Release);
            }
        }
    }

    /// Number of posts rejected because the table was full
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_consume_sweep_cycle() {
        let store = BlobStore::new(2);
        let handle = store.post(BlobValue::Text("hello".into())).unwrap();

        let len = store
            .consume(handle, |value| match value {
                BlobValue::Text(s) => s.len(),
                BlobValue::Bytes(b) => b.len(),
            })
            .unwrap();
        assert_eq!(len, 5);

        // Consumed slot cannot be read twice
        assert!(store.consume(handle, |_| ()).is_none());

        // Sweep recycles it
        store.sweep();
        assert!(store.post(BlobValue::Bytes(vec![1, 2].into())).is_some());
    }

    #[test]
    fn full_table_rejects() {
        let store = BlobStore::new(1);
        assert!(store.post(BlobValue::Text("a".into())).is_some());
        assert!(store.post(BlobValue::Text("b".into())).is_none());
        assert_eq!(store.rejected(), 1);
    }
}
