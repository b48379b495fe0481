//! Registered GC roots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sable_core::ObjRef;

/// A reference-holding slot the collector always treats as reachable.
///
/// Cloning shares the slot; registration identity is the underlying
/// allocation, so add/remove must be balanced per slot, not per clone.
#[derive(Clone)]
pub struct RootSlot {
    cell: Arc<AtomicU64>,
}

impl RootSlot {
    pub fn new(value: ObjRef) -> Self {
        Self {
            cell: Arc::new(AtomicU64::new(value.to_bits())),
        }
    }

    pub fn get(&self) -> ObjRef {
        ObjRef::from_bits(self.cell.load(Ordering::Acquire))
    }

    pub fn set(&self, value: ObjRef) {
        self.cell.store(value.to_bits(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(ObjRef::NULL);
    }

    pub(crate) fn same_slot(a: &RootSlot, b: &RootSlot) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }
}

impl std::fmt::Debug for RootSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootSlot({:?})", self.get())
    }
}

/// One balanced set of registered root slots.
#[derive(Default)]
pub(crate) struct RootSet {
    slots: Vec<RootSlot>,
}

impl RootSet {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn add(&mut self, slot: RootSlot) {
        self.slots.push(slot);
    }

    /// Removes one registration of `slot`. Returns false for a slot that was
    /// never registered, which is an unbalanced-registration bug.
    pub(crate) fn remove(&mut self, slot: &RootSlot) -> bool {
        match self.slots.iter().position(|s| RootSlot::same_slot(s, slot)) {
            Some(i) => {
                self.slots.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.slots.iter().map(|s| s.get())
    }
}
