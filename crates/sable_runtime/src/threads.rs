//! Per-thread runtime state: thread-local roots, the active exception frame
//! chain, and the call chain that backs stack-trace capture.
//!
//! Records are keyed by `ThreadId` in a shared map rather than thread-local
//! storage, so several independent runtimes can coexist on one thread.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use sable_core::ObjRef;

use crate::exceptions::ExceptionFrame;
use crate::roots::RootSlot;
use crate::runtime::Runtime;

pub(crate) type SharedThreadRecord = Arc<Mutex<ThreadRecord>>;

#[derive(Default)]
pub(crate) struct ThreadRecord {
    pub(crate) roots: crate::roots::RootSet,
    pub(crate) frames: Vec<ExceptionFrame>,
    pub(crate) call_chain: Vec<&'static str>,
    /// Exception that escaped every guarded region on this thread. Kept here
    /// so it stays reachable until reported or cleared.
    pub(crate) pending: ObjRef,
    /// Live [`ThreadGuard`]s for this thread. The record is discarded when
    /// the last one drops.
    guard_count: usize,
}

/// Registration of the current thread with a runtime. Guards nest; dropping
/// the last one detaches the thread, even when the record was first created
/// by lazy attachment: its roots stop being scanned and its frame chain is
/// discarded.
pub struct ThreadGuard<'rt> {
    rt: &'rt Runtime,
    id: ThreadId,
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self.rt.threads.lock();
        let detach = match threads.get(&self.id) {
            Some(record) => {
                let mut rec = record.lock();
                rec.guard_count = rec.guard_count.saturating_sub(1);
                rec.guard_count == 0
            }
            None => false,
        };
        if detach {
            threads.remove(&self.id);
        }
    }
}

/// One logical call frame on the current thread. Dropping it pops the name
/// from the chain captured into exception stack traces.
pub struct FrameGuard {
    record: SharedThreadRecord,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.record.lock().call_chain.pop();
    }
}

impl Runtime {
    /// Explicitly register the current thread. Threads are also registered
    /// lazily the first time they touch roots or guarded regions; the guard
    /// is for callers that want deterministic detach, and adopts the record
    /// even when lazy attachment created it first.
    pub fn register_thread(&self) -> ThreadGuard<'_> {
        let id = thread::current().id();
        let record = self.threads.lock().entry(id).or_default().clone();
        record.lock().guard_count += 1;
        ThreadGuard { rt: self, id }
    }

    pub(crate) fn current_record(&self) -> SharedThreadRecord {
        let id = thread::current().id();
        self.threads.lock().entry(id).or_default().clone()
    }

    /// Enter a named frame for stack-trace purposes.
    pub fn enter_frame(&self, name: &'static str) -> FrameGuard {
        let record = self.current_record();
        record.lock().call_chain.push(name);
        FrameGuard { record }
    }

    /// Render the current call chain, innermost frame first.
    pub(crate) fn capture_call_chain(&self) -> String {
        let record = self.current_record();
        let record = record.lock();
        let mut trace = String::new();
        for name in record.call_chain.iter().rev() {
            trace.push_str("   at ");
            trace.push_str(name);
            trace.push('\n');
        }
        if trace.is_empty() {
            trace.push_str("   at <unknown>\n");
        }
        trace
    }

    /// Register a root scanned only while this thread stays attached.
    pub fn add_thread_root(&self, slot: RootSlot) {
        self.current_record().lock().roots.add(slot);
    }

    pub fn remove_thread_root(&self, slot: &RootSlot) -> bool {
        self.current_record().lock().roots.remove(slot)
    }
}
