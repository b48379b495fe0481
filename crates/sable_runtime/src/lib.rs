//! Sable managed runtime.
//!
//! The managed-execution core that AOT-generated code links against: the
//! collector-owned heap, structured exception handling, boxing and reference
//! conversions, and the runtime lifecycle. Type metadata and the object
//! representation live in `sable_core`.

pub mod errors;

mod boxing;
mod exceptions;
mod heap;
mod roots;
mod runtime;
mod threads;

pub use exceptions::{Control, ExceptionState, GuardedRegion, Thrown};
pub use heap::{GcConfig, GcStats, Heap, write_barrier};
pub use roots::RootSlot;
pub use runtime::{Runtime, WellKnown};
pub use threads::{FrameGuard, ThreadGuard};

// Re-exports from sable_core used by nearly every caller.
pub use sable_core::{
    HEADER_SIZE, HeapObject, ObjRef, TypeDescriptor, TypeFlags, TypeHandle, TypeRegistry,
    ValueBits, implements_interface, is_assignable_from, is_subclass_of, resolve_virtual,
};
