//! Core types for the Sable managed runtime.
//!
//! This crate contains the fundamental types that are independent of the
//! runtime machinery:
//! - `TypeDescriptor` - static per-type metadata (layout, hierarchy, dispatch)
//! - `TypeRegistry` - explicit name -> descriptor table
//! - `ObjRef` / `HeapObject` - collector-managed object representation
//! - `ValueBits` - plain-value byte codec used by boxing

pub mod bits;
pub mod descriptor;
pub mod object;
pub mod registry;
pub mod relations;

pub use bits::ValueBits;
pub use descriptor::{
    FieldInfo, Finalizer, MethodInfo, REF_ELEMENT_SIZE, TypeDescriptor, TypeDescriptorBuilder,
    TypeFlags, TypeHandle, VirtualFn,
};
pub use object::{ExceptionData, HEADER_SIZE, HeapObject, ObjRef, ObjectBody};
pub use registry::{FastHashMap, TypeRegistry, fast_hasher, fast_map_new};
pub use relations::{implements_interface, is_assignable_from, is_subclass_of, resolve_virtual};
