//! Static per-type metadata: identity, layout, hierarchy, and dispatch tables.
//!
//! Descriptors are created at link/initialization time and live for the
//! process. They are immutable after construction with one exception: the
//! vtable is populated exactly once, after every descriptor in the hierarchy
//! exists, via [`TypeDescriptor::install_vtable`].

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::object::{HEADER_SIZE, HeapObject, ObjRef};
use crate::registry::fast_hasher;

/// Shared handle to a type descriptor. Descriptor identity is pointer
/// identity (`Arc::ptr_eq`): every type has exactly one descriptor.
pub type TypeHandle = Arc<TypeDescriptor>;

/// Per-element size recorded for arrays whose elements are object references.
pub const REF_ELEMENT_SIZE: usize = std::mem::size_of::<u64>();

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        const VALUE_TYPE = 1 << 0;
        const INTERFACE  = 1 << 1;
        const ABSTRACT   = 1 << 2;
        const SEALED     = 1 << 3;
        const ARRAY      = 1 << 4;
        const PRIMITIVE  = 1 << 5;
    }
}

/// Uniform thunk signature for bound virtual methods. Generated code threads
/// its runtime through the opaque context argument and adapts its own calling
/// convention behind the thunk.
pub type VirtualFn = fn(ctx: &dyn Any, recv: ObjRef) -> ObjRef;

/// Callback run exactly once on an object before its memory is reclaimed.
pub type Finalizer = fn(obj: &mut HeapObject);

/// One field record. Offsets are relative to the start of the instance
/// payload (the fixed header is not part of the payload).
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub field_type: TypeHandle,
    /// Full name of the descriptor that declared this field.
    pub declared_by: String,
}

impl FieldInfo {
    /// Reference-typed fields are the ones the collector traces.
    pub fn is_reference(&self) -> bool {
        !self.field_type.is_value_type()
    }
}

/// One method record. `slot` is the stable vtable index for virtual methods,
/// assigned when the descriptor is built and never reassigned.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub slot: Option<usize>,
}

type MethodMap = IndexMap<String, MethodInfo, ahash::RandomState>;

pub struct TypeDescriptor {
    pub name: String,
    pub namespace: String,
    pub full_name: String,
    /// Next ancestor, `None` only for the root type. Acyclic by construction:
    /// a base handle can only refer to an already-built descriptor.
    pub base: Option<TypeHandle>,
    /// Implemented interfaces, declaration order.
    pub interfaces: SmallVec<[TypeHandle; 4]>,
    /// Total instance size in bytes, header included.
    pub instance_size: usize,
    /// 0 unless this is an array type; then the per-element size, or
    /// [`REF_ELEMENT_SIZE`] for reference elements.
    pub element_size: usize,
    pub flags: TypeFlags,
    /// Declared fields, declaration order. Inherited fields live on the
    /// ancestors' tables; see [`TypeDescriptor::for_each_field`].
    pub fields: Vec<FieldInfo>,
    /// Name-keyed method table, declaration order preserved.
    pub methods: MethodMap,
    vtable: OnceLock<Box<[VirtualFn]>>,
    pub finalizer: Option<Finalizer>,
}

impl TypeDescriptor {
    pub fn builder(namespace: &str, name: &str) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder::new(namespace, name)
    }

    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }

    pub fn is_array(&self) -> bool {
        self.flags.contains(TypeFlags::ARRAY)
    }

    pub fn is_primitive(&self) -> bool {
        self.flags.contains(TypeFlags::PRIMITIVE)
    }

    /// Payload bytes of one instance, header excluded.
    pub fn value_size(&self) -> usize {
        self.instance_size.saturating_sub(HEADER_SIZE)
    }

    /// Visit every field of this type and its ancestors, most-derived first.
    pub fn for_each_field(&self, mut f: impl FnMut(&FieldInfo)) {
        let mut ty: Option<&TypeDescriptor> = Some(self);
        while let Some(t) = ty {
            for field in &t.fields {
                f(field);
            }
            ty = t.base.as_deref();
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.get(name)
    }

    /// Install the bound vtable. Succeeds at most once per descriptor;
    /// returns false if a vtable was already installed.
    pub fn install_vtable(&self, slots: Vec<VirtualFn>) -> bool {
        self.vtable.set(slots.into_boxed_slice()).is_ok()
    }

    pub fn vtable_len(&self) -> usize {
        self.vtable.get().map_or(0, |v| v.len())
    }

    /// Bound function for a stable slot number, if populated.
    pub fn virtual_slot(&self, slot: usize) -> Option<VirtualFn> {
        self.vtable.get().and_then(|v| v.get(slot).copied())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("full_name", &self.full_name)
            .field("instance_size", &self.instance_size)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

pub struct TypeDescriptorBuilder {
    name: String,
    namespace: String,
    base: Option<TypeHandle>,
    interfaces: SmallVec<[TypeHandle; 4]>,
    instance_size: usize,
    element_size: usize,
    flags: TypeFlags,
    fields: Vec<(String, usize, usize, TypeHandle)>,
    methods: Vec<(String, Option<usize>)>,
    finalizer: Option<Finalizer>,
}

impl TypeDescriptorBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            base: None,
            interfaces: SmallVec::new(),
            instance_size: HEADER_SIZE,
            element_size: 0,
            flags: TypeFlags::empty(),
            fields: Vec::new(),
            methods: Vec::new(),
            finalizer: None,
        }
    }

    pub fn base(mut self, base: &TypeHandle) -> Self {
        self.base = Some(base.clone());
        self
    }

    pub fn implements(mut self, iface: &TypeHandle) -> Self {
        self.interfaces.push(iface.clone());
        self
    }

    /// Total instance size, header included.
    pub fn instance_size(mut self, size: usize) -> Self {
        self.instance_size = size;
        self
    }

    pub fn element_size(mut self, size: usize) -> Self {
        self.element_size = size;
        self
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn field(mut self, name: &str, offset: usize, size: usize, field_type: &TypeHandle) -> Self {
        self.fields
            .push((name.to_string(), offset, size, field_type.clone()));
        self
    }

    /// Declare a method; `slot` fixes its vtable index for good.
    pub fn method(mut self, name: &str, slot: Option<usize>) -> Self {
        self.methods.push((name.to_string(), slot));
        self
    }

    pub fn finalizer(mut self, f: Finalizer) -> Self {
        self.finalizer = Some(f);
        self
    }

    pub fn build(self) -> TypeHandle {
        let full_name = if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        };
        let fields = self
            .fields
            .into_iter()
            .map(|(name, offset, size, field_type)| FieldInfo {
                name,
                offset,
                size,
                field_type,
                declared_by: full_name.clone(),
            })
            .collect();
        let mut methods: MethodMap = IndexMap::with_hasher(fast_hasher());
        for (name, slot) in self.methods {
            methods.insert(name.clone(), MethodInfo { name, slot });
        }
        Arc::new(TypeDescriptor {
            name: self.name,
            namespace: self.namespace,
            full_name,
            base: self.base,
            interfaces: self.interfaces,
            instance_size: self.instance_size,
            element_size: self.element_size,
            flags: self.flags,
            fields,
            methods,
            vtable: OnceLock::new(),
            finalizer: self.finalizer,
        })
    }
}
