//! Runtime lifecycle and the public allocation / access surface.
//!
//! Lock discipline: the heap lock may be taken while holding nothing, and the
//! collector takes roots and thread-record locks underneath it. No path takes
//! the heap lock while already holding a thread-record lock.

use std::time::Instant;

use parking_lot::Mutex;
use smallvec::SmallVec;

use sable_core::{
    FastHashMap, HEADER_SIZE, ObjRef, TypeDescriptor, TypeFlags, TypeHandle, TypeRegistry,
    ValueBits, fast_map_new, resolve_virtual,
};

use crate::errors::messages;
use crate::exceptions::Control;
use crate::heap::{GcConfig, GcStats, Heap, element_stride};
use crate::roots::{RootSet, RootSlot};
use crate::threads::SharedThreadRecord;

/// Descriptors every linked image depends on, created before any user type.
#[derive(Clone)]
pub struct WellKnown {
    pub object: TypeHandle,
    pub exception: TypeHandle,
    pub null_reference: TypeHandle,
    pub invalid_cast: TypeHandle,
    pub index_out_of_range: TypeHandle,
    pub out_of_memory: TypeHandle,
    pub boolean: TypeHandle,
    pub int32: TypeHandle,
    pub int64: TypeHandle,
    pub float64: TypeHandle,
}

impl WellKnown {
    fn build(types: &mut TypeRegistry) -> Self {
        let object = TypeDescriptor::builder("Sable", "Object").build();
        let exception = TypeDescriptor::builder("Sable", "Exception")
            .base(&object)
            .build();
        let derived_exception = |name: &str| {
            TypeDescriptor::builder("Sable", name)
                .base(&exception)
                .build()
        };
        let null_reference = derived_exception("NullReferenceException");
        let invalid_cast = derived_exception("InvalidCastException");
        let index_out_of_range = derived_exception("IndexOutOfRangeException");
        let out_of_memory = derived_exception("OutOfMemoryException");

        let primitive = |name: &str, size: usize| {
            TypeDescriptor::builder("Sable", name)
                .base(&object)
                .instance_size(HEADER_SIZE + size)
                .flags(TypeFlags::VALUE_TYPE | TypeFlags::PRIMITIVE | TypeFlags::SEALED)
                .build()
        };
        let boolean = primitive("Boolean", 1);
        let int32 = primitive("Int32", 4);
        let int64 = primitive("Int64", 8);
        let float64 = primitive("Float64", 8);

        let wk = Self {
            object,
            exception,
            null_reference,
            invalid_cast,
            index_out_of_range,
            out_of_memory,
            boolean,
            int32,
            int64,
            float64,
        };
        for ty in [
            &wk.object,
            &wk.exception,
            &wk.null_reference,
            &wk.invalid_cast,
            &wk.index_out_of_range,
            &wk.out_of_memory,
            &wk.boolean,
            &wk.int32,
            &wk.int64,
            &wk.float64,
        ] {
            types.register(ty.clone());
        }
        wk
    }
}

pub struct Runtime {
    pub(crate) heap: Mutex<Heap>,
    pub(crate) types: Mutex<TypeRegistry>,
    pub(crate) threads: Mutex<FastHashMap<std::thread::ThreadId, SharedThreadRecord>>,
    pub(crate) roots: Mutex<RootSet>,
    well_known: WellKnown,
    /// Pre-allocated, permanently rooted out-of-memory exception. Thrown when
    /// allocation fails after a retry collection, since that is exactly the
    /// moment a fresh exception cannot be allocated.
    oom: RootSlot,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        let mut types = TypeRegistry::new();
        let well_known = WellKnown::build(&mut types);

        let mut heap = Heap::new(config);
        let oom_ref = heap
            .try_alloc_exception(
                &well_known.out_of_memory,
                messages::OUT_OF_MEMORY.to_string(),
                ObjRef::NULL,
            )
            .expect("configured heap too small for the reserved exception");

        let oom = RootSlot::new(oom_ref);
        let mut roots = RootSet::new();
        roots.add(oom.clone());

        Self {
            heap: Mutex::new(heap),
            types: Mutex::new(types),
            threads: Mutex::new(fast_map_new()),
            roots: Mutex::new(roots),
            well_known,
            oom,
        }
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    pub(crate) fn oom_instance(&self) -> ObjRef {
        self.oom.get()
    }

    // ----- type registry -----

    pub fn register_type(&self, ty: TypeHandle) {
        self.types.lock().register(ty);
    }

    pub fn type_by_name(&self, full_name: &str) -> Option<TypeHandle> {
        self.types.lock().get(full_name)
    }

    /// Descriptor for `elem[]`, synthesized on first use and cached in the
    /// registry under `<elem full name>[]`.
    pub fn array_type_of(&self, elem: &TypeHandle) -> TypeHandle {
        let mut types = self.types.lock();
        let full_name = format!("{}[]", elem.full_name);
        if let Some(existing) = types.get(&full_name) {
            return existing;
        }
        let ty = TypeDescriptor::builder(&elem.namespace, &format!("{}[]", elem.name))
            .base(&self.well_known.object)
            .element_size(element_stride(elem))
            .flags(TypeFlags::ARRAY | TypeFlags::SEALED)
            .build();
        types.register(ty.clone());
        ty
    }

    // ----- allocation -----

    /// Opportunistic collect on threshold, then allocate, then one
    /// collect-and-retry before giving up.
    fn alloc_retry(
        &self,
        incoming: usize,
        attempt: impl Fn(&mut Heap) -> Option<ObjRef>,
    ) -> Option<ObjRef> {
        let mut heap = self.heap.lock();
        if heap.should_collect(incoming) {
            self.collect_locked(&mut heap);
        }
        if let Some(r) = attempt(&mut heap) {
            return Some(r);
        }
        self.collect_locked(&mut heap);
        attempt(&mut heap)
    }

    /// Zero-initialized instance of `ty`, tagged with its descriptor.
    pub fn alloc_object(&self, ty: &TypeHandle) -> Control<ObjRef> {
        debug_assert!(
            !ty.is_interface() && !ty.is_abstract() && !ty.is_array(),
            "cannot instantiate {}",
            ty.full_name
        );
        let allocated =
            self.alloc_retry(ty.instance_size, |heap| heap.try_alloc(ty.instance_size, ty));
        match allocated {
            Some(r) => Ok(r),
            None => Err(self.throw_out_of_memory()),
        }
    }

    pub fn alloc_array(&self, elem: &TypeHandle, len: usize) -> Control<ObjRef> {
        let ty = self.array_type_of(elem);
        let incoming = HEADER_SIZE + element_stride(elem).saturating_mul(len);
        let allocated = self.alloc_retry(incoming, |heap| heap.try_alloc_array(&ty, elem, len));
        match allocated {
            Some(r) => Ok(r),
            None => Err(self.throw_out_of_memory()),
        }
    }

    pub fn alloc_exception(
        &self,
        ty: &TypeHandle,
        message: &str,
        inner: ObjRef,
    ) -> Control<ObjRef> {
        let incoming = HEADER_SIZE + message.len() + 64;
        let allocated = self.alloc_retry(incoming, |heap| {
            heap.try_alloc_exception(ty, message.to_string(), inner)
        });
        match allocated {
            Some(r) => Ok(r),
            None => Err(self.throw_out_of_memory()),
        }
    }

    /// Infallible exception construction for the throw helpers: falls back to
    /// the reserved out-of-memory instance when the heap is exhausted.
    pub(crate) fn new_exception(&self, ty: &TypeHandle, message: &str) -> ObjRef {
        let incoming = HEADER_SIZE + message.len() + 64;
        self.alloc_retry(incoming, |heap| {
            heap.try_alloc_exception(ty, message.to_string(), ObjRef::NULL)
        })
        .unwrap_or_else(|| self.oom_instance())
    }

    // ----- collection -----

    /// Stop-the-world mark-sweep over registered roots, thread roots, and
    /// in-flight exceptions. Returns freed bytes.
    pub fn collect(&self) -> usize {
        let mut heap = self.heap.lock();
        self.collect_locked(&mut heap)
    }

    pub(crate) fn collect_locked(&self, heap: &mut Heap) -> usize {
        let start = Instant::now();
        heap.clear_marks();

        {
            let roots = self.roots.lock();
            for r in roots.iter() {
                heap.mark_from(r);
            }
        }

        let records: Vec<SharedThreadRecord> = self.threads.lock().values().cloned().collect();
        let mut reachable: SmallVec<[ObjRef; 16]> = SmallVec::new();
        for record in records {
            let rec = record.lock();
            reachable.extend(rec.roots.iter());
            for frame in &rec.frames {
                reachable.push(frame.in_flight);
            }
            reachable.push(rec.pending);
        }
        for r in reachable {
            heap.mark_from(r);
        }

        let freed = heap.sweep();
        heap.note_collection(start.elapsed());
        freed
    }

    pub fn add_root(&self, slot: RootSlot) {
        self.roots.lock().add(slot);
    }

    pub fn remove_root(&self, slot: &RootSlot) -> bool {
        self.roots.lock().remove(slot)
    }

    // ----- object access -----

    pub fn type_of(&self, obj: ObjRef) -> Option<TypeHandle> {
        self.heap.lock().type_of(obj)
    }

    pub fn read_value<T: ValueBits>(&self, obj: ObjRef, offset: usize) -> Control<T> {
        if obj.is_null() {
            return Err(self.throw_null_reference());
        }
        Ok(self.heap.lock().read_value(obj, offset))
    }

    pub fn write_value<T: ValueBits>(&self, obj: ObjRef, offset: usize, value: T) -> Control<()> {
        if obj.is_null() {
            return Err(self.throw_null_reference());
        }
        self.heap.lock().write_value(obj, offset, value);
        Ok(())
    }

    pub fn read_ref(&self, obj: ObjRef, offset: usize) -> Control<ObjRef> {
        if obj.is_null() {
            return Err(self.throw_null_reference());
        }
        Ok(self.heap.lock().read_ref(obj, offset))
    }

    pub fn write_ref(&self, obj: ObjRef, offset: usize, value: ObjRef) -> Control<()> {
        if obj.is_null() {
            return Err(self.throw_null_reference());
        }
        self.heap.lock().write_ref(obj, offset, value);
        Ok(())
    }

    // ----- array access -----

    pub fn array_length(&self, array: ObjRef) -> Control<usize> {
        if array.is_null() {
            return Err(self.throw_null_reference());
        }
        Ok(self.heap.lock().array_len(array))
    }

    pub fn array_get<T: ValueBits>(&self, array: ObjRef, index: usize) -> Control<T> {
        if array.is_null() {
            return Err(self.throw_null_reference());
        }
        let got = self.heap.lock().array_read(array, index);
        match got {
            Some(value) => Ok(value),
            None => Err(self.throw_index_out_of_range()),
        }
    }

    pub fn array_set<T: ValueBits>(&self, array: ObjRef, index: usize, value: T) -> Control<()> {
        if array.is_null() {
            return Err(self.throw_null_reference());
        }
        let ok = self.heap.lock().array_write(array, index, value);
        if ok {
            Ok(())
        } else {
            Err(self.throw_index_out_of_range())
        }
    }

    pub fn array_get_ref(&self, array: ObjRef, index: usize) -> Control<ObjRef> {
        if array.is_null() {
            return Err(self.throw_null_reference());
        }
        let got = self.heap.lock().array_read_ref(array, index);
        match got {
            Some(value) => Ok(value),
            None => Err(self.throw_index_out_of_range()),
        }
    }

    pub fn array_set_ref(&self, array: ObjRef, index: usize, value: ObjRef) -> Control<()> {
        if array.is_null() {
            return Err(self.throw_null_reference());
        }
        let ok = self.heap.lock().array_write_ref(array, index, value);
        if ok {
            Ok(())
        } else {
            Err(self.throw_index_out_of_range())
        }
    }

    // ----- dispatch -----

    /// Call the bound virtual method in `slot` on the dynamic type of `recv`.
    ///
    /// # Panics
    ///
    /// Panics when the slot has no bound function; vtables are installed by
    /// the linked image before any dispatch.
    pub fn invoke_virtual(&self, recv: ObjRef, slot: usize) -> Control<ObjRef> {
        if recv.is_null() {
            return Err(self.throw_null_reference());
        }
        let ty = self.type_of(recv);
        let thunk =
            resolve_virtual(ty.as_ref(), slot).expect("no bound virtual method for slot");
        Ok(thunk(self, recv))
    }

    // ----- exception object access -----

    pub fn exception_message(&self, exception: ObjRef) -> Option<String> {
        self.heap
            .lock()
            .exception_data(exception)
            .map(|d| d.message.clone())
    }

    pub fn exception_stack_trace(&self, exception: ObjRef) -> Option<String> {
        self.heap
            .lock()
            .exception_data(exception)
            .map(|d| d.stack_trace.clone())
    }

    pub fn exception_inner(&self, exception: ObjRef) -> ObjRef {
        self.heap
            .lock()
            .exception_data(exception)
            .map(|d| d.inner)
            .unwrap_or(ObjRef::NULL)
    }

    // ----- lifecycle -----

    pub fn stats(&self) -> GcStats {
        self.heap.lock().stats()
    }

    /// Final collection, then unconditional reclamation of every remaining
    /// object so outstanding finalizers run.
    pub fn shutdown(self) -> GcStats {
        let mut heap = self.heap.lock();
        self.collect_locked(&mut heap);
        heap.drain_all();
        let stats = heap.stats();
        drop(heap);
        stats
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
