//! Heap ownership and the precise mark-sweep collector.
//!
//! The heap is a slot vector with a free list and a word-packed mark bitmap.
//! Marking is precise: reference fields are discovered through the descriptor
//! field tables, array elements through the stamped element type, exception
//! inner references through the exception payload. The collector never moves
//! objects.

use std::time::Duration;

use sable_core::{
    ExceptionData, HEADER_SIZE, HeapObject, ObjRef, ObjectBody, REF_ELEMENT_SIZE, TypeHandle,
    ValueBits,
};

/// Hook called on every reference-field write. Reserved for incremental or
/// generational designs; the non-moving collector needs no action, but call
/// sites must stay in place.
#[inline]
pub fn write_barrier(_holder: ObjRef, _value: ObjRef) {}

#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Byte threshold that triggers an opportunistic collection on
    /// allocation. Grows adaptively after each sweep.
    pub initial_threshold_bytes: usize,
    /// Hard ceiling. An allocation that would cross it after a retry
    /// collection fails for that request.
    pub max_heap_bytes: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold_bytes: 12 * 1024 * 1024,
            max_heap_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub total_allocated: usize,
    pub total_freed: usize,
    pub live_bytes: usize,
    pub collection_count: usize,
    pub total_pause_ms: f64,
}

/// Per-element payload size for an array of `elem`.
pub(crate) fn element_stride(elem: &TypeHandle) -> usize {
    if elem.is_value_type() {
        elem.value_size().max(1)
    } else {
        REF_ELEMENT_SIZE
    }
}

pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free_list: Vec<usize>,
    marks: Vec<u64>,
    /// Live estimate plus bytes allocated since the last sweep.
    alloc_bytes: usize,
    threshold_bytes: usize,
    config: GcConfig,
    total_allocated: usize,
    total_freed: usize,
    collection_count: usize,
    total_pause_ms: f64,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Self {
            objects: Vec::with_capacity(1024),
            free_list: Vec::new(),
            marks: Vec::new(),
            alloc_bytes: 0,
            threshold_bytes: config.initial_threshold_bytes,
            config,
            total_allocated: 0,
            total_freed: 0,
            collection_count: 0,
            total_pause_ms: 0.0,
        }
    }

    fn insert(&mut self, obj: HeapObject) -> ObjRef {
        let size = obj.size();
        self.alloc_bytes += size;
        self.total_allocated += size;
        if let Some(index) = self.free_list.pop() {
            self.objects[index] = Some(obj);
            ObjRef::from_index(index)
        } else {
            let index = self.objects.len();
            self.objects.push(Some(obj));
            ObjRef::from_index(index)
        }
    }

    fn fits(&self, size: usize) -> bool {
        self.alloc_bytes + size <= self.config.max_heap_bytes
    }

    /// Zero-initialized, type-tagged allocation of `size` bytes (header
    /// included). Returns `None` on exhaustion; the caller decides whether to
    /// collect and retry.
    pub(crate) fn try_alloc(&mut self, size: usize, ty: &TypeHandle) -> Option<ObjRef> {
        assert!(size >= HEADER_SIZE, "allocation smaller than object header");
        if !self.fits(size) {
            return None;
        }
        let payload = vec![0u8; size - HEADER_SIZE].into_boxed_slice();
        Some(self.insert(HeapObject {
            ty: ty.clone(),
            sync: 0,
            body: ObjectBody::Instance(payload),
        }))
    }

    /// Array allocation: header + per-element-or-reference size x length,
    /// element type and length stamped into the body.
    pub(crate) fn try_alloc_array(
        &mut self,
        ty: &TypeHandle,
        elem: &TypeHandle,
        len: usize,
    ) -> Option<ObjRef> {
        let stride = element_stride(elem);
        let bytes = stride.checked_mul(len)?;
        let size = bytes.checked_add(HEADER_SIZE)?;
        if !self.fits(size) {
            return None;
        }
        let data = vec![0u8; bytes].into_boxed_slice();
        Some(self.insert(HeapObject {
            ty: ty.clone(),
            sync: 0,
            body: ObjectBody::Array {
                elem: elem.clone(),
                len,
                data,
            },
        }))
    }

    pub(crate) fn try_alloc_exception(
        &mut self,
        ty: &TypeHandle,
        message: String,
        inner: ObjRef,
    ) -> Option<ObjRef> {
        let obj = HeapObject {
            ty: ty.clone(),
            sync: 0,
            body: ObjectBody::Exception(Box::new(ExceptionData {
                message,
                inner,
                stack_trace: String::new(),
            })),
        };
        if !self.fits(obj.size()) {
            return None;
        }
        Some(self.insert(obj))
    }

    pub fn lookup(&self, r: ObjRef) -> Option<&HeapObject> {
        r.index()
            .and_then(|i| self.objects.get(i))
            .and_then(|slot| slot.as_ref())
    }

    pub fn lookup_mut(&mut self, r: ObjRef) -> Option<&mut HeapObject> {
        r.index()
            .and_then(|i| self.objects.get_mut(i))
            .and_then(|slot| slot.as_mut())
    }

    pub fn get(&self, r: ObjRef) -> &HeapObject {
        self.lookup(r)
            .expect("object was reclaimed or handle is null")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        self.lookup_mut(r)
            .expect("object was reclaimed or handle is null")
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.lookup(r).is_some()
    }

    pub fn type_of(&self, r: ObjRef) -> Option<TypeHandle> {
        self.lookup(r).map(|obj| obj.ty.clone())
    }

    // ----- instance field access -----

    fn instance_data(&self, r: ObjRef) -> &[u8] {
        match &self.get(r).body {
            ObjectBody::Instance(data) => data,
            _ => panic!("not an instance object"),
        }
    }

    fn instance_data_mut(&mut self, r: ObjRef) -> &mut [u8] {
        match &mut self.get_mut(r).body {
            ObjectBody::Instance(data) => data,
            _ => panic!("not an instance object"),
        }
    }

    pub fn read_value<T: ValueBits>(&self, r: ObjRef, offset: usize) -> T {
        T::read_bits(&self.instance_data(r)[offset..])
    }

    pub fn write_value<T: ValueBits>(&mut self, r: ObjRef, offset: usize, value: T) {
        value.write_bits(&mut self.instance_data_mut(r)[offset..]);
    }

    pub fn read_ref(&self, r: ObjRef, offset: usize) -> ObjRef {
        ObjRef::from_bits(u64::read_bits(&self.instance_data(r)[offset..]))
    }

    pub fn write_ref(&mut self, holder: ObjRef, offset: usize, value: ObjRef) {
        write_barrier(holder, value);
        value
            .to_bits()
            .write_bits(&mut self.instance_data_mut(holder)[offset..]);
    }

    // ----- array access -----

    pub fn array_len(&self, r: ObjRef) -> usize {
        match &self.get(r).body {
            ObjectBody::Array { len, .. } => *len,
            _ => panic!("not an array object"),
        }
    }

    pub fn array_elem_type(&self, r: ObjRef) -> TypeHandle {
        match &self.get(r).body {
            ObjectBody::Array { elem, .. } => elem.clone(),
            _ => panic!("not an array object"),
        }
    }

    pub fn array_read<T: ValueBits>(&self, r: ObjRef, index: usize) -> Option<T> {
        match &self.get(r).body {
            ObjectBody::Array { elem, len, data } => {
                if index >= *len {
                    return None;
                }
                let at = index * element_stride(elem);
                Some(T::read_bits(&data[at..]))
            }
            _ => panic!("not an array object"),
        }
    }

    pub fn array_write<T: ValueBits>(&mut self, r: ObjRef, index: usize, value: T) -> bool {
        match &mut self.get_mut(r).body {
            ObjectBody::Array { elem, len, data } => {
                if index >= *len {
                    return false;
                }
                let at = index * element_stride(elem);
                value.write_bits(&mut data[at..]);
                true
            }
            _ => panic!("not an array object"),
        }
    }

    pub fn array_read_ref(&self, r: ObjRef, index: usize) -> Option<ObjRef> {
        self.array_read::<u64>(r, index).map(ObjRef::from_bits)
    }

    pub fn array_write_ref(&mut self, r: ObjRef, index: usize, value: ObjRef) -> bool {
        write_barrier(r, value);
        self.array_write(r, index, value.to_bits())
    }

    // ----- exception payload access -----

    pub(crate) fn exception_data(&self, r: ObjRef) -> Option<&ExceptionData> {
        match &self.lookup(r)?.body {
            ObjectBody::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn exception_data_mut(&mut self, r: ObjRef) -> Option<&mut ExceptionData> {
        match &mut self.lookup_mut(r)?.body {
            ObjectBody::Exception(e) => Some(e),
            _ => None,
        }
    }

    // ----- mark phase -----

    pub(crate) fn clear_marks(&mut self) {
        self.marks.clear();
    }

    fn is_marked_index(&self, index: usize) -> bool {
        let word = index >> 6;
        let bit = index & 63;
        self.marks.get(word).is_some_and(|w| (w & (1 << bit)) != 0)
    }

    fn set_mark(&mut self, index: usize) -> bool {
        let word = index >> 6;
        let bit = index & 63;
        if word >= self.marks.len() {
            self.marks.resize(word + 1, 0);
        }
        let w = &mut self.marks[word];
        let mask = 1u64 << bit;
        if (*w & mask) != 0 {
            return false;
        }
        *w |= mask;
        true
    }

    /// Mark everything reachable from `root` by following reference-typed
    /// fields per the descriptor tables.
    pub(crate) fn mark_from(&mut self, root: ObjRef) {
        let mut pending = vec![root];
        while let Some(r) = pending.pop() {
            let Some(index) = r.index() else { continue };
            if index >= self.objects.len() {
                continue;
            }
            if !self.set_mark(index) {
                continue;
            }
            let Some(obj) = self.objects[index].as_ref() else {
                continue;
            };
            match &obj.body {
                ObjectBody::Instance(data) => {
                    obj.ty.for_each_field(|field| {
                        if !field.is_reference() {
                            return;
                        }
                        if let Some(raw) = data.get(field.offset..field.offset + REF_ELEMENT_SIZE)
                        {
                            pending.push(ObjRef::from_bits(u64::read_bits(raw)));
                        }
                    });
                }
                ObjectBody::Array { elem, len, data } => {
                    if !elem.is_value_type() {
                        for i in 0..*len {
                            let at = i * REF_ELEMENT_SIZE;
                            if let Some(raw) = data.get(at..at + REF_ELEMENT_SIZE) {
                                pending.push(ObjRef::from_bits(u64::read_bits(raw)));
                            }
                        }
                    }
                }
                ObjectBody::Exception(e) => pending.push(e.inner),
            }
        }
    }

    // ----- sweep phase -----

    /// Reclaim every unmarked object, running its finalizer exactly once
    /// first. Returns the freed byte count. Clears marks for the next pass.
    pub(crate) fn sweep(&mut self) -> usize {
        self.free_list.clear();
        let mut live_bytes = 0usize;
        let mut freed_bytes = 0usize;
        for index in 0..self.objects.len() {
            if self.objects[index].is_none() {
                self.free_list.push(index);
                continue;
            }
            if self.is_marked_index(index) {
                if let Some(obj) = self.objects[index].as_ref() {
                    live_bytes += obj.size();
                }
                continue;
            }
            if let Some(mut obj) = self.objects[index].take() {
                freed_bytes += obj.size();
                run_finalizer(&mut obj);
                self.free_list.push(index);
            }
        }
        self.marks.clear();
        self.alloc_bytes = live_bytes;
        self.total_freed += freed_bytes;

        // Adaptive growth: small heaps double, large heaps grow slower to
        // keep pause times bounded.
        let growth = if live_bytes > 10 * 1024 * 1024 { 1.5 } else { 2.0 };
        self.threshold_bytes = ((live_bytes as f64 * growth) as usize)
            .max(self.config.initial_threshold_bytes);

        freed_bytes
    }

    pub(crate) fn should_collect(&self, incoming: usize) -> bool {
        self.alloc_bytes + incoming > self.threshold_bytes
    }

    pub(crate) fn note_collection(&mut self, pause: Duration) {
        self.collection_count += 1;
        self.total_pause_ms += pause.as_secs_f64() * 1_000.0;
    }

    /// Reclaim every remaining object regardless of reachability, running
    /// remaining finalizers. Shutdown path only.
    pub(crate) fn drain_all(&mut self) -> usize {
        let mut freed_bytes = 0usize;
        for slot in &mut self.objects {
            if let Some(mut obj) = slot.take() {
                freed_bytes += obj.size();
                run_finalizer(&mut obj);
            }
        }
        self.objects.clear();
        self.free_list.clear();
        self.marks.clear();
        self.alloc_bytes = 0;
        self.total_freed += freed_bytes;
        freed_bytes
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            total_allocated: self.total_allocated,
            total_freed: self.total_freed,
            live_bytes: self.alloc_bytes,
            collection_count: self.collection_count,
            total_pause_ms: self.total_pause_ms,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

fn run_finalizer(obj: &mut HeapObject) {
    let Some(finalize) = obj.ty.finalizer else {
        return;
    };
    // A failing finalizer must never escape into the collector's control
    // flow.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| finalize(obj)));
    if result.is_err() {
        eprintln!("finalizer panicked for {}", obj.ty.full_name);
    }
}
