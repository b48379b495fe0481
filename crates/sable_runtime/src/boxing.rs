//! Boxing, unboxing, and reference conversions.

use std::sync::Arc;

use sable_core::{ObjRef, ObjectBody, TypeHandle, ValueBits, is_assignable_from};

use crate::exceptions::Control;
use crate::runtime::Runtime;

impl Runtime {
    /// Copy `value` into a fresh heap instance of the boxed value type `ty`.
    pub fn box_value<T: ValueBits>(&self, ty: &TypeHandle, value: T) -> Control<ObjRef> {
        debug_assert!(ty.is_value_type(), "{} is not a value type", ty.full_name);
        debug_assert!(
            ty.value_size() >= T::SIZE,
            "{} payload too small for the boxed value",
            ty.full_name
        );
        let boxed = self.alloc_object(ty)?;
        self.heap.lock().write_value(boxed, 0, value);
        Ok(boxed)
    }

    /// Copy the payload out of a box. Exact type match only: unboxing a null
    /// reference raises null-reference, a box of any other type raises
    /// invalid-cast.
    pub fn unbox<T: ValueBits>(&self, obj: ObjRef, ty: &TypeHandle) -> Control<T> {
        self.check_box(obj, ty)?;
        Ok(self.heap.lock().read_value(obj, 0))
    }

    /// By-reference unbox: run `read` over the box payload in place. Same
    /// checks as [`Runtime::unbox`]. The callback runs under the heap lock
    /// and must not call back into the runtime.
    pub fn unbox_bytes<R>(
        &self,
        obj: ObjRef,
        ty: &TypeHandle,
        read: impl FnOnce(&[u8]) -> R,
    ) -> Control<R> {
        self.check_box(obj, ty)?;
        let size = ty.value_size();
        let heap = self.heap.lock();
        match &heap.get(obj).body {
            ObjectBody::Instance(data) => Ok(read(&data[..size])),
            _ => unreachable!("boxed value without an instance body"),
        }
    }

    /// Mutating form of [`Runtime::unbox_bytes`].
    pub fn unbox_bytes_mut<R>(
        &self,
        obj: ObjRef,
        ty: &TypeHandle,
        update: impl FnOnce(&mut [u8]) -> R,
    ) -> Control<R> {
        self.check_box(obj, ty)?;
        let size = ty.value_size();
        let mut heap = self.heap.lock();
        match &mut heap.get_mut(obj).body {
            ObjectBody::Instance(data) => Ok(update(&mut data[..size])),
            _ => unreachable!("boxed value without an instance body"),
        }
    }

    fn check_box(&self, obj: ObjRef, ty: &TypeHandle) -> Control<()> {
        if obj.is_null() {
            return Err(self.throw_null_reference());
        }
        let actual = self.type_of(obj);
        if !actual.as_ref().is_some_and(|t| Arc::ptr_eq(t, ty)) {
            return Err(self.throw_invalid_cast());
        }
        Ok(())
    }

    /// Checked reference conversion: null passes through unchanged, an
    /// incompatible type raises invalid-cast.
    pub fn cast(&self, obj: ObjRef, target: &TypeHandle) -> Control<ObjRef> {
        if obj.is_null() {
            return Ok(ObjRef::NULL);
        }
        let ty = self.type_of(obj);
        if is_assignable_from(Some(target), ty.as_ref()) {
            Ok(obj)
        } else {
            Err(self.throw_invalid_cast())
        }
    }

    /// Type-test conversion: yields the reference when compatible, null
    /// otherwise. Never throws.
    pub fn try_cast(&self, obj: ObjRef, target: &TypeHandle) -> ObjRef {
        if obj.is_null() {
            return ObjRef::NULL;
        }
        let ty = self.type_of(obj);
        if is_assignable_from(Some(target), ty.as_ref()) {
            obj
        } else {
            ObjRef::NULL
        }
    }
}
