//! Subtype, assignability, and dispatch relations over type descriptors.
//!
//! All relations are null-tolerant: an absent descriptor makes the relation
//! false, never a fault. Descriptor identity is `Arc::ptr_eq`.

use std::sync::Arc;

use crate::descriptor::{TypeHandle, VirtualFn};

fn same(a: &TypeHandle, b: &TypeHandle) -> bool {
    Arc::ptr_eq(a, b)
}

/// True iff `ancestor` is strictly above `ty` on `ty`'s base-type chain.
/// A type is never a strict subclass of itself. O(hierarchy depth).
pub fn is_subclass_of(ty: Option<&TypeHandle>, ancestor: Option<&TypeHandle>) -> bool {
    let (Some(ty), Some(ancestor)) = (ty, ancestor) else {
        return false;
    };
    let mut cur = ty.base.as_ref();
    while let Some(base) = cur {
        if same(base, ancestor) {
            return true;
        }
        cur = base.base.as_ref();
    }
    false
}

/// True iff a `source` reference may be bound to a `target`-typed location:
/// identity, `target` on `source`'s base chain, or `target` an interface
/// listed by `source` or any of its ancestors. Governs reference-conversion
/// legality and exception catch-clause matching.
pub fn is_assignable_from(target: Option<&TypeHandle>, source: Option<&TypeHandle>) -> bool {
    let (Some(target), Some(source)) = (target, source) else {
        return false;
    };
    if same(target, source) {
        return true;
    }
    if is_subclass_of(Some(source), Some(target)) {
        return true;
    }
    if target.is_interface() {
        let mut cur = Some(source);
        while let Some(ty) = cur {
            if implements_interface(Some(ty), Some(target)) {
                return true;
            }
            cur = ty.base.as_ref();
        }
    }
    false
}

/// True iff `iface` appears in `ty`'s own interface list. Callers walk the
/// base chain themselves for inherited interfaces.
pub fn implements_interface(ty: Option<&TypeHandle>, iface: Option<&TypeHandle>) -> bool {
    let (Some(ty), Some(iface)) = (ty, iface) else {
        return false;
    };
    ty.interfaces.iter().any(|i| same(i, iface))
}

/// Bound virtual method for a stable slot number, if the slot is populated.
pub fn resolve_virtual(ty: Option<&TypeHandle>, slot: usize) -> Option<VirtualFn> {
    ty.and_then(|t| t.virtual_slot(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TypeDescriptor, TypeFlags};

    #[test]
    fn absent_descriptors_make_relations_false() {
        let object = TypeDescriptor::builder("Sable", "Object").build();
        assert!(!is_subclass_of(None, Some(&object)));
        assert!(!is_subclass_of(Some(&object), None));
        assert!(!is_assignable_from(None, None));
        assert!(!implements_interface(Some(&object), None));
    }

    #[test]
    fn subclass_is_strict() {
        let object = TypeDescriptor::builder("Sable", "Object").build();
        let animal = TypeDescriptor::builder("Tests", "Animal")
            .base(&object)
            .build();
        assert!(is_subclass_of(Some(&animal), Some(&object)));
        assert!(!is_subclass_of(Some(&animal), Some(&animal)));
        assert!(!is_subclass_of(Some(&object), Some(&animal)));
    }

    #[test]
    fn interface_assignability_walks_the_base_chain() {
        let object = TypeDescriptor::builder("Sable", "Object").build();
        let runnable = TypeDescriptor::builder("Tests", "IRunnable")
            .flags(TypeFlags::INTERFACE)
            .build();
        let animal = TypeDescriptor::builder("Tests", "Animal")
            .base(&object)
            .implements(&runnable)
            .build();
        let dog = TypeDescriptor::builder("Tests", "Dog").base(&animal).build();

        // Dog lists nothing itself; the interface comes from Animal.
        assert!(!implements_interface(Some(&dog), Some(&runnable)));
        assert!(is_assignable_from(Some(&runnable), Some(&dog)));
    }
}
