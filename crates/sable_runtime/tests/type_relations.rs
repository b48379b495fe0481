//! Type registration, relations, array descriptors, and virtual dispatch
//! through the runtime surface.

mod common;

use std::any::Any;
use std::sync::Arc;

use sable_runtime::{
    ObjRef, Runtime, TypeDescriptor, is_assignable_from, is_subclass_of,
};

#[test]
fn well_known_types_are_registered() {
    let rt = Runtime::new();
    let object = rt.type_by_name("Sable.Object").expect("registered");
    assert!(Arc::ptr_eq(&object, &rt.well_known().object));
    let nre = rt
        .type_by_name("Sable.NullReferenceException")
        .expect("registered");
    assert!(is_subclass_of(Some(&nre), Some(&rt.well_known().exception)));
    assert!(is_subclass_of(Some(&nre), Some(&object)));
}

#[test]
fn registered_types_resolve_by_full_name_last_wins() {
    let rt = Runtime::new();
    let zoo = common::install_zoo(&rt);
    let found = rt.type_by_name("Zoo.Dog").expect("registered");
    assert!(Arc::ptr_eq(&found, &zoo.dog));

    let replacement = TypeDescriptor::builder("Zoo", "Dog")
        .base(&zoo.animal)
        .build();
    rt.register_type(replacement.clone());
    let found = rt.type_by_name("Zoo.Dog").expect("registered");
    assert!(Arc::ptr_eq(&found, &replacement));
}

#[test]
fn assignability_covers_bases_and_inherited_interfaces() {
    let rt = Runtime::new();
    let zoo = common::install_zoo(&rt);
    assert!(is_assignable_from(Some(&zoo.animal), Some(&zoo.dog)));
    assert!(is_assignable_from(Some(&zoo.runnable), Some(&zoo.dog)));
    assert!(!is_assignable_from(Some(&zoo.runnable), Some(&zoo.cat)));
    assert!(!is_assignable_from(Some(&zoo.dog), Some(&zoo.animal)));
}

#[test]
fn array_descriptors_are_synthesized_once_and_cached() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let ints = rt.array_type_of(&wk.int32);
    assert_eq!(ints.full_name, "Sable.Int32[]");
    assert!(ints.is_array());
    assert_eq!(ints.element_size, 4);

    let again = rt.array_type_of(&wk.int32);
    assert!(Arc::ptr_eq(&ints, &again));
    assert!(Arc::ptr_eq(
        &ints,
        &rt.type_by_name("Sable.Int32[]").expect("cached")
    ));

    let zoo = common::install_zoo(&rt);
    let cats = rt.array_type_of(&zoo.cat);
    assert_eq!(cats.full_name, "Zoo.Cat[]");
    assert_eq!(cats.element_size, 8);
}

fn identity_thunk(_ctx: &dyn Any, recv: ObjRef) -> ObjRef {
    recv
}

#[test]
fn virtual_dispatch_uses_the_dynamic_type() {
    let rt = Runtime::new();
    let zoo = common::install_zoo(&rt);
    assert!(zoo.dog.install_vtable(vec![identity_thunk]));
    // A second install is rejected.
    assert!(!zoo.dog.install_vtable(vec![identity_thunk]));
    assert_eq!(zoo.dog.vtable_len(), 1);

    let dog = rt.alloc_object(&zoo.dog).unwrap();
    assert_eq!(rt.invoke_virtual(dog, 0), Ok(dog));

    // Dispatch on null raises null-reference instead of calling anything.
    assert!(rt.invoke_virtual(ObjRef::NULL, 0).is_err());
    let pending = rt.take_pending();
    let ty = rt.type_of(pending).expect("exception object");
    assert!(Arc::ptr_eq(&ty, &rt.well_known().null_reference));
}
