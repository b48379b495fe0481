//! Shared type fixtures for the integration tests.

#![allow(dead_code)]

use sable_runtime::{HEADER_SIZE, Runtime, TypeDescriptor, TypeFlags, TypeHandle};

/// Payload offset of `Animal.age` (Int32).
pub const AGE_OFFSET: usize = 0;
/// Payload offset of `Animal.friend` (object reference).
pub const FRIEND_OFFSET: usize = 8;

pub struct Zoo {
    pub runnable: TypeHandle,
    pub animal: TypeHandle,
    pub dog: TypeHandle,
    pub cat: TypeHandle,
}

/// A small hierarchy: Animal (age + friend fields) under Object, Dog and Cat
/// under Animal, Dog implementing IRunnable.
pub fn install_zoo(rt: &Runtime) -> Zoo {
    let wk = rt.well_known();
    let runnable = TypeDescriptor::builder("Zoo", "IRunnable")
        .flags(TypeFlags::INTERFACE | TypeFlags::ABSTRACT)
        .build();
    let animal = TypeDescriptor::builder("Zoo", "Animal")
        .base(&wk.object)
        .instance_size(HEADER_SIZE + 16)
        .field("age", AGE_OFFSET, 4, &wk.int32)
        .field("friend", FRIEND_OFFSET, 8, &wk.object)
        .build();
    let dog = TypeDescriptor::builder("Zoo", "Dog")
        .base(&animal)
        .implements(&runnable)
        .instance_size(HEADER_SIZE + 16)
        .build();
    let cat = TypeDescriptor::builder("Zoo", "Cat")
        .base(&animal)
        .instance_size(HEADER_SIZE + 16)
        .build();
    for ty in [&runnable, &animal, &dog, &cat] {
        rt.register_type(ty.clone());
    }
    Zoo {
        runnable,
        animal,
        dog,
        cat,
    }
}
