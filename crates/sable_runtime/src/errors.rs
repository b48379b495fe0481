//! Canonical exception message texts used throughout the runtime.

pub mod messages {
    pub const NULL_REFERENCE: &str = "Object reference not set to an instance of an object.";
    pub const INVALID_CAST: &str = "Specified cast is not valid.";
    pub const INDEX_OUT_OF_RANGE: &str = "Index was outside the bounds of the array.";
    pub const OUT_OF_MEMORY: &str =
        "Insufficient memory to continue the execution of the program.";
}
