//! Collector-managed object representation.
//!
//! Every allocation starts with the same fixed header: a type descriptor
//! reference and a synchronization word. The synchronization word is owned by
//! the lock-based mutual-exclusion collaborator; this core only zeroes it.

use std::fmt;

use crate::descriptor::TypeHandle;

/// Fixed object header size in bytes (type word + synchronization word,
/// padded to pointer alignment). Instance sizes include it; field offsets in
/// the descriptor tables do not.
pub const HEADER_SIZE: usize = 16;

/// Nullable handle to a heap object. The null handle is all-zero bits, so a
/// zero-initialized payload reads back as null references.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u64);

impl ObjRef {
    pub const NULL: ObjRef = ObjRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_index(index: usize) -> ObjRef {
        ObjRef(index as u64 + 1)
    }

    /// Heap slot index, or `None` for the null handle.
    pub fn index(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some((self.0 - 1) as usize)
        }
    }

    /// Raw bits as stored in reference fields and array elements.
    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> ObjRef {
        ObjRef(bits)
    }
}

impl Default for ObjRef {
    fn default() -> Self {
        ObjRef::NULL
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(i) => write!(f, "ObjRef(#{i})"),
            None => write!(f, "ObjRef(null)"),
        }
    }
}

/// Any collector-managed allocation: fixed header plus a body.
pub struct HeapObject {
    pub ty: TypeHandle,
    /// Synchronization word; zeroed at allocation, otherwise untouched here.
    pub sync: u32,
    pub body: ObjectBody,
}

pub enum ObjectBody {
    /// Zero-initialized field payload; descriptor offsets index into it.
    /// Reference fields hold [`ObjRef`] bits, little-endian.
    Instance(Box<[u8]>),
    /// Element type and length stamped at allocation; zeroed element payload.
    Array {
        elem: TypeHandle,
        len: usize,
        data: Box<[u8]>,
    },
    Exception(Box<ExceptionData>),
}

pub struct ExceptionData {
    pub message: String,
    /// Referenced, not owned: reclaimed independently once unreachable.
    pub inner: ObjRef,
    /// Captured once at the original throw; never overwritten by rethrow.
    pub stack_trace: String,
}

impl HeapObject {
    /// Estimated footprint in bytes, used for allocation statistics and
    /// collection thresholds.
    pub fn size(&self) -> usize {
        let deep = match &self.body {
            ObjectBody::Instance(data) => data.len(),
            ObjectBody::Array { data, .. } => data.len(),
            ObjectBody::Exception(e) => {
                e.message.len() + e.stack_trace.len() + 64 // Exception overhead
            }
        };
        HEADER_SIZE + deep
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ObjectBody::Instance(data) => {
                write!(f, "Instance({}, {} bytes)", self.ty.full_name, data.len())
            }
            ObjectBody::Array { elem, len, .. } => {
                write!(f, "Array({}[], len={len})", elem.full_name)
            }
            ObjectBody::Exception(e) => {
                write!(f, "Exception({}, {:?})", self.ty.full_name, e.message)
            }
        }
    }
}
