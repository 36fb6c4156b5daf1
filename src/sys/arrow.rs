#![allow(unsafe_code)]

//! Arrow C Data Interface descriptor layout.
//!
//! These mirror `struct ArrowSchema` and `struct ArrowArray` from the columnar
//! format's C ABI. Whoever receives a populated descriptor owns it and must call
//! its `release` callback exactly once; a descriptor whose `release` is `None`
//! has already been released (or was never populated).

use std::ffi::{c_char, c_void};
use std::ptr;

/// Field may contain nulls.
pub const ARROW_FLAG_NULLABLE: i64 = 2;

/// Schema descriptor.
#[repr(C)]
#[derive(Debug)]
pub struct ArrowSchema {
    /// NUL-terminated format string (`"l"`, `"u"`, `"+s"`, ...).
    pub format: *const c_char,
    /// NUL-terminated field name; may be null.
    pub name: *const c_char,
    /// Binary metadata blob; may be null.
    pub metadata: *const c_char,
    /// `ARROW_FLAG_*` bits.
    pub flags: i64,
    /// Number of child schemas.
    pub n_children: i64,
    /// Child schema pointers.
    pub children: *mut *mut ArrowSchema,
    /// Dictionary schema for dictionary-encoded fields.
    pub dictionary: *mut ArrowSchema,
    /// Producer-supplied release callback.
    pub release: Option<unsafe extern "C" fn(*mut ArrowSchema)>,
    /// Producer-private state.
    pub private_data: *mut c_void,
}

/// Array descriptor.
#[repr(C)]
#[derive(Debug)]
pub struct ArrowArray {
    /// Logical length.
    pub length: i64,
    /// Number of null entries, or `-1` when unknown.
    pub null_count: i64,
    /// Logical offset into the buffers.
    pub offset: i64,
    /// Number of entries in `buffers`.
    pub n_buffers: i64,
    /// Number of child arrays.
    pub n_children: i64,
    /// Buffer pointers; entries may be null (e.g. an absent validity bitmap).
    pub buffers: *mut *const c_void,
    /// Child array pointers.
    pub children: *mut *mut ArrowArray,
    /// Dictionary array for dictionary-encoded data.
    pub dictionary: *mut ArrowArray,
    /// Producer-supplied release callback.
    pub release: Option<unsafe extern "C" fn(*mut ArrowArray)>,
    /// Producer-private state.
    pub private_data: *mut c_void,
}

impl ArrowSchema {
    /// A released (all-null) descriptor, ready to be written by a producer.
    pub const fn empty() -> Self {
        Self {
            format: ptr::null(),
            name: ptr::null(),
            metadata: ptr::null(),
            flags: 0,
            n_children: 0,
            children: ptr::null_mut(),
            dictionary: ptr::null_mut(),
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    /// Whether the descriptor has been released.
    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl ArrowArray {
    /// A released (all-null) descriptor, ready to be written by a producer.
    pub const fn empty() -> Self {
        Self {
            length: 0,
            null_count: 0,
            offset: 0,
            n_buffers: 0,
            n_children: 0,
            buffers: ptr::null_mut(),
            children: ptr::null_mut(),
            dictionary: ptr::null_mut(),
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    /// Whether the descriptor has been released.
    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

fn callback_addr<T>(callback: Option<unsafe extern "C" fn(*mut T)>) -> usize {
    callback.map_or(0, |f| f as usize)
}

// Structural, field-by-field comparison. Used for diagnostics and tests only.
impl PartialEq for ArrowSchema {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.format, other.format)
            && ptr::eq(self.name, other.name)
            && ptr::eq(self.metadata, other.metadata)
            && self.flags == other.flags
            && self.n_children == other.n_children
            && ptr::eq(self.children, other.children)
            && ptr::eq(self.dictionary, other.dictionary)
            && callback_addr(self.release) == callback_addr(other.release)
            && ptr::eq(self.private_data, other.private_data)
    }
}

impl PartialEq for ArrowArray {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length
            && self.null_count == other.null_count
            && self.offset == other.offset
            && self.n_buffers == other.n_buffers
            && self.n_children == other.n_children
            && ptr::eq(self.buffers, other.buffers)
            && ptr::eq(self.children, other.children)
            && ptr::eq(self.dictionary, other.dictionary)
            && callback_addr(self.release) == callback_addr(other.release)
            && ptr::eq(self.private_data, other.private_data)
    }
}
