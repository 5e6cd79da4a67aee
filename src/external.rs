//! External allocations (§4.1, §4.5): requests larger than `max_block_size`
//! bypass pools entirely and go straight to the OS allocator, the same way
//! the teacher's `SystemAllocator` wraps `std::alloc::System` directly.

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::ptr::NonNull;

use crate::config::TBMAN_ALIGN;
use crate::error::AllocError;

pub fn alloc_external(size: usize) -> Result<NonNull<u8>, AllocError> {
    let layout = AllocError::layout(size, TBMAN_ALIGN)?;
    let raw = unsafe { alloc(layout) };
    NonNull::new(raw).ok_or(AllocError::OutOfMemory(layout))
}

pub fn realloc_external(ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Result<NonNull<u8>, AllocError> {
    let old_layout = AllocError::layout(old_size, TBMAN_ALIGN)?;
    let raw = unsafe { realloc(ptr.as_ptr(), old_layout, new_size) };
    NonNull::new(raw).ok_or(AllocError::OutOfMemory(Layout::from_size_align(new_size, TBMAN_ALIGN).unwrap()))
}

pub fn free_external(ptr: NonNull<u8>, size: usize) {
    let layout = Layout::from_size_align(size, TBMAN_ALIGN).expect("previously-valid layout");
    unsafe { dealloc(ptr.as_ptr(), layout) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let ptr = alloc_external(1 << 20).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xAB, 1 << 20) };
        free_external(ptr, 1 << 20);
    }

    #[test]
    fn realloc_grows_and_preserves_prefix() {
        let ptr = alloc_external(64).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xCD, 64) };
        let grown = realloc_external(ptr, 64, 4096).unwrap();
        let prefix = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 64) };
        assert!(prefix.iter().all(|&b| b == 0xCD));
        free_external(grown, 4096);
    }
}
