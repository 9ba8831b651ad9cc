//! Heap lifecycle and allocation FFI: init, target selection, allocate,
//! free, reallocate, root slot, stats, cleanup, and the allocator callback
//! struct handed to host runtimes.
//!
//! One process-wide [`Redirector`] backs every function here. Allocation
//! functions take the heap handle returned by `fmalloc_init` and reselect
//! it as the target before each call, so a host that interleaves its own
//! allocations cannot leave the wrong target selected.
//!
//! Bindings that cannot hold the lock themselves go through
//! [`fmalloc_block_read`] and [`fmalloc_block_write`], which check the
//! handle and copy under one lock so a concurrent `fmalloc_cleanup` cannot
//! unmap the store mid-copy.

use std::ffi::{c_char, c_void};
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use fmalloc_core::HeapHandle;
use fmalloc_heap::{is_empty_sentinel, HeapStats, Redirector};
use fmalloc_store::StoreConfig;

use crate::path::path_arg;
use crate::status::FmStatus;

static HEAP: Mutex<Redirector> = Mutex::new(Redirector::new());

/// Heap occupancy, as reported by [`fmalloc_stats`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FmHeapStats {
    /// Store length in bytes.
    pub total_bytes: u64,
    /// Whole chunks in the store, header chunks included.
    pub chunk_count: u64,
    /// Chunks reserved for the header region.
    pub header_chunks: u64,
    /// Chunks in use, header chunks included.
    pub used_chunks: u64,
    /// Chunks still available.
    pub free_chunks: u64,
    /// Blocks allocated and not yet freed.
    pub live_blocks: u64,
    /// Requested bytes across live blocks.
    pub allocated_bytes: u64,
}

impl From<HeapStats> for FmHeapStats {
    fn from(s: HeapStats) -> Self {
        Self {
            total_bytes: s.total_bytes,
            chunk_count: s.chunk_count,
            header_chunks: s.header_chunks,
            used_chunks: s.used_chunks,
            free_chunks: s.free_chunks,
            live_blocks: s.live_blocks,
            allocated_bytes: s.allocated_bytes,
        }
    }
}

/// Host allocation callback: `size` bytes from the store named by
/// `allocator->data`, or null.
pub type FmAllocFn = extern "C" fn(allocator: *mut FmAllocator, size: usize) -> *mut c_void;

/// Host free callback: return `ptr` to the store named by `allocator->data`.
pub type FmFreeFn = extern "C" fn(allocator: *mut FmAllocator, ptr: *mut c_void);

/// Custom allocator record in the layout host runtimes expect: two
/// callbacks, a reserved word, and a context word carrying the heap handle.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FmAllocator {
    /// Allocation callback.
    pub mem_alloc: Option<FmAllocFn>,
    /// Free callback.
    pub mem_free: Option<FmFreeFn>,
    /// Reserved for the host; not touched by fmalloc.
    pub res: *mut c_void,
    /// Heap handle the callbacks allocate from.
    pub data: u64,
}

#[allow(unsafe_code)]
pub(crate) fn write_out<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: non-null output pointers are valid for writes per the
        // caller contract of every function using this helper.
        unsafe { out.write(value) };
    }
}

/// Open or create the store at `path` and make it the allocation target.
///
/// `size_bytes` is used only when the file does not exist; 0 selects the
/// default of 32 MiB. On success writes the heap handle to `handle_out` and
/// whether the header was freshly written to `fresh_out` (either may be
/// null).
///
/// If a store is already active, nothing is opened: the existing handle is
/// written, `fresh_out` gets 0, and `FmStatus::AlreadyInitialized` (1) is
/// returned.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_init(
    path: *const c_char,
    size_bytes: u64,
    handle_out: *mut u64,
    fresh_out: *mut u8,
) -> i32 {
    ffi_guard!({
        // SAFETY: path is null or a valid C string per caller contract.
        let path = match unsafe { path_arg(path) } {
            Ok(p) => p,
            Err(status) => return status as i32,
        };
        let mut config = StoreConfig::new(path);
        if size_bytes != 0 {
            config = config.with_size(size_bytes);
        }

        let mut heap = ffi_lock!(HEAP);
        let already = heap.is_active();
        match heap.init(&config) {
            Ok((handle, fresh)) => {
                write_out(handle_out, handle.as_u64());
                write_out(fresh_out, u8::from(fresh));
                if already {
                    FmStatus::AlreadyInitialized as i32
                } else {
                    FmStatus::Ok as i32
                }
            }
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Select `handle` as the allocation target.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_set_target(handle: u64) -> i32 {
    ffi_guard!({
        match ffi_lock!(HEAP).set_target(HeapHandle(handle)) {
            Ok(()) => FmStatus::Ok as i32,
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Write the handle of the active store to `handle_out`.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_active_handle(handle_out: *mut u64) -> i32 {
    ffi_guard!({
        if handle_out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        match ffi_lock!(HEAP).active_handle() {
            Some(h) => {
                write_out(handle_out, h.as_u64());
                FmStatus::Ok as i32
            }
            None => FmStatus::NotInitialized as i32,
        }
    })
}

/// Allocate `size` bytes from the store named by `handle`.
///
/// Returns null for zero-length requests (without entering the heap), for a
/// stale handle, and when the store is exhausted.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_alloc(handle: u64, size: usize) -> *mut c_void {
    ffi_guard_or!(ptr::null_mut(), {
        if size == 0 {
            return ptr::null_mut();
        }
        let mut heap = ffi_lock_or!(HEAP, ptr::null_mut());
        if heap.set_target(HeapHandle(handle)).is_err() {
            return ptr::null_mut();
        }
        match heap.allocate(size) {
            Ok(p) => p.as_ptr().cast::<c_void>(),
            Err(_) => ptr::null_mut(),
        }
    })
}

/// Like [`fmalloc_alloc`], with the block zero-filled before the heap lock
/// is released.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_alloc_zeroed(handle: u64, size: usize) -> *mut c_void {
    ffi_guard_or!(ptr::null_mut(), {
        if size == 0 {
            return ptr::null_mut();
        }
        let mut heap = ffi_lock_or!(HEAP, ptr::null_mut());
        if heap.set_target(HeapHandle(handle)).is_err() {
            return ptr::null_mut();
        }
        let Ok(p) = heap.allocate(size) else {
            return ptr::null_mut();
        };
        let zeroed = heap.heap_mut().is_some_and(|h| {
            h.offset_of(p.as_ptr())
                .and_then(|off| h.bytes_mut(off, size))
                .map(|b| b.fill(0))
                .is_ok()
        });
        if !zeroed {
            heap.free(p.as_ptr());
            return ptr::null_mut();
        }
        p.as_ptr().cast::<c_void>()
    })
}

/// Store offset of `len` bytes at `offset` into the live block `block` of
/// the store named by `handle`, after checking the range fits the block.
fn block_range(
    heap: &mut Redirector,
    handle: u64,
    block: *const c_void,
    offset: usize,
    len: usize,
) -> Result<u64, FmStatus> {
    heap.set_target(HeapHandle(handle))
        .map_err(|e| FmStatus::from(&e))?;
    let h = heap.heap().ok_or(FmStatus::NotInitialized)?;
    let ptr = NonNull::new(block.cast::<u8>().cast_mut()).ok_or(FmStatus::InvalidArgument)?;
    let usable = h.usable_size(ptr).map_err(|e| FmStatus::from(&e))?;
    if offset.checked_add(len).is_none_or(|end| end > usable) {
        return Err(FmStatus::OutOfBounds);
    }
    let base = h.offset_of(ptr.as_ptr()).map_err(|e| FmStatus::from(&e))?;
    Ok(base + offset as u64)
}

/// Copy `len` bytes starting `offset` bytes into the live block `block` of
/// the store named by `handle` into `buf`.
///
/// `NotInitialized` when the handle no longer names the active store,
/// `BadPointer` when `block` is not a live block, `OutOfBounds` when the
/// range runs past the block.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_block_read(
    handle: u64,
    block: *const c_void,
    offset: usize,
    buf: *mut c_void,
    len: usize,
) -> i32 {
    ffi_guard!({
        if buf.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        let mut heap = ffi_lock!(HEAP);
        let at = match block_range(&mut heap, handle, block, offset, len) {
            Ok(at) => at,
            Err(status) => return status as i32,
        };
        let Some(h) = heap.heap() else {
            return FmStatus::NotInitialized as i32;
        };
        match h.bytes(at, len) {
            Ok(src) => {
                // SAFETY: buf is valid for `len` bytes of writes per caller
                // contract and cannot overlap the store mapping's borrow.
                let dst = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len) };
                dst.copy_from_slice(src);
                FmStatus::Ok as i32
            }
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Copy `len` bytes from `buf` to `offset` bytes into the live block
/// `block` of the store named by `handle`. Statuses as for
/// [`fmalloc_block_read`].
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_block_write(
    handle: u64,
    block: *mut c_void,
    offset: usize,
    buf: *const c_void,
    len: usize,
) -> i32 {
    ffi_guard!({
        if buf.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        let mut heap = ffi_lock!(HEAP);
        let at = match block_range(&mut heap, handle, block, offset, len) {
            Ok(at) => at,
            Err(status) => return status as i32,
        };
        let Some(h) = heap.heap_mut() else {
            return FmStatus::NotInitialized as i32;
        };
        match h.bytes_mut(at, len) {
            Ok(dst) => {
                // SAFETY: buf is valid for `len` bytes of reads per caller
                // contract.
                let src = unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), len) };
                dst.copy_from_slice(src);
                FmStatus::Ok as i32
            }
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Return `ptr` to the store named by `handle`.
///
/// Never fails: null, a stale handle, or a pointer the heap does not
/// recognize are logged and ignored.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_free(handle: u64, ptr: *mut c_void) {
    ffi_guard_or!((), {
        if ptr.is_null() {
            return;
        }
        let mut heap = ffi_lock_or!(HEAP, ());
        if heap.set_target(HeapHandle(handle)).is_err() {
            tracing::warn!(handle, "free through inactive heap handle; ignored");
            return;
        }
        heap.free(ptr.cast::<u8>());
    })
}

/// Resize `ptr` within the store named by `handle`.
///
/// Null `ptr` allocates. `size` 0 frees `ptr` and returns null. On failure
/// returns null and leaves `ptr` untouched.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_realloc(handle: u64, ptr: *mut c_void, size: usize) -> *mut c_void {
    ffi_guard_or!(ptr::null_mut(), {
        let mut heap = ffi_lock_or!(HEAP, ptr::null_mut());
        if heap.set_target(HeapHandle(handle)).is_err() {
            return ptr::null_mut();
        }
        match heap.reallocate(ptr.cast::<u8>(), size) {
            Ok(p) if is_empty_sentinel(p.as_ptr()) => ptr::null_mut(),
            Ok(p) => p.as_ptr().cast::<c_void>(),
            Err(_) => ptr::null_mut(),
        }
    })
}

/// Fill `out` with the occupancy of the store named by `handle`.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_stats(handle: u64, out: *mut FmHeapStats) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        let mut heap = ffi_lock!(HEAP);
        if let Err(e) = heap.set_target(HeapHandle(handle)) {
            return FmStatus::from(&e) as i32;
        }
        match heap.stats() {
            Ok(stats) => {
                write_out(out, FmHeapStats::from(stats));
                FmStatus::Ok as i32
            }
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Write the persistent root offset of the store named by `handle` to
/// `out` (0 when unset).
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_root_get(handle: u64, out: *mut u64) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        let mut heap = ffi_lock!(HEAP);
        if let Err(e) = heap.set_target(HeapHandle(handle)) {
            return FmStatus::from(&e) as i32;
        }
        match heap.heap() {
            Some(h) => {
                write_out(out, h.root());
                FmStatus::Ok as i32
            }
            None => FmStatus::NotInitialized as i32,
        }
    })
}

/// Record `offset` as the persistent root of the store named by `handle`.
/// 0 clears it.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_root_set(handle: u64, offset: u64) -> i32 {
    ffi_guard!({
        let mut heap = ffi_lock!(HEAP);
        if let Err(e) = heap.set_target(HeapHandle(handle)) {
            return FmStatus::from(&e) as i32;
        }
        let Some(h) = heap.heap_mut() else {
            return FmStatus::NotInitialized as i32;
        };
        match h.set_root(offset) {
            Ok(()) => FmStatus::Ok as i32,
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Write the offset of `ptr` from the mapping base to `out`.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_offset_of(handle: u64, ptr: *const c_void, out: *mut u64) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        let mut heap = ffi_lock!(HEAP);
        if let Err(e) = heap.set_target(HeapHandle(handle)) {
            return FmStatus::from(&e) as i32;
        }
        let Some(h) = heap.heap() else {
            return FmStatus::NotInitialized as i32;
        };
        match h.offset_of(ptr.cast::<u8>()) {
            Ok(off) => {
                write_out(out, off);
                FmStatus::Ok as i32
            }
            Err(e) => FmStatus::from(&e) as i32,
        }
    })
}

/// Pointer to `offset` in the current mapping of the store named by
/// `handle`, or null.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_ptr_at(handle: u64, offset: u64) -> *mut c_void {
    ffi_guard_or!(ptr::null_mut(), {
        let mut heap = ffi_lock_or!(HEAP, ptr::null_mut());
        if heap.set_target(HeapHandle(handle)).is_err() {
            return ptr::null_mut();
        }
        match heap.heap_mut().map(|h| h.ptr_at(offset)) {
            Some(Ok(p)) => p.as_ptr().cast::<c_void>(),
            _ => ptr::null_mut(),
        }
    })
}

/// Unmap the active store. Pointers into it are invalid afterwards.
///
/// Returns `FmStatus::Ok` if a store was released, `NotInitialized` if none
/// was active.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_cleanup() -> i32 {
    ffi_guard!({
        if ffi_lock!(HEAP).cleanup() {
            FmStatus::Ok as i32
        } else {
            FmStatus::NotInitialized as i32
        }
    })
}

/// [`FmAllocFn`] implementation: allocates from the heap named by
/// `allocator->data`. Zero-length requests return null without entering
/// the heap.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_host_alloc(allocator: *mut FmAllocator, size: usize) -> *mut c_void {
    if allocator.is_null() || size == 0 {
        return ptr::null_mut();
    }
    // SAFETY: allocator points to a record filled by `fmalloc_allocator`.
    let handle = unsafe { (*allocator).data };
    fmalloc_alloc(handle, size)
}

/// [`FmFreeFn`] implementation: frees into the heap named by
/// `allocator->data`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_host_free(allocator: *mut FmAllocator, ptr: *mut c_void) {
    if allocator.is_null() {
        return;
    }
    // SAFETY: allocator points to a record filled by `fmalloc_allocator`.
    let handle = unsafe { (*allocator).data };
    fmalloc_free(handle, ptr);
}

/// Fill `out` with the host allocator record for `handle`.
///
/// The record's callbacks reselect `handle` on every call; it stays usable
/// until the store is cleaned up.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_allocator(handle: u64, out: *mut FmAllocator) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        if ffi_lock!(HEAP).active_handle() != Some(HeapHandle(handle)) {
            return FmStatus::NotInitialized as i32;
        }
        write_out(
            out,
            FmAllocator {
                mem_alloc: Some(fmalloc_host_alloc),
                mem_free: Some(fmalloc_host_free),
                res: ptr::null_mut(),
                data: handle,
            },
        );
        FmStatus::Ok as i32
    })
}
