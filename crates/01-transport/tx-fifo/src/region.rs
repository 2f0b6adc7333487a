//! Backing memory for the transmit ring.
//!
//! The ring wants one contiguous, aligned, zeroed block that lives for as long
//! as the FIFO does. Native builds ask for an anonymous `mmap` first so large
//! rings come straight from the page allocator; anything else (or a mapping
//! that happens to be misaligned) falls back to the global heap.

use crate::{FifoError, FifoResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

#[cfg(not(target_arch = "wasm32"))]
type NativeMap = memmap2::MmapMut;

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Native(NativeMap),
    Owned {
        ptr: NonNull<u8>,
        layout: Layout,
    },
}

impl Backing {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native(map) => map.as_mut_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native(map) => map.as_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }
}

/// Owned, aligned, zero-initialised byte block backing a ring.
#[derive(Debug)]
pub struct RingMemory {
    len: usize,
    alignment: usize,
    backing: Backing,
}

// SAFETY: `RingMemory` owns its allocation exclusively; access goes through
// `&self`/`&mut self` slices only.
unsafe impl Send for RingMemory {}
unsafe impl Sync for RingMemory {}

impl RingMemory {
    /// Allocates `len` zeroed bytes aligned to `alignment`.
    pub fn allocate(len: usize, alignment: usize) -> FifoResult<Self> {
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(FifoError::AllocationFailed {
                size: len,
                alignment,
            });
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(backing) = Self::mmap_backed(len, alignment) {
                return Ok(Self {
                    len,
                    alignment,
                    backing,
                });
            }
        }

        Self::heap_backed(len, alignment)
    }

    fn heap_backed(len: usize, alignment: usize) -> FifoResult<Self> {
        let layout = Layout::from_size_align(len, alignment).map_err(|_| {
            FifoError::AllocationFailed {
                size: len,
                alignment,
            }
        })?;

        // SAFETY: `layout` has a nonzero size, checked above.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(FifoError::AllocationFailed {
            size: len,
            alignment,
        })?;
        Ok(Self {
            len,
            alignment,
            backing: Backing::Owned { ptr, layout },
        })
    }

    /// Anonymous mappings are zero-filled by the kernel. A mapping failure or a
    /// misaligned base is not fatal; the heap path gets a turn.
    #[cfg(not(target_arch = "wasm32"))]
    fn mmap_backed(len: usize, alignment: usize) -> Option<Backing> {
        let map = match memmap2::MmapOptions::new().len(len).map_anon() {
            Ok(map) => map,
            Err(err) => {
                log::debug!("anonymous mapping of {len} bytes failed ({err}); using heap");
                return None;
            }
        };
        if map.as_ptr() as usize % alignment != 0 {
            return None;
        }
        Some(Backing::Native(map))
    }

    /// Number of bytes in the block.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the block has zero length (never, once allocated).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the block was allocated with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// View the block as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the backing holds `len` initialised bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.backing.as_ptr(), self.len) }
    }

    /// View the block as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` guarantees unique access to the `len` bytes.
        unsafe { std::slice::from_raw_parts_mut(self.backing.as_mut_ptr(), self.len) }
    }
}

impl Drop for RingMemory {
    fn drop(&mut self) {
        if let Backing::Owned { ptr, layout } = &self.backing {
            // SAFETY: allocated in `heap_backed` with exactly this layout.
            unsafe {
                dealloc(ptr.as_ptr(), *layout);
            }
        }
    }
}
