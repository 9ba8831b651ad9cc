//! Size classes for small blocks.
//!
//! Eight power-of-two classes from 32 bytes to 4 KiB. Sizes here are whole
//! block sizes, header included; a class-`n` block holds
//! `class_size(n) - BLOCK_HEADER` bytes of user data. Requests whose block
//! would exceed [`MAX_SMALL_BLOCK`] take whole chunks instead.

use fmalloc_store::superblock::{CHUNK_SIZE, NUM_CLASSES};

/// Bytes in front of every block: tag, aux word, length.
pub const BLOCK_HEADER: usize = 16;

/// Largest block served from a size class.
pub const MAX_SMALL_BLOCK: usize = 4096;

const SIZE_TABLE: [usize; NUM_CLASSES] = [32, 64, 128, 256, 512, 1024, 2048, 4096];

/// Class index for a user request of `size` bytes, or `None` for the large
/// path.
pub fn class_for(size: usize) -> Option<usize> {
    let block = size.checked_add(BLOCK_HEADER)?;
    if block > MAX_SMALL_BLOCK {
        return None;
    }
    SIZE_TABLE.iter().position(|&c| block <= c)
}

/// Block size of class `index`, header included. 0 for out-of-range indices.
pub fn class_size(index: usize) -> usize {
    SIZE_TABLE.get(index).copied().unwrap_or(0)
}

/// Number of class-`index` blocks carved from one chunk.
pub fn blocks_per_chunk(index: usize) -> usize {
    match class_size(index) {
        0 => 0,
        size => CHUNK_SIZE as usize / size,
    }
}
