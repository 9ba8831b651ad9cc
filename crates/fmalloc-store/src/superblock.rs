//! The heap header at offset 0 of every store.
//!
//! Fixed little-endian layout:
//!
//! | offset | field            | width |
//! |--------|------------------|-------|
//! | 0      | magic            | 8     |
//! | 8      | version          | 4     |
//! | 12     | flags            | 4     |
//! | 16     | total_size       | 8     |
//! | 24     | chunk_size       | 8     |
//! | 32     | chunk_count      | 8     |
//! | 40     | header_chunks    | 8     |
//! | 48     | root             | 8     |
//! | 56     | allocated_bytes  | 8     |
//! | 64     | live_blocks      | 8     |
//! | 72     | chunk_hint       | 8     |
//! | 80     | class heads      | 8 × 8 |

use byteorder::{ByteOrder, LittleEndian};

/// `"FMALLOC1"` read as a little-endian `u64` from the first 8 bytes.
pub const MAGIC: u64 = u64::from_le_bytes(*b"FMALLOC1");

/// Current format version.
pub const VERSION: u32 = 1;

/// Bookkeeping unit: 8 KiB.
pub const CHUNK_SIZE: u64 = 8 * 1024;

/// Bytes reserved at the front of the store for the superblock and bitmap.
pub const HEADER_REGION: u64 = 16 * 1024 * 1024;

/// Number of chunks covered by [`HEADER_REGION`].
pub const HEADER_CHUNKS: u64 = HEADER_REGION / CHUNK_SIZE;

/// Offset of the chunk occupancy bitmap.
pub const BITMAP_OFFSET: usize = 4096;

/// Bytes available to the bitmap.
pub const BITMAP_CAPACITY: usize = HEADER_REGION as usize - BITMAP_OFFSET;

/// Number of small-block size classes with a persistent free list.
pub const NUM_CLASSES: usize = 8;

/// Encoded length of the superblock.
pub const SUPERBLOCK_LEN: usize = 80 + 8 * NUM_CLASSES;

/// A mutable superblock field, addressed in place.
///
/// The geometry fields are written once at initialization and only read
/// afterwards, so they have no variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuperField {
    /// Offset of the caller's root object, or 0.
    Root,
    /// Bytes handed out to live blocks.
    AllocatedBytes,
    /// Number of live blocks.
    LiveBlocks,
    /// Chunk index where the next run search starts.
    ChunkHint,
    /// Head of the free list for size class `n`, or 0.
    ClassHead(usize),
}

impl SuperField {
    /// Byte offset of the field within the superblock.
    ///
    /// # Panics
    ///
    /// Panics if a class index is not below [`NUM_CLASSES`].
    pub fn offset(self) -> usize {
        match self {
            Self::Root => 48,
            Self::AllocatedBytes => 56,
            Self::LiveBlocks => 64,
            Self::ChunkHint => 72,
            Self::ClassHead(n) => {
                assert!(n < NUM_CLASSES, "size class {n} out of range");
                80 + 8 * n
            }
        }
    }
}

/// Decoded superblock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    /// Must equal [`MAGIC`].
    pub magic: u64,
    /// Format version.
    pub version: u32,
    /// Reserved, written as 0.
    pub flags: u32,
    /// Store length in bytes at initialization.
    pub total_size: u64,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Whole chunks in the store, header chunks included.
    pub chunk_count: u64,
    /// Leading chunks reserved for the header region.
    pub header_chunks: u64,
    /// Offset of the caller's root object, or 0.
    pub root: u64,
    /// Bytes handed out to live blocks.
    pub allocated_bytes: u64,
    /// Number of live blocks.
    pub live_blocks: u64,
    /// Chunk index where the next run search starts.
    pub chunk_hint: u64,
    /// Free-list heads per size class.
    pub class_heads: [u64; NUM_CLASSES],
}

impl Superblock {
    /// A fresh superblock for a store of `total_size` bytes.
    pub fn new(total_size: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            total_size,
            chunk_size: CHUNK_SIZE,
            chunk_count: total_size / CHUNK_SIZE,
            header_chunks: HEADER_CHUNKS,
            root: 0,
            allocated_bytes: 0,
            live_blocks: 0,
            chunk_hint: HEADER_CHUNKS,
            class_heads: [0; NUM_CLASSES],
        }
    }

    /// Whether `bytes` starts with the store magic.
    pub fn has_magic(bytes: &[u8]) -> bool {
        bytes.len() >= 8 && LittleEndian::read_u64(&bytes[..8]) == MAGIC
    }

    /// Decode from the first [`SUPERBLOCK_LEN`] bytes of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`SUPERBLOCK_LEN`].
    pub fn decode(bytes: &[u8]) -> Self {
        let b = &bytes[..SUPERBLOCK_LEN];
        let mut class_heads = [0u64; NUM_CLASSES];
        LittleEndian::read_u64_into(&b[80..SUPERBLOCK_LEN], &mut class_heads);
        Self {
            magic: LittleEndian::read_u64(&b[0..8]),
            version: LittleEndian::read_u32(&b[8..12]),
            flags: LittleEndian::read_u32(&b[12..16]),
            total_size: LittleEndian::read_u64(&b[16..24]),
            chunk_size: LittleEndian::read_u64(&b[24..32]),
            chunk_count: LittleEndian::read_u64(&b[32..40]),
            header_chunks: LittleEndian::read_u64(&b[40..48]),
            root: LittleEndian::read_u64(&b[48..56]),
            allocated_bytes: LittleEndian::read_u64(&b[56..64]),
            live_blocks: LittleEndian::read_u64(&b[64..72]),
            chunk_hint: LittleEndian::read_u64(&b[72..80]),
            class_heads,
        }
    }

    /// Encode into the first [`SUPERBLOCK_LEN`] bytes of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`SUPERBLOCK_LEN`].
    pub fn encode(&self, bytes: &mut [u8]) {
        let b = &mut bytes[..SUPERBLOCK_LEN];
        LittleEndian::write_u64(&mut b[0..8], self.magic);
        LittleEndian::write_u32(&mut b[8..12], self.version);
        LittleEndian::write_u32(&mut b[12..16], self.flags);
        LittleEndian::write_u64(&mut b[16..24], self.total_size);
        LittleEndian::write_u64(&mut b[24..32], self.chunk_size);
        LittleEndian::write_u64(&mut b[32..40], self.chunk_count);
        LittleEndian::write_u64(&mut b[40..48], self.header_chunks);
        LittleEndian::write_u64(&mut b[48..56], self.root);
        LittleEndian::write_u64(&mut b[56..64], self.allocated_bytes);
        LittleEndian::write_u64(&mut b[64..72], self.live_blocks);
        LittleEndian::write_u64(&mut b[72..80], self.chunk_hint);
        LittleEndian::write_u64_into(&self.class_heads, &mut b[80..SUPERBLOCK_LEN]);
    }

    /// Check the header against the length it is mapped at.
    pub fn validate(&self, mapped_len: u64) -> Result<(), String> {
        if self.magic != MAGIC {
            return Err("bad magic".into());
        }
        if self.version != VERSION {
            return Err(format!("unsupported version {}", self.version));
        }
        if self.chunk_size != CHUNK_SIZE {
            return Err(format!("unexpected chunk size {}", self.chunk_size));
        }
        if self.total_size != mapped_len {
            return Err(format!(
                "recorded size {} does not match file size {mapped_len}",
                self.total_size
            ));
        }
        if self.chunk_count != mapped_len / CHUNK_SIZE || self.header_chunks != HEADER_CHUNKS {
            return Err("chunk geometry does not match file size".into());
        }
        Ok(())
    }

    /// Read one mutable field in place.
    pub fn read_field(bytes: &[u8], field: SuperField) -> u64 {
        let at = field.offset();
        LittleEndian::read_u64(&bytes[at..at + 8])
    }

    /// Write one mutable field in place.
    pub fn write_field(bytes: &mut [u8], field: SuperField, value: u64) {
        let at = field.offset();
        LittleEndian::write_u64(&mut bytes[at..at + 8], value);
    }
}
