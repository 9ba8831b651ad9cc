//! Opening, initializing and attaching backing stores.

use std::io;
use std::path::Path;

use fmalloc_core::StoreError;

use crate::bitmap::ChunkBitmap;
use crate::config::StoreConfig;
use crate::region::MappedRegion;
use crate::superblock::{
    SuperField, Superblock, BITMAP_CAPACITY, BITMAP_OFFSET, CHUNK_SIZE, HEADER_CHUNKS,
};

/// A mapped file carrying a heap header.
///
/// Created by [`BackingStore::open_or_create`]. Dropping the store (or
/// calling [`close`](Self::close)) unmaps the file and closes it.
#[derive(Debug)]
pub struct BackingStore {
    region: MappedRegion,
    chunk_count: u64,
    fresh: bool,
}

impl BackingStore {
    /// Open the store at `config.path`, creating it if absent.
    ///
    /// - A missing file is created at `config.size` bytes.
    /// - An existing file is mapped at its own length; `config.size` is
    ///   ignored. Files below [`StoreConfig::MIN_SIZE`] are rejected with
    ///   [`StoreError::FileTooSmall`] and left untouched.
    /// - A file without the store magic gets a fresh header, reported by
    ///   [`freshly_initialized`](Self::freshly_initialized). A file with
    ///   the magic is attached as-is after its header is validated.
    pub fn open_or_create(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config.path();
        if path.as_os_str().is_empty() {
            return Err(StoreError::invalid("store path is empty"));
        }

        let region = match std::fs::metadata(path) {
            Ok(meta) => {
                let size = meta.len();
                if size < StoreConfig::MIN_SIZE {
                    return Err(StoreError::FileTooSmall {
                        path: path.to_path_buf(),
                        size,
                        minimum: StoreConfig::MIN_SIZE,
                    });
                }
                Self::check_describable(path, size)?;
                MappedRegion::open_existing(path)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                config.validate()?;
                tracing::debug!(path = %path.display(), size = config.size, "creating store file");
                MappedRegion::create_new(path, config.size)?
            }
            Err(e) => return Err(StoreError::io(path, &e)),
        };

        Self::attach(region)
    }

    fn check_describable(path: &Path, size: u64) -> Result<(), StoreError> {
        if size > StoreConfig::MAX_SIZE {
            return Err(StoreError::invalid(format!(
                "{} is {size} bytes, larger than the {} byte ceiling",
                path.display(),
                StoreConfig::MAX_SIZE
            )));
        }
        Ok(())
    }

    fn attach(mut region: MappedRegion) -> Result<Self, StoreError> {
        let len = region.len() as u64;
        let chunk_count = len / CHUNK_SIZE;

        let fresh = !Superblock::has_magic(region.as_slice());
        if fresh {
            let bitmap_bytes = chunk_count.div_ceil(8) as usize;
            debug_assert!(bitmap_bytes <= BITMAP_CAPACITY);
            let bytes = region.as_mut_slice();
            bytes[BITMAP_OFFSET..BITMAP_OFFSET + bitmap_bytes].fill(0);
            {
                let mut bitmap = ChunkBitmap::new(
                    &mut bytes[BITMAP_OFFSET..BITMAP_OFFSET + bitmap_bytes],
                    chunk_count,
                );
                // Covers bit 0: the superblock chunk is never handed out.
                bitmap.set_range(0, HEADER_CHUNKS);
            }
            Superblock::new(len).encode(bytes);
            tracing::info!(
                path = %region.path().display(),
                size = len,
                chunks = chunk_count,
                "initialized fresh store"
            );
        } else {
            let sb = Superblock::decode(region.as_slice());
            sb.validate(len).map_err(|reason| StoreError::CorruptHeader {
                path: region.path().to_path_buf(),
                reason,
            })?;
            tracing::debug!(path = %region.path().display(), size = len, "attached existing store");
        }

        Ok(Self {
            region,
            chunk_count,
            fresh,
        })
    }

    /// Whether this open wrote the header (the file had no magic).
    pub fn freshly_initialized(&self) -> bool {
        self.fresh
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Always false; a store holds at least the header region.
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Whole chunks in the store, header chunks included.
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// The decoded superblock.
    pub fn superblock(&self) -> Superblock {
        Superblock::decode(self.region.as_slice())
    }

    /// Read a mutable superblock field.
    pub fn read_field(&self, field: SuperField) -> u64 {
        Superblock::read_field(self.region.as_slice(), field)
    }

    /// Write a mutable superblock field.
    pub fn write_field(&mut self, field: SuperField, value: u64) {
        Superblock::write_field(self.region.as_mut_slice(), field, value);
    }

    /// The chunk occupancy bitmap.
    pub fn bitmap(&self) -> ChunkBitmap<&[u8]> {
        let n = self.chunk_count.div_ceil(8) as usize;
        ChunkBitmap::new(
            &self.region.as_slice()[BITMAP_OFFSET..BITMAP_OFFSET + n],
            self.chunk_count,
        )
    }

    /// The chunk occupancy bitmap, mutably.
    pub fn bitmap_mut(&mut self) -> ChunkBitmap<&mut [u8]> {
        let n = self.chunk_count.div_ceil(8) as usize;
        let chunks = self.chunk_count;
        ChunkBitmap::new(
            &mut self.region.as_mut_slice()[BITMAP_OFFSET..BITMAP_OFFSET + n],
            chunks,
        )
    }

    /// The underlying mapping.
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    /// The underlying mapping, mutably.
    pub fn region_mut(&mut self) -> &mut MappedRegion {
        &mut self.region
    }

    /// `len` bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], StoreError> {
        self.region.bytes(offset, len)
    }

    /// `len` bytes at `offset`, mutably.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], StoreError> {
        self.region.bytes_mut(offset, len)
    }

    /// Unmap and close.
    pub fn close(self) {
        tracing::debug!(path = %self.path().display(), "closing store");
        drop(self);
    }
}
