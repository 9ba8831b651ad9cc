//! Chunk occupancy bitmap.
//!
//! One bit per chunk, least significant bit first within each byte. A set
//! bit means the chunk is in use (header region, a carved size-class chunk,
//! or part of a large run).

/// A view of an occupancy bitmap stored in `B`.
///
/// Read-only operations work over any `B: AsRef<[u8]>`; mutation needs
/// `B: AsMut<[u8]>` as well, so a view over a `&[u8]` cannot write.
#[derive(Debug)]
pub struct ChunkBitmap<B> {
    bytes: B,
    bits: u64,
}

impl<B: AsRef<[u8]>> ChunkBitmap<B> {
    /// View the first `bits` bits of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is too short to hold `bits` bits.
    pub fn new(bytes: B, bits: u64) -> Self {
        let need = bits.div_ceil(8);
        assert!(
            bytes.as_ref().len() as u64 >= need,
            "bitmap needs {need} bytes, got {}",
            bytes.as_ref().len()
        );
        Self { bytes, bits }
    }

    /// Number of chunks covered.
    pub fn len(&self) -> u64 {
        self.bits
    }

    /// Whether the bitmap covers no chunks.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether chunk `i` is in use. Out-of-range chunks read as in use.
    pub fn is_set(&self, i: u64) -> bool {
        if i >= self.bits {
            return true;
        }
        self.bytes.as_ref()[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    /// Number of chunks in use.
    pub fn count_set(&self) -> u64 {
        let bytes = self.bytes.as_ref();
        let full = (self.bits / 8) as usize;
        let mut n: u64 = bytes[..full].iter().map(|b| u64::from(b.count_ones())).sum();
        let tail = self.bits % 8;
        if tail != 0 {
            let mask = (1u8 << tail) - 1;
            n += u64::from((bytes[full] & mask).count_ones());
        }
        n
    }

    /// Start of the first run of `n` clear chunks at or after `hint`, falling
    /// back to a search from 0 up to `hint`. Runs never wrap past the end.
    pub fn find_clear_run(&self, n: u64, hint: u64) -> Option<u64> {
        if n == 0 || n > self.bits {
            return None;
        }
        let hint = hint.min(self.bits);
        self.scan(hint, self.bits, n)
            .or_else(|| self.scan(0, hint.saturating_add(n - 1).min(self.bits), n))
    }

    fn scan(&self, from: u64, to: u64, n: u64) -> Option<u64> {
        let bytes = self.bytes.as_ref();
        let mut i = from;
        let mut run_start = from;
        let mut run_len = 0u64;
        while i < to {
            // Skip fully used bytes a byte at a time.
            if i % 8 == 0 && i + 8 <= to && bytes[(i / 8) as usize] == 0xFF {
                run_len = 0;
                i += 8;
                run_start = i;
                continue;
            }
            if self.is_set(i) {
                run_len = 0;
                run_start = i + 1;
            } else {
                run_len += 1;
                if run_len == n {
                    return Some(run_start);
                }
            }
            i += 1;
        }
        None
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ChunkBitmap<B> {
    /// Mark chunks `start..start + n` in use.
    pub fn set_range(&mut self, start: u64, n: u64) {
        self.assign(start, n, true);
    }

    /// Mark chunks `start..start + n` free.
    pub fn clear_range(&mut self, start: u64, n: u64) {
        self.assign(start, n, false);
    }

    fn assign(&mut self, start: u64, n: u64, value: bool) {
        let end = start.saturating_add(n);
        assert!(end <= self.bits, "chunk range {start}..{end} exceeds {}", self.bits);
        let bytes = self.bytes.as_mut();
        for i in start..end {
            let byte = &mut bytes[(i / 8) as usize];
            if value {
                *byte |= 1 << (i % 8);
            } else {
                *byte &= !(1 << (i % 8));
            }
        }
    }
}
