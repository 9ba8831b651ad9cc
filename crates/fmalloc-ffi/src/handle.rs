//! Generation-checked handle table for values owned across the C boundary.
//!
//! A handle packs a generation (high 32 bits) and a one-based slot number
//! (low 32 bits), so `0` is never a valid handle. Releasing a value bumps
//! its slot's generation; a released handle then fails lookup instead of
//! reaching whatever value reuses the slot.

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Owns values on behalf of C callers, addressed by `u64` handles.
pub(crate) struct HandleTable<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    live: usize,
}

fn pack(slot: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(slot + 1)
}

fn unpack(handle: u64) -> Option<(usize, u32)> {
    let low = handle as u32;
    let slot = low.checked_sub(1)?;
    Some((slot as usize, (handle >> 32) as u32))
}

impl<T> HandleTable<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Take ownership of `value` and return its handle.
    pub(crate) fn insert(&mut self, value: T) -> u64 {
        self.live += 1;
        if let Some(slot) = self.free_head {
            let entry = &mut self.entries[slot as usize];
            if let Entry::Vacant {
                generation,
                next_free,
            } = *entry
            {
                self.free_head = next_free;
                *entry = Entry::Occupied { generation, value };
                return pack(slot, generation);
            }
        }
        let slot = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        pack(slot, 0)
    }

    pub(crate) fn get(&self, handle: u64) -> Option<&T> {
        let (slot, gen) = unpack(handle)?;
        match self.entries.get(slot)? {
            Entry::Occupied { generation, value } if *generation == gen => Some(value),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, handle: u64) -> bool {
        self.get(handle).is_some()
    }

    /// Release the value behind `handle`. Stale and unknown handles return
    /// `None`, so a double release is harmless.
    pub(crate) fn remove(&mut self, handle: u64) -> Option<T> {
        let (slot, gen) = unpack(handle)?;
        let entry = self.entries.get_mut(slot)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == gen => {}
            _ => return None,
        }
        let next = gen.wrapping_add(1);
        // A wrapped generation would revive handles from generation 0, so
        // such a slot is retired instead of recycled.
        let retired = next == 0;
        let old = std::mem::replace(
            entry,
            Entry::Vacant {
                generation: next,
                next_free: if retired { None } else { self.free_head },
            },
        );
        if !retired {
            self.free_head = Some(slot as u32);
        }
        self.live -= 1;
        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Number of live values.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
