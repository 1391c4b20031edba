use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub const WORD_BYTES: usize = 8;

// Word 0 is never handed out, so a zero ref word always means "unset".
const RESERVED_WORDS: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaRef {
    pub generation: u32,
    /// Byte offset from the arena base; always word aligned.
    pub offset: u32,
    /// Requested size in bytes.
    pub len: u32,
}

impl ArenaRef {
    /// Number of words backing this block (at least one).
    pub fn words(&self) -> usize {
        (self.len as usize).div_ceil(WORD_BYTES).max(1)
    }

    fn first_word(&self) -> usize {
        self.offset as usize / WORD_BYTES
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
    Exhausted { requested: usize, remaining: usize },
    #[error("allocation of {0} bytes exceeds the addressable arena size")]
    TooLarge(usize),
    #[error("stale reference from generation {found} (arena is at generation {expected})")]
    StaleRef { expected: u32, found: u32 },
    #[error("access at byte {offset} (+{len}) is outside the referenced block")]
    OutOfBounds { offset: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
    pub allocations: u64,
    pub generation: u32,
}

/// Bump allocator over a fixed block of zeroed words.
///
/// Allocation is lock-free: threads race on a single cursor with
/// compare-and-swap, so every successful allocation owns a disjoint word
/// range. Memory is only reclaimed as a whole through [`Arena::reset`],
/// which starts a new generation and invalidates every earlier ref.
pub struct Arena {
    words: Box<[AtomicU64]>,
    cursor: AtomicUsize,
    allocations: AtomicU64,
    generation: u32,
}

impl Arena {
    pub fn with_capacity(bytes: usize) -> Arena {
        let max_words = u32::MAX as usize / WORD_BYTES;
        let n = bytes
            .div_ceil(WORD_BYTES)
            .saturating_add(RESERVED_WORDS)
            .min(max_words);
        let words: Box<[AtomicU64]> = (0..n).map(|_| AtomicU64::new(0)).collect();
        Arena {
            words,
            cursor: AtomicUsize::new(RESERVED_WORDS),
            allocations: AtomicU64::new(0),
            generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        (self.words.len() - RESERVED_WORDS) * WORD_BYTES
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Reserves `size` zeroed bytes. Zero-sized requests still get a word of
    /// their own so no two live refs share an address.
    pub fn alloc(&self, size: usize) -> Result<ArenaRef, ArenaError> {
        if size > u32::MAX as usize {
            return Err(ArenaError::TooLarge(size));
        }
        let need = size.div_ceil(WORD_BYTES).max(1);
        let total = self.words.len();
        let mut cur = self.cursor.load(Ordering::Relaxed);
        loop {
            let end = match cur.checked_add(need) {
                Some(end) if end <= total => end,
                _ => {
                    return Err(ArenaError::Exhausted {
                        requested: size,
                        remaining: total.saturating_sub(cur) * WORD_BYTES,
                    })
                }
            };
            match self
                .cursor
                .compare_exchange_weak(cur, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ArenaRef {
            generation: self.generation,
            offset: (cur * WORD_BYTES) as u32,
            len: size as u32,
        })
    }

    fn check(&self, r: ArenaRef) -> Result<(), ArenaError> {
        if r.generation != self.generation {
            return Err(ArenaError::StaleRef {
                expected: self.generation,
                found: r.generation,
            });
        }
        let end = r.first_word() + r.words();
        if r.first_word() < RESERVED_WORDS || end > self.cursor.load(Ordering::Acquire) {
            return Err(ArenaError::OutOfBounds {
                offset: r.offset as usize,
                len: r.len as usize,
            });
        }
        Ok(())
    }

    /// Checks that `r` belongs to the current generation and lies inside
    /// the allocated region.
    pub fn validate(&self, r: ArenaRef) -> Result<(), ArenaError> {
        self.check(r)
    }

    fn word_index(&self, r: ArenaRef, byte_off: usize) -> Result<usize, ArenaError> {
        self.check(r)?;
        if byte_off % WORD_BYTES != 0 || byte_off / WORD_BYTES >= r.words() {
            return Err(ArenaError::OutOfBounds {
                offset: byte_off,
                len: WORD_BYTES,
            });
        }
        Ok(r.first_word() + byte_off / WORD_BYTES)
    }

    pub fn load_word(&self, r: ArenaRef, byte_off: usize) -> Result<u64, ArenaError> {
        let idx = self.word_index(r, byte_off)?;
        Ok(self.words[idx].load(Ordering::Acquire))
    }

    pub fn store_word(&self, r: ArenaRef, byte_off: usize, word: u64) -> Result<(), ArenaError> {
        let idx = self.word_index(r, byte_off)?;
        self.words[idx].store(word, Ordering::Release);
        Ok(())
    }

    /// Copies the block out as little-endian bytes, truncated to its length.
    pub fn read_bytes(&self, r: ArenaRef) -> Result<Vec<u8>, ArenaError> {
        self.check(r)?;
        let mut out = Vec::with_capacity(r.words() * WORD_BYTES);
        for w in &self.words[r.first_word()..r.first_word() + r.words()] {
            out.extend_from_slice(&w.load(Ordering::Acquire).to_le_bytes());
        }
        out.truncate(r.len as usize);
        Ok(out)
    }

    pub fn write_bytes(&self, r: ArenaRef, byte_off: usize, bytes: &[u8]) -> Result<(), ArenaError> {
        self.check(r)?;
        let end = byte_off.checked_add(bytes.len());
        if end.map_or(true, |end| end > r.len as usize) {
            return Err(ArenaError::OutOfBounds {
                offset: byte_off,
                len: bytes.len(),
            });
        }
        for (i, &b) in bytes.iter().enumerate() {
            let pos = byte_off + i;
            let word = &self.words[r.first_word() + pos / WORD_BYTES];
            let shift = (pos % WORD_BYTES) * 8;
            let mask = !(0xffu64 << shift);
            // Neighbouring bytes of the same word may be written concurrently.
            let _ = word.fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some((w & mask) | ((b as u64) << shift))
            });
        }
        Ok(())
    }

    /// Discards every allocation and starts a new generation.
    pub fn reset(&mut self) {
        let used = *self.cursor.get_mut();
        for w in &mut self.words[RESERVED_WORDS..used] {
            *w.get_mut() = 0;
        }
        *self.cursor.get_mut() = RESERVED_WORDS;
        *self.allocations.get_mut() = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity(),
            used: (self.cursor.load(Ordering::Relaxed) - RESERVED_WORDS) * WORD_BYTES,
            allocations: self.allocations.load(Ordering::Relaxed),
            generation: self.generation,
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena").field("stats", &self.stats()).finish()
    }
}
