#![forbid(unsafe_code)]
//! Inode id allocation.
//!
//! ## Design
//!
//! The allocator is layered:
//!
//! 1. **Bitmap**: raw bit manipulation on a `u64` word array.
//! 2. **InodeBitmap**: maps a dense inode-id range onto the bitmap, keeps
//!    the reserved root id permanently set, and performs first-fit
//!    allocation starting just past the root.
//!
//! `InodeBitmap` is not synchronized. The inode table wraps it in a single
//! mutex so that allocate and free are serialized filesystem-wide.

use vtfs_error::{Result, VtfsError};
use vtfs_types::InodeNumber;

// ── Bitmap operations ───────────────────────────────────────────────────────

const WORD_BITS: u32 = u64::BITS;

fn word_count(bits: u32) -> usize {
    bits.div_ceil(WORD_BITS) as usize
}

/// Get bit `idx` from a word bitmap. Out-of-range bits read as clear.
#[must_use]
pub fn bitmap_get(words: &[u64], idx: u32) -> bool {
    words
        .get((idx / WORD_BITS) as usize)
        .is_some_and(|w| (w >> (idx % WORD_BITS)) & 1 == 1)
}

/// Set bit `idx`. Out-of-range bits are ignored.
pub fn bitmap_set(words: &mut [u64], idx: u32) {
    if let Some(w) = words.get_mut((idx / WORD_BITS) as usize) {
        *w |= 1 << (idx % WORD_BITS);
    }
}

/// Clear bit `idx`. Out-of-range bits are ignored.
pub fn bitmap_clear(words: &mut [u64], idx: u32) {
    if let Some(w) = words.get_mut((idx / WORD_BITS) as usize) {
        *w &= !(1 << (idx % WORD_BITS));
    }
}

/// Count clear bits among the first `count` bits.
#[must_use]
pub fn bitmap_count_free(words: &[u64], count: u32) -> u32 {
    let full = (count / WORD_BITS) as usize;
    let tail = count % WORD_BITS;
    let mut free: u32 = words.iter().take(full).map(|w| w.count_zeros()).sum();
    if tail > 0 {
        if let Some(w) = words.get(full) {
            let mask = (1_u64 << tail) - 1;
            free += (!w & mask).count_ones();
        }
    }
    free
}

/// Find the first clear bit in `start..count`. No wrap-around.
#[must_use]
pub fn bitmap_find_free(words: &[u64], count: u32, start: u32) -> Option<u32> {
    let mut idx = start;
    while idx < count {
        let word_idx = (idx / WORD_BITS) as usize;
        let word = *words.get(word_idx)?;
        // Treat bits below `idx` in this word as taken.
        let shifted = word | ((1_u64 << (idx % WORD_BITS)) - 1);
        if shifted == u64::MAX {
            idx = (idx / WORD_BITS + 1) * WORD_BITS;
            continue;
        }
        let found = (idx / WORD_BITS) * WORD_BITS + shifted.trailing_ones();
        return (found < count).then_some(found);
    }
    None
}

// ── Inode bitmap ────────────────────────────────────────────────────────────

/// Allocation state for the dense id range `base .. base + count`.
///
/// Bit 0 corresponds to `base`, the root id, which is reserved at
/// construction and can never be freed.
#[derive(Debug, Clone)]
pub struct InodeBitmap {
    base: InodeNumber,
    count: u32,
    words: Vec<u64>,
}

impl InodeBitmap {
    /// Create a bitmap covering `count` ids starting at `base`, with `base`
    /// already marked allocated.
    pub fn new(base: InodeNumber, count: u32) -> Result<Self> {
        if count < 2 {
            return Err(VtfsError::InvalidConfig(format!(
                "inode range must hold the root and at least one more id, got {count}"
            )));
        }
        let mut words = vec![0_u64; word_count(count)];
        bitmap_set(&mut words, 0);
        Ok(Self { base, count, words })
    }

    #[must_use]
    pub fn base(&self) -> InodeNumber {
        self.base
    }

    /// Total number of ids covered, including the root.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.count
    }

    /// Map an id to its bit index, or `None` when outside the range.
    #[must_use]
    pub fn index_of(&self, ino: InodeNumber) -> Option<u32> {
        let rel = ino.0.checked_sub(self.base.0)?;
        u32::try_from(rel).ok().filter(|&idx| idx < self.count)
    }

    #[must_use]
    pub fn is_allocated(&self, ino: InodeNumber) -> bool {
        self.index_of(ino)
            .is_some_and(|idx| bitmap_get(&self.words, idx))
    }

    /// Reserve the first free id past the root.
    pub fn allocate(&mut self) -> Result<InodeNumber> {
        let idx =
            bitmap_find_free(&self.words, self.count, 1).ok_or(VtfsError::CapacityExhausted)?;
        bitmap_set(&mut self.words, idx);
        Ok(InodeNumber(self.base.0 + u64::from(idx)))
    }

    /// Release an allocated id.
    ///
    /// Freeing the root, an id outside the range, or an id that is not
    /// allocated is an internal-consistency violation.
    pub fn free(&mut self, ino: InodeNumber) -> Result<()> {
        let idx = self.index_of(ino).ok_or_else(|| VtfsError::Corruption {
            ino: ino.0,
            detail: "free of id outside the inode table".to_owned(),
        })?;
        if idx == 0 {
            return Err(VtfsError::Corruption {
                ino: ino.0,
                detail: "free of the root id".to_owned(),
            });
        }
        if !bitmap_get(&self.words, idx) {
            return Err(VtfsError::Corruption {
                ino: ino.0,
                detail: "double free".to_owned(),
            });
        }
        bitmap_clear(&mut self.words, idx);
        Ok(())
    }

    #[must_use]
    pub fn count_free(&self) -> u32 {
        bitmap_count_free(&self.words, self.count)
    }

    /// Iterate every allocated id in ascending order.
    pub fn allocated(&self) -> impl Iterator<Item = InodeNumber> + '_ {
        (0..self.count)
            .filter(|&idx| bitmap_get(&self.words, idx))
            .map(|idx| InodeNumber(self.base.0 + u64::from(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_get_set_clear() {
        let mut words = vec![0_u64; 2];
        assert!(!bitmap_get(&words, 0));
        bitmap_set(&mut words, 0);
        bitmap_set(&mut words, 63);
        bitmap_set(&mut words, 64);
        assert!(bitmap_get(&words, 0));
        assert!(bitmap_get(&words, 63));
        assert!(bitmap_get(&words, 64));
        assert_eq!(words[0], 1 | (1 << 63));
        assert_eq!(words[1], 1);
        bitmap_clear(&mut words, 63);
        assert!(!bitmap_get(&words, 63));
        // Out of range is a no-op / reads clear.
        bitmap_set(&mut words, 500);
        assert!(!bitmap_get(&words, 500));
    }

    #[test]
    fn bitmap_count_free_respects_tail() {
        let mut words = vec![0_u64; 2];
        assert_eq!(bitmap_count_free(&words, 70), 70);
        bitmap_set(&mut words, 3);
        bitmap_set(&mut words, 69);
        // Bit 100 lies past `count` and must not be counted.
        bitmap_set(&mut words, 100);
        assert_eq!(bitmap_count_free(&words, 70), 68);
    }

    #[test]
    fn bitmap_find_free_skips_full_words() {
        let mut words = vec![u64::MAX, 0];
        assert_eq!(bitmap_find_free(&words, 128, 0), Some(64));
        bitmap_clear(&mut words, 10);
        assert_eq!(bitmap_find_free(&words, 128, 0), Some(10));
        assert_eq!(bitmap_find_free(&words, 128, 11), Some(64));
        assert_eq!(bitmap_find_free(&words, 64, 11), None);
    }

    #[test]
    fn bitmap_find_free_does_not_wrap() {
        let words = vec![0b1111_0000_u64];
        assert_eq!(bitmap_find_free(&words, 8, 4), None);
        assert_eq!(bitmap_find_free(&words, 8, 0), Some(0));
    }

    #[test]
    fn new_reserves_root() {
        let bm = InodeBitmap::new(InodeNumber(1000), 1000).unwrap();
        assert!(bm.is_allocated(InodeNumber(1000)));
        assert!(!bm.is_allocated(InodeNumber(1001)));
        assert_eq!(bm.count_free(), 999);
        assert_eq!(bm.capacity(), 1000);
    }

    #[test]
    fn new_rejects_degenerate_range() {
        assert!(matches!(
            InodeBitmap::new(InodeNumber(1), 1),
            Err(VtfsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn allocate_is_first_fit_past_root() {
        let mut bm = InodeBitmap::new(InodeNumber(1000), 8).unwrap();
        assert_eq!(bm.allocate().unwrap(), InodeNumber(1001));
        assert_eq!(bm.allocate().unwrap(), InodeNumber(1002));
        assert_eq!(bm.allocate().unwrap(), InodeNumber(1003));
        bm.free(InodeNumber(1002)).unwrap();
        assert_eq!(bm.allocate().unwrap(), InodeNumber(1002));
    }

    #[test]
    fn allocate_exhaustion() {
        let mut bm = InodeBitmap::new(InodeNumber(1000), 4).unwrap();
        for _ in 0..3 {
            bm.allocate().unwrap();
        }
        assert_eq!(bm.count_free(), 0);
        assert_eq!(bm.allocate(), Err(VtfsError::CapacityExhausted));
    }

    #[test]
    fn free_rejects_inconsistent_ids() {
        let mut bm = InodeBitmap::new(InodeNumber(1000), 4).unwrap();
        assert!(bm.free(InodeNumber(999)).unwrap_err().is_corruption());
        assert!(bm.free(InodeNumber(1004)).unwrap_err().is_corruption());
        assert!(bm.free(InodeNumber(1000)).unwrap_err().is_corruption());
        assert!(bm.free(InodeNumber(1001)).unwrap_err().is_corruption());

        let ino = bm.allocate().unwrap();
        bm.free(ino).unwrap();
        assert!(bm.free(ino).unwrap_err().is_corruption());
    }

    #[test]
    fn index_of_bounds() {
        let bm = InodeBitmap::new(InodeNumber(1000), 1000).unwrap();
        assert_eq!(bm.index_of(InodeNumber(1000)), Some(0));
        assert_eq!(bm.index_of(InodeNumber(1999)), Some(999));
        assert_eq!(bm.index_of(InodeNumber(2000)), None);
        assert_eq!(bm.index_of(InodeNumber(0)), None);
        assert_eq!(bm.index_of(InodeNumber(u64::MAX)), None);
    }

    #[test]
    fn allocated_lists_in_order() {
        let mut bm = InodeBitmap::new(InodeNumber(10), 6).unwrap();
        bm.allocate().unwrap();
        bm.allocate().unwrap();
        bm.allocate().unwrap();
        bm.free(InodeNumber(12)).unwrap();
        let ids: Vec<u64> = bm.allocated().map(|i| i.0).collect();
        assert_eq!(ids, vec![10, 11, 13]);
    }
}
