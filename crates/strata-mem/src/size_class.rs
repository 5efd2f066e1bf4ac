//! Size classes for small arena blocks.
//!
//! A block's *footprint* is its header plus the requested payload. Small
//! footprints are rounded up to a bucket size; each bucket has its own free
//! list inside an arena, and a released block stays in its bucket forever.
//! Footprints above [`SMALL_LIMIT`] skip the buckets and are served by the
//! big-block ring instead.
//!
//! Buckets are multiples of [`QUANTUM`]. They start one quantum apart and
//! then grow by a quarter of the previous bucket, so the table is strictly
//! increasing by construction:
//!
//! ```text
//! 16 32 48 64 80 96 112 128 160 192 240 288 352 432 448
//! ```

/// Granularity of every bucket size and of block alignment.
pub const QUANTUM: usize = 16;

/// Largest footprint (header included) that is still a small block.
pub const SMALL_LIMIT: usize = 448;

const LIMIT_QUANTA: usize = SMALL_LIMIT / QUANTUM;

const fn next_quanta(quanta: usize) -> usize {
    let step = if quanta / 4 > 1 { quanta / 4 } else { 1 };
    let next = quanta + step;
    if next > LIMIT_QUANTA { LIMIT_QUANTA } else { next }
}

const fn count_classes() -> usize {
    let mut quanta = 1;
    let mut count = 1;
    while quanta < LIMIT_QUANTA {
        quanta = next_quanta(quanta);
        count += 1;
    }
    count
}

/// Number of small size classes.
pub const NUM_CLASSES: usize = count_classes();

const fn build_buckets() -> [usize; NUM_CLASSES] {
    let mut table = [0usize; NUM_CLASSES];
    let mut quanta = 1;
    let mut idx = 0;
    while idx < NUM_CLASSES {
        table[idx] = quanta * QUANTUM;
        quanta = next_quanta(quanta);
        idx += 1;
    }
    table
}

/// Bucket size in bytes of every class, ascending.
pub const BUCKET_SIZES: [usize; NUM_CLASSES] = build_buckets();

/// Class index for every footprint expressed in whole quanta.
static CLASS_OF_QUANTA: [u8; LIMIT_QUANTA + 1] = {
    let mut table = [0u8; LIMIT_QUANTA + 1];
    let mut quanta = 0;
    let mut class = 0;
    while quanta <= LIMIT_QUANTA {
        while BUCKET_SIZES[class] < quanta * QUANTUM {
            class += 1;
        }
        table[quanta] = class as u8;
        quanta += 1;
    }
    table
};

/// Index of a small size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(u8);

impl SizeClass {
    /// Position of this class in [`BUCKET_SIZES`] and in an arena's free
    /// list table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bytes reserved for every block of this class, header included.
    #[inline]
    #[must_use]
    pub fn bucket_size(self) -> usize {
        BUCKET_SIZES[self.index()]
    }
}

/// Returns the class serving `footprint` bytes, or `None` when the
/// footprint belongs on the big-block path.
///
/// ```
/// use strata_mem::size_class::{classify, SMALL_LIMIT};
///
/// assert_eq!(classify(36).map(|c| c.bucket_size()), Some(48));
/// assert!(classify(SMALL_LIMIT).is_some());
/// assert!(classify(SMALL_LIMIT + 1).is_none());
/// ```
#[inline]
#[must_use]
pub fn classify(footprint: usize) -> Option<SizeClass> {
    if footprint > SMALL_LIMIT {
        return None;
    }
    let quanta = footprint.div_ceil(QUANTUM);
    Some(SizeClass(CLASS_OF_QUANTA[quanta]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_table() {
        assert_eq!(
            BUCKET_SIZES,
            [16, 32, 48, 64, 80, 96, 112, 128, 160, 192, 240, 288, 352, 432, 448]
        );
        assert_eq!(NUM_CLASSES, 15);
    }

    #[test]
    fn test_buckets_strictly_increase() {
        for pair in BUCKET_SIZES.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_buckets_are_quantized() {
        for &size in &BUCKET_SIZES {
            assert_eq!(size % QUANTUM, 0);
        }
        assert_eq!(BUCKET_SIZES[NUM_CLASSES - 1], SMALL_LIMIT);
    }

    #[test]
    fn test_classify_picks_smallest_fitting_bucket() {
        for footprint in 1..=SMALL_LIMIT {
            let class = classify(footprint).unwrap();
            assert!(class.bucket_size() >= footprint);
            if class.index() > 0 {
                assert!(BUCKET_SIZES[class.index() - 1] < footprint);
            }
        }
    }

    #[test]
    fn test_classify_is_monotonic() {
        let mut previous = 0;
        for footprint in 0..=SMALL_LIMIT {
            let size = classify(footprint).unwrap().bucket_size();
            assert!(size >= previous);
            previous = size;
        }
    }

    #[test]
    fn test_small_big_boundary() {
        assert_eq!(classify(SMALL_LIMIT).unwrap().bucket_size(), SMALL_LIMIT);
        assert_eq!(classify(SMALL_LIMIT + 1), None);
        assert_eq!(classify(usize::MAX), None);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(classify(16).unwrap().bucket_size(), 16);
        assert_eq!(classify(17).unwrap().bucket_size(), 32);
        assert_eq!(classify(129).unwrap().bucket_size(), 160);
        assert_eq!(classify(433).unwrap().bucket_size(), 448);
    }
}
