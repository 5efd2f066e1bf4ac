//! Arena configuration and a factory that stamps out configured arenas.
//!
//! ```
//! use strata_mem::{ArenaConfig, ArenaFactory, BlockAlloc};
//!
//! let config = ArenaConfig::new().with_max_page_size(16 * 1024);
//! let factory = ArenaFactory::new(config).unwrap();
//!
//! let mut arena = factory.create_arena().unwrap();
//! let block = arena.alloc_zeroed(8, 4).unwrap();
//! unsafe { assert_eq!(*block.as_ptr(), 0) };
//! ```

use std::mem::MaybeUninit;

use crate::arena::Arena;
use crate::error::{Error, Result};

/// Size of an arena's first page unless configured otherwise.
pub const DEFAULT_FIRST_PAGE_SIZE: usize = 512;

/// Upper bound for the page-size growth hint unless configured otherwise.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 4096;

/// Smallest accepted first page. Pages must always be big blocks of their
/// arena, so they have to exceed the small-block limit.
pub const MIN_PAGE_SIZE: usize = 512;

/// Page sizing for an arena and, by inheritance, its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Bytes in the first page of a heap-backed arena. Also seeds the growth
    /// hint: the first grown page is this large.
    pub first_page_size: usize,
    /// Cap for the growth hint. A single request larger than this still
    /// gets a page of its own size.
    pub max_page_size: usize,
}

impl ArenaConfig {
    /// The default configuration: 512 byte first page, 4 KiB page cap.
    #[must_use]
    pub const fn new() -> Self {
        ArenaConfig {
            first_page_size: DEFAULT_FIRST_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    #[must_use]
    pub const fn with_first_page_size(mut self, bytes: usize) -> Self {
        self.first_page_size = bytes;
        self
    }

    #[must_use]
    pub const fn with_max_page_size(mut self, bytes: usize) -> Self {
        self.max_page_size = bytes;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if the first page is smaller than
    /// [`MIN_PAGE_SIZE`], the cap is below the first page, or the first page
    /// cannot be described as an allocation layout.
    pub fn validate(&self) -> Result<()> {
        if self.first_page_size < MIN_PAGE_SIZE {
            return Err(Error::InvalidConfig {
                reason: "first page size is below the minimum page size",
            });
        }
        if self.max_page_size < self.first_page_size {
            return Err(Error::InvalidConfig {
                reason: "max page size is smaller than the first page size",
            });
        }
        if self.max_page_size > isize::MAX as usize / 2 {
            return Err(Error::InvalidConfig {
                reason: "max page size does not fit an allocation",
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig::new()
    }
}

/// Creates root arenas sharing one validated [`ArenaConfig`].
///
/// The factory holds no memory of its own; every call builds a fresh,
/// independent arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaFactory {
    config: ArenaConfig,
}

impl ArenaFactory {
    /// # Errors
    ///
    /// Returns the validation error of `config`.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        Ok(ArenaFactory { config })
    }

    #[must_use]
    pub const fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Creates a heap-backed root arena.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the first page cannot be allocated.
    pub fn create_arena(&self) -> Result<Arena<'static>> {
        Arena::with_config(self.config)
    }

    /// Creates a root arena whose first page is `storage`.
    ///
    /// Infallible: the factory's config was validated in
    /// [`ArenaFactory::new`].
    #[must_use]
    pub fn create_in_place<'a>(&self, storage: &'a mut [MaybeUninit<u8>]) -> Arena<'a> {
        Arena::in_place_unchecked(storage, self.config)
    }
}
