//! `strata` hierarchical region allocator
//!
//! This crate provides region (arena) allocation with:
//!
//! - **Bump pages** that grow by doubling up to a configurable cap
//! - **Size-classed free lists** that recycle small blocks before bumping
//! - **A big-block ring** tracking oversized blocks for individual release
//! - **Deferred cleanups** run in reverse registration order at teardown
//! - **Child arenas** owned by their parent and torn down before it
//!
//! Every block carries a header, so [`capacity_of`] works on any pointer
//! from any [`BlockAlloc`], including the plain process [`Heap`].
//!
//! Set `STRATA_LOG=debug` (see [`strata_log::init_from_env`]) to trace
//! arena lifecycles.

mod alloc;
mod arena;
mod big;
mod defer;
mod error;
mod factory;
mod header;
mod list;
pub mod size_class;

pub use alloc::{BlockAlloc, Heap};
pub use arena::{Arena, ArenaStats, ChildId};
pub use defer::SlotId;
pub use error::{Error, Result};
pub use factory::{
    ArenaConfig, ArenaFactory, DEFAULT_FIRST_PAGE_SIZE, DEFAULT_MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
pub use header::capacity_of;
pub use list::ArenaList;
