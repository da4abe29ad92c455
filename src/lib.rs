//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a user-space **segregated free-list allocator** with
//! boundary-tag coalescing, managing a single region that grows through an
//! `sbrk`-like [`HeapExtender`].
//!
//! ## Overview
//!
//! Free blocks are kept in a small table of bins, one per power-of-two size
//! range. Allocation searches from the smallest bin that can satisfy the
//! request and splits off whatever is left; freeing merges the block with
//! free neighbours before putting it back:
//!
//! ```text
//!   Managed region:
//!
//!   ┌─────┬──────────┬────────┬──────────┬────────┬──────────────┬──────────┐
//!   │ pad │ prologue │ A: 48  │ F: 96    │ A: 32  │ F: 2048      │ epilogue │
//!   └─────┴──────────┴────────┴──────────┴────────┴──────────────┴──────────┘
//!                                 │                   │
//!                                 ▼                   ▼
//!   bins:  [ (16,32] ][ (32,64] ][ (64,128] ]...[ (1K,2K] ]...[ (128K,∞) ]
//!                                     ▲              ▲
//!                                     └── F: 96      └── F: 2048
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro and helpers (align!)
//!   ├── block      - Header/footer encoding and block views
//!   ├── free_list  - Segregated, intrusive doubly linked free lists
//!   ├── allocator  - Allocator: allocate, deallocate, resize, zero_allocate
//!   ├── checker    - Heap consistency checker (debug / `checker` feature)
//!   ├── extender   - HeapExtender trait, ArenaHeap and MmapHeap
//!   ├── config     - AllocatorConfig (defaults + SEGALLOC_* environment)
//!   ├── stats      - HeapStats
//!   └── error      - ExtendError, AllocError, ConfigError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, ArenaHeap};
//!
//! let mut allocator = Allocator::with_extender(ArenaHeap::default());
//! assert!(allocator.init());
//!
//! let ptr = allocator.allocate(64).unwrap();
//! allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = allocator.resize(Some(ptr), 256).unwrap();
//! assert_eq!(&allocator.payload(ptr)[..5], b"hello");
//!
//! allocator.deallocate(Some(ptr));
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   Allocated block:
//!   ┌──────────────┬────────────────────────────────┐
//!   │ header (8 B) │        user data               │
//!   └──────────────┴────────────────────────────────┘
//!                  ▲
//!                  └── offset returned to the caller (16-byte aligned)
//!
//!   Free block:
//!   ┌──────────────┬──────┬──────┬─────────┬──────────────┐
//!   │ header (8 B) │ prev │ next │   ...   │ footer (8 B) │
//!   └──────────────┴──────┴──────┴─────────┴──────────────┘
//! ```
//!
//! The header packs the block size with an allocated bit and a
//! previous-block-allocated bit, so allocated blocks need no footer.
//!
//! ## Pointers
//!
//! The allocator hands out payload **offsets** into the extender's region
//! rather than raw pointers; `None` plays the role of the null pointer.
//! [`Allocator::payload`] and [`Allocator::payload_mut`] give access to the
//! bytes behind an offset.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow-only region**: Memory is never returned to the extender
//! - **16-byte alignment**: Larger alignments are not supported

pub mod align;
mod allocator;
mod block;
mod checker;
mod config;
mod error;
mod extender;
mod free_list;
mod stats;

pub use allocator::Allocator;
pub use block::{MIN_BLOCK_SIZE, WSIZE};
#[cfg(any(debug_assertions, feature = "checker"))]
pub use checker::HeapCorruption;
pub use config::AllocatorConfig;
pub use error::{AllocError, ConfigError, ExtendError};
#[cfg(unix)]
pub use extender::MmapHeap;
pub use extender::{ArenaHeap, HeapExtender};
pub use free_list::NUM_BINS;
pub use stats::HeapStats;
