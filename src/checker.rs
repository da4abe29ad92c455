//! Heap consistency checker.
//!
//! Only compiled into debug builds or with the `checker` feature; release
//! builds without it carry no trace of it.

/// Runs the checker on `$allocator` after a mutating operation and panics on
/// the first violation. Active in every debug build; `paranoid` turns it on
/// for release builds as well.
macro_rules! heap_check {
  ($allocator:expr) => {
    #[cfg(any(debug_assertions, feature = "paranoid"))]
    {
      assert!($allocator.check_heap(line!()), "heap corruption detected");
    }
  };
}

pub(crate) use heap_check;

#[cfg(any(debug_assertions, feature = "checker"))]
pub use imp::HeapCorruption;

#[cfg(any(debug_assertions, feature = "checker"))]
mod imp {
  use std::collections::BTreeSet;

  use thiserror::Error;
  use tracing::error;

  use crate::align::is_aligned;
  use crate::allocator::{Allocator, PROLOGUE, PROLOGUE_SIZE};
  use crate::block::{Block, Header, MIN_BLOCK_SIZE, WSIZE, decode, read_word};
  use crate::extender::HeapExtender;
  use crate::free_list::{NUM_BINS, next_link, prev_link, size_class};

  /// The first invariant violation found by [`Allocator::verify`].
  #[derive(Debug, Clone, PartialEq, Eq, Error)]
  pub enum HeapCorruption {
    #[error("heap of {heap_size} bytes is too small to hold the sentinels")]
    Truncated { heap_size: usize },

    #[error("prologue is damaged: {header:?}")]
    BadPrologue { header: Header },

    #[error("block at {block} has a misaligned payload")]
    Misaligned { block: usize },

    #[error("block at {block} has invalid size {size}")]
    BadSize { block: usize, size: usize },

    #[error("block at {block} runs past the end of the heap ({heap_size} bytes)")]
    Overrun { block: usize, heap_size: usize },

    #[error("free block at {block} has header {header:?} but footer {footer:?}")]
    FooterMismatch {
      block: usize,
      header: Header,
      footer: Header,
    },

    #[error("free blocks at {first} and {second} were not coalesced")]
    Uncoalesced { first: usize, second: usize },

    #[error("block at {block} has prev_allocated={recorded}, predecessor has {actual}")]
    PrevAllocatedMismatch {
      block: usize,
      recorded: bool,
      actual: bool,
    },

    #[error("epilogue at {block} is damaged: {header:?}")]
    BadEpilogue { block: usize, header: Header },

    #[error("bin {bin} links to {block}, outside the heap")]
    LinkOutOfBounds { bin: usize, block: usize },

    #[error("bin {bin} holds allocated block at {block}")]
    ListedAllocated { bin: usize, block: usize },

    #[error("bin {bin} holds block at {block} of size {size}, which belongs in bin {expected}")]
    WrongBin {
      bin: usize,
      block: usize,
      size: usize,
      expected: usize,
    },

    #[error("bin {bin}: back link of block at {block} is broken")]
    BrokenBackLink { bin: usize, block: usize },

    #[error("bin {bin} is cyclic or holds more blocks than the heap can")]
    Cycle { bin: usize },

    #[error("bin {bin} holds block at {block}, which the heap walk never reached as free")]
    NotInHeap { bin: usize, block: usize },

    #[error("heap walk found {walked} free blocks but the bins hold {listed}")]
    FreeCountMismatch { walked: usize, listed: usize },
  }

  impl<E: HeapExtender> Allocator<E> {
    /// Checks every heap invariant, logging the first violation together
    /// with `id` (typically the caller's line number).
    pub fn check_heap(
      &self,
      id: u32,
    ) -> bool {
      match self.verify() {
        Ok(()) => true,
        Err(corruption) => {
          error!(id, %corruption, "heap check failed");
          false
        }
      }
    }

    /// Structured form of [`Allocator::check_heap`].
    pub fn verify(&self) -> Result<(), HeapCorruption> {
      if !self.is_initialized() {
        return Ok(());
      }
      let walked = self.walk_heap()?;
      self.walk_bins(&walked)
    }

    /// Walks every block from the prologue to the epilogue and returns the
    /// free blocks it found.
    fn walk_heap(&self) -> Result<BTreeSet<Block>, HeapCorruption> {
      let heap = self.extender.heap();
      let heap_size = heap.len();
      if heap_size < PROLOGUE.offset() + PROLOGUE_SIZE + WSIZE {
        return Err(HeapCorruption::Truncated { heap_size });
      }

      let prologue = PROLOGUE.header(heap);
      let prologue_footer = decode(read_word(heap, PROLOGUE.offset() + WSIZE));
      if prologue.size != PROLOGUE_SIZE || !prologue.allocated || prologue != prologue_footer {
        return Err(HeapCorruption::BadPrologue { header: prologue });
      }

      let mut free = BTreeSet::new();
      let mut prev_allocated = true;
      let mut prev_block = PROLOGUE;
      let mut block = PROLOGUE.next(heap);

      loop {
        let offset = block.offset();
        if offset + WSIZE > heap_size {
          return Err(HeapCorruption::Overrun {
            block: prev_block.offset(),
            heap_size,
          });
        }
        let header = block.header(heap);

        if header.prev_allocated != prev_allocated {
          return Err(HeapCorruption::PrevAllocatedMismatch {
            block: offset,
            recorded: header.prev_allocated,
            actual: prev_allocated,
          });
        }

        if header.size == 0 {
          if !header.allocated || offset + WSIZE != heap_size {
            return Err(HeapCorruption::BadEpilogue { block: offset, header });
          }
          return Ok(free);
        }

        if !is_aligned(block.payload()) {
          return Err(HeapCorruption::Misaligned { block: offset });
        }
        if header.size < MIN_BLOCK_SIZE || !is_aligned(header.size) {
          return Err(HeapCorruption::BadSize {
            block: offset,
            size: header.size,
          });
        }
        if offset + header.size + WSIZE > heap_size {
          return Err(HeapCorruption::Overrun { block: offset, heap_size });
        }

        if !header.allocated {
          let footer = block.footer(heap);
          if footer != header {
            return Err(HeapCorruption::FooterMismatch {
              block: offset,
              header,
              footer,
            });
          }
          if !prev_allocated {
            return Err(HeapCorruption::Uncoalesced {
              first: prev_block.offset(),
              second: offset,
            });
          }
          free.insert(block);
        }

        prev_allocated = header.allocated;
        prev_block = block;
        block = block.next(heap);
      }
    }

    /// Walks every bin and matches its members against the heap walk.
    fn walk_bins(
      &self,
      walked: &BTreeSet<Block>,
    ) -> Result<(), HeapCorruption> {
      let heap = self.extender.heap();
      let max_members = heap.len() / MIN_BLOCK_SIZE;
      let mut listed = 0;

      for bin in 0..NUM_BINS {
        let mut prev = None;
        let mut current = self.bins.head(bin);
        let mut members = 0;

        while let Some(block) = current {
          let offset = block.offset();
          if !self.in_heap(offset) || offset + MIN_BLOCK_SIZE > heap.len() {
            return Err(HeapCorruption::LinkOutOfBounds { bin, block: offset });
          }
          let header = block.header(heap);
          if header.allocated {
            return Err(HeapCorruption::ListedAllocated { bin, block: offset });
          }
          if !walked.contains(&block) {
            return Err(HeapCorruption::NotInHeap { bin, block: offset });
          }
          let expected = size_class(header.size);
          if expected != bin {
            return Err(HeapCorruption::WrongBin {
              bin,
              block: offset,
              size: header.size,
              expected,
            });
          }
          if prev_link(heap, block) != prev {
            return Err(HeapCorruption::BrokenBackLink { bin, block: offset });
          }

          members += 1;
          if members > max_members {
            return Err(HeapCorruption::Cycle { bin });
          }
          prev = Some(block);
          current = next_link(heap, block);
        }
        listed += members;
      }

      if listed != walked.len() {
        return Err(HeapCorruption::FreeCountMismatch {
          walked: walked.len(),
          listed,
        });
      }
      Ok(())
    }
  }

  #[cfg(test)]
  mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::block::write_word;
    use crate::extender::ArenaHeap;

    fn allocator() -> Allocator<ArenaHeap> {
      let mut allocator = Allocator::with_extender(ArenaHeap::new(1 << 20));
      assert!(allocator.init());
      allocator
    }

    #[test]
    fn test_fresh_heap_is_consistent() {
      let allocator = allocator();
      assert_eq!(allocator.verify(), Ok(()));
      assert!(allocator.check_heap(line!()));
    }

    #[test]
    fn test_uninitialized_heap_is_consistent() {
      let allocator = Allocator::with_extender(ArenaHeap::new(1 << 20));
      assert!(allocator.check_heap(line!()));
    }

    #[test]
    fn test_detects_footer_mismatch() {
      let mut allocator = allocator();
      let first = PROLOGUE.next(allocator.extender.heap());
      let footer = first.offset() + 4096 - WSIZE;
      write_word(allocator.extender.heap_mut(), footer, 0);

      assert!(matches!(
        allocator.verify(),
        Err(HeapCorruption::FooterMismatch { block, .. })
          if block == first.offset()
      ));
    }

    #[test]
    fn test_detects_uncoalesced_neighbours() {
      let mut allocator = allocator();
      let a = allocator.allocate(32).unwrap();
      let _b = allocator.allocate(32).unwrap();

      // Free `a` behind the allocator's back so nothing gets merged, then
      // pretend its successor was freed the same way.
      let block = Block::from_payload(a);
      let heap = allocator.extender.heap_mut();
      let size = block.size(heap);
      block.write_free(heap, size, true);
      let next = block.next(heap);
      let next_size = next.size(heap);
      next.write_free(heap, next_size, false);

      assert!(matches!(
        allocator.verify(),
        Err(HeapCorruption::Uncoalesced { first, .. })
          if first == block.offset()
      ));
    }

    #[test]
    fn test_detects_stale_prev_allocated() {
      let mut allocator = allocator();
      let a = allocator.allocate(32).unwrap();
      let block = Block::from_payload(a);
      let heap = allocator.extender.heap_mut();
      block.next(heap).set_prev_allocated(heap, false);

      assert!(matches!(
        allocator.verify(),
        Err(HeapCorruption::PrevAllocatedMismatch {
          recorded: false,
          actual: true,
          ..
        })
      ));
    }

    #[test]
    #[cfg(any(debug_assertions, feature = "paranoid"))]
    #[should_panic(expected = "heap corruption detected")]
    fn test_mutation_on_corrupt_heap_panics() {
      let mut allocator = allocator();
      let a = allocator.allocate(32).unwrap();
      let b = allocator.allocate(32).unwrap();
      let heap = allocator.extender.heap_mut();
      Block::from_payload(b).next(heap).set_prev_allocated(heap, false);

      allocator.deallocate(Some(a));
    }

    #[test]
    fn test_detects_free_block_missing_from_bins() {
      let mut allocator = allocator();
      allocator.bins.clear();

      assert_eq!(
        allocator.verify(),
        Err(HeapCorruption::FreeCountMismatch { walked: 1, listed: 0 })
      );
    }

    #[test]
    fn test_detects_allocated_block_in_bin() {
      let mut allocator = allocator();
      let a = allocator.allocate(32).unwrap();
      let block = Block::from_payload(a);
      let heap = allocator.extender.heap_mut();
      allocator.bins.insert(heap, block);

      assert!(matches!(
        allocator.verify(),
        Err(HeapCorruption::ListedAllocated { bin: 1, .. })
      ));
    }

    #[test]
    fn test_detects_bad_size() {
      let mut allocator = allocator();
      let a = allocator.allocate(32).unwrap();
      let block = Block::from_payload(a);
      let heap = allocator.extender.heap_mut();
      block.write_header(heap, Header::new(24, true, true));

      assert!(matches!(
        allocator.verify(),
        Err(HeapCorruption::BadSize { size: 16, .. })
      ));
    }

    #[traced_test]
    #[test]
    fn test_check_heap_logs_identifier() {
      let mut allocator = allocator();
      allocator.bins.clear();

      assert!(!allocator.check_heap(4242));
      assert!(logs_contain("heap check failed"));
      assert!(logs_contain("4242"));
    }
  }
}
