use tracing::{debug, trace, warn};
use validator::Validate;

use crate::align::{checked_align, is_aligned};
use crate::block::{Block, Header, MIN_BLOCK_SIZE, WSIZE, write_word};
use crate::checker::heap_check;
use crate::config::AllocatorConfig;
use crate::error::{AllocError, ConfigError};
use crate::extender::HeapExtender;
use crate::free_list::FreeLists;
use crate::stats::HeapStats;

/// Alignment padding, prologue and epilogue.
const SENTINEL_OVERHEAD: usize = WSIZE + 2 * WSIZE + WSIZE;

/// The prologue header lives right after the alignment padding word.
pub(crate) const PROLOGUE: Block = Block(WSIZE);
pub(crate) const PROLOGUE_SIZE: usize = 2 * WSIZE;

/// Block size needed to serve a request of `size` payload bytes.
fn adjusted_size(size: usize) -> Option<usize> {
  let size = checked_align(size.checked_add(WSIZE)?)?;
  Some(size.max(MIN_BLOCK_SIZE))
}

fn oversized(size: usize) -> AllocError {
  AllocError::OverflowRejected { count: 1, size }
}

/// Segregated-fit allocator over a region grown by a [`HeapExtender`].
///
/// Pointers are payload offsets into the extender's region.
pub struct Allocator<E: HeapExtender> {
  pub(crate) extender: E,
  pub(crate) bins: FreeLists,
  config: AllocatorConfig,
  initialized: bool,
}

impl<E: HeapExtender> Allocator<E> {
  /// Builds an allocator over `extender`, rejecting chunk sizes that could
  /// not be formatted into well-formed blocks.
  pub fn new(
    extender: E,
    config: AllocatorConfig,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self::with_valid_config(extender, config))
  }

  pub fn with_extender(extender: E) -> Self {
    Self::with_valid_config(extender, AllocatorConfig::default())
  }

  fn with_valid_config(
    extender: E,
    config: AllocatorConfig,
  ) -> Self {
    Self {
      extender,
      bins: FreeLists::new(),
      config,
      initialized: false,
    }
  }

  pub fn extender(&self) -> &E {
    &self.extender
  }

  pub fn heap_size(&self) -> usize {
    self.extender.heap_size()
  }

  pub(crate) fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Discards any previous heap and formats a fresh one: padding word,
  /// prologue, a single free block of `initial_chunk` bytes and the
  /// epilogue. Returns `false` if the extender cannot supply the space.
  pub fn init(&mut self) -> bool {
    match self.format_heap() {
      Ok(()) => true,
      Err(err) => {
        warn!(%err, "heap initialisation failed");
        false
      }
    }
  }

  fn format_heap(&mut self) -> Result<(), AllocError> {
    self.extender.reset();
    self.bins.clear();
    self.initialized = false;

    let chunk = self.config.initial_chunk;
    self.extender.extend(SENTINEL_OVERHEAD + chunk)?;

    let heap = self.extender.heap_mut();
    write_word(heap, 0, 0);
    let prologue = Header::new(PROLOGUE_SIZE, true, true);
    PROLOGUE.write_header(heap, prologue);
    PROLOGUE.write_footer(heap, prologue);

    let block = PROLOGUE.next(heap);
    block.write_free(heap, chunk, true);
    block
      .next(heap)
      .write_header(heap, Header::new(0, true, false));
    self.bins.insert(heap, block);

    self.initialized = true;
    debug!(heap_size = self.heap_size(), "heap initialised");
    heap_check!(self);
    Ok(())
  }

  fn ensure_initialized(&mut self) -> Result<(), AllocError> {
    if self.initialized {
      Ok(())
    } else {
      self.format_heap()
    }
  }

  /// Allocates at least `size` bytes and returns the payload offset.
  ///
  /// `allocate(0)` returns `None` and leaves the heap untouched.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<usize> {
    self.try_allocate(size).ok()
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<usize, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }
    let asize = adjusted_size(size).ok_or_else(|| oversized(size))?;
    self.ensure_initialized()?;

    let block = match self.bins.find_fit(self.extender.heap(), asize) {
      Some(block) => block,
      None => self.extend_heap(asize.max(self.config.growth_increment))?,
    };
    self.place(block, asize);

    heap_check!(self);
    Ok(block.payload())
  }

  /// Returns a block to the free lists. `None` is a no-op.
  pub fn deallocate(
    &mut self,
    ptr: Option<usize>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };

    let block = Block::from_payload(ptr);
    let heap = self.extender.heap_mut();
    let header = block.header(heap);

    block.write_free(heap, header.size, header.prev_allocated);
    block.next(heap).set_prev_allocated(heap, false);
    trace!(block = block.offset(), size = header.size, "block freed");
    self.coalesce(block);

    heap_check!(self);
  }

  /// Resizes the allocation at `ptr` to `size` bytes, keeping its contents up
  /// to the smaller of the two sizes.
  ///
  /// `resize(None, n)` is `allocate(n)`; `resize(p, 0)` frees `p` and returns
  /// `None`. If a new block is needed and cannot be had, `None` is returned
  /// and `p` stays valid.
  pub fn resize(
    &mut self,
    ptr: Option<usize>,
    size: usize,
  ) -> Option<usize> {
    self.try_resize(ptr, size).ok()
  }

  pub fn try_resize(
    &mut self,
    ptr: Option<usize>,
    size: usize,
  ) -> Result<usize, AllocError> {
    let Some(ptr) = ptr else {
      return self.try_allocate(size);
    };
    if size == 0 {
      self.deallocate(Some(ptr));
      return Err(AllocError::ZeroSize);
    }
    let asize = adjusted_size(size).ok_or_else(|| oversized(size))?;

    let block = Block::from_payload(ptr);
    let heap = self.extender.heap();
    let header = block.header(heap);

    if header.size >= asize {
      self.shrink_in_place(block, asize);
      heap_check!(self);
      return Ok(ptr);
    }

    let next = block.next(heap);
    let next_header = next.header(heap);
    if !next_header.allocated && header.size + next_header.size >= asize {
      self.grow_in_place(block, next, asize);
      heap_check!(self);
      return Ok(ptr);
    }

    let new_ptr = self.try_allocate(size)?;
    let copy = (header.size - WSIZE).min(size);
    self
      .extender
      .heap_mut()
      .copy_within(ptr..ptr + copy, new_ptr);
    self.deallocate(Some(ptr));
    trace!(from = ptr, to = new_ptr, copy, "block moved");

    Ok(new_ptr)
  }

  /// Allocates a zeroed array of `count` elements of `size` bytes.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<usize> {
    self.try_zero_allocate(count, size).ok()
  }

  pub fn try_zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<usize, AllocError> {
    let total = count.checked_mul(size).ok_or_else(|| {
      warn!(count, size, "zero_allocate size overflow");
      AllocError::OverflowRejected { count, size }
    })?;

    let ptr = self.try_allocate(total)?;
    self.payload_mut(ptr).fill(0);
    Ok(ptr)
  }

  /// Payload bytes the allocation at `ptr` can hold.
  pub fn usable_size(
    &self,
    ptr: usize,
  ) -> usize {
    Block::from_payload(ptr).size(self.extender.heap()) - WSIZE
  }

  pub fn payload(
    &self,
    ptr: usize,
  ) -> &[u8] {
    let len = self.usable_size(ptr);
    &self.extender.heap()[ptr..ptr + len]
  }

  pub fn payload_mut(
    &mut self,
    ptr: usize,
  ) -> &mut [u8] {
    let len = self.usable_size(ptr);
    &mut self.extender.heap_mut()[ptr..ptr + len]
  }

  pub fn in_heap(
    &self,
    offset: usize,
  ) -> bool {
    self.extender.heap_size() > 0
      && offset >= self.extender.lowest_address()
      && offset <= self.extender.highest_address()
  }

  pub fn is_aligned(
    &self,
    offset: usize,
  ) -> bool {
    is_aligned(offset)
  }

  /// Walks the heap and tallies its blocks.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.heap_size(),
      ..HeapStats::default()
    };
    if !self.is_initialized() {
      return stats;
    }

    let heap = self.extender.heap();
    let mut block = PROLOGUE.next(heap);
    loop {
      let header = block.header(heap);
      if header.size == 0 {
        break;
      }
      stats.record(header.size, header.allocated);
      block = block.next(heap);
    }
    stats
  }

  /// Grows the region by `size` bytes, formats the new space as a free
  /// block in place of the old epilogue and merges it with a free
  /// predecessor. The returned block is in the free lists.
  fn extend_heap(
    &mut self,
    size: usize,
  ) -> Result<Block, AllocError> {
    let size = checked_align(size).ok_or_else(|| oversized(size))?;
    let old_brk = self.extender.extend(size)?;

    let heap = self.extender.heap_mut();
    let block = Block(old_brk - WSIZE);
    let prev_allocated = block.header(heap).prev_allocated;
    block.write_free(heap, size, prev_allocated);
    block
      .next(heap)
      .write_header(heap, Header::new(0, true, false));
    debug!(
      block = block.offset(),
      size,
      heap_size = heap.len(),
      "heap extended"
    );

    Ok(self.coalesce(block))
  }

  /// Merges the free block at `block` with its free neighbours and inserts
  /// the result into the free lists. `block` must not be in a bin yet.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let heap = self.extender.heap_mut();
    let header = block.header(heap);
    let next = block.next(heap);
    let next_header = next.header(heap);

    let mut start = block;
    let mut size = header.size;
    let mut prev_allocated = header.prev_allocated;

    if !next_header.allocated {
      self.bins.remove(heap, next);
      size += next_header.size;
    }
    if !header.prev_allocated {
      let prev = block.prev(heap);
      let prev_header = prev.header(heap);
      self.bins.remove(heap, prev);
      start = prev;
      size += prev_header.size;
      prev_allocated = prev_header.prev_allocated;
    }

    if start != block || size != header.size {
      trace!(block = start.offset(), size, "blocks coalesced");
    }
    start.write_free(heap, size, prev_allocated);
    self.bins.insert(heap, start);
    start
  }

  /// Marks `asize` bytes of the free block at `block` allocated, returning
  /// any remainder of at least the minimum block size to the free lists.
  fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let heap = self.extender.heap_mut();
    let header = block.header(heap);
    self.bins.remove(heap, block);

    let remainder = header.size - asize;
    if remainder >= MIN_BLOCK_SIZE {
      block.write_allocated(heap, asize, header.prev_allocated);
      let rest = block.next(heap);
      rest.write_free(heap, remainder, true);
      self.bins.insert(heap, rest);
      trace!(block = block.offset(), asize, remainder, "block split");
    } else {
      block.write_allocated(heap, header.size, header.prev_allocated);
      block.next(heap).set_prev_allocated(heap, true);
    }
  }

  fn shrink_in_place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let heap = self.extender.heap_mut();
    let header = block.header(heap);
    let remainder = header.size - asize;
    if remainder < MIN_BLOCK_SIZE {
      return;
    }

    block.write_allocated(heap, asize, header.prev_allocated);
    let rest = block.next(heap);
    rest.write_free(heap, remainder, true);
    rest.next(heap).set_prev_allocated(heap, false);
    self.coalesce(rest);
  }

  fn grow_in_place(
    &mut self,
    block: Block,
    next: Block,
    asize: usize,
  ) {
    let heap = self.extender.heap_mut();
    let header = block.header(heap);
    let total = header.size + next.size(heap);
    self.bins.remove(heap, next);

    let remainder = total - asize;
    if remainder >= MIN_BLOCK_SIZE {
      block.write_allocated(heap, asize, header.prev_allocated);
      let rest = block.next(heap);
      rest.write_free(heap, remainder, true);
      self.bins.insert(heap, rest);
    } else {
      block.write_allocated(heap, total, header.prev_allocated);
      block.next(heap).set_prev_allocated(heap, true);
    }
    trace!(
      block = block.offset(),
      size = block.size(heap),
      "block grown in place"
    );
  }
}
