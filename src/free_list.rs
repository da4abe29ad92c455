//! Segregated free lists.
//!
//! ```text
//!   bin 0  (16, 32]     ──► [32] ◄──► [32]
//!   bin 1  (32, 64]     ──► [48] ◄──► [64] ◄──► [48]
//!   bin 2  (64, 128]    ──► ∅
//!   ...
//!   bin 13 (128K, ∞)    ──► [1M]
//! ```
//!
//! Each bin is an intrusive doubly linked list threaded through the first two
//! payload words of its free blocks. Links are heap offsets; zero stands for
//! "none" because offset zero is the alignment padding word and never a block.

use crate::block::{Block, WSIZE, read_word, write_word};

pub const NUM_BINS: usize = 14;

const NIL: u64 = 0;

/// Index of the bin covering `size`. Bin `i` holds sizes in
/// `(2^(i+4), 2^(i+5)]`, with the last bin open-ended.
pub fn size_class(size: usize) -> usize {
  let bits = (usize::BITS - size.saturating_sub(1).leading_zeros()) as usize;
  bits.saturating_sub(5).min(NUM_BINS - 1)
}

fn decode_link(word: u64) -> Option<Block> {
  if word == NIL {
    None
  } else {
    Some(Block(word as usize))
  }
}

fn encode_link(link: Option<Block>) -> u64 {
  link.map_or(NIL, |block| block.offset() as u64)
}

pub fn prev_link(
  heap: &[u8],
  block: Block,
) -> Option<Block> {
  decode_link(read_word(heap, block.payload()))
}

pub fn next_link(
  heap: &[u8],
  block: Block,
) -> Option<Block> {
  decode_link(read_word(heap, block.payload() + WSIZE))
}

fn set_prev_link(
  heap: &mut [u8],
  block: Block,
  link: Option<Block>,
) {
  write_word(heap, block.payload(), encode_link(link));
}

fn set_next_link(
  heap: &mut [u8],
  block: Block,
  link: Option<Block>,
) {
  write_word(heap, block.payload() + WSIZE, encode_link(link));
}

#[derive(Debug, Clone, Default)]
pub struct FreeLists {
  heads: [Option<Block>; NUM_BINS],
}

impl FreeLists {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    self.heads = [None; NUM_BINS];
  }

  pub fn head(
    &self,
    bin: usize,
  ) -> Option<Block> {
    self.heads[bin]
  }

  /// Pushes a free block onto the head of its bin.
  pub fn insert(
    &mut self,
    heap: &mut [u8],
    block: Block,
  ) {
    let bin = size_class(block.size(heap));
    let head = self.heads[bin];

    set_prev_link(heap, block, None);
    set_next_link(heap, block, head);
    if let Some(head) = head {
      set_prev_link(heap, head, Some(block));
    }
    self.heads[bin] = Some(block);
  }

  /// Unlinks a free block from its bin, wherever it sits in the list.
  pub fn remove(
    &mut self,
    heap: &mut [u8],
    block: Block,
  ) {
    let prev = prev_link(heap, block);
    let next = next_link(heap, block);

    match prev {
      Some(prev) => set_next_link(heap, prev, next),
      None => {
        let bin = size_class(block.size(heap));
        self.heads[bin] = next;
      }
    }
    if let Some(next) = next {
      set_prev_link(heap, next, prev);
    }
  }

  /// First block of at least `request` bytes, searching from the request's
  /// own size class upward.
  pub fn find_fit(
    &self,
    heap: &[u8],
    request: usize,
  ) -> Option<Block> {
    (size_class(request)..NUM_BINS)
      .flat_map(|bin| self.iter(heap, bin))
      .find(|block| block.size(heap) >= request)
  }

  pub fn iter<'a>(
    &self,
    heap: &'a [u8],
    bin: usize,
  ) -> BinIter<'a> {
    BinIter {
      heap,
      current: self.heads[bin],
    }
  }
}

pub struct BinIter<'a> {
  heap: &'a [u8],
  current: Option<Block>,
}

impl Iterator for BinIter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.current?;
    self.current = next_link(self.heap, block);
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heap_with_blocks(sizes: &[usize]) -> (Vec<u8>, Vec<Block>) {
    let total: usize = sizes.iter().sum();
    let mut heap = vec![0u8; WSIZE + total + WSIZE];
    let mut blocks = Vec::new();
    let mut offset = WSIZE;

    for &size in sizes {
      let block = Block(offset);
      block.write_free(&mut heap, size, true);
      blocks.push(block);
      offset += size;
    }

    (heap, blocks)
  }

  #[test]
  fn test_size_class() {
    assert_eq!(size_class(32), 0);
    assert_eq!(size_class(33), 1);
    assert_eq!(size_class(64), 1);
    assert_eq!(size_class(65), 2);
    assert_eq!(size_class(4096), 7);
    assert_eq!(size_class(4097), 8);
    assert_eq!(size_class(1 << 17), 12);
    assert_eq!(size_class((1 << 17) + 16), NUM_BINS - 1);
    assert_eq!(size_class(usize::MAX), NUM_BINS - 1);
  }

  #[test]
  fn test_insert_is_lifo() {
    let (mut heap, blocks) = heap_with_blocks(&[48, 64, 48]);
    let mut lists = FreeLists::new();

    for &block in &blocks {
      lists.insert(&mut heap, block);
    }

    let bin: Vec<Block> = lists.iter(&heap, 1).collect();
    assert_eq!(bin, vec![blocks[2], blocks[1], blocks[0]]);
    assert_eq!(prev_link(&heap, blocks[2]), None);
    assert_eq!(prev_link(&heap, blocks[0]), Some(blocks[1]));
  }

  #[test]
  fn test_remove_any_position() {
    let (mut heap, blocks) = heap_with_blocks(&[48, 48, 48, 48]);
    let mut lists = FreeLists::new();
    for &block in &blocks {
      lists.insert(&mut heap, block);
    }

    lists.remove(&mut heap, blocks[1]);
    assert_eq!(
      lists.iter(&heap, 1).collect::<Vec<_>>(),
      vec![blocks[3], blocks[2], blocks[0]]
    );

    lists.remove(&mut heap, blocks[3]);
    assert_eq!(lists.head(1), Some(blocks[2]));

    lists.remove(&mut heap, blocks[0]);
    lists.remove(&mut heap, blocks[2]);
    assert_eq!(lists.head(1), None);
  }

  #[test]
  fn test_find_fit_first_fit_within_class() {
    let (mut heap, blocks) = heap_with_blocks(&[96, 80, 128, 256]);
    let mut lists = FreeLists::new();
    for &block in &blocks {
      lists.insert(&mut heap, block);
    }

    // Bin 2 holds 128, 80, 96 in that order; the first large enough wins.
    assert_eq!(lists.find_fit(&heap, 80), Some(blocks[2]));
    assert_eq!(lists.find_fit(&heap, 160), Some(blocks[3]));
    assert_eq!(lists.find_fit(&heap, 32), Some(blocks[2]));
    assert_eq!(lists.find_fit(&heap, 512), None);
  }

  #[test]
  fn test_find_fit_skips_small_members_of_class() {
    let (mut heap, blocks) = heap_with_blocks(&[80, 112]);
    let mut lists = FreeLists::new();
    lists.insert(&mut heap, blocks[1]);
    lists.insert(&mut heap, blocks[0]);

    assert_eq!(lists.find_fit(&heap, 96), Some(blocks[1]));
  }

  #[test]
  fn test_clear() {
    let (mut heap, blocks) = heap_with_blocks(&[48]);
    let mut lists = FreeLists::new();
    lists.insert(&mut heap, blocks[0]);
    lists.clear();

    assert!((0..NUM_BINS).all(|bin| lists.head(bin).is_none()));
  }
}
