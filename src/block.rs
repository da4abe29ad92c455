use crate::align::ALIGNMENT;

/// Size of a header, footer or link word. Header bits 4.. hold the size,
/// bit 0 the allocated flag and bit 1 that of the preceding block.
pub const WSIZE: usize = 8;

/// Header, two links and footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WSIZE;

const ALLOCATED: u64 = 0x1;
const PREV_ALLOCATED: u64 = 0x2;
const SIZE_MASK: u64 = !(ALIGNMENT as u64 - 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  pub size: usize,
  pub allocated: bool,
  pub prev_allocated: bool,
}

impl Header {
  pub fn new(
    size: usize,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    Self {
      size,
      allocated,
      prev_allocated,
    }
  }
}

pub fn encode(
  size: usize,
  allocated: bool,
  prev_allocated: bool,
) -> u64 {
  let mut word = size as u64 & SIZE_MASK;
  if allocated {
    word |= ALLOCATED;
  }
  if prev_allocated {
    word |= PREV_ALLOCATED;
  }
  word
}

pub fn decode(word: u64) -> Header {
  Header {
    size: (word & SIZE_MASK) as usize,
    allocated: word & ALLOCATED != 0,
    prev_allocated: word & PREV_ALLOCATED != 0,
  }
}

pub fn payload_of(block: usize) -> usize {
  block + WSIZE
}

pub fn block_of(payload: usize) -> usize {
  payload - WSIZE
}

/// Position of the footer of the free block at `block`.
pub fn footer_of(
  heap: &[u8],
  block: usize,
) -> usize {
  block + Block(block).header(heap).size - WSIZE
}

pub fn read_word(
  heap: &[u8],
  at: usize,
) -> u64 {
  let mut bytes = [0u8; WSIZE];
  bytes.copy_from_slice(&heap[at..at + WSIZE]);
  u64::from_ne_bytes(bytes)
}

pub fn write_word(
  heap: &mut [u8],
  at: usize,
  word: u64,
) {
  heap[at..at + WSIZE].copy_from_slice(&word.to_ne_bytes());
}

/// A view of one block: the offset of its header inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(pub usize);

impl Block {
  pub fn from_payload(payload: usize) -> Self {
    Block(block_of(payload))
  }

  pub fn offset(self) -> usize {
    self.0
  }

  pub fn payload(self) -> usize {
    payload_of(self.0)
  }

  pub fn header(
    self,
    heap: &[u8],
  ) -> Header {
    decode(read_word(heap, self.0))
  }

  pub fn size(
    self,
    heap: &[u8],
  ) -> usize {
    self.header(heap).size
  }

  pub fn write_header(
    self,
    heap: &mut [u8],
    header: Header,
  ) {
    write_word(
      heap,
      self.0,
      encode(header.size, header.allocated, header.prev_allocated),
    );
  }

  /// Writes the footer that mirrors `header`; the block must be free.
  pub fn write_footer(
    self,
    heap: &mut [u8],
    header: Header,
  ) {
    write_word(
      heap,
      self.0 + header.size - WSIZE,
      encode(header.size, header.allocated, header.prev_allocated),
    );
  }

  pub fn write_allocated(
    self,
    heap: &mut [u8],
    size: usize,
    prev_allocated: bool,
  ) {
    self.write_header(heap, Header::new(size, true, prev_allocated));
  }

  /// Header and footer of a free block in one go.
  pub fn write_free(
    self,
    heap: &mut [u8],
    size: usize,
    prev_allocated: bool,
  ) {
    let header = Header::new(size, false, prev_allocated);
    self.write_header(heap, header);
    self.write_footer(heap, header);
  }

  pub fn footer(
    self,
    heap: &[u8],
  ) -> Header {
    decode(read_word(heap, footer_of(heap, self.0)))
  }

  pub fn next(
    self,
    heap: &[u8],
  ) -> Block {
    Block(self.0 + self.size(heap))
  }

  /// The preceding block, found through its footer. Only valid when the
  /// header says the predecessor is free.
  pub fn prev(
    self,
    heap: &[u8],
  ) -> Block {
    let prev_footer = decode(read_word(heap, self.0 - WSIZE));
    Block(self.0 - prev_footer.size)
  }

  pub fn set_prev_allocated(
    self,
    heap: &mut [u8],
    prev_allocated: bool,
  ) {
    let mut header = self.header(heap);
    header.prev_allocated = prev_allocated;
    self.write_header(heap, header);
    if !header.allocated && header.size > 0 {
      self.write_footer(heap, header);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_decode() {
    for &size in &[0usize, 16, 32, 48, 4096, 1 << 30] {
      for &allocated in &[false, true] {
        for &prev_allocated in &[false, true] {
          let header = decode(encode(size, allocated, prev_allocated));
          assert_eq!(header, Header::new(size, allocated, prev_allocated));
        }
      }
    }
  }

  #[test]
  fn test_flag_bits() {
    assert_eq!(encode(32, true, false), 33);
    assert_eq!(encode(32, false, true), 34);
    assert_eq!(encode(32, true, true), 35);
  }

  #[test]
  fn test_payload_conversion() {
    assert_eq!(payload_of(24), 32);
    assert_eq!(block_of(32), 24);
    assert_eq!(Block::from_payload(48).offset(), 40);
    assert_eq!(Block(40).payload(), 48);
  }

  #[test]
  fn test_free_block_boundary_tags() {
    let mut heap = vec![0u8; 128];
    let block = Block(8);
    block.write_free(&mut heap, 64, true);

    assert_eq!(footer_of(&heap, 8), 64);
    assert_eq!(block.header(&heap), block.footer(&heap));
    assert_eq!(block.next(&heap), Block(72));
    assert_eq!(Block(72).prev(&heap), block);
  }

  #[test]
  fn test_set_prev_allocated_updates_footer() {
    let mut heap = vec![0u8; 128];
    let block = Block(8);
    block.write_free(&mut heap, 48, true);
    block.set_prev_allocated(&mut heap, false);

    assert!(!block.header(&heap).prev_allocated);
    assert_eq!(block.header(&heap), block.footer(&heap));
  }
}
