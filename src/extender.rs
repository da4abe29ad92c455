use tracing::{debug, warn};

use crate::config::AllocatorConfig;
use crate::error::ExtendError;

/// The `sbrk`-like primitive the allocator grows its region through.
///
/// Positions are byte offsets from the start of the region, so growth that
/// relocates the backing storage (as [`ArenaHeap`] may) never invalidates
/// them.
pub trait HeapExtender {
  /// Appends `incr` bytes to the region and returns the old break, which is
  /// the offset of the first new byte. On failure the region is unchanged.
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ExtendError>;

  fn heap(&self) -> &[u8];

  fn heap_mut(&mut self) -> &mut [u8];

  /// Drops the whole region, returning the break to zero.
  fn reset(&mut self);

  fn heap_size(&self) -> usize {
    self.heap().len()
  }

  fn lowest_address(&self) -> usize {
    0
  }

  /// Offset of the last byte in the region; zero while the region is empty.
  fn highest_address(&self) -> usize {
    self.heap_size().saturating_sub(1)
  }
}

/// A simulated break over an owned `Vec<u8>` with a hard size limit.
pub struct ArenaHeap {
  bytes: Vec<u8>,
  max_size: usize,
}

impl ArenaHeap {
  pub fn new(max_size: usize) -> Self {
    Self {
      bytes: Vec::new(),
      max_size,
    }
  }

  pub fn from_config(config: &AllocatorConfig) -> Self {
    Self::new(config.max_heap)
  }
}

impl Default for ArenaHeap {
  fn default() -> Self {
    Self::from_config(&AllocatorConfig::default())
  }
}

impl HeapExtender for ArenaHeap {
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ExtendError> {
    let old_brk = self.bytes.len();
    let remaining = self.max_size - old_brk;

    if incr > remaining {
      warn!(requested = incr, remaining, "arena heap refused to grow");
      return Err(ExtendError::Exhausted {
        requested: incr,
        remaining,
      });
    }

    self.bytes.resize(old_brk + incr, 0);
    debug!(old_brk, new_brk = self.bytes.len(), "arena heap extended");
    Ok(old_brk)
  }

  fn heap(&self) -> &[u8] {
    &self.bytes
  }

  fn heap_mut(&mut self) -> &mut [u8] {
    &mut self.bytes
  }

  fn reset(&mut self) {
    self.bytes.clear();
  }
}

/// A break moving inside one anonymous mapping reserved up front with
/// `mmap(2)`. The mapping is page aligned, so aligned offsets are aligned
/// addresses too.
#[cfg(unix)]
pub struct MmapHeap {
  base: *mut u8,
  brk: usize,
  max_size: usize,
}

#[cfg(unix)]
impl MmapHeap {
  pub fn new(max_size: usize) -> Result<Self, ExtendError> {
    let address = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        max_size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(ExtendError::Reserve {
        size: max_size,
        source: std::io::Error::last_os_error(),
      });
    }

    debug!(?address, max_size, "reserved mmap heap");

    Ok(Self {
      base: address as *mut u8,
      brk: 0,
      max_size,
    })
  }

  pub fn from_config(config: &AllocatorConfig) -> Result<Self, ExtendError> {
    Self::new(config.max_heap)
  }

  /// Absolute address of the region start.
  pub fn base(&self) -> *const u8 {
    self.base
  }
}

#[cfg(unix)]
impl HeapExtender for MmapHeap {
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ExtendError> {
    let old_brk = self.brk;
    let remaining = self.max_size - old_brk;

    if incr > remaining {
      warn!(requested = incr, remaining, "mmap heap refused to grow");
      return Err(ExtendError::Exhausted {
        requested: incr,
        remaining,
      });
    }

    self.brk += incr;
    debug!(old_brk, new_brk = self.brk, "mmap heap extended");
    Ok(old_brk)
  }

  fn heap(&self) -> &[u8] {
    // SAFETY: `base` maps `max_size` readable bytes for the lifetime of self
    // and `brk <= max_size`.
    unsafe { std::slice::from_raw_parts(self.base, self.brk) }
  }

  fn heap_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `heap`, and `&mut self` makes the slice unique.
    unsafe { std::slice::from_raw_parts_mut(self.base, self.brk) }
  }

  fn reset(&mut self) {
    self.brk = 0;
  }
}

#[cfg(unix)]
impl Drop for MmapHeap {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base as *mut libc::c_void, self.max_size);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_extend() {
    let mut heap = ArenaHeap::new(64);

    assert_eq!(heap.extend(16).unwrap(), 0);
    assert_eq!(heap.extend(32).unwrap(), 16);
    assert_eq!(heap.heap_size(), 48);
    assert_eq!(heap.lowest_address(), 0);
    assert_eq!(heap.highest_address(), 47);
  }

  #[test]
  fn test_arena_exhaustion_leaves_region_unchanged() {
    let mut heap = ArenaHeap::new(64);
    heap.extend(48).unwrap();

    let err = heap.extend(32).unwrap_err();

    assert!(matches!(
      err,
      ExtendError::Exhausted {
        requested: 32,
        remaining: 16
      }
    ));
    assert_eq!(heap.heap_size(), 48);
  }

  #[test]
  fn test_arena_reset() {
    let mut heap = ArenaHeap::new(64);
    heap.extend(48).unwrap();
    heap.reset();

    assert_eq!(heap.heap_size(), 0);
    assert_eq!(heap.extend(16).unwrap(), 0);
  }

  #[cfg(unix)]
  #[test]
  fn test_mmap_heap() {
    let mut heap = MmapHeap::new(1 << 20).unwrap();

    assert_eq!(heap.base() as usize % 4096, 0);
    assert_eq!(heap.extend(4096).unwrap(), 0);

    heap.heap_mut()[4095] = 0xAB;
    assert_eq!(heap.heap()[4095], 0xAB);

    assert!(heap.extend(1 << 20).is_err());
    assert_eq!(heap.heap_size(), 4096);
  }
}
