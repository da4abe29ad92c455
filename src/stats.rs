/// A snapshot of how the managed region is carved up. Sentinels and the
/// alignment padding are counted in `heap_size` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  pub(crate) fn record(
    &mut self,
    size: usize,
    allocated: bool,
  ) {
    if allocated {
      self.allocated_blocks += 1;
      self.allocated_bytes += size;
    } else {
      self.free_blocks += 1;
      self.free_bytes += size;
      self.largest_free = self.largest_free.max(size);
    }
  }

  /// Share of the region held by allocated blocks, in `[0, 1]`.
  pub fn utilization(&self) -> f64 {
    if self.heap_size == 0 {
      0.0
    } else {
      self.allocated_bytes as f64 / self.heap_size as f64
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record() {
    let mut stats = HeapStats {
      heap_size: 256,
      ..Default::default()
    };
    stats.record(64, true);
    stats.record(32, false);
    stats.record(128, false);

    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(stats.allocated_bytes, 64);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.free_bytes, 160);
    assert_eq!(stats.largest_free, 128);
    assert_eq!(stats.utilization(), 0.25);
  }

  #[test]
  fn test_utilization_of_empty_heap() {
    assert_eq!(HeapStats::default().utilization(), 0.0);
  }
}
