use std::sync::{Mutex, MutexGuard};

struct Published {
  levels: Vec<u32>,
  generation: u64,
}

/// Latest band levels, shared between the capture and render workers.
///
/// Writers replace the whole vector and readers copy the whole vector, each
/// inside one short critical section, so a reader always sees exactly one
/// completed publish. Nothing blocking happens while the lock is held.
pub struct SharedBandState {
  inner: Mutex<Published>,
  len: usize,
}

impl SharedBandState {
  /// All-zero state for `len` bands, generation 0.
  pub fn new(len: usize) -> Self {
    Self {
      inner: Mutex::new(Published {
        levels: vec![0; len],
        generation: 0,
      }),
      len,
    }
  }

  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self.len
  }

  /// Replaces all levels at once. Extra values are ignored and missing ones
  /// are zeroed, so the vector never changes size.
  pub fn publish(&self, levels: &[u32]) {
    let mut published = self.lock();
    for (slot, value) in published
      .levels
      .iter_mut()
      .zip(levels.iter().copied().chain(std::iter::repeat(0)))
    {
      *slot = value;
    }
    published.generation = published.generation.wrapping_add(1);
  }

  /// Copies the current levels into `out` and returns their generation.
  pub fn snapshot_into(&self, out: &mut [u32]) -> u64 {
    let published = self.lock();
    let n = out.len().min(published.levels.len());
    out[..n].copy_from_slice(&published.levels[..n]);
    published.generation
  }

  #[allow(dead_code)]
  pub fn snapshot(&self) -> Vec<u32> {
    let mut out = vec![0; self.len];
    self.snapshot_into(&mut out);
    out
  }

  fn lock(&self) -> MutexGuard<'_, Published> {
    // levels are plain values; a panic elsewhere can't leave them half-built
    self
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
