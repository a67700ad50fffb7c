pub mod capture;
pub mod render;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag. Workers poll it between blocks and ticks.
#[derive(Clone, Default)]
pub struct StopSignal {
  stopped: Arc<AtomicBool>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }
}
