mod terminal;

pub use terminal::TerminalPad;

use crate::core::led_grid::{LedId, Rgb};
use anyhow::Result;

/// Something that can light addressable RGB LEDs.
pub trait LedSink {
  /// Sets one LED. Channels are in `0..=63`.
  fn set_led(&mut self, id: LedId, color: Rgb) -> Result<()>;

  /// Sets every LED to `color`.
  fn fill(&mut self, color: Rgb) -> Result<()>;

  /// Turns everything off and hands the device back.
  fn reset(&mut self) -> Result<()>;

  /// Pushes buffered commands to the device.
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }
}
