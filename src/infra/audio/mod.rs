// Audio input for the visualizer.
// The core only sees `PcmSource`: blocking reads of interleaved i16 blocks.
// `capture` provides the cpal implementation (ALSA/PulseAudio, WASAPI, CoreAudio).

mod capture;

pub use capture::{list_input_devices, CpalSourceFactory};

use std::fmt;
use std::time::Duration;

/// Errors from opening or reading an audio source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
  /// The device could not be found or the stream could not be started.
  Open(String),
  /// The running stream failed or went away.
  Stream(String),
  /// The device delivers something we can't turn into i16 PCM.
  Unsupported(String),
}

impl CaptureError {
  /// Whether reopening the source can fix this.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, CaptureError::Open(_) | CaptureError::Stream(_))
  }
}

impl fmt::Display for CaptureError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CaptureError::Open(msg) => write!(f, "failed to open audio stream: {}", msg),
      CaptureError::Stream(msg) => write!(f, "audio stream error: {}", msg),
      CaptureError::Unsupported(msg) => write!(f, "unsupported audio input: {}", msg),
    }
  }
}

impl std::error::Error for CaptureError {}

/// A running stream of fixed-size PCM blocks.
pub trait PcmSource {
  fn sample_rate(&self) -> u32;

  fn channels(&self) -> u16;

  /// Samples per block, all channels interleaved.
  fn block_len(&self) -> usize;

  /// Waits up to `timeout` for the next block. `Ok(None)` means nothing
  /// arrived in time.
  fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>, CaptureError>;
}

/// Opens (and reopens after faults) a `PcmSource`.
pub trait PcmSourceFactory: Send {
  fn open(&mut self) -> Result<Box<dyn PcmSource>, CaptureError>;
}
