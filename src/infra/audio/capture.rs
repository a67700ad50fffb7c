use super::{CaptureError, PcmSource, PcmSourceFactory};
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Pending {
  block: Option<Vec<i16>>,
  fault: Option<String>,
  /// Blocks replaced before the worker got to them.
  dropped: u64,
}

/// Hand-off between the cpal callbacks and the capture worker.
///
/// Holds at most one block: a newer block replaces an unread one, so the
/// worker always analyzes the most recent audio. Faults have their own slot
/// and never wait behind blocks.
#[derive(Clone, Default)]
struct LatestBlock {
  inner: Arc<(Mutex<Pending>, Condvar)>,
}

impl LatestBlock {
  fn push(&self, block: Vec<i16>) {
    let (lock, ready) = &*self.inner;
    let mut pending = lock_pending(lock);
    if pending.block.replace(block).is_some() {
      pending.dropped += 1;
    }
    ready.notify_one();
  }

  /// Keeps the first fault until the worker picks it up.
  fn fault(&self, message: String) {
    let (lock, ready) = &*self.inner;
    lock_pending(lock).fault.get_or_insert(message);
    ready.notify_one();
  }

  /// Waits up to `timeout` for a block or a fault. A pending fault wins.
  fn take(&self, timeout: Duration) -> Result<Option<Vec<i16>>, CaptureError> {
    let (lock, ready) = &*self.inner;
    let (mut pending, _) = ready
      .wait_timeout_while(lock_pending(lock), timeout, |p| {
        p.block.is_none() && p.fault.is_none()
      })
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(message) = pending.fault.take() {
      return Err(CaptureError::Stream(message));
    }
    let dropped = std::mem::take(&mut pending.dropped);
    let block = pending.block.take();
    drop(pending);

    if dropped > 0 {
      debug!("skipped {} stale block(s)", dropped);
    }
    Ok(block)
  }
}

fn lock_pending(lock: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
  lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Opens cpal input streams on the device matching a name prefix.
pub struct CpalSourceFactory {
  device_prefix: Option<String>,
  frames_per_block: usize,
}

impl CpalSourceFactory {
  pub fn new(device_prefix: Option<String>, frames_per_block: usize) -> Self {
    Self {
      device_prefix,
      frames_per_block,
    }
  }
}

impl PcmSourceFactory for CpalSourceFactory {
  fn open(&mut self) -> Result<Box<dyn PcmSource>, CaptureError> {
    let source = CpalSource::open(self.device_prefix.as_deref(), self.frames_per_block)?;
    Ok(Box::new(source))
  }
}

/// Names of all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
  let host = cpal::default_host();
  let devices = host
    .input_devices()
    .map_err(|e| anyhow!("Failed to enumerate input devices: {}", e))?;
  Ok(devices.filter_map(|device| device_name(&device)).collect())
}

fn device_name(device: &Device) -> Option<String> {
  device
    .description()
    .ok()
    .map(|description| description.name().to_string())
}

/// Live cpal input stream, re-chunked into fixed-size blocks.
pub struct CpalSource {
  _stream: Stream,
  latest: LatestBlock,
  sample_rate: u32,
  channels: u16,
  block_len: usize,
}

impl CpalSource {
  fn open(device_prefix: Option<&str>, frames_per_block: usize) -> Result<Self, CaptureError> {
    let host = cpal::default_host();
    let device = Self::find_input_device(&host, device_prefix)
      .ok_or_else(|| CaptureError::Open("no input device available".to_string()))?;

    let name = device_name(&device).unwrap_or_else(|| "<unnamed>".to_string());
    let supported = device
      .default_input_config()
      .map_err(|e| CaptureError::Open(format!("{}: {}", name, e)))?;

    // Default buffer size lets the audio server pick its own period
    let config = StreamConfig {
      channels: supported.channels(),
      sample_rate: supported.sample_rate(),
      buffer_size: BufferSize::Default,
    };
    let channels = config.channels;
    let sample_rate = config.sample_rate;
    let block_len = frames_per_block * channels as usize;

    let latest = LatestBlock::default();
    let feed = latest.clone();
    let stream = match supported.sample_format() {
      SampleFormat::I16 => Self::build_stream(&device, &config, block_len, feed, |s: i16| s),
      SampleFormat::F32 => Self::build_stream(&device, &config, block_len, feed, f32_to_i16),
      SampleFormat::U16 => Self::build_stream(&device, &config, block_len, feed, u16_to_i16),
      other => {
        return Err(CaptureError::Unsupported(format!(
          "{} delivers {:?} samples",
          name, other
        )))
      }
    }?;

    stream
      .play()
      .map_err(|e| CaptureError::Open(format!("{}: {}", name, e)))?;

    info!(
      "capturing from '{}' at {} Hz, {} channel(s), {} samples per block",
      name, sample_rate, channels, block_len
    );

    Ok(Self {
      _stream: stream,
      latest,
      sample_rate,
      channels,
      block_len,
    })
  }

  /// The last input device whose name starts with `prefix`, else the host's
  /// default input device.
  fn find_input_device(host: &cpal::Host, prefix: Option<&str>) -> Option<Device> {
    if let Some(prefix) = prefix {
      if let Ok(devices) = host.input_devices() {
        let mut matched = None;
        for device in devices {
          if let Some(name) = device_name(&device) {
            debug!("found input device '{}'", name);
            if name.starts_with(prefix) {
              matched = Some(device);
            }
          }
        }
        if matched.is_some() {
          return matched;
        }
      }
      warn!(
        "no input device starting with '{}', using the default input device",
        prefix
      );
    }

    host.default_input_device()
  }

  fn build_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    block_len: usize,
    feed: LatestBlock,
    convert: F,
  ) -> Result<Stream, CaptureError>
  where
    T: SizedSample,
    F: Fn(T) -> i16 + Send + 'static,
  {
    let fault_feed = feed.clone();
    let mut assembler = BlockAssembler::new(block_len);

    let data_callback = move |data: &[T], _: &cpal::InputCallbackInfo| {
      assembler.push(data.iter().map(|&s| convert(s)), |block| feed.push(block));
    };

    let error_callback = move |err: cpal::StreamError| {
      fault_feed.fault(err.to_string());
    };

    device
      .build_input_stream(config, data_callback, error_callback, None)
      .map_err(|e| CaptureError::Open(e.to_string()))
  }
}

impl PcmSource for CpalSource {
  fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  fn channels(&self) -> u16 {
    self.channels
  }

  fn block_len(&self) -> usize {
    self.block_len
  }

  fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>, CaptureError> {
    self.latest.take(timeout)
  }
}

/// Cuts a continuous sample stream into blocks of exactly `block_len`.
struct BlockAssembler {
  block_len: usize,
  pending: Vec<i16>,
}

impl BlockAssembler {
  fn new(block_len: usize) -> Self {
    Self {
      block_len,
      pending: Vec::with_capacity(block_len),
    }
  }

  fn push<I, E>(&mut self, samples: I, mut emit: E)
  where
    I: IntoIterator<Item = i16>,
    E: FnMut(Vec<i16>),
  {
    for sample in samples {
      self.pending.push(sample);
      if self.pending.len() == self.block_len {
        let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_len));
        emit(block);
      }
    }
  }
}

fn f32_to_i16(sample: f32) -> i16 {
  (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(sample: u16) -> i16 {
  (sample as i32 - 32_768) as i16
}
