use super::StopSignal;
use crate::context::VisualizerContext;
use crate::core::analyzer::SpectralAnalyzer;
use crate::infra::audio::{CaptureError, PcmSource, PcmSourceFactory};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Longest single sleep while waiting to retry, so a stop is noticed quickly.
const STOP_POLL: Duration = Duration::from_millis(50);

pub struct CaptureSettings {
  /// How long one read may block before the stop signal is checked again.
  pub read_timeout: Duration,
  /// Pause between a recoverable fault and reopening the source.
  pub retry_delay: Duration,
}

/// Reads blocks, analyzes them and publishes the levels until stopped.
///
/// Recoverable faults reopen the source; the last published levels stay
/// visible meanwhile. Anything else triggers `stop` and is returned.
pub fn run(
  context: &VisualizerContext,
  factory: &mut dyn PcmSourceFactory,
  settings: &CaptureSettings,
  stop: &StopSignal,
) -> Result<(), CaptureError> {
  let mut analyzer = SpectralAnalyzer::new();

  while !stop.is_triggered() {
    // the source is dropped, releasing the device, before any retry sleep
    let result = factory
      .open()
      .and_then(|mut source| pump(context, source.as_mut(), &mut analyzer, settings, stop));

    match result {
      Ok(()) => break,
      Err(e) if e.is_recoverable() => {
        warn!("{}; reinitializing in {:?}", e, settings.retry_delay);
        sleep_unless_stopped(settings.retry_delay, stop);
      }
      Err(e) => {
        stop.trigger();
        return Err(e);
      }
    }
  }

  info!("capture worker stopped");
  Ok(())
}

fn pump(
  context: &VisualizerContext,
  source: &mut dyn PcmSource,
  analyzer: &mut SpectralAnalyzer,
  settings: &CaptureSettings,
  stop: &StopSignal,
) -> Result<(), CaptureError> {
  let sample_rate = source.sample_rate();
  let channels = source.channels().max(1) as usize;
  let expected = source.block_len();

  while !stop.is_triggered() {
    let block = match source.next_block(settings.read_timeout)? {
      Some(block) => block,
      None => continue,
    };

    // a malformed block counts as silence for this pass
    let samples: &[i16] = if block.len() != expected || block.len() % channels != 0 {
      warn!(
        "got a {} sample block, expected {}; treating it as silence",
        block.len(),
        expected
      );
      &[]
    } else {
      &block
    };

    let levels = analyzer.process(samples, sample_rate, &context.bands);
    context.levels.publish(levels);
  }

  Ok(())
}

fn sleep_unless_stopped(total: Duration, stop: &StopSignal) {
  let mut remaining = total;
  while !remaining.is_zero() && !stop.is_triggered() {
    let step = remaining.min(STOP_POLL);
    thread::sleep(step);
    remaining -= step;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::bands::{Band, BandTable};
  use std::collections::VecDeque;
  use std::f64::consts::PI;

  type Read = Result<Option<Vec<i16>>, CaptureError>;

  struct ScriptedSource {
    reads: VecDeque<Read>,
    stop: StopSignal,
  }

  impl PcmSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
      44_100
    }

    fn channels(&self) -> u16 {
      2
    }

    fn block_len(&self) -> usize {
      2048
    }

    fn next_block(&mut self, _timeout: Duration) -> Read {
      match self.reads.pop_front() {
        Some(read) => read,
        None => {
          self.stop.trigger();
          Ok(None)
        }
      }
    }
  }

  struct ScriptedFactory {
    opens: VecDeque<Result<Vec<Read>, CaptureError>>,
    opened: usize,
    stop: StopSignal,
  }

  impl PcmSourceFactory for ScriptedFactory {
    fn open(&mut self) -> Result<Box<dyn PcmSource>, CaptureError> {
      self.opened += 1;
      match self.opens.pop_front() {
        Some(Ok(reads)) => Ok(Box::new(ScriptedSource {
          reads: reads.into(),
          stop: self.stop.clone(),
        })),
        Some(Err(e)) => Err(e),
        None => {
          self.stop.trigger();
          Err(CaptureError::Open("script exhausted".into()))
        }
      }
    }
  }

  fn settings() -> CaptureSettings {
    CaptureSettings {
      read_timeout: Duration::from_millis(1),
      retry_delay: Duration::ZERO,
    }
  }

  fn context() -> VisualizerContext {
    VisualizerContext::new(
      BandTable::new(vec![Band::new(500.0, 2_500.0), Band::new(6_000.0, 12_000.0)]).unwrap(),
    )
  }

  /// Tone centred on FFT bin `bin` of a 2048 sample block at 44.1 kHz.
  fn tone(bin: usize) -> Vec<i16> {
    let frequency = bin as f64 * 44_100.0 / 2048.0;
    (0..2048)
      .map(|n| (10_000.0 * (2.0 * PI * frequency * n as f64 / 44_100.0).sin()).round() as i16)
      .collect()
  }

  #[test]
  fn publishes_levels_for_each_block() {
    let context = context();
    let stop = StopSignal::new();
    let mut factory = ScriptedFactory {
      opens: vec![Ok(vec![Ok(Some(tone(46))), Ok(None)])].into(),
      opened: 0,
      stop: stop.clone(),
    };

    run(&context, &mut factory, &settings(), &stop).unwrap();

    let levels = context.levels.snapshot();
    assert!(levels[0] > 0);
    assert_eq!(levels[1], 0);
  }

  #[test]
  fn reopens_after_a_stream_fault_and_keeps_last_levels() {
    let context = context();
    let stop = StopSignal::new();
    let mut factory = ScriptedFactory {
      opens: vec![
        Ok(vec![
          Ok(Some(tone(46))),
          Err(CaptureError::Stream("unplugged".into())),
        ]),
        Err(CaptureError::Open("device busy".into())),
        Ok(vec![Ok(Some(tone(372)))]),
      ]
      .into(),
      opened: 0,
      stop: stop.clone(),
    };

    run(&context, &mut factory, &settings(), &stop).unwrap();

    assert_eq!(factory.opened, 3);
    let mut levels = [0u32; 2];
    assert_eq!(context.levels.snapshot_into(&mut levels), 2);
    assert!(levels[1] > 0);
  }

  #[test]
  fn unsupported_input_is_fatal() {
    let context = context();
    let stop = StopSignal::new();
    let mut factory = ScriptedFactory {
      opens: vec![Err(CaptureError::Unsupported("U8".into()))].into(),
      opened: 0,
      stop: stop.clone(),
    };

    let result = run(&context, &mut factory, &settings(), &stop);

    assert_eq!(result, Err(CaptureError::Unsupported("U8".into())));
    assert!(stop.is_triggered());
    assert_eq!(factory.opened, 1);
  }

  #[test]
  fn short_block_publishes_silence() {
    let context = context();
    let stop = StopSignal::new();
    let short: Vec<i16> = tone(46).into_iter().take(1001).collect();
    let mut factory = ScriptedFactory {
      opens: vec![Ok(vec![Ok(Some(tone(46))), Ok(Some(short))])].into(),
      opened: 0,
      stop: stop.clone(),
    };

    run(&context, &mut factory, &settings(), &stop).unwrap();

    let mut levels = [u32::MAX; 2];
    assert_eq!(context.levels.snapshot_into(&mut levels), 2);
    assert_eq!(levels, [0, 0]);
  }
}
