use super::bands::{BandTable, BUCKET_WIDTH_HZ, MAX_FREQUENCY_HZ, NUM_BUCKETS};
use log::warn;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Raw band energy is divided (and floored) by this to get a display level.
pub const NORMALIZATION_FACTOR: f64 = 100_000.0;

/// Sums FFT magnitudes into fixed-width frequency buckets.
///
/// `magnitudes[k]` is the magnitude at `k * sample_rate / block_len` Hz.
/// Anything at or above `MAX_FREQUENCY_HZ` is dropped.
pub fn bucket_spectrum(magnitudes: &[f64], sample_rate: u32, block_len: usize) -> Vec<f64> {
  let mut buckets = vec![0.0; NUM_BUCKETS];
  if block_len == 0 {
    return buckets;
  }
  let resolution = sample_rate as f64 / block_len as f64;

  for (k, &magnitude) in magnitudes.iter().enumerate() {
    let frequency = k as f64 * resolution;
    if frequency >= MAX_FREQUENCY_HZ {
      break;
    }
    let index = (frequency / BUCKET_WIDTH_HZ).floor() as usize;
    if index < NUM_BUCKETS {
      buckets[index] += magnitude;
    }
  }

  buckets
}

/// Aggregates buckets into per-band raw energy with a prefix sum, so each band
/// costs two lookups no matter how wide it is.
pub fn aggregate_bands(buckets: &[f64], table: &BandTable) -> Vec<f64> {
  let mut prefix = Vec::with_capacity(buckets.len() + 1);
  prefix.push(0.0);
  let mut running = 0.0;
  for &bucket in buckets {
    running += bucket;
    prefix.push(running);
  }

  let last = buckets.len();
  table
    .iter()
    .map(|band| {
      let (lower, upper) = band.bucket_range();
      prefix[upper.min(last)] - prefix[lower.min(last)]
    })
    .collect()
}

/// Floor-divides raw energy into a display level, saturating at `u32::MAX`.
pub fn normalize(raw: f64) -> u32 {
  // `as` saturates and maps NaN to 0
  (raw / NORMALIZATION_FACTOR).floor() as u32
}

/// Turns PCM blocks into per-band levels.
///
/// Interleaved channels are not separated: the whole block goes through the
/// FFT as one signal. The FFT plan and buffers are cached for the last block
/// length seen.
pub struct SpectralAnalyzer {
  planner: RealFftPlanner<f64>,
  fft: Option<Arc<dyn RealToComplex<f64>>>,
  fft_input: Vec<f64>,
  fft_output: Vec<Complex<f64>>,
  magnitudes: Vec<f64>,
  levels: Vec<u32>,
}

impl SpectralAnalyzer {
  pub fn new() -> Self {
    Self {
      planner: RealFftPlanner::new(),
      fft: None,
      fft_input: Vec::new(),
      fft_output: Vec::new(),
      magnitudes: Vec::new(),
      levels: Vec::new(),
    }
  }

  /// Analyzes one block and returns the normalized level of every band.
  pub fn process(&mut self, block: &[i16], sample_rate: u32, table: &BandTable) -> &[u32] {
    let raw = self.raw_band_energies(block, sample_rate, table);
    self.levels.clear();
    self.levels.extend(raw.into_iter().map(normalize));
    &self.levels
  }

  /// Per-band energy before normalization.
  pub fn raw_band_energies(&mut self, block: &[i16], sample_rate: u32, table: &BandTable) -> Vec<f64> {
    let buckets = if block.is_empty() {
      vec![0.0; NUM_BUCKETS]
    } else {
      self.compute_magnitudes(block);
      bucket_spectrum(&self.magnitudes, sample_rate, block.len())
    };
    aggregate_bands(&buckets, table)
  }

  fn compute_magnitudes(&mut self, block: &[i16]) {
    let fft = self.plan_for(block.len());

    for (slot, &sample) in self.fft_input.iter_mut().zip(block) {
      *slot = sample as f64;
    }

    self.magnitudes.clear();
    match fft.process(&mut self.fft_input, &mut self.fft_output) {
      Ok(()) => self
        .magnitudes
        .extend(self.fft_output.iter().map(|c| c.norm())),
      Err(e) => {
        warn!("FFT failed on a {} sample block: {}", block.len(), e);
      }
    }
  }

  fn plan_for(&mut self, len: usize) -> Arc<dyn RealToComplex<f64>> {
    if let Some(fft) = &self.fft {
      if fft.len() == len {
        return fft.clone();
      }
    }
    let fft = self.planner.plan_fft_forward(len);
    self.fft_input = fft.make_input_vec();
    self.fft_output = fft.make_output_vec();
    self.fft = Some(fft.clone());
    fft
  }
}

impl Default for SpectralAnalyzer {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::bands::Band;
  use std::f64::consts::PI;

  const RATE: u32 = 44_100;
  const BLOCK_LEN: usize = 2048;

  fn sine_block(frequency: f64, amplitude: f64) -> Vec<i16> {
    (0..BLOCK_LEN)
      .map(|n| (amplitude * (2.0 * PI * frequency * n as f64 / RATE as f64).sin()).round() as i16)
      .collect()
  }

  #[test]
  fn silent_block_gives_zero_levels() {
    let table = BandTable::default();
    let mut analyzer = SpectralAnalyzer::new();
    let levels = analyzer.process(&vec![0i16; BLOCK_LEN], RATE, &table);
    assert_eq!(levels, vec![0u32; table.len()].as_slice());
  }

  #[test]
  fn empty_block_gives_zero_levels() {
    let table = BandTable::default();
    let mut analyzer = SpectralAnalyzer::new();
    assert!(analyzer.process(&[], RATE, &table).iter().all(|&l| l == 0));
  }

  #[test]
  fn sinusoid_lands_in_its_band_only() {
    // bin-centred so there is no leakage into neighbouring bins
    let bin = 372;
    let frequency = bin as f64 * RATE as f64 / BLOCK_LEN as f64; // ~8010 Hz
    let table = BandTable::default();
    let mut analyzer = SpectralAnalyzer::new();

    let raw = analyzer.raw_band_energies(&sine_block(frequency, 10_000.0), RATE, &table);

    let target = 7; // 6 kHz - 12 kHz
    assert!(raw[target] > 0.0);
    let tolerance = raw[target] * 1e-2;
    for (index, &energy) in raw.iter().enumerate() {
      if index != target {
        assert!(energy < tolerance, "band {} leaked {}", index, energy);
      }
    }
  }

  #[test]
  fn interleaved_channels_are_analyzed_as_one_signal() {
    // A stereo block with identical channels is a signal at half the sample
    // index rate: a tone at f per channel shows up at f / 2.
    let table = BandTable::new(vec![Band::new(1_500.0, 2_500.0), Band::new(3_500.0, 4_500.0)]).unwrap();
    let frames = BLOCK_LEN / 2;
    let frequency = 93.0 * RATE as f64 / frames as f64; // ~4005 Hz per channel
    let mut block = Vec::with_capacity(BLOCK_LEN);
    for n in 0..frames {
      let sample = (8_000.0 * (2.0 * PI * frequency * n as f64 / RATE as f64).sin()).round() as i16;
      block.push(sample);
      block.push(sample);
    }

    let mut analyzer = SpectralAnalyzer::new();
    let raw = analyzer.raw_band_energies(&block, RATE, &table);
    assert!(raw[0] > raw[1]);
  }

  #[test]
  fn prefix_sum_matches_direct_summation() {
    let tables = [
      BandTable::default(),
      BandTable::new(vec![
        Band::new(0.0, 20_000.0),
        Band::new(20.0, 45.0),
        Band::new(24.9, 25.0),
        Band::new(19_975.0, 20_000.0),
      ])
      .unwrap(),
    ];
    // integer-valued buckets keep every partial sum exact
    let buckets: Vec<f64> = (0..NUM_BUCKETS).map(|i| ((i * 7919) % 1013) as f64).collect();

    for table in &tables {
      let via_prefix = aggregate_bands(&buckets, table);
      let direct: Vec<f64> = table
        .iter()
        .map(|band| {
          let (lower, upper) = band.bucket_range();
          buckets[lower..upper].iter().sum()
        })
        .collect();
      assert_eq!(via_prefix, direct);
    }
  }

  #[test]
  fn bucket_spectrum_drops_frequencies_above_max() {
    let block_len = 8;
    // resolution 5 kHz: bins at 0, 5k, 10k, 15k, 20k
    let magnitudes = [1.0, 2.0, 3.0, 4.0, 100.0];
    let buckets = bucket_spectrum(&magnitudes, 40_000, block_len);
    assert_eq!(buckets.len(), NUM_BUCKETS);
    assert_eq!(buckets[0], 1.0);
    assert_eq!(buckets[200], 2.0);
    assert_eq!(buckets[400], 3.0);
    assert_eq!(buckets[600], 4.0);
    assert_eq!(buckets.iter().sum::<f64>(), 10.0);
  }

  #[test]
  fn bucket_spectrum_sums_bins_sharing_a_bucket() {
    // resolution 10 Hz: bins 0, 1, 2 land in bucket 0; bins 3, 4 in bucket 1
    let magnitudes = [1.0, 1.0, 1.0, 2.0, 2.0];
    let buckets = bucket_spectrum(&magnitudes, 80, 8);
    assert_eq!(buckets[0], 3.0);
    assert_eq!(buckets[1], 4.0);
  }

  #[test]
  fn normalization_floors() {
    assert_eq!(normalize(0.0), 0);
    assert_eq!(normalize(99_999.9), 0);
    assert_eq!(normalize(250_000.0), 2);
    assert_eq!(normalize(1_000_000.0), 10);
    assert_eq!(normalize(f64::NAN), 0);
    assert_eq!(normalize(f64::MAX), u32::MAX);
  }

  #[test]
  fn end_to_end_levels_from_bucket_energies() {
    let table = BandTable::new(vec![Band::new(20.0, 60.0), Band::new(6_000.0, 12_000.0)]).unwrap();
    let mut buckets = vec![0.0; NUM_BUCKETS];
    buckets[0] = 100_000.0;
    buckets[1] = 150_000.0;
    let levels: Vec<u32> = aggregate_bands(&buckets, &table).into_iter().map(normalize).collect();
    assert_eq!(levels, vec![2, 0]);

    buckets[1] = 900_000.0;
    let levels: Vec<u32> = aggregate_bands(&buckets, &table).into_iter().map(normalize).collect();
    assert_eq!(levels, vec![10, 0]);
  }

  #[test]
  fn replans_when_block_length_changes() {
    let table = BandTable::default();
    let mut analyzer = SpectralAnalyzer::new();
    analyzer.process(&sine_block(1_000.0, 10_000.0), RATE, &table);
    let short: Vec<i16> = sine_block(1_000.0, 10_000.0).into_iter().take(1000).collect();
    let levels = analyzer.process(&short, RATE, &table);
    assert_eq!(levels.len(), table.len());
    assert!(levels[4] > 0);
  }
}
