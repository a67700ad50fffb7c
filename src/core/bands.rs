use anyhow::{anyhow, Result};

/// Frequencies at or above this are ignored by the analyzer.
pub const MAX_FREQUENCY_HZ: f64 = 20_000.0;

/// Width of one discretization bucket of the spectrum.
pub const BUCKET_WIDTH_HZ: f64 = 25.0;

/// Number of buckets covering `0..MAX_FREQUENCY_HZ`.
pub const NUM_BUCKETS: usize = (MAX_FREQUENCY_HZ / BUCKET_WIDTH_HZ) as usize;

/// A frequency range whose aggregate energy becomes one column of the grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
  pub lower_hz: f64,
  pub upper_hz: f64,
}

impl Band {
  pub const fn new(lower_hz: f64, upper_hz: f64) -> Self {
    Self { lower_hz, upper_hz }
  }

  /// Bucket index range `[lower, upper)` this band sums over.
  pub fn bucket_range(&self) -> (usize, usize) {
    let lower = (self.lower_hz / BUCKET_WIDTH_HZ).floor() as usize;
    let upper = (self.upper_hz / BUCKET_WIDTH_HZ).floor() as usize;
    (lower.min(NUM_BUCKETS), upper.min(NUM_BUCKETS))
  }
}

/// Default bands, low to high. Neighbouring ranges overlap so energy near a
/// boundary shows up in both columns.
const DEFAULT_BANDS: [Band; 9] = [
  Band::new(20.0, 60.0),
  Band::new(40.0, 150.0),
  Band::new(120.0, 280.0),
  Band::new(250.0, 550.0),
  Band::new(500.0, 2_500.0),
  Band::new(2_000.0, 5_000.0),
  Band::new(4_000.0, 7_000.0),
  Band::new(6_000.0, 12_000.0),
  Band::new(10_000.0, 20_000.0),
];

/// Immutable, ordered set of bands. Index order is column order.
#[derive(Clone, Debug, PartialEq)]
pub struct BandTable {
  bands: Vec<Band>,
}

impl BandTable {
  pub fn new(bands: Vec<Band>) -> Result<Self> {
    if bands.is_empty() {
      return Err(anyhow!("Band table needs at least one band"));
    }
    for (index, band) in bands.iter().enumerate() {
      let valid = band.lower_hz >= 0.0
        && band.lower_hz < band.upper_hz
        && band.upper_hz <= MAX_FREQUENCY_HZ;
      if !valid {
        return Err(anyhow!(
          "Band {} ({} Hz - {} Hz) must satisfy 0 <= lower < upper <= {}",
          index,
          band.lower_hz,
          band.upper_hz,
          MAX_FREQUENCY_HZ
        ));
      }
    }
    Ok(Self { bands })
  }

  pub fn len(&self) -> usize {
    self.bands.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.bands.is_empty()
  }

  #[allow(dead_code)]
  pub fn get(&self, index: usize) -> Option<&Band> {
    self.bands.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Band> {
    self.bands.iter()
  }

  /// Calls `f(index, lower_hz, upper_hz)` for every band in column order.
  pub fn for_each_band<F: FnMut(usize, f64, f64)>(&self, mut f: F) {
    for (index, band) in self.bands.iter().enumerate() {
      f(index, band.lower_hz, band.upper_hz);
    }
  }
}

impl Default for BandTable {
  fn default() -> Self {
    Self {
      bands: DEFAULT_BANDS.to_vec(),
    }
  }
}
