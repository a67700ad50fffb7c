use crate::core::band_state::SharedBandState;
use crate::core::bands::BandTable;

/// Process-wide state handed to both workers.
pub struct VisualizerContext {
  pub bands: BandTable,
  pub levels: SharedBandState,
}

impl VisualizerContext {
  pub fn new(bands: BandTable) -> Self {
    let levels = SharedBandState::new(bands.len());
    Self { bands, levels }
  }
}
