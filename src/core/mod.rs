pub mod analyzer;
pub mod band_state;
pub mod bands;
pub mod led_grid;
