pub mod audio;
pub mod led;
