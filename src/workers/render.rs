use super::StopSignal;
use crate::core::band_state::SharedBandState;
use crate::core::led_grid::{LedCommand, LedGrid, Rgb};
use crate::infra::led::LedSink;
use anyhow::Result;
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Draws band levels onto an LED grid, sending only what changed.
pub struct Renderer<S: LedSink> {
  grid: LedGrid,
  sink: S,
  levels: Vec<u32>,
}

impl<S: LedSink> Renderer<S> {
  pub fn new(grid: LedGrid, sink: S) -> Self {
    let levels = vec![0; grid.width()];
    Self { grid, sink, levels }
  }

  /// One frame: snapshot the levels, diff, send the changed cells.
  /// Returns the number of commands issued.
  pub fn tick(&mut self, state: &SharedBandState) -> usize {
    state.snapshot_into(&mut self.levels);
    let commands = self.grid.update(&self.levels);
    self.send(&commands);
    commands.len()
  }

  /// Turns off every lit cell, then resets the device.
  pub fn shutdown(&mut self) -> Result<()> {
    let commands = self.grid.clear();
    self.send(&commands);
    self.sink.reset()
  }

  /// Failed writes are logged and not retried; the grid already counts the
  /// cell as changed.
  fn send(&mut self, commands: &[LedCommand]) {
    if commands.is_empty() {
      return;
    }
    for command in commands {
      if let Err(e) = self.sink.set_led(command.id, command.color) {
        warn!("failed to set LED {}: {}", command.id.0, e);
      }
    }
    if let Err(e) = self.sink.flush() {
      warn!("failed to flush LED commands: {}", e);
    }
  }
}

/// Renders every `tick` until stopped, then clears the grid.
pub fn run<S: LedSink>(
  renderer: &mut Renderer<S>,
  state: &SharedBandState,
  tick: Duration,
  stop: &StopSignal,
) -> Result<()> {
  renderer.sink.fill(Rgb::OFF)?;
  renderer.sink.flush()?;
  info!("render worker started, tick {:?}", tick);

  while !stop.is_triggered() {
    let started = Instant::now();
    renderer.tick(state);
    thread::sleep(tick.saturating_sub(started.elapsed()));
  }

  renderer.shutdown()?;
  info!("render worker stopped");
  Ok(())
}
