use super::LedSink;
use crate::core::led_grid::{LedId, LedLayout, Rgb, MAX_INTENSITY};
use anyhow::{anyhow, Result};
use crossterm::{
  cursor::{Hide, MoveTo, Show},
  queue,
  style::{Color, Print, ResetColor, SetBackgroundColor},
  terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::io::{self, Stdout, Write};

/// Unlit pads stay faintly visible so the grid keeps its shape.
const UNLIT: Color = Color::Rgb {
  r: 24,
  g: 24,
  b: 24,
};

/// Columns of terminal cells per pad, including the gap.
const PAD_STRIDE: u16 = 3;

/// Draws the pad grid in the terminal, one two-character block per LED,
/// with row 0 at the bottom.
pub struct TerminalPad<W: Write> {
  out: W,
  layout: LedLayout,
  rows: usize,
  columns: usize,
  on_alternate_screen: bool,
}

impl TerminalPad<Stdout> {
  /// Switches stdout to the alternate screen and draws an unlit grid.
  pub fn open(layout: LedLayout, rows: usize, columns: usize) -> Result<Self> {
    let mut pad = Self::with_writer(io::stdout(), layout, rows, columns);
    queue!(pad.out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
    pad.on_alternate_screen = true;
    queue!(
      pad.out,
      MoveTo(0, 0),
      Print(format!("spectrapad  {}x{}  (Ctrl-C to quit)", columns, rows))
    )?;
    pad.fill(Rgb::OFF)?;
    pad.flush()?;
    Ok(pad)
  }
}

impl<W: Write> TerminalPad<W> {
  pub fn with_writer(out: W, layout: LedLayout, rows: usize, columns: usize) -> Self {
    Self {
      out,
      layout,
      rows,
      columns,
      on_alternate_screen: false,
    }
  }

  fn draw(&mut self, row: usize, column: usize, color: Rgb) -> io::Result<()> {
    let x = 1 + column as u16 * PAD_STRIDE;
    let y = 1 + (self.rows - 1 - row) as u16;
    queue!(
      self.out,
      MoveTo(x, y),
      SetBackgroundColor(terminal_color(color)),
      Print("  "),
      ResetColor
    )
  }

  fn restore(&mut self) -> io::Result<()> {
    if self.on_alternate_screen {
      queue!(self.out, Show, LeaveAlternateScreen)?;
      self.on_alternate_screen = false;
    }
    self.out.flush()
  }
}

impl<W: Write> LedSink for TerminalPad<W> {
  fn set_led(&mut self, id: LedId, color: Rgb) -> Result<()> {
    match self.layout.cell(id) {
      Some((row, column)) if row < self.rows && column < self.columns => {
        self.draw(row, column, color)?;
        Ok(())
      }
      _ => Err(anyhow!(
        "LED {} is outside the {}x{} pad",
        id.0,
        self.columns,
        self.rows
      )),
    }
  }

  fn fill(&mut self, color: Rgb) -> Result<()> {
    for row in 0..self.rows {
      for column in 0..self.columns {
        self.draw(row, column, color)?;
      }
    }
    Ok(())
  }

  fn reset(&mut self) -> Result<()> {
    self.fill(Rgb::OFF)?;
    self.restore()?;
    Ok(())
  }

  fn flush(&mut self) -> Result<()> {
    self.out.flush()?;
    Ok(())
  }
}

impl<W: Write> Drop for TerminalPad<W> {
  fn drop(&mut self) {
    let _ = self.restore();
  }
}

/// Scales 0..=63 LED intensity to 0..=255 terminal color.
fn terminal_color(color: Rgb) -> Color {
  if color.is_off() {
    return UNLIT;
  }
  let scale = |v: u8| (v.min(MAX_INTENSITY) as u16 * 255 / MAX_INTENSITY as u16) as u8;
  Color::Rgb {
    r: scale(color.r),
    g: scale(color.g),
    b: scale(color.b),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pad() -> TerminalPad<Vec<u8>> {
    TerminalPad::with_writer(Vec::new(), LedLayout::default(), 9, 9)
  }

  #[test]
  fn set_led_draws_scaled_color() {
    let mut pad = pad();
    pad.set_led(LedId(11), Rgb::new(63, 0, 0)).unwrap();
    let written = String::from_utf8(pad.out.clone()).unwrap();
    assert!(written.contains("48;2;255;0;0"), "{:?}", written);
  }

  #[test]
  fn set_led_rejects_ids_outside_the_pad() {
    let mut pad = pad();
    assert!(pad.set_led(LedId(5), Rgb::OFF).is_err());
    assert!(pad.set_led(LedId(101), Rgb::OFF).is_err());
    assert!(pad.set_led(LedId(99), Rgb::OFF).is_ok());
  }

  #[test]
  fn off_maps_to_unlit_gray() {
    assert_eq!(terminal_color(Rgb::OFF), UNLIT);
    assert_eq!(
      terminal_color(Rgb::new(31, 0, 63)),
      Color::Rgb { r: 125, g: 0, b: 255 }
    );
  }
}
