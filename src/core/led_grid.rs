use anyhow::{anyhow, Result};

/// Highest intensity a single LED channel accepts.
pub const MAX_INTENSITY: u8 = 63;

/// Level units per lit row.
pub const LEVEL_PER_ROW: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Rgb {
  pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

  /// Channels above `MAX_INTENSITY` are clamped.
  pub const fn new(r: u8, g: u8, b: u8) -> Self {
    const fn clamp(v: u8) -> u8 {
      if v > MAX_INTENSITY {
        MAX_INTENSITY
      } else {
        v
      }
    }
    Rgb {
      r: clamp(r),
      g: clamp(g),
      b: clamp(b),
    }
  }

  pub fn is_off(&self) -> bool {
    *self == Rgb::OFF
  }
}

/// Bottom row first.
pub const DEFAULT_PALETTE: [Rgb; 9] = [
  Rgb::new(63, 0, 0),
  Rgb::new(63, 31, 0),
  Rgb::new(63, 63, 0),
  Rgb::new(0, 63, 0),
  Rgb::new(0, 63, 63),
  Rgb::new(0, 0, 63),
  Rgb::new(31, 0, 63),
  Rgb::new(63, 0, 63),
  Rgb::new(63, 63, 63),
];

/// Device-specific LED identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedId(pub u32);

/// Maps grid cells to LED identifiers as `origin + column + row * row_stride`.
///
/// The default is the Launchpad programmer layout, where the bottom-left pad
/// is 11 and each row up adds 10.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedLayout {
  pub origin: u32,
  pub row_stride: u32,
}

impl Default for LedLayout {
  fn default() -> Self {
    Self {
      origin: 11,
      row_stride: 10,
    }
  }
}

impl LedLayout {
  pub fn id(&self, row: usize, column: usize) -> LedId {
    LedId(self.origin + column as u32 + row as u32 * self.row_stride)
  }

  /// Inverse of [`LedLayout::id`]. `None` for ids outside the layout.
  pub fn cell(&self, id: LedId) -> Option<(usize, usize)> {
    let offset = id.0.checked_sub(self.origin)?;
    if self.row_stride == 0 {
      return None;
    }
    let row = offset / self.row_stride;
    let column = offset % self.row_stride;
    Some((row as usize, column as usize))
  }
}

/// One state change for one LED.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedCommand {
  pub id: LedId,
  pub color: Rgb,
}

/// Number of lit rows for a band level, capped at `height`.
pub fn num_lit(level: u32, height: usize) -> usize {
  ((level / LEVEL_PER_ROW) as usize).min(height)
}

/// Grid of on/off cells, one column per band, that remembers the last frame
/// it rendered so each frame only produces commands for cells that changed.
pub struct LedGrid {
  width: usize,
  palette: Vec<Rgb>,
  layout: LedLayout,
  /// Row-major, `lit[row * width + column]`.
  lit: Vec<bool>,
}

impl LedGrid {
  /// A grid `palette.len()` rows high and `width` columns wide, all unlit.
  pub fn new(width: usize, palette: Vec<Rgb>, layout: LedLayout) -> Result<Self> {
    if width == 0 {
      return Err(anyhow!("LED grid needs at least one column"));
    }
    if palette.is_empty() {
      return Err(anyhow!("LED grid needs at least one row color"));
    }
    if (width as u32) > layout.row_stride {
      return Err(anyhow!(
        "{} columns do not fit a layout with row stride {}",
        width,
        layout.row_stride
      ));
    }
    let height = palette.len();
    let highest_id = (height as u32 - 1)
      .checked_mul(layout.row_stride)
      .and_then(|row_offset| row_offset.checked_add(width as u32 - 1))
      .and_then(|offset| offset.checked_add(layout.origin));
    if highest_id.is_none() {
      return Err(anyhow!(
        "a {}x{} grid at origin {} with row stride {} overflows the LED id range",
        width,
        height,
        layout.origin,
        layout.row_stride
      ));
    }
    Ok(Self {
      width,
      palette,
      layout,
      lit: vec![false; width * height],
    })
  }

  pub fn height(&self) -> usize {
    self.palette.len()
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn layout(&self) -> LedLayout {
    self.layout
  }

  #[allow(dead_code)]
  pub fn is_lit(&self, row: usize, column: usize) -> bool {
    self.lit[row * self.width + column]
  }

  /// Computes the frame for `levels`, returns the commands for every cell
  /// whose lit state changed and remembers the new frame.
  ///
  /// Columns without a level are treated as level 0; extra levels are ignored.
  pub fn update(&mut self, levels: &[u32]) -> Vec<LedCommand> {
    let height = self.height();
    let mut commands = Vec::new();

    for column in 0..self.width {
      let lit_rows = num_lit(levels.get(column).copied().unwrap_or(0), height);
      for row in 0..height {
        let now = row < lit_rows;
        let cell = &mut self.lit[row * self.width + column];
        if *cell == now {
          continue;
        }
        *cell = now;
        let color = if now { self.palette[row] } else { Rgb::OFF };
        commands.push(LedCommand {
          id: self.layout.id(row, column),
          color,
        });
      }
    }

    commands
  }

  /// Off commands for every lit cell. Leaves the grid fully unlit.
  pub fn clear(&mut self) -> Vec<LedCommand> {
    let zeros = vec![0; self.width];
    self.update(&zeros)
  }
}
