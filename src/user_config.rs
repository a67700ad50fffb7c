use crate::core::led_grid::LedLayout;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{
  fs,
  path::{Path, PathBuf},
  time::Duration,
};

const FILE_NAME: &str = "config.yml";
const CONFIG_DIR: &str = ".config";
const APP_CONFIG_DIR: &str = "spectrapad";

/// Upper bound for `frames_per_block`; bigger blocks lag the grid noticeably.
const MAX_FRAMES_PER_BLOCK: usize = 16_384;

#[derive(Clone)]
pub struct UserConfigPaths {
  pub config_file_path: PathBuf,
}

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioConfigString {
  pub device_prefix: Option<String>,
  pub frames_per_block: Option<usize>,
  pub retry_delay_milliseconds: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioConfig {
  /// Capture from the last input device whose name starts with this.
  pub device_prefix: Option<String>,
  pub frames_per_block: usize,
  pub retry_delay_milliseconds: u64,
}

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfigString {
  pub tick_rate_milliseconds: Option<u64>,
  pub layout_origin: Option<u32>,
  pub layout_row_stride: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisplayConfig {
  pub tick_rate_milliseconds: u64,
  pub layout_origin: u32,
  pub layout_row_stride: u32,
}

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserConfigString {
  audio: Option<AudioConfigString>,
  display: Option<DisplayConfigString>,
}

#[derive(Clone)]
pub struct UserConfig {
  pub audio: AudioConfig,
  pub display: DisplayConfig,
  pub path_to_config: Option<UserConfigPaths>,
}

impl UserConfig {
  pub fn new() -> UserConfig {
    let layout = LedLayout::default();
    UserConfig {
      audio: AudioConfig {
        device_prefix: Some("BlackHole".to_string()),
        frames_per_block: 1024,
        retry_delay_milliseconds: 500,
      },
      display: DisplayConfig {
        tick_rate_milliseconds: 50,
        layout_origin: layout.origin,
        layout_row_stride: layout.row_stride,
      },
      path_to_config: None,
    }
  }

  pub fn get_or_build_paths(&mut self) -> Result<()> {
    match dirs::home_dir() {
      Some(home) => {
        let path = Path::new(&home);
        let home_config_dir = path.join(CONFIG_DIR);
        let app_config_dir = home_config_dir.join(APP_CONFIG_DIR);

        if !app_config_dir.exists() {
          fs::create_dir_all(&app_config_dir)?;
        }

        let config_file_path = &app_config_dir.join(FILE_NAME);

        let paths = UserConfigPaths {
          config_file_path: config_file_path.to_path_buf(),
        };
        self.path_to_config = Some(paths);
        Ok(())
      }
      None => Err(anyhow!("No $HOME directory found for config")),
    }
  }

  pub fn load_audio_config(&mut self, audio: AudioConfigString) -> Result<()> {
    if let Some(prefix) = audio.device_prefix {
      let prefix = prefix.trim().to_string();
      // an empty prefix means "just use the default input device"
      self.audio.device_prefix = if prefix.is_empty() { None } else { Some(prefix) };
    }

    if let Some(frames) = audio.frames_per_block {
      self.set_frames_per_block(frames)?;
    }

    if let Some(delay) = audio.retry_delay_milliseconds {
      self.audio.retry_delay_milliseconds = delay;
    }

    Ok(())
  }

  pub fn load_display_config(&mut self, display: DisplayConfigString) -> Result<()> {
    if let Some(tick_rate) = display.tick_rate_milliseconds {
      self.set_tick_rate(tick_rate)?;
    }

    if let Some(origin) = display.layout_origin {
      self.display.layout_origin = origin;
    }

    if let Some(stride) = display.layout_row_stride {
      if stride == 0 {
        return Err(anyhow!("Layout row stride must be greater than 0"));
      }
      self.display.layout_row_stride = stride;
    }

    Ok(())
  }

  pub fn set_tick_rate(&mut self, tick_rate: u64) -> Result<()> {
    if tick_rate == 0 || tick_rate >= 1000 {
      return Err(anyhow!(
        "Tick rate must be between 1 and 999 milliseconds, is {}",
        tick_rate
      ));
    }
    self.display.tick_rate_milliseconds = tick_rate;
    Ok(())
  }

  pub fn set_frames_per_block(&mut self, frames: usize) -> Result<()> {
    if frames == 0 || frames > MAX_FRAMES_PER_BLOCK {
      return Err(anyhow!(
        "Frames per block must be between 1 and {}, is {}",
        MAX_FRAMES_PER_BLOCK,
        frames
      ));
    }
    self.audio.frames_per_block = frames;
    Ok(())
  }

  pub fn load_config(&mut self) -> Result<()> {
    if self.path_to_config.is_none() {
      self.get_or_build_paths()?;
    }
    let paths = match &self.path_to_config {
      Some(path) => path,
      None => return Err(anyhow!("Config path not initialized")),
    };

    if paths.config_file_path.exists() {
      let config_string = fs::read_to_string(&paths.config_file_path)?;
      self.load_from_str(&config_string)
    } else {
      Ok(())
    }
  }

  pub fn load_from_str(&mut self, config_string: &str) -> Result<()> {
    // serde fails if file is empty
    if config_string.trim().is_empty() {
      return Ok(());
    }

    let config_yml: UserConfigString = serde_yaml::from_str(config_string)?;

    if let Some(audio) = config_yml.audio {
      self.load_audio_config(audio)?;
    }
    if let Some(display) = config_yml.display {
      self.load_display_config(display)?;
    }

    Ok(())
  }

  pub fn tick_rate(&self) -> Duration {
    Duration::from_millis(self.display.tick_rate_milliseconds)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.audio.retry_delay_milliseconds)
  }

  pub fn layout(&self) -> LedLayout {
    LedLayout {
      origin: self.display.layout_origin,
      row_stride: self.display.layout_row_stride,
    }
  }
}
