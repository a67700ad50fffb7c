mod context;
mod core;
mod infra;
mod user_config;
mod workers;

use crate::context::VisualizerContext;
use crate::core::bands::BandTable;
use crate::core::led_grid::{LedGrid, DEFAULT_PALETTE};
use crate::infra::audio::{list_input_devices, CpalSourceFactory};
use crate::infra::led::TerminalPad;
use crate::user_config::{UserConfig, UserConfigPaths};
use crate::workers::capture::CaptureSettings;
use crate::workers::render::Renderer;
use crate::workers::StopSignal;
use anyhow::{anyhow, Result};
use backtrace::Backtrace;
use clap::{Arg, Command as ClapApp};
use clap_complete::{generate, Shell};
use crossterm::{cursor::Show, execute, terminal::LeaveAlternateScreen};
use log::{debug, error, info, warn};
use std::{
  fs,
  io::{self, Write},
  panic,
  path::PathBuf,
  sync::Arc,
  thread,
  time::Duration,
};

/// How long the capture worker blocks on a read before checking for shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

fn setup_logging(verbose: bool) -> anyhow::Result<()> {
  let pid = std::process::id();

  let log_dir = "/tmp/spectrapad_logs/";
  let log_path = format!("{}spectrapadlog{}", log_dir, pid);

  if !std::path::Path::new(log_dir).exists() {
    std::fs::create_dir_all(log_dir)
      .map_err(|e| anyhow!("Failed to create log directory {}: {}", log_dir, e))?;
  }

  let level = if verbose {
    log::LevelFilter::Debug
  } else {
    log::LevelFilter::Info
  };

  fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!(
        "{}[{}][{}] {}",
        chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
        record.target(),
        record.level(),
        message
      ))
    })
    .level(level)
    .chain(fern::log_file(&log_path)?)
    .apply()
    .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

  println!("Logging to: {}", log_path);

  Ok(())
}

fn install_panic_hook() {
  let default_hook = panic::take_hook();
  panic::set_hook(Box::new(move |info| {
    // leave the pad grid so the message is readable
    let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);

    let panic_log_path = dirs::home_dir().map(|home| {
      home
        .join(".config")
        .join("spectrapad")
        .join("spectrapad_panic.log")
    });

    if let Some(path) = panic_log_path.as_ref() {
      if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
      }
      if let Ok(mut f) = fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(f, "\n==== spectrapad panic ====");
        let _ = writeln!(f, "{}", info);
        let _ = writeln!(f, "{:?}", Backtrace::new());
      }
      eprintln!("A crash log was written to: {}", path.to_string_lossy());
    }
    default_hook(info);

    if cfg!(debug_assertions) && std::env::var_os("RUST_BACKTRACE").is_none() {
      eprintln!("{:?}", Backtrace::new());
    }
  }));
}

fn build_cli() -> ClapApp {
  ClapApp::new(env!("CARGO_PKG_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .after_help("Settings are read from $HOME/.config/spectrapad/config.yml")
    .arg(
      Arg::new("tick-rate")
        .short('t')
        .long("tick-rate")
        .value_parser(clap::value_parser!(u64))
        .help("Set the render tick rate (milliseconds), between 1 and 999."),
    )
    .arg(
      Arg::new("config")
        .short('c')
        .long("config")
        .help("Specify configuration file path."),
    )
    .arg(
      Arg::new("device")
        .short('d')
        .long("device")
        .value_name("PREFIX")
        .help("Capture from the input device whose name starts with PREFIX."),
    )
    .arg(
      Arg::new("verbose")
        .short('v')
        .long("verbose")
        .action(clap::ArgAction::SetTrue)
        .help("Log at debug level."),
    )
    .arg(
      Arg::new("list-devices")
        .long("list-devices")
        .action(clap::ArgAction::SetTrue)
        .help("Print the available input devices and exit."),
    )
    .arg(
      Arg::new("completions")
        .long("completions")
        .help("Generates completions for your preferred shell")
        .value_parser(["bash", "zsh", "fish", "power-shell", "elvish"])
        .value_name("SHELL"),
    )
}

fn load_user_config(matches: &clap::ArgMatches) -> Result<UserConfig> {
  let mut user_config = UserConfig::new();
  if let Some(config_file_path) = matches.get_one::<String>("config") {
    let config_file_path = PathBuf::from(config_file_path);
    let path = UserConfigPaths { config_file_path };
    user_config.path_to_config.replace(path);
  }
  user_config.load_config()?;

  if let Some(&tick_rate) = matches.get_one::<u64>("tick-rate") {
    user_config.set_tick_rate(tick_rate)?;
  }
  if let Some(prefix) = matches.get_one::<String>("device") {
    user_config.audio.device_prefix = Some(prefix.clone());
  }

  Ok(user_config)
}

/// Waits for a worker thread without blocking the runtime. A worker that
/// panicked triggers `stop` so the other one still winds down.
async fn join_worker<T: Send + 'static>(
  handle: thread::JoinHandle<T>,
  name: &str,
  stop: &StopSignal,
) -> Result<T> {
  match tokio::task::spawn_blocking(move || handle.join()).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(_)) | Err(_) => {
      stop.trigger();
      Err(anyhow!("{} worker panicked", name))
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let mut clap_app = build_cli();
  let matches = clap_app.clone().get_matches();

  if let Some(s) = matches.get_one::<String>("completions") {
    let shell = match s.as_str() {
      "fish" => Shell::Fish,
      "bash" => Shell::Bash,
      "zsh" => Shell::Zsh,
      "power-shell" => Shell::PowerShell,
      "elvish" => Shell::Elvish,
      _ => return Err(anyhow!("no completions available for '{}'", s)),
    };
    generate(shell, &mut clap_app, "spectrapad", &mut io::stdout());
    return Ok(());
  }

  setup_logging(matches.get_flag("verbose"))?;
  info!("spectrapad {} starting up", env!("CARGO_PKG_VERSION"));

  install_panic_hook();

  if matches.get_flag("list-devices") {
    for name in list_input_devices()? {
      println!("{}", name);
    }
    return Ok(());
  }

  let user_config = load_user_config(&matches)?;
  info!("user config loaded successfully");

  let context = Arc::new(VisualizerContext::new(BandTable::default()));
  context.bands.for_each_band(|index, lower_hz, upper_hz| {
    debug!("band {}: {} Hz - {} Hz", index, lower_hz, upper_hz);
  });
  let grid = LedGrid::new(
    context.bands.len(),
    DEFAULT_PALETTE.to_vec(),
    user_config.layout(),
  )?;
  let pad = TerminalPad::open(grid.layout(), grid.height(), grid.width())?;
  let mut renderer = Renderer::new(grid, pad);
  let stop = StopSignal::new();

  let capture = {
    let context = Arc::clone(&context);
    let stop = stop.clone();
    let mut factory = CpalSourceFactory::new(
      user_config.audio.device_prefix.clone(),
      user_config.audio.frames_per_block,
    );
    let settings = CaptureSettings {
      read_timeout: READ_TIMEOUT,
      retry_delay: user_config.retry_delay(),
    };
    thread::Builder::new()
      .name("capture".to_string())
      .spawn(move || workers::capture::run(&context, &mut factory, &settings, &stop))?
  };

  let render = {
    let context = Arc::clone(&context);
    let stop = stop.clone();
    let tick = user_config.tick_rate();
    thread::Builder::new().name("render".to_string()).spawn(move || {
      let result = workers::render::run(&mut renderer, &context.levels, tick, &stop);
      if result.is_err() {
        stop.trigger();
      }
      result
    })?
  };

  {
    let stop = stop.clone();
    tokio::spawn(async move {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("ctrl-c received, shutting down");
      stop.trigger();
    });
  }

  // both workers are always joined so the grid gets cleared
  let capture_result = join_worker(capture, "capture", &stop).await;
  let render_result = join_worker(render, "render", &stop).await;

  if let Err(e) = render_result.and_then(|result| result) {
    error!("render worker failed: {}", e);
    return Err(e);
  }
  let capture_result =
    capture_result.and_then(|result| result.map_err(|e| anyhow!("capture failed: {}", e)));
  if let Err(e) = capture_result {
    error!("{}", e);
    return Err(e);
  }

  info!("spectrapad stopped");
  Ok(())
}
