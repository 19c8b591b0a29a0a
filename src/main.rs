//! Vision Capture - headless front end
//!
//! Replays a camera source, and on each capture command freezes the feed,
//! detects objects and text, saves the annotated frame and speaks a summary.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vision_capture::capture::TriggerOutcome;
use vision_capture::config::{self, AppConfig};
use vision_capture::detect::{DetectionResult, Mode};
use vision_capture::shared::UiEvent;
use vision_capture::{storage, VisionApp};

/// Vision Capture - snapshot object and text detection with spoken results
#[derive(Parser, Debug)]
#[command(name = "vision-capture")]
#[command(about = "Capture a camera frame, detect objects and text, and announce them")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image file or directory to use as the camera feed
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Detection mode at startup: auto, online or offline
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Save each annotated capture as PNG into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log announcements instead of speaking them
    #[arg(long)]
    no_speech: bool,

    /// Run a single capture, print the result and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };

    let mut config = load_or_default_config(&config_path);
    if let Some(source) = &args.source {
        config.capture.source = Some(source.clone());
    }
    if let Some(mode) = args.mode {
        config.detection.mode = mode;
    }

    if args.write_config {
        config::save_config(&config, &config_path)?;
        println!("Wrote configuration to {}", config_path.display());
        return Ok(());
    }

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }

    info!("Vision Capture starting...");
    let app = VisionApp::from_config(&config, !args.no_speech)?;

    let printer = if args.once {
        None
    } else {
        Some(spawn_event_printer(app.events(), args.output_dir.clone())?)
    };

    let result = if args.once {
        run_once(&app, args.output_dir.as_deref())
    } else {
        run_interactive(&app)
    };

    app.shutdown();

    // The printer exits once the app's senders are gone
    if let Some(printer) = printer {
        if printer.join().is_err() {
            warn!("Event printer panicked");
        }
    }

    info!("Vision Capture shutdown complete");
    result
}

/// Load configuration from file, falling back to defaults
fn load_or_default_config(path: &Path) -> AppConfig {
    if !path.exists() {
        info!("No configuration at {:?}, using defaults", path);
        return AppConfig::default();
    }

    match config::load_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {:?}", path);
            config
        }
        Err(e) => {
            warn!("Invalid configuration, using defaults: {:#}", e);
            AppConfig::default()
        }
    }
}

/// Capture once the first frame is in, then wait for the result
fn run_once(app: &VisionApp, output_dir: Option<&Path>) -> Result<()> {
    let events = app.events();

    let deadline = Instant::now() + Duration::from_secs(10);
    while app.session().last_frame().is_none() {
        if Instant::now() >= deadline {
            anyhow::bail!("Camera delivered no frame");
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    if !matches!(app.trigger(), TriggerOutcome::Snapshot(_)) {
        anyhow::bail!("Capture could not start");
    }

    loop {
        match events.recv() {
            Ok(UiEvent::DetectionFinished(result)) => {
                report(&result, output_dir);
                // Let the speech worker take the announcement before shutdown
                wait_for_speech_pickup(app);
                return Ok(());
            }
            Ok(_) => continue,
            Err(_) => anyhow::bail!("Detection worker stopped"),
        }
    }
}

fn wait_for_speech_pickup(app: &VisionApp) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while app.announcements().has_pending() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Read commands from stdin until `q` or end of input
fn run_interactive(app: &VisionApp) -> Result<()> {
    println!("Commands: <enter>/c = capture, m = cycle mode, s = state, q = quit");
    println!("Mode: {}", app.mode());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        match line.trim() {
            "" | "c" => match app.trigger() {
                TriggerOutcome::Busy => println!("Still detecting, try again shortly"),
                TriggerOutcome::Snapshot(_) | TriggerOutcome::Resumed | TriggerOutcome::NoFrame => {}
            },
            "m" => {
                app.toggle_mode();
            }
            "s" => println!("{}", app.state().summary()),
            "q" => break,
            other => println!("Unknown command: {:?}", other),
        }
    }

    Ok(())
}

fn spawn_event_printer(
    events: Receiver<UiEvent>,
    output_dir: Option<PathBuf>,
) -> Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    UiEvent::Status(status) => println!("[status] {}", status.replace('\n', " | ")),
                    UiEvent::DetectionFinished(result) => report(&result, output_dir.as_deref()),
                    UiEvent::ModeChanged(mode) => println!("Mode: {}", mode),
                    UiEvent::CameraStopped(reason) => println!("Camera stopped: {}", reason),
                }
            }
        })
        .context("Failed to spawn event printer")?;
    Ok(handle)
}

fn report(result: &DetectionResult, output_dir: Option<&Path>) {
    println!(
        "[{}] {} ({:?})",
        result.backend_used,
        result.announcement().replace('\n', " | "),
        result.elapsed
    );

    if let Some(dir) = output_dir {
        let path = dir.join(format!("capture-{}.png", result.capture_id));
        match result.annotated.save(&path) {
            Ok(()) => println!("Saved {}", path.display()),
            Err(e) => warn!("Failed to save {:?}: {}", path, e),
        }
    }
}
