use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use screenrec::capture::{FrameSource, PatternSource};
use screenrec::screencast::{
    DefaultSinkFactory, RecordingSession, SessionOutcome, StartOutcome, StopOutcome, avi,
};
use screenrec::{RecorderConfig, Resolution};

/// Set from the signal handler, polled by the main loop
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

const USAGE: &str = "\
Usage: screenrec [OPTIONS]

Records the screen until interrupted (Ctrl+C / SIGTERM).

Options:
  --config FILE      JSON recorder configuration
  --duration SECS    Stop after this many seconds
  --pattern WxH      Record a synthetic test pattern instead of the display
  --probe FILE       Print stream information for a recorded AVI file and exit
  -h, --help         Show this help";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    duration: Option<Duration>,
    pattern: Option<Resolution>,
    probe: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .with_context(|| format!("Missing value for {}", arg))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value()?)),
            "--duration" => {
                let secs: f64 = value()?.parse().context("Invalid --duration")?;
                if !secs.is_finite() || secs <= 0.0 {
                    bail!("--duration must be positive");
                }
                parsed.duration = Some(Duration::from_secs_f64(secs));
            }
            "--pattern" => parsed.pattern = Some(value()?.parse()?),
            "--probe" => parsed.probe = Some(PathBuf::from(value()?)),
            "-h" | "--help" => return Ok(None),
            other => bail!("Unknown argument '{}'\n\n{}", other, USAGE),
        }
    }
    Ok(Some(parsed))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(());
    };

    if let Some(path) = args.probe {
        return probe(&path);
    }

    let config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };

    let source = frame_source(args.pattern)?;
    let session = RecordingSession::new(config, source, Arc::new(DefaultSinkFactory::default()))?;

    setup_signal_handler();

    match session.start()? {
        StartOutcome::Started(path) => log::info!("Recording to {}", path.display()),
        StartOutcome::AlreadyActive => bail!("A recording is already running"),
    }

    let started = Instant::now();
    loop {
        if STOP_REQUESTED.load(Ordering::SeqCst) {
            log::info!("Received stop signal");
            break;
        }
        if args.duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        if session.wait_for_idle(Duration::from_millis(100)) {
            // The capture loop gave up on its own
            break;
        }
    }

    let summary = match session.stop()? {
        StopOutcome::Stopped(summary) => summary,
        StopOutcome::AlreadyIdle => session
            .status()
            .last_summary
            .context("Recording ended without a summary")?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let SessionOutcome::Failed(kind) = summary.outcome {
        bail!(
            "Recording failed ({:?}): {}",
            kind,
            summary.error.unwrap_or_default()
        );
    }
    Ok(())
}

fn frame_source(pattern: Option<Resolution>) -> Result<Arc<dyn FrameSource>> {
    match pattern {
        Some(resolution) => Ok(Arc::new(PatternSource::new(resolution))),
        None => display_source(),
    }
}

#[cfg(feature = "display")]
fn display_source() -> Result<Arc<dyn FrameSource>> {
    let display = screenrec::capture::DisplaySource::primary()
        .context("Failed to open the display. Is a graphical session running?")?;
    Ok(Arc::new(display))
}

#[cfg(not(feature = "display"))]
fn display_source() -> Result<Arc<dyn FrameSource>> {
    bail!("Built without display capture (enable the `display` feature), use --pattern WxH")
}

fn probe(path: &std::path::Path) -> Result<()> {
    let info = avi::probe(path).with_context(|| format!("Failed to read {}", path.display()))?;
    println!("file:        {}", info.path.display());
    println!("size:        {} bytes", info.file_size);
    println!("codec:       {}", info.codec);
    println!("resolution:  {}x{}", info.width, info.height);
    println!("frame rate:  {:.3} fps", info.frame_rate);
    println!("frames:      {} (header {}, stream {})", info.indexed_frames, info.total_frames, info.stream_length);
    println!("duration:    {:.3} s", info.duration().as_secs_f64());
    Ok(())
}

/// Set up signal handler for SIGTERM and SIGINT
fn setup_signal_handler() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        let handler = stop_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    });
}

extern "C" fn stop_handler(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}
