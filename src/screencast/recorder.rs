//! Recording session and capture loop

use anyhow::Result;
use chrono::Local;
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::clock::{Clock, StopSignal, SystemClock};
use super::sink::{SinkFactory, VideoSink};
use super::state::{
    RecordingStatus, RecordingSummary, SessionOutcome, SessionState, StartOutcome, StopOutcome,
};
use super::target::RecordingTarget;
use crate::capture::{CaptureWorker, FrameSource};
use crate::config::{RecorderConfig, Resolution};
use crate::error::{RecordError, RecordResult};
use crate::frame::Frame;

/// State shared between callers and the capture loop
#[derive(Default)]
struct Shared {
    status: Mutex<StatusInner>,
    changed: Condvar,
}

#[derive(Default)]
struct StatusInner {
    state: SessionState,
    output_path: Option<PathBuf>,
    frames_written: u64,
    last_summary: Option<RecordingSummary>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.status.lock().state = state;
        self.changed.notify_all();
    }
}

/// Owned by whichever caller holds the control lock
#[derive(Default)]
struct Control {
    worker: Option<JoinHandle<()>>,
    stop: Option<Arc<StopSignal>>,
}

/// Start/stop orchestrator for screen recordings
///
/// At most one session records at a time. The capture loop runs on its own
/// thread and owns the video sink; it is the only code that closes it.
/// `stop` waits for the loop to finalize the file before returning.
pub struct RecordingSession {
    config: RecorderConfig,
    source: Arc<dyn FrameSource>,
    sinks: Arc<dyn SinkFactory>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl RecordingSession {
    pub fn new(
        config: RecorderConfig,
        source: Arc<dyn FrameSource>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        Self::with_clock(config, source, sinks, Arc::new(SystemClock::new()))
    }

    /// Like `new`, pacing frames on the given clock
    pub fn with_clock(
        config: RecorderConfig,
        source: Arc<dyn FrameSource>,
        sinks: Arc<dyn SinkFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sinks,
            clock,
            shared: Arc::new(Shared::default()),
            control: Mutex::new(Control::default()),
        })
    }

    /// Begin recording to a new timestamped file
    ///
    /// Returns once the output file is open and the capture loop is running.
    /// If the file cannot be opened the session stays idle.
    pub fn start(&self) -> RecordResult<StartOutcome> {
        let mut control = self.control.lock();

        let state = self.shared.status.lock().state;
        if state != SessionState::Idle {
            log::info!("Start requested while {:?}, ignoring", state);
            return Ok(StartOutcome::AlreadyActive);
        }
        reap(&mut control);

        let resolution = match self.config.resolution {
            Some(resolution) => resolution,
            None => self.source.native_resolution()?,
        };
        let target = RecordingTarget::resolve(&self.config, resolution, Local::now())?;

        log::info!(
            "Starting recording: output={}, resolution={}, fps={}",
            target.path.display(),
            target.resolution,
            target.frame_rate
        );

        let capture = CaptureWorker::spawn(self.source.clone(), self.config.capture_timeout())?;
        let sink = self.sinks.open(&target)?;
        let stop = Arc::new(StopSignal::new());

        {
            let mut status = self.shared.status.lock();
            status.state = SessionState::Recording;
            status.output_path = Some(target.path.clone());
            status.frames_written = 0;
        }
        self.shared.changed.notify_all();

        let capture_loop = CaptureLoop {
            capture,
            sink,
            resolution,
            frame_rate: self.config.frame_rate,
            failure_threshold: self.config.failure_threshold,
            clock: self.clock.clone(),
            stop: stop.clone(),
            shared: self.shared.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name("screenrec-recorder".into())
            .spawn(move || capture_loop.run());

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                control.stop = Some(stop);
                Ok(StartOutcome::Started(target.path))
            }
            Err(e) => {
                // The loop (and with it the sink) was dropped, which finalizes the file
                log::error!("Failed to spawn recording thread: {}", e);
                self.shared.set_state(SessionState::Idle);
                Err(RecordError::io(&target.path, e))
            }
        }
    }

    /// Stop recording and wait until the output file is finalized
    pub fn stop(&self) -> RecordResult<StopOutcome> {
        let mut control = self.control.lock();

        {
            let mut status = self.shared.status.lock();
            let state = status.state;
            match state {
                SessionState::Recording => {
                    status.state = SessionState::Stopping;
                }
                SessionState::Stopping => {
                    // The loop is already shutting itself down
                    drop(status);
                    reap(&mut control);
                    return Ok(StopOutcome::AlreadyIdle);
                }
                SessionState::Idle => {
                    drop(status);
                    reap(&mut control);
                    log::debug!("Stop requested while idle, ignoring");
                    return Ok(StopOutcome::AlreadyIdle);
                }
            }
        }
        self.shared.changed.notify_all();

        log::info!("Stopping recording");
        if let Some(stop) = control.stop.take() {
            stop.raise();
        }
        let joined = control.worker.take().map(|handle| handle.join());

        if let Some(Err(_)) = joined {
            log::error!("Recording thread panicked");
            self.shared.set_state(SessionState::Idle);
            return Err(RecordError::Encode("recording thread panicked".into()));
        }

        let summary = self
            .shared
            .status
            .lock()
            .last_summary
            .clone()
            .ok_or_else(|| RecordError::Encode("recording ended without a summary".into()))?;
        Ok(StopOutcome::Stopped(summary))
    }

    pub fn state(&self) -> SessionState {
        self.shared.status.lock().state
    }

    pub fn status(&self) -> RecordingStatus {
        let status = self.shared.status.lock();
        RecordingStatus {
            state: status.state,
            output_path: status.output_path.clone(),
            frames_written: status.frames_written,
            last_outcome: status.last_summary.as_ref().map(|s| s.outcome),
            last_summary: status.last_summary.clone(),
        }
    }

    /// Block until the session is idle, e.g. after the loop stopped itself
    ///
    /// Returns false if `timeout` passes first.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        while status.state != SessionState::Idle {
            if self.shared.changed.wait_until(&mut status, give_up).timed_out() {
                return status.state == SessionState::Idle;
            }
        }
        true
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop recording on shutdown: {}", e);
        }
    }
}

/// Join a finished loop thread left behind by a self-stop
fn reap(control: &mut Control) {
    control.stop = None;
    if let Some(handle) = control.worker.take() {
        if handle.join().is_err() {
            log::error!("Recording thread panicked");
        }
    }
}

/// Everything the capture loop owns for the lifetime of one session
struct CaptureLoop {
    capture: CaptureWorker,
    sink: Box<dyn VideoSink>,
    resolution: Resolution,
    frame_rate: u32,
    failure_threshold: u32,
    clock: Arc<dyn Clock>,
    stop: Arc<StopSignal>,
    shared: Arc<Shared>,
}

impl CaptureLoop {
    /// Start time of frame slot `n`, relative to the session start
    fn slot_offset(&self, n: u64) -> Duration {
        let nanos = n as u128 * 1_000_000_000 / self.frame_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Index of the slot that contains `elapsed`
    fn slot_at(&self, elapsed: Duration) -> u64 {
        (elapsed.as_nanos() * self.frame_rate as u128 / 1_000_000_000) as u64
    }

    fn prepare(&self, frame: Frame) -> RecordResult<Frame> {
        let frame = frame.resized(self.resolution.width, self.resolution.height)?;
        Ok(frame.into_format(self.sink.input_format()))
    }

    fn run(mut self) {
        let start = self.clock.now();
        let progress_every = self.frame_rate as u64 * 3;
        let started_at = Instant::now();
        let mut slot = 0u64;
        let mut frames_written = 0u64;
        let mut frames_skipped = 0u64;
        let mut consecutive_errors = 0u32;

        let failure = loop {
            if !self.clock.sleep_until(start + self.slot_offset(slot), &self.stop) {
                break None;
            }
            // Checked again so a stop raised while waking never starts a capture
            if self.stop.is_raised() {
                break None;
            }
            slot += 1;

            match self.capture.capture() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    let appended = self
                        .prepare(frame)
                        .and_then(|frame| self.sink.append(frame));
                    if let Err(e) = appended {
                        log::error!("Failed to encode frame: {}", e);
                        break Some(e);
                    }

                    frames_written += 1;
                    self.shared.status.lock().frames_written = frames_written;

                    if progress_every > 0 && frames_written % progress_every == 0 {
                        let fps = frames_written as f64 / started_at.elapsed().as_secs_f64();
                        log::info!(
                            "Recording: {} frames captured ({:.1} fps)",
                            frames_written,
                            fps
                        );
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    frames_skipped += 1;
                    log::warn!(
                        "Skipping frame, capture failed ({}/{}): {}",
                        consecutive_errors,
                        self.failure_threshold,
                        e
                    );
                    if consecutive_errors >= self.failure_threshold {
                        log::error!(
                            "Too many consecutive frame capture failures ({}), stopping recording",
                            consecutive_errors
                        );
                        break Some(e);
                    }
                }
            }

            // Fell a whole slot or more behind: drop the missed slots instead of bursting
            let due = self.slot_at(self.clock.now().saturating_sub(start));
            if due > slot {
                log::debug!("Capture running late, skipping {} frame slot(s)", due - slot);
                slot = due;
            }
        };

        if failure.is_some() {
            self.shared.set_state(SessionState::Stopping);
        }
        let duration = self.clock.now().saturating_sub(start);
        self.finish(failure, frames_written, frames_skipped, duration);
    }

    fn finish(
        mut self,
        failure: Option<RecordError>,
        frames_written: u64,
        frames_skipped: u64,
        duration: Duration,
    ) {
        log::info!("Stopping recording... ({} frames captured)", frames_written);

        let closed = self.sink.close();
        let error = match (failure, closed) {
            (Some(e), Err(close_err)) => {
                log::error!("Failed to finalize after error: {}", close_err);
                Some(e)
            }
            (Some(e), Ok(())) => Some(e),
            (None, Err(close_err)) => {
                log::error!("Failed to finalize recording: {}", close_err);
                Some(close_err)
            }
            (None, Ok(())) => None,
        };

        let summary = RecordingSummary {
            output_path: self.sink.path().to_path_buf(),
            files: self.sink.files(),
            frames_written: self.sink.frames_written(),
            frames_skipped,
            duration,
            outcome: match &error {
                Some(e) => SessionOutcome::Failed(e.kind()),
                None => SessionOutcome::Completed,
            },
            error: error.as_ref().map(|e| e.to_string()),
        };

        match &error {
            Some(e) => log::error!("Recording failed: {} ({})", summary.output_path.display(), e),
            None => log::info!("Recording finished: {}", summary.output_path.display()),
        }

        {
            let mut status = self.shared.status.lock();
            status.frames_written = summary.frames_written;
            status.last_summary = Some(summary);
            status.state = SessionState::Idle;
        }
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PatternSource;
    use crate::error::ErrorKind;
    use crate::frame::PixelFormat;
    use crate::screencast::avi;
    use crate::screencast::clock::ManualClock;
    use crate::screencast::sink::DefaultSinkFactory;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    const WAIT: Duration = Duration::from_secs(10);

    /// Counts captures; can be told to fail all or every other capture
    struct StubSource {
        resolution: Resolution,
        captures: AtomicU64,
        fail_all: AtomicBool,
        fail_odd: bool,
    }

    impl StubSource {
        fn new(width: u32, height: u32) -> Arc<Self> {
            Arc::new(Self {
                resolution: Resolution::new(width, height),
                captures: AtomicU64::new(0),
                fail_all: AtomicBool::new(false),
                fail_odd: false,
            })
        }

        fn successful(&self) -> u64 {
            self.captures.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for StubSource {
        fn capture(&self) -> RecordResult<Frame> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(RecordError::CaptureUnavailable("display locked".into()));
            }
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail_odd && n % 2 == 1 {
                return Err(RecordError::CaptureUnavailable("transient".into()));
            }
            let Resolution { width, height } = self.resolution;
            Frame::new(width, height, PixelFormat::Rgba8, vec![128; (width * height * 4) as usize])
        }

        fn native_resolution(&self) -> RecordResult<Resolution> {
            Ok(self.resolution)
        }
    }

    /// Never returns a frame in any useful time
    struct HangingSource;

    impl FrameSource for HangingSource {
        fn capture(&self) -> RecordResult<Frame> {
            std::thread::sleep(Duration::from_secs(10));
            Err(RecordError::CaptureUnavailable("gave up".into()))
        }

        fn native_resolution(&self) -> RecordResult<Resolution> {
            Ok(Resolution::new(16, 16))
        }
    }

    /// Sink that rejects frames after a fixed count and records close calls
    struct FlakySink {
        path: PathBuf,
        accept: u64,
        written: u64,
        closes: Arc<AtomicU32>,
    }

    impl VideoSink for FlakySink {
        fn input_format(&self) -> PixelFormat {
            PixelFormat::Rgb8
        }

        fn append(&mut self, _frame: Frame) -> RecordResult<()> {
            if self.written >= self.accept {
                return Err(RecordError::Encode("encoder rejected frame".into()));
            }
            self.written += 1;
            Ok(())
        }

        fn close(&mut self) -> RecordResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.written
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    struct FlakySinkFactory {
        accept: u64,
        closes: Arc<AtomicU32>,
    }

    impl SinkFactory for FlakySinkFactory {
        fn open(&self, target: &RecordingTarget) -> RecordResult<Box<dyn VideoSink>> {
            Ok(Box::new(FlakySink {
                path: target.path.clone(),
                accept: self.accept,
                written: 0,
                closes: self.closes.clone(),
            }))
        }
    }

    struct BrokenFactory;

    impl SinkFactory for BrokenFactory {
        fn open(&self, target: &RecordingTarget) -> RecordResult<Box<dyn VideoSink>> {
            Err(RecordError::io(
                &target.path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }
    }

    fn config(dir: &Path, frame_rate: u32) -> RecorderConfig {
        RecorderConfig {
            frame_rate,
            output_dir: dir.join("recordings"),
            resolution: None,
            ..Default::default()
        }
    }

    fn recordings(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir.join("recordings")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn manual_session(
        config: RecorderConfig,
        source: Arc<dyn FrameSource>,
    ) -> (RecordingSession, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let session = RecordingSession::with_clock(
            config,
            source,
            Arc::new(DefaultSinkFactory::default()),
            clock.clone(),
        )
        .unwrap();
        (session, clock)
    }

    #[test]
    fn test_one_second_at_twenty_fps() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(64, 48);
        let (session, clock) = manual_session(config(dir.path(), 20), source.clone());

        let StartOutcome::Started(path) = session.start().unwrap() else {
            panic!("session did not start");
        };
        assert_eq!(session.state(), SessionState::Recording);
        assert!(clock.wait_until_parked(WAIT));

        for _ in 0..20 {
            clock.advance(Duration::from_millis(50));
            assert!(clock.wait_until_parked(WAIT));
        }
        assert_eq!(session.status().frames_written, source.successful());

        let StopOutcome::Stopped(summary) = session.stop().unwrap() else {
            panic!("session was not recording");
        };
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(summary.outcome, SessionOutcome::Completed);
        assert_eq!(summary.output_path, path);
        assert_eq!(summary.files, vec![path.clone()]);
        assert_eq!(summary.duration, Duration::from_secs(1));

        assert_eq!(recordings(dir.path()), vec![path.clone()]);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        let info = avi::probe(&path).unwrap();
        let frames = source.successful();
        assert!((18..=22).contains(&frames), "captured {} frames", frames);
        assert_eq!(info.indexed_frames as u64, frames);
        assert_eq!(info.total_frames as u64, frames);
        assert_eq!(summary.frames_written, frames);
        assert_eq!((info.width, info.height), (64, 48));
        let expected = frames as f64 / 20.0;
        assert!((info.duration().as_secs_f64() - expected).abs() < 0.001);

        let jpeg = avi::read_frame(&path, 0).unwrap();
        assert!(image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn test_stop_right_after_start_leaves_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(32, 32);
        let (session, _clock) = manual_session(config(dir.path(), 20), source.clone());

        session.start().unwrap();
        let StopOutcome::Stopped(summary) = session.stop().unwrap() else {
            panic!("session was not recording");
        };

        let info = avi::probe(&summary.output_path).unwrap();
        assert!(info.indexed_frames <= 1);
        assert_eq!(info.indexed_frames as u64, source.successful());
        assert_eq!(summary.outcome, SessionOutcome::Completed);
    }

    #[test]
    fn test_start_twice_keeps_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _clock) = manual_session(config(dir.path(), 20), StubSource::new(16, 16));

        assert!(matches!(session.start().unwrap(), StartOutcome::Started(_)));
        assert_eq!(session.start().unwrap(), StartOutcome::AlreadyActive);
        assert_eq!(session.state(), SessionState::Recording);

        assert!(matches!(session.stop().unwrap(), StopOutcome::Stopped(_)));
        assert_eq!(recordings(dir.path()).len(), 1);
    }

    #[test]
    fn test_stop_while_idle_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _clock) = manual_session(config(dir.path(), 20), StubSource::new(16, 16));

        assert_eq!(session.stop().unwrap(), StopOutcome::AlreadyIdle);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.status().last_summary.is_none());
        assert!(session.status().last_outcome.is_none());
        assert!(recordings(dir.path()).is_empty());
    }

    #[test]
    fn test_persistent_capture_failure_stops_session() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(16, 16);
        source.fail_all.store(true, Ordering::SeqCst);
        let session = RecordingSession::new(
            config(dir.path(), 200),
            source.clone(),
            Arc::new(DefaultSinkFactory::default()),
        )
        .unwrap();

        session.start().unwrap();
        assert!(session.wait_for_idle(WAIT), "session never stopped itself");

        let status = session.status();
        assert_eq!(
            status.last_outcome,
            Some(SessionOutcome::Failed(ErrorKind::CaptureUnavailable))
        );
        let summary = status.last_summary.unwrap();
        assert_eq!(summary.outcome, SessionOutcome::Failed(ErrorKind::CaptureUnavailable));
        assert_eq!(summary.frames_skipped, 10);
        assert_eq!(summary.frames_written, 0);
        assert!(summary.error.unwrap().contains("display locked"));
        assert_eq!(avi::probe(&summary.output_path).unwrap().indexed_frames, 0);

        // The session is reusable once the display comes back
        assert_eq!(session.stop().unwrap(), StopOutcome::AlreadyIdle);
        source.fail_all.store(false, Ordering::SeqCst);
        assert!(matches!(session.start().unwrap(), StartOutcome::Started(_)));
        assert!(matches!(session.stop().unwrap(), StopOutcome::Stopped(_)));
    }

    #[test]
    fn test_transient_capture_failures_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StubSource {
            resolution: Resolution::new(16, 16),
            captures: AtomicU64::new(0),
            fail_all: AtomicBool::new(false),
            fail_odd: true,
        });
        let (session, clock) = manual_session(config(dir.path(), 10), source.clone());

        session.start().unwrap();
        assert!(clock.wait_until_parked(WAIT));
        for _ in 0..9 {
            clock.advance(Duration::from_millis(100));
            assert!(clock.wait_until_parked(WAIT));
        }

        let StopOutcome::Stopped(summary) = session.stop().unwrap() else {
            panic!("session was not recording");
        };
        assert_eq!(summary.outcome, SessionOutcome::Completed);
        assert_eq!(summary.frames_written, 5);
        assert_eq!(summary.frames_skipped, 5);
        assert_eq!(avi::probe(&summary.output_path).unwrap().indexed_frames, 5);
    }

    #[test]
    fn test_encode_error_aborts_and_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let closes = Arc::new(AtomicU32::new(0));
        let clock = Arc::new(ManualClock::new());
        let session = RecordingSession::with_clock(
            config(dir.path(), 20),
            StubSource::new(16, 16),
            Arc::new(FlakySinkFactory {
                accept: 3,
                closes: closes.clone(),
            }),
            clock.clone(),
        )
        .unwrap();

        session.start().unwrap();
        for _ in 0..3 {
            assert!(clock.wait_until_parked(WAIT));
            clock.advance(Duration::from_millis(50));
        }
        assert!(session.wait_for_idle(WAIT));

        let summary = session.status().last_summary.unwrap();
        assert_eq!(summary.outcome, SessionOutcome::Failed(ErrorKind::Encode));
        assert_eq!(summary.frames_written, 3);
        assert_eq!(session.stop().unwrap(), StopOutcome::AlreadyIdle);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_failure_leaves_session_idle() {
        let dir = tempfile::tempdir().unwrap();
        let session = RecordingSession::new(
            config(dir.path(), 20),
            StubSource::new(16, 16),
            Arc::new(BrokenFactory),
        )
        .unwrap();

        let err = session.start().unwrap_err();
        assert!(matches!(err, RecordError::Io { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.stop().unwrap(), StopOutcome::AlreadyIdle);
    }

    #[test]
    fn test_resolution_override_scales_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 20);
        cfg.resolution = Some(Resolution::new(32, 16));
        let (session, clock) =
            manual_session(cfg, Arc::new(PatternSource::new(Resolution::new(64, 32))));

        session.start().unwrap();
        assert!(clock.wait_until_parked(WAIT));
        let StopOutcome::Stopped(summary) = session.stop().unwrap() else {
            panic!("session was not recording");
        };

        let info = avi::probe(&summary.output_path).unwrap();
        assert_eq!((info.width, info.height), (32, 16));
        assert_eq!(info.indexed_frames, 1);
        let jpeg = avi::read_frame(&summary.output_path, 0).unwrap();
        let img = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }

    #[test]
    fn test_pacing_does_not_exceed_frame_rate() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(16, 16);
        let session = RecordingSession::new(
            config(dir.path(), 50),
            source.clone(),
            Arc::new(DefaultSinkFactory::default()),
        )
        .unwrap();

        let started = Instant::now();
        session.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        session.stop().unwrap();
        let elapsed = started.elapsed();

        // One frame per 20ms slot, plus the frame at t=0
        let ceiling = (elapsed.as_secs_f64() * 50.0).floor() as u64 + 1;
        let frames = source.successful();
        assert!(frames <= ceiling, "{} frames in {:?}", frames, elapsed);
        assert!(frames >= 3, "only {} frames in {:?}", frames, elapsed);
    }

    #[test]
    fn test_concurrent_start_stop_never_corrupts_output() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(
            RecordingSession::new(
                config(dir.path(), 100),
                StubSource::new(16, 16),
                Arc::new(DefaultSinkFactory::default()),
            )
            .unwrap(),
        );

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let session = session.clone();
                std::thread::spawn(move || {
                    for round in 0..10 {
                        if (round + i) % 2 == 0 {
                            session.start().unwrap();
                        } else {
                            session.stop().unwrap();
                        }
                        std::thread::sleep(Duration::from_millis(3));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let files = recordings(dir.path());
        assert!(!files.is_empty());
        for file in files {
            assert!(avi::probe(&file).is_ok(), "{} is not a complete AVI", file.display());
        }
    }

    #[test]
    fn test_drop_while_recording_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let (session, clock) = manual_session(config(dir.path(), 20), StubSource::new(16, 16));
        let StartOutcome::Started(path) = session.start().unwrap() else {
            panic!("session did not start");
        };
        assert!(clock.wait_until_parked(WAIT));
        drop(session);

        assert_eq!(avi::probe(&path).unwrap().indexed_frames, 1);
    }

    #[test]
    fn test_stop_is_bounded_by_capture_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 20);
        cfg.capture_timeout_ms = 200;
        let session = RecordingSession::new(
            cfg,
            Arc::new(HangingSource),
            Arc::new(DefaultSinkFactory::default()),
        )
        .unwrap();

        session.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let stopping = Instant::now();
        let StopOutcome::Stopped(summary) = session.stop().unwrap() else {
            panic!("session was not recording");
        };
        let waited = stopping.elapsed();
        assert!(waited < Duration::from_secs(1), "stop took {:?}", waited);

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(summary.outcome, SessionOutcome::Completed);
        assert_eq!(summary.frames_written, 0);
        assert!(summary.frames_skipped <= 1);
        assert_eq!(avi::probe(&summary.output_path).unwrap().indexed_frames, 0);
    }
}
