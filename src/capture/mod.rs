//! Frame sources
//!
//! A [`FrameSource`] hands out one still image of the display per call.
//! The recorder never calls a source directly; it goes through a
//! [`CaptureWorker`] so that a capture that hangs cannot stall the session.

#[cfg(feature = "display")]
pub mod display;
pub mod pattern;

#[cfg(feature = "display")]
pub use display::DisplaySource;
pub use pattern::PatternSource;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Resolution;
use crate::error::{RecordError, RecordResult};
use crate::frame::Frame;

/// Something that can produce a picture of the display
pub trait FrameSource: Send + Sync + 'static {
    /// Capture the display as it is right now
    ///
    /// Fails with [`RecordError::CaptureUnavailable`] when the display cannot be read.
    fn capture(&self) -> RecordResult<Frame>;

    /// Size of the frames `capture` will return
    fn native_resolution(&self) -> RecordResult<Resolution>;
}

/// Runs captures on a helper thread with a per-capture time limit
///
/// Only one request is outstanding at a time. If a capture overruns the
/// timeout its result is picked up by the next call instead of being lost.
pub struct CaptureWorker {
    request_tx: Option<Sender<()>>,
    frame_rx: Receiver<RecordResult<Frame>>,
    pending: bool,
    timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn(source: Arc<dyn FrameSource>, timeout: Duration) -> RecordResult<Self> {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<()>(1);
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);

        let handle = std::thread::Builder::new()
            .name("screenrec-capture".into())
            .spawn(move || {
                for () in request_rx.iter() {
                    if frame_tx.send(source.capture()).is_err() {
                        break;
                    }
                }
                log::debug!("Capture worker exiting");
            })
            .map_err(|e| {
                RecordError::CaptureUnavailable(format!("failed to spawn capture thread: {}", e))
            })?;

        Ok(Self {
            request_tx: Some(request_tx),
            frame_rx,
            pending: false,
            timeout,
            handle: Some(handle),
        })
    }

    /// Capture one frame, waiting at most the configured timeout
    pub fn capture(&mut self) -> RecordResult<Frame> {
        if !self.pending {
            let tx = self
                .request_tx
                .as_ref()
                .ok_or_else(|| RecordError::CaptureUnavailable("capture worker shut down".into()))?;
            tx.send(())
                .map_err(|_| RecordError::CaptureUnavailable("capture worker exited".into()))?;
            self.pending = true;
        }

        match self.frame_rx.recv_timeout(self.timeout) {
            Ok(result) => {
                self.pending = false;
                result
            }
            Err(RecvTimeoutError::Timeout) => Err(RecordError::CaptureUnavailable(format!(
                "capture did not complete within {:?}",
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                self.pending = false;
                Err(RecordError::CaptureUnavailable("capture worker exited".into()))
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            if self.pending {
                // A capture is still running; let it finish on its own
                log::warn!("Detaching capture thread with a capture still in flight");
            } else if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SlowSource {
        delay: Duration,
        calls: AtomicU32,
    }

    impl FrameSource for SlowSource {
        fn capture(&self) -> RecordResult<Frame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Frame::new(2, 2, PixelFormat::Rgb8, vec![0; 12])
        }

        fn native_resolution(&self) -> RecordResult<Resolution> {
            Ok(Resolution::new(2, 2))
        }
    }

    #[test]
    fn test_capture_returns_frame() {
        let source = Arc::new(PatternSource::new(Resolution::new(8, 4)));
        let mut worker = CaptureWorker::spawn(source, Duration::from_secs(5)).unwrap();
        let frame = worker.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
    }

    #[test]
    fn test_slow_capture_times_out_and_is_picked_up_later() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(200),
            calls: AtomicU32::new(0),
        });
        let mut worker = CaptureWorker::spawn(source.clone(), Duration::from_millis(20)).unwrap();

        let err = worker.capture().unwrap_err();
        assert!(matches!(err, RecordError::CaptureUnavailable(_)));

        std::thread::sleep(Duration::from_millis(300));
        assert!(worker.capture().is_ok());
        // The late result satisfied the second call without a new request
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
