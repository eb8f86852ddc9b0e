//! GStreamer pipeline sink for mp4/mkv/webm output

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::{Path, PathBuf};

use super::encoder::{EncoderInfo, select_encoder};
use super::sink::{VideoSink, check_frame};
use super::target::RecordingTarget;
use crate::error::{RecordError, RecordResult};
use crate::frame::{Frame, PixelFormat};

fn gst_err(context: &str) -> impl Fn(gst::glib::BoolError) -> RecordError + '_ {
    move |e| RecordError::Encode(format!("{}: {}", context, e))
}

/// appsrc -> videoconvert -> encoder -> muxer -> filesink
pub struct GstSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    target: RecordingTarget,
    frames: u64,
    closed: bool,
}

impl GstSink {
    pub fn open(target: &RecordingTarget, encoder: Option<&str>) -> RecordResult<Self> {
        let init_failed = |e: gst::glib::Error| {
            RecordError::io(
                &target.path,
                std::io::Error::other(format!("Failed to initialize GStreamer: {}", e)),
            )
        };
        gst::init().map_err(init_failed)?;

        // Encoder/muxer problems are reported as I/O: the stream cannot be opened
        let unavailable = |e: RecordError| {
            RecordError::io(&target.path, std::io::Error::other(e.to_string()))
        };
        let encoder = select_encoder(target.container, encoder).map_err(unavailable)?;
        log::info!("Using encoder: {}", encoder.display_name());

        let (pipeline, appsrc) = Self::build(target, &encoder).map_err(unavailable)?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| unavailable(RecordError::Encode(format!("Failed to start pipeline: {}", e))))?;

        Ok(Self {
            pipeline,
            appsrc,
            target: target.clone(),
            frames: 0,
            closed: false,
        })
    }

    fn build(
        target: &RecordingTarget,
        encoder: &EncoderInfo,
    ) -> RecordResult<(gst::Pipeline, gst_app::AppSrc)> {
        let location = target
            .path
            .to_str()
            .ok_or_else(|| RecordError::Encode("output path is not valid UTF-8".into()))?;
        let width = target.resolution.width;
        let height = target.resolution.height;

        let pipeline = gst::Pipeline::new();

        let appsrc = gst_app::AppSrc::builder()
            .name("screen-source")
            .is_live(true)
            .format(gst::Format::Time)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(gst_err("Failed to create videoconvert element"))?;
        let encoder_elem = gst::ElementFactory::make(&encoder.gst_element)
            .build()
            .map_err(|e| {
                RecordError::Encode(format!("Failed to create encoder {}: {}", encoder.gst_element, e))
            })?;
        let muxer = gst::ElementFactory::make(target.container.muxer_element())
            .build()
            .map_err(|e| {
                RecordError::Encode(format!(
                    "Failed to create muxer {}: {}",
                    target.container.muxer_element(),
                    e
                ))
            })?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(gst_err("Failed to create filesink element"))?;

        let elements = [
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder_elem,
            &muxer,
            &filesink,
        ];
        pipeline
            .add_many(elements)
            .map_err(gst_err("Failed to add elements to pipeline"))?;
        gst::Element::link_many(elements).map_err(gst_err("Failed to link pipeline"))?;

        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgba, width, height)
            .fps(gst::Fraction::new(target.frame_rate as i32, 1))
            .build()
            .map_err(gst_err("Invalid video format"))?;
        let caps = info
            .to_caps()
            .map_err(gst_err("Failed to build caps"))?;
        appsrc.set_caps(Some(&caps));

        Ok((pipeline, appsrc))
    }

    fn frame_time(&self, n: u64) -> gst::ClockTime {
        gst::ClockTime::from_nseconds(n * 1_000_000_000 / self.target.frame_rate as u64)
    }

    /// Send EOS, wait for the muxer to write its trailer, then tear down
    fn finish(&mut self) -> RecordResult<()> {
        if self.frames == 0 {
            return self.discard_empty();
        }

        log::info!("Sending EOS signal to pipeline...");
        self.appsrc
            .end_of_stream()
            .map_err(|e| RecordError::Encode(format!("Failed to send EOS: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| RecordError::Encode("pipeline has no bus".into()))?;
        let mut eos_received = false;
        let mut failure = None;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => {
                    eos_received = true;
                    break;
                }
                MessageView::Error(err) => {
                    failure = Some(RecordError::Encode(format!(
                        "Pipeline error: {} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    )));
                    break;
                }
                _ => {}
            }
        }

        if !eos_received && failure.is_none() {
            log::warn!("EOS timeout reached, forcing pipeline shutdown");
        }

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| RecordError::Encode(format!("Failed to stop pipeline: {}", e)))?;

        if let Some(e) = failure {
            return Err(e);
        }
        self.verify_output()
    }

    /// Muxers cannot write a playable file without a single buffer, so a
    /// zero-frame recording leaves no file at all
    fn discard_empty(&mut self) -> RecordResult<()> {
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| RecordError::Encode(format!("Failed to stop pipeline: {}", e)))?;

        let path = &self.target.path;
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RecordError::io(path, e)),
        }
        log::info!("No frames recorded, removed {}", path.display());
        Ok(())
    }

    /// Verify that the output file exists and has data
    fn verify_output(&self) -> RecordResult<()> {
        let path = &self.target.path;
        let metadata = std::fs::metadata(path).map_err(|e| RecordError::io(path, e))?;
        if metadata.len() == 0 {
            return Err(RecordError::io(
                path,
                std::io::Error::other("output file is empty"),
            ));
        }
        log::info!("Output file verified: {} ({} bytes)", path.display(), metadata.len());
        Ok(())
    }
}

impl VideoSink for GstSink {
    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    fn append(&mut self, frame: Frame) -> RecordResult<()> {
        if self.closed {
            return Err(RecordError::Encode("stream is already closed".into()));
        }
        check_frame(&self.target, PixelFormat::Rgba8, &frame)?;

        let pts = self.frame_time(self.frames);
        let duration = self.frame_time(self.frames + 1) - pts;
        let mut buffer = gst::Buffer::from_mut_slice(frame.into_data());
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| RecordError::Encode("buffer is not writable".into()))?;
            buffer.set_pts(pts);
            buffer.set_duration(duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RecordError::Encode(format!("Failed to push buffer to pipeline: {:?}", e)))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> RecordResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish()
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn path(&self) -> &Path {
        &self.target.path
    }

    fn files(&self) -> Vec<PathBuf> {
        if self.closed && self.frames == 0 {
            Vec::new()
        } else {
            vec![self.target.path.clone()]
        }
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize {}: {}", self.target.path.display(), e);
            }
        }
    }
}
