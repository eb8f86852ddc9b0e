//! AVI (RIFF) writer and reader for Motion-JPEG video
//!
//! File layout:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     'avih'                      main header
//!     LIST 'strl'
//!       'strh'                    video stream header, handler 'MJPG'
//!       'strf'                    BITMAPINFOHEADER
//!   LIST 'movi'
//!     '00dc' ...                  one JPEG per frame
//!   'idx1'                        one entry per frame, all keyframes
//! ```
//!
//! The header is written with zero counts on open and rewritten in place on
//! close, once the frame count and sizes are known. A file closed after zero
//! frames is still a complete container with an empty index. Long recordings
//! are split into several such files so no RIFF grows past the segment limit.

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::sink::{VideoSink, check_frame};
use super::target::RecordingTarget;
use crate::error::{RecordError, RecordResult};
use crate::frame::{Frame, PixelFormat};

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const FRAME_CHUNK: &[u8; 4] = b"00dc";
const HANDLER: &[u8; 4] = b"MJPG";

/// Bytes before the first frame chunk
pub const HEADER_LEN: u64 = 224;
/// Largest JPEG dimension
const MAX_DIMENSION: u32 = u16::MAX as u32;

struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Path of part `n` (2, 3, ...) of a recording that started at `first`
fn part_path(first: &Path, n: usize) -> PathBuf {
    let stem = first
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = first
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "avi".to_string());
    first.with_file_name(format!("{}_part{}.{}", stem, n, ext))
}

/// One self-contained RIFF file of a recording
struct Segment {
    file: File,
    /// Target with this part's path
    target: RecordingTarget,
    index: Vec<IndexEntry>,
    /// Bytes written after the 'movi' list type
    movi_len: u64,
    max_chunk: u32,
    closed: bool,
}

impl Segment {
    fn create(target: RecordingTarget) -> RecordResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target.path)
            .map_err(|e| RecordError::io(&target.path, e))?;

        let mut segment = Self {
            file,
            target,
            index: Vec::new(),
            movi_len: 0,
            max_chunk: 0,
            closed: false,
        };
        let header = segment.header();
        segment
            .file
            .write_all(&header)
            .map_err(|e| RecordError::io(&segment.target.path, e))?;
        Ok(segment)
    }

    /// Build the header for the current totals
    fn header(&self) -> Vec<u8> {
        let width = self.target.resolution.width;
        let height = self.target.resolution.height;
        let fps = self.target.frame_rate;
        let frames = self.index.len() as u32;
        let index_len = if self.closed {
            8 + 16 * self.index.len() as u64
        } else {
            0
        };
        let riff_len = (HEADER_LEN - 8 + self.movi_len + index_len) as u32;
        let movi_list_len = (4 + self.movi_len) as u32;
        let micros_per_frame = (1_000_000.0 / fps as f64).round() as u32;

        let mut h = Vec::with_capacity(HEADER_LEN as usize);
        h.extend_from_slice(b"RIFF");
        put_u32(&mut h, riff_len);
        h.extend_from_slice(b"AVI ");

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, 192);
        h.extend_from_slice(b"hdrl");

        h.extend_from_slice(b"avih");
        put_u32(&mut h, 56);
        put_u32(&mut h, micros_per_frame);
        put_u32(&mut h, self.max_chunk.saturating_mul(fps)); // max bytes per second
        put_u32(&mut h, 0); // padding granularity
        put_u32(&mut h, AVIF_HASINDEX);
        put_u32(&mut h, frames);
        put_u32(&mut h, 0); // initial frames
        put_u32(&mut h, 1); // streams
        put_u32(&mut h, self.max_chunk);
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        for _ in 0..4 {
            put_u32(&mut h, 0);
        }

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, 116);
        h.extend_from_slice(b"strl");

        h.extend_from_slice(b"strh");
        put_u32(&mut h, 56);
        h.extend_from_slice(b"vids");
        h.extend_from_slice(HANDLER);
        put_u32(&mut h, 0); // flags
        put_u16(&mut h, 0); // priority
        put_u16(&mut h, 0); // language
        put_u32(&mut h, 0); // initial frames
        put_u32(&mut h, 1); // scale
        put_u32(&mut h, fps); // rate
        put_u32(&mut h, 0); // start
        put_u32(&mut h, frames); // length
        put_u32(&mut h, self.max_chunk);
        put_u32(&mut h, u32::MAX); // quality: default
        put_u32(&mut h, 0); // sample size
        put_u16(&mut h, 0);
        put_u16(&mut h, 0);
        put_u16(&mut h, width as u16);
        put_u16(&mut h, height as u16);

        h.extend_from_slice(b"strf");
        put_u32(&mut h, 40);
        put_u32(&mut h, 40); // biSize
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        put_u16(&mut h, 1); // planes
        put_u16(&mut h, 24); // bit count
        h.extend_from_slice(HANDLER);
        put_u32(&mut h, width.saturating_mul(height).saturating_mul(3));
        for _ in 0..4 {
            put_u32(&mut h, 0);
        }

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, movi_list_len);
        h.extend_from_slice(b"movi");

        debug_assert_eq!(h.len() as u64, HEADER_LEN);
        h
    }

    /// Whether one more frame of `len` bytes keeps the finished file within `limit`
    fn fits(&self, len: usize, limit: u64) -> bool {
        let padded = len as u64 + (len as u64 & 1);
        let index_after = 8 + 16 * (self.index.len() as u64 + 1);
        HEADER_LEN + self.movi_len + 8 + padded + index_after <= limit
    }

    fn write_chunk(&mut self, jpeg: &[u8]) -> RecordResult<()> {
        let mut chunk = Vec::with_capacity(8 + jpeg.len() + 1);
        chunk.extend_from_slice(FRAME_CHUNK);
        put_u32(&mut chunk, jpeg.len() as u32);
        chunk.extend_from_slice(jpeg);
        if jpeg.len() % 2 == 1 {
            chunk.push(0);
        }
        if let Err(e) = self.file.write_all(&chunk) {
            self.discard_partial();
            return Err(RecordError::io(&self.target.path, e));
        }

        self.index.push(IndexEntry {
            offset: (4 + self.movi_len) as u32,
            size: jpeg.len() as u32,
        });
        self.movi_len += chunk.len() as u64;
        self.max_chunk = self.max_chunk.max(jpeg.len() as u32);
        Ok(())
    }

    /// Cut off whatever a failed chunk write left behind the last frame
    fn discard_partial(&mut self) {
        let end = HEADER_LEN + self.movi_len;
        let rewound = self
            .file
            .set_len(end)
            .and_then(|()| self.file.seek(SeekFrom::Start(end)).map(|_| ()));
        if let Err(e) = rewound {
            log::error!(
                "Failed to discard partial frame in {}: {}",
                self.target.path.display(),
                e
            );
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        let mut idx = Vec::with_capacity(8 + 16 * self.index.len());
        idx.extend_from_slice(b"idx1");
        put_u32(&mut idx, 16 * self.index.len() as u32);
        for entry in &self.index {
            idx.extend_from_slice(FRAME_CHUNK);
            put_u32(&mut idx, AVIIF_KEYFRAME);
            put_u32(&mut idx, entry.offset);
            put_u32(&mut idx, entry.size);
        }
        self.file.write_all(&idx)?;

        self.closed = true;
        let header = self.header();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.sync_all()
    }

    fn close(&mut self) -> RecordResult<()> {
        if self.closed {
            return Ok(());
        }
        let finished = self.finish();
        // A failed finalize is not retried on drop
        self.closed = true;
        finished.map_err(|e| RecordError::io(&self.target.path, e))?;
        log::info!(
            "Finalized {} ({} frames, {} bytes of video)",
            self.target.path.display(),
            self.index.len(),
            self.movi_len
        );
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize {}: {}", self.target.path.display(), e);
            }
        }
    }
}

/// Streams JPEG frames into AVI files
///
/// When the next frame would grow the current file past
/// `max_segment_bytes`, that file is finalized and recording continues in
/// `<name>_part2.avi`, `<name>_part3.avi`, ... Every part is a complete,
/// independently playable AVI 1.0 file.
pub struct AviWriter {
    target: RecordingTarget,
    current: Segment,
    /// Parts already finalized
    finished: Vec<PathBuf>,
    frames: u64,
    closed: bool,
}

impl AviWriter {
    /// Create the output file and write a provisional header
    ///
    /// Fails if the file already exists or the frame size cannot be encoded.
    pub fn create(target: &RecordingTarget) -> RecordResult<Self> {
        let res = target.resolution;
        if res.width == 0
            || res.height == 0
            || res.width > MAX_DIMENSION
            || res.height > MAX_DIMENSION
            || target.frame_rate == 0
        {
            return Err(RecordError::io(
                &target.path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "MJPEG cannot encode {} at {} fps",
                        res, target.frame_rate
                    ),
                ),
            ));
        }

        let current = Segment::create(target.clone())?;
        log::info!(
            "Opened AVI/MJPEG stream: {} ({} @ {} fps)",
            target.path.display(),
            res,
            target.frame_rate
        );
        Ok(Self {
            target: target.clone(),
            current,
            finished: Vec::new(),
            frames: 0,
            closed: false,
        })
    }

    fn segment_limit(&self) -> u64 {
        self.target.max_segment_bytes.min(u32::MAX as u64)
    }

    fn encode_jpeg(&self, frame: &Frame) -> RecordResult<Vec<u8>> {
        let mut jpeg = Vec::with_capacity(frame.data().len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.target.jpeg_quality)
            .encode(frame.data(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
            .map_err(|e| RecordError::Encode(format!("JPEG encoding failed: {}", e)))?;
        Ok(jpeg)
    }

    /// Finalize the current part and continue in the next one
    fn roll_over(&mut self) -> RecordResult<()> {
        self.current.close()?;

        let mut next = self.target.clone();
        next.path = part_path(&self.target.path, self.finished.len() + 2);
        log::info!(
            "Segment size limit reached after {} frames, continuing in {}",
            self.frames,
            next.path.display()
        );
        let segment = match Segment::create(next) {
            Ok(segment) => segment,
            Err(e) => {
                // The finished part stays valid; nothing more can be appended
                self.closed = true;
                return Err(e);
            }
        };
        let done = std::mem::replace(&mut self.current, segment);
        self.finished.push(done.target.path.clone());
        Ok(())
    }
}

impl VideoSink for AviWriter {
    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }

    fn append(&mut self, frame: Frame) -> RecordResult<()> {
        if self.closed {
            return Err(RecordError::Encode("stream is already closed".into()));
        }
        check_frame(&self.target, PixelFormat::Rgb8, &frame)?;

        let jpeg = self.encode_jpeg(&frame)?;
        let limit = self.segment_limit();
        if !self.current.fits(jpeg.len(), limit) {
            if self.current.index.is_empty() {
                return Err(RecordError::Encode(format!(
                    "encoded frame of {} bytes does not fit the {} byte segment limit",
                    jpeg.len(),
                    limit
                )));
            }
            self.roll_over()?;
        }

        self.current.write_chunk(&jpeg)?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> RecordResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current.close()
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn path(&self) -> &Path {
        &self.target.path
    }

    fn files(&self) -> Vec<PathBuf> {
        let mut files = self.finished.clone();
        files.push(self.current.target.path.clone());
        files
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Stream facts read back from a finished AVI file
#[derive(Debug, Clone, PartialEq)]
pub struct AviInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    /// Frames per second from the stream header (rate / scale)
    pub frame_rate: f64,
    /// Frame count in the main header
    pub total_frames: u32,
    /// Frame count in the stream header
    pub stream_length: u32,
    /// Entries in the idx1 index
    pub indexed_frames: u32,
    pub file_size: u64,
}

impl AviInfo {
    /// Playback length of the indexed frames
    pub fn duration(&self) -> Duration {
        if self.frame_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.indexed_frames as f64 / self.frame_rate)
    }
}

struct Layout {
    info: AviInfo,
    movi_type_pos: u64,
    index: Vec<IndexEntry>,
}

fn bad(path: &Path, msg: impl Into<String>) -> RecordError {
    RecordError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into()),
    )
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn read_layout(path: &Path) -> RecordResult<Layout> {
    let io = |e| RecordError::io(path, e);
    let mut file = File::open(path).map_err(io)?;
    let file_size = file.metadata().map_err(io)?.len();

    let mut riff = [0u8; 12];
    file.read_exact(&mut riff).map_err(io)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"AVI " {
        return Err(bad(path, "not an AVI file"));
    }
    let riff_end = 8 + le32(&riff, 4) as u64;
    if riff_end > file_size {
        return Err(bad(path, "RIFF size exceeds file size (truncated file)"));
    }

    let mut info = AviInfo {
        path: path.to_path_buf(),
        width: 0,
        height: 0,
        codec: String::new(),
        frame_rate: 0.0,
        total_frames: 0,
        stream_length: 0,
        indexed_frames: 0,
        file_size,
    };
    let mut movi_type_pos = None;
    let mut index = None;
    let mut pos = 12u64;

    while pos + 8 <= riff_end {
        file.seek(SeekFrom::Start(pos)).map_err(io)?;
        let mut head = [0u8; 8];
        file.read_exact(&mut head).map_err(io)?;
        let size = le32(&head, 4) as u64;
        let body = pos + 8;
        if body + size > riff_end {
            return Err(bad(path, format!("chunk at {} overruns the file", pos)));
        }

        match &head[0..4] {
            b"LIST" => {
                if size < 4 {
                    return Err(bad(path, format!("empty LIST at {}", pos)));
                }
                let mut kind = [0u8; 4];
                file.read_exact(&mut kind).map_err(io)?;
                match &kind {
                    b"hdrl" => {
                        let mut hdrl = vec![0u8; size as usize - 4];
                        file.read_exact(&mut hdrl).map_err(io)?;
                        parse_hdrl(path, &hdrl, &mut info)?;
                    }
                    b"movi" => movi_type_pos = Some(body),
                    _ => {}
                }
            }
            b"idx1" => {
                let mut raw = vec![0u8; size as usize];
                file.read_exact(&mut raw).map_err(io)?;
                let entries = raw
                    .chunks_exact(16)
                    .filter(|e| &e[0..4] == FRAME_CHUNK)
                    .map(|e| IndexEntry {
                        offset: le32(e, 8),
                        size: le32(e, 12),
                    })
                    .collect::<Vec<_>>();
                index = Some(entries);
            }
            _ => {}
        }

        pos = body + size + (size & 1);
    }

    let movi_type_pos = movi_type_pos.ok_or_else(|| bad(path, "missing movi list"))?;
    let index = index.ok_or_else(|| bad(path, "missing idx1 index (file not finalized)"))?;
    info.indexed_frames = index.len() as u32;

    Ok(Layout {
        info,
        movi_type_pos,
        index,
    })
}

fn parse_hdrl(path: &Path, hdrl: &[u8], info: &mut AviInfo) -> RecordResult<()> {
    let mut pos = 0;
    while pos + 8 <= hdrl.len() {
        let id = &hdrl[pos..pos + 4];
        let size = le32(hdrl, pos + 4) as usize;
        let body = pos + 8;
        if body + size > hdrl.len() {
            return Err(bad(path, "header chunk overruns hdrl"));
        }
        let data = &hdrl[body..body + size];

        match id {
            b"avih" if size >= 40 => {
                info.total_frames = le32(data, 16);
                info.width = le32(data, 32);
                info.height = le32(data, 36);
            }
            b"LIST" if size >= 4 && &data[0..4] == b"strl" => {
                parse_hdrl(path, &data[4..], info)?;
            }
            b"strh" if size >= 36 && &data[0..4] == b"vids" => {
                info.codec = String::from_utf8_lossy(&data[4..8]).into_owned();
                let scale = le32(data, 20);
                let rate = le32(data, 24);
                if scale > 0 {
                    info.frame_rate = rate as f64 / scale as f64;
                }
                info.stream_length = le32(data, 32);
            }
            _ => {}
        }

        pos = body + size + (size & 1);
    }
    Ok(())
}

/// Read the headers and index of a finished AVI file
pub fn probe(path: &Path) -> RecordResult<AviInfo> {
    Ok(read_layout(path)?.info)
}

/// Return the encoded bytes of frame `n` (a complete JPEG image)
pub fn read_frame(path: &Path, n: usize) -> RecordResult<Vec<u8>> {
    let layout = read_layout(path)?;
    let entry = layout
        .index
        .get(n)
        .ok_or_else(|| bad(path, format!("frame {} out of range ({} frames)", n, layout.index.len())))?;

    let io = |e| RecordError::io(path, e);
    let mut file = File::open(path).map_err(io)?;
    file.seek(SeekFrom::Start(layout.movi_type_pos + entry.offset as u64))
        .map_err(io)?;
    let mut head = [0u8; 8];
    file.read_exact(&mut head).map_err(io)?;
    if &head[0..4] != FRAME_CHUNK || le32(&head, 4) != entry.size {
        return Err(bad(path, format!("index entry {} does not point at a frame chunk", n)));
    }
    let mut data = vec![0u8; entry.size as usize];
    file.read_exact(&mut data).map_err(io)?;
    Ok(data)
}
