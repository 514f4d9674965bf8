//! Frame sources
//!
//! A [`FrameSource`] yields decoded RGB frames one at a time.
//! [`RawRgbSource`] reads the `rgb24` raw video external tools produce (for
//! example `ffmpeg -i clip.mp4 -f rawvideo -pix_fmt rgb24 -`),
//! [`ImageSequenceSource`] reads a directory of numbered stills, and with the
//! `opencv` feature `VideoFileSource` decodes container files directly.

use crate::error::ComputeError;
use crate::types::Frame;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Trait for sequential frame providers
pub trait FrameSource {
    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError>;

    /// Nominal frame rate, when the source knows it
    fn frame_rate(&self) -> Option<f64>;
}

/// Frames already held in memory
pub struct MemoryFrameSource {
    frames: VecDeque<Frame>,
    fps: Option<f64>,
}

impl MemoryFrameSource {
    /// `fps = None` makes the extractor derive the rate from timestamps
    pub fn new(frames: Vec<Frame>, fps: Option<f64>) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError> {
        Ok(self.frames.pop_front())
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }
}

/// Headerless interleaved RGB8 frames of fixed size from any reader
pub struct RawRgbSource<R: Read> {
    reader: R,
    width: u32,
    height: u32,
    fps: f64,
    index: u64,
}

impl<R: Read> RawRgbSource<R> {
    pub fn new(reader: R, width: u32, height: u32, fps: f64) -> Result<Self, ComputeError> {
        if width == 0 || height == 0 {
            return Err(ComputeError::Decode(format!(
                "invalid frame dimensions {width}x{height}"
            )));
        }
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(ComputeError::Decode(format!("invalid frame rate {fps}")));
        }
        Ok(Self {
            reader,
            width,
            height,
            fps,
            index: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl<R: Read> FrameSource for RawRgbSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError> {
        let mut data = vec![0u8; self.frame_len()];
        let mut filled = 0;
        while filled < data.len() {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < data.len() {
            return Err(ComputeError::Decode(format!(
                "truncated frame {}: got {filled} of {} bytes",
                self.index,
                data.len()
            )));
        }

        let timestamp_ms = self.index as f64 * 1000.0 / self.fps;
        self.index += 1;
        Frame::new(self.width, self.height, timestamp_ms, data).map(Some)
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps)
    }
}

/// Still images (PNG, JPEG) in file-name order, one per frame
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    fps: f64,
    index: u64,
}

impl ImageSequenceSource {
    const EXTENSIONS: [&'static str; 3] = ["png", "jpg", "jpeg"];

    pub fn new(paths: Vec<PathBuf>, fps: f64) -> Result<Self, ComputeError> {
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(ComputeError::Decode(format!("invalid frame rate {fps}")));
        }
        Ok(Self {
            paths: paths.into(),
            fps,
            index: 0,
        })
    }

    /// Every image file in `dir`, sorted by name
    pub fn from_dir(dir: &Path, fps: f64) -> Result<Self, ComputeError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| Self::EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();
        debug!(dir = %dir.display(), frames = paths.len(), "Image sequence listed");
        Self::new(paths, fps)
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let timestamp_ms = self.index as f64 * 1000.0 / self.fps;
        self.index += 1;
        Frame::open(&path, timestamp_ms).map(Some)
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps)
    }
}

#[cfg(feature = "opencv")]
pub use video::VideoFileSource;

#[cfg(feature = "opencv")]
mod video {
    use super::FrameSource;
    use crate::error::ComputeError;
    use crate::types::Frame;
    use opencv::core::Mat;
    use opencv::imgproc;
    use opencv::prelude::*;
    use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_POS_MSEC};
    use std::path::Path;
    use tracing::info;

    /// Container video (MP4, AVI, MOV) decoded by OpenCV
    pub struct VideoFileSource {
        capture: VideoCapture,
        fps: Option<f64>,
    }

    fn decode_error(err: opencv::Error) -> ComputeError {
        ComputeError::Decode(err.to_string())
    }

    impl VideoFileSource {
        pub fn open(path: &Path) -> Result<Self, ComputeError> {
            let name = path
                .to_str()
                .ok_or_else(|| ComputeError::Decode(format!("{}: path is not valid UTF-8", path.display())))?;
            let capture = VideoCapture::from_file(name, CAP_ANY).map_err(decode_error)?;
            if !capture.is_opened().map_err(decode_error)? {
                return Err(ComputeError::Decode(format!("{}: cannot open video", path.display())));
            }
            let fps = capture
                .get(CAP_PROP_FPS)
                .ok()
                .filter(|f| *f > 0.0 && f.is_finite());
            info!(path = %path.display(), fps, "Opened video");
            Ok(Self { capture, fps })
        }
    }

    impl FrameSource for VideoFileSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError> {
            let mut bgr = Mat::default();
            if !self.capture.read(&mut bgr).map_err(decode_error)? || bgr.empty() {
                return Ok(None);
            }
            let timestamp_ms = self.capture.get(CAP_PROP_POS_MSEC).map_err(decode_error)?;
            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(decode_error)?;
            let data = rgb.data_bytes().map_err(decode_error)?.to_vec();
            Frame::new(rgb.cols() as u32, rgb.rows() as u32, timestamp_ms, data).map(Some)
        }

        fn frame_rate(&self) -> Option<f64> {
            self.fps
        }
    }
}
