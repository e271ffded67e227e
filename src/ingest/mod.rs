//! Frame sources.
//!
//! - `stub://...`: synthetic sky frames with a dark blob, for demos and tests.
//! - Local image files or directories of images (feature: ingest-image).
//!
//! Sources hand out one immutable `Frame` at a time and keep nothing after
//! handing it over.

#[cfg(feature = "ingest-image")]
mod image_file;
mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-image")]
use image_file::ImageFileSource;
use synthetic::SyntheticSource;

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<name>` or a local path.
    pub input: String,
    /// Synthetic frame size.
    pub width: u32,
    pub height: u32,
    pub seed: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input: "stub://synthetic".to_string(),
            width: 640,
            height: 480,
            seed: 0,
        }
    }
}

/// Source of frames.
pub struct FrameSource {
    backend: SourceBackend,
    frames_read: u64,
    frames_skipped: u64,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-image")]
    Images(ImageFileSource),
}

impl FrameSource {
    pub fn open(config: SourceConfig) -> Result<Self> {
        if config.input.trim().is_empty() {
            return Err(anyhow!("frame source input must not be empty"));
        }
        let backend = if config.input.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(&config)?)
        } else if config.input.contains("://") {
            return Err(anyhow!(
                "only local paths and stub:// sources are supported, got {}",
                config.input
            ));
        } else {
            #[cfg(feature = "ingest-image")]
            {
                SourceBackend::Images(ImageFileSource::open(&config.input)?)
            }
            #[cfg(not(feature = "ingest-image"))]
            {
                return Err(anyhow!(
                    "image file ingestion requires the ingest-image feature"
                ));
            }
        };
        log::info!("frame source opened: {}", config.input);
        Ok(Self {
            backend,
            frames_read: 0,
            frames_skipped: 0,
        })
    }

    /// Next frame, or `None` when a finite source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match &mut self.backend {
            SourceBackend::Synthetic(source) => Some(source.next_frame()?),
            #[cfg(feature = "ingest-image")]
            SourceBackend::Images(source) => source.next_frame()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    /// Like `next_frame`, but a frame that fails to load is logged and
    /// skipped instead of ending the stream.
    pub fn next_readable_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next_frame() {
                Ok(frame) => return frame,
                Err(err) => {
                    self.frames_skipped += 1;
                    log::error!("skipping unreadable frame: {:#}", err);
                }
            }
        }
    }

    /// Frames that failed to load in `next_readable_frame`.
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// True when the source never runs out.
    pub fn is_unbounded(&self) -> bool {
        matches!(self.backend, SourceBackend::Synthetic(_))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_source_produces_frames_of_configured_size() {
        let mut source = FrameSource::open(SourceConfig {
            width: 32,
            height: 24,
            ..SourceConfig::default()
        })
        .unwrap();
        assert!(source.is_unbounded());
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert_eq!(source.frames_read(), 1);
    }

    #[cfg(feature = "ingest-image")]
    #[test]
    fn unreadable_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_broken.png"), b"not a png").unwrap();
        image::RgbImage::new(4, 3)
            .save(dir.path().join("b_good.png"))
            .unwrap();

        let mut source = FrameSource::open(SourceConfig {
            input: dir.path().display().to_string(),
            ..SourceConfig::default()
        })
        .unwrap();
        assert!(!source.is_unbounded());
        let frame = source.next_readable_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(source.frames_skipped(), 1);
        assert_eq!(source.frames_read(), 1);
        assert!(source.next_readable_frame().is_none());
    }

    #[test]
    fn remote_urls_are_rejected() {
        let config = SourceConfig {
            input: "rtsp://camera".into(),
            ..SourceConfig::default()
        };
        assert!(FrameSource::open(config).is_err());
    }
}
