use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A single image or every image in a directory, in file-name order.
pub(super) struct ImageFileSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageFileSource {
    pub(super) fn open(input: &str) -> Result<Self> {
        let path = Path::new(input);
        let paths = if path.is_dir() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading image directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(anyhow!("input {} does not exist", path.display()));
        };
        if paths.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        Ok(Self { paths, next: 0 })
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let rgb = image::open(path)
            .with_context(|| format!("decoding image {}", path.display()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Some(Frame::new(rgb.into_raw(), width, height)?))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
