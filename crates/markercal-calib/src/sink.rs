//! Destinations for annotated frames.

use std::path::{Path, PathBuf};

use image::RgbImage;

/// Receives every frame a loop would display.
pub trait FrameSink {
    fn push(&mut self, frame: &RgbImage) -> Result<(), image::ImageError>;
}

/// Discards frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn push(&mut self, _frame: &RgbImage) -> Result<(), image::ImageError> {
        Ok(())
    }
}

/// Writes `frame_00000.png`, `frame_00001.png`, ... into a directory.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    next: usize,
}

impl PngSequenceSink {
    /// Create the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, next: 0 })
    }

    pub fn frames_written(&self) -> usize {
        self.next
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for PngSequenceSink {
    fn push(&mut self, frame: &RgbImage) -> Result<(), image::ImageError> {
        let path = self.dir.join(format!("frame_{:05}.png", self.next));
        frame.save(&path)?;
        self.next += 1;
        Ok(())
    }
}

/// Keeps frames in memory.
impl FrameSink for Vec<RgbImage> {
    fn push(&mut self, frame: &RgbImage) -> Result<(), image::ImageError> {
        Vec::push(self, frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_sequence_numbers_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("frames");
        let mut sink = PngSequenceSink::new(&out).expect("sink");
        let frame = RgbImage::new(4, 3);
        sink.push(&frame).expect("push");
        sink.push(&frame).expect("push");
        assert_eq!(sink.frames_written(), 2);
        assert!(out.join("frame_00000.png").is_file());
        assert!(out.join("frame_00001.png").is_file());
        let back = image::open(out.join("frame_00001.png")).expect("open").to_rgb8();
        assert_eq!(back.dimensions(), (4, 3));
    }

    #[test]
    fn vec_sink_collects() {
        let mut frames: Vec<RgbImage> = Vec::new();
        FrameSink::push(&mut frames, &RgbImage::new(2, 2)).expect("push");
        NullSink.push(&RgbImage::new(2, 2)).expect("push");
        assert_eq!(frames.len(), 1);
    }
}
