use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{PiwoError, PiwoResult};
use crate::writer::FrameSource;

pub const FRAME_FILE_PREFIX: &str = "raw-frame-";
pub const FRAME_FILE_EXTENSION: &str = "bmp";

/// `raw-frame-{number}.bmp`
pub fn frame_file_name(number: u32) -> String {
    format!("{}{}.{}", FRAME_FILE_PREFIX, number, FRAME_FILE_EXTENSION)
}

/// Pattern handed to ffmpeg for numbered output.
pub fn frame_file_pattern() -> String {
    format!("{}%d.{}", FRAME_FILE_PREFIX, FRAME_FILE_EXTENSION)
}

type Regenerate = Box<dyn Fn(u32, &Path) -> PiwoResult<()> + Send + Sync>;

/// A directory of numbered bitmaps exposed as a [`FrameSource`].
///
/// Frame `i` (1-based) is read from `raw-frame-{first_index + i - 1}.bmp`.
/// The extractor's numbering is passed in explicitly since it differs
/// between call sites.
pub struct BitmapSequence {
    dir: PathBuf,
    first_index: u32,
    resize: Option<(u32, u32, FilterType)>,
    regenerate: Option<Regenerate>,
}

impl BitmapSequence {
    pub fn new(dir: impl Into<PathBuf>, first_index: u32) -> Self {
        Self {
            dir: dir.into(),
            first_index,
            resize: None,
            regenerate: None,
        }
    }

    /// Resize every decoded frame to `width x height` with `filter`.
    pub fn with_resize(mut self, width: u32, height: u32, filter: FilterType) -> Self {
        self.resize = Some((width, height, filter));
        self
    }

    /// Hook invoked once with `(file_number, path)` when a bitmap is missing.
    pub fn with_regenerate<F>(mut self, regenerate: F) -> Self
    where
        F: Fn(u32, &Path) -> PiwoResult<()> + Send + Sync + 'static,
    {
        self.regenerate = Some(Box::new(regenerate));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    pub fn path_for(&self, index: u32) -> PathBuf {
        self.dir.join(frame_file_name(self.file_number(index)))
    }

    fn file_number(&self, index: u32) -> u32 {
        self.first_index + index.saturating_sub(1)
    }

    fn ensure_present(&self, index: u32, path: &Path) -> PiwoResult<()> {
        if path.is_file() {
            return Ok(());
        }
        let missing = || PiwoError::FrameSourceMissing {
            index,
            path: path.to_path_buf(),
        };
        let Some(regenerate) = &self.regenerate else {
            return Err(missing());
        };

        tracing::warn!(frame = index, path = %path.display(), "bitmap missing, regenerating");
        if let Err(e) = regenerate(self.file_number(index), path) {
            tracing::warn!(frame = index, error = %e, "frame regeneration failed");
            return Err(missing());
        }
        if path.is_file() {
            Ok(())
        } else {
            Err(missing())
        }
    }
}

impl FrameSource for BitmapSequence {
    type Frame = DynamicImage;

    fn load_frame(&self, index: u32) -> PiwoResult<DynamicImage> {
        let path = self.path_for(index);
        self.ensure_present(index, &path)?;

        let img = image::open(&path).map_err(|e| PiwoError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(match self.resize {
            Some((w, h, filter)) if img.width() != w || img.height() != h => img.resize_exact(w, h, filter),
            _ => img,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::PixelSource;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn write_bmp(dir: &Path, number: u32, rgb: [u8; 3], w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb(rgb))
            .save(dir.join(frame_file_name(number)))
            .unwrap();
    }

    #[test]
    fn file_names() {
        assert_eq!(frame_file_name(3), "raw-frame-3.bmp");
        assert_eq!(frame_file_pattern(), "raw-frame-%d.bmp");
    }

    #[test]
    fn honours_first_index() {
        let dir = tempfile::tempdir().unwrap();
        write_bmp(dir.path(), 0, [1, 0, 0], 12, 10);
        write_bmp(dir.path(), 1, [2, 0, 0], 12, 10);

        let zero_based = BitmapSequence::new(dir.path(), 0);
        assert_eq!(zero_based.load_frame(1).unwrap().rgb_at(0, 0), Some([1, 0, 0]));
        assert_eq!(zero_based.load_frame(2).unwrap().rgb_at(0, 0), Some([2, 0, 0]));

        let one_based = BitmapSequence::new(dir.path(), 1);
        assert_eq!(one_based.load_frame(1).unwrap().rgb_at(0, 0), Some([2, 0, 0]));
    }

    #[test]
    fn missing_bitmap_names_frame() {
        let dir = tempfile::tempdir().unwrap();
        let err = BitmapSequence::new(dir.path(), 1).load_frame(4).unwrap_err();
        match err {
            PiwoError::FrameSourceMissing { index, path } => {
                assert_eq!(index, 4);
                assert!(path.ends_with("raw-frame-4.bmp"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn regenerate_is_tried_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let seq = BitmapSequence::new(dir.path(), 1).with_regenerate(move |number, path| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(number, 2);
            RgbImage::from_pixel(12, 10, Rgb([9, 9, 9]))
                .save(path)
                .map_err(|e| PiwoError::tool("test", e.to_string()))
        });
        assert_eq!(seq.load_frame(2).unwrap().rgb_at(11, 9), Some([9, 9, 9]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_regeneration_is_frame_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let seq = BitmapSequence::new(dir.path(), 1)
            .with_regenerate(|_, _| Err(PiwoError::tool("ffmpeg", "boom")));
        assert!(matches!(
            seq.load_frame(1).unwrap_err(),
            PiwoError::FrameSourceMissing { index: 1, .. }
        ));
    }

    #[test]
    fn resizes_to_target() {
        let dir = tempfile::tempdir().unwrap();
        write_bmp(dir.path(), 1, [10, 20, 30], 48, 40);
        let frame = BitmapSequence::new(dir.path(), 1)
            .with_resize(12, 10, FilterType::Triangle)
            .load_frame(1)
            .unwrap();
        assert_eq!((frame.width(), frame.height()), (12, 10));
        assert_eq!(frame.rgb_at(5, 5), Some([10, 20, 30]));
    }

    #[test]
    fn corrupt_bitmap_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(frame_file_name(1)), b"not a bitmap").unwrap();
        assert!(matches!(
            BitmapSequence::new(dir.path(), 1).load_frame(1).unwrap_err(),
            PiwoError::Decode { .. }
        ));
    }
}
