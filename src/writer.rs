use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;

use crate::encoder::PiwoDocument;
use crate::error::{PiwoError, PiwoResult};
use crate::sampler::{PixelGrid, PixelSource};

/// Supplies decoded frames by 1-based frame index.
pub trait FrameSource {
    type Frame: PixelSource;

    fn load_frame(&self, index: u32) -> PiwoResult<Self::Frame>;
}

/// Result of writing one variant file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub frames: u32,
    pub bytes: u64,
}

/// Builds a complete PIWO7 document from a frame source and writes it in one
/// go.
///
/// Frames are visited as `1..=total_frames`. Any failure aborts the whole
/// variant and nothing is written, so an output file never holds fewer
/// blocks than frames requested.
pub struct VariantWriter<'a> {
    width: u32,
    height: u32,
    progress: Option<&'a (dyn Fn(u32, u32) + Send + Sync)>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> VariantWriter<'a> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            progress: None,
            cancel: None,
        }
    }

    /// Called with `(current, total)` after each frame is appended.
    pub fn with_progress(mut self, progress: &'a (dyn Fn(u32, u32) + Send + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Checked before each frame; once set, the writer stops with
    /// [`PiwoError::Cancelled`].
    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Encodes all frames into memory.
    pub fn render<S: FrameSource + ?Sized>(&self, source: &S, total_frames: u32) -> PiwoResult<PiwoDocument> {
        let mut document = PiwoDocument::new(self.width, self.height);
        let mut grid = PixelGrid::new(self.width, self.height);

        for index in 1..=total_frames {
            if self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                return Err(PiwoError::Cancelled);
            }

            let frame = source.load_frame(index).map_err(|e| e.at_frame(index))?;
            grid.fill_from(&frame).map_err(|e| e.at_frame(index))?;
            document.push_frame(&grid).map_err(|e| e.at_frame(index))?;

            tracing::trace!(frame = index, total = total_frames, "frame encoded");
            if let Some(progress) = self.progress {
                progress(index, total_frames);
            }
        }

        Ok(document)
    }

    /// Encodes all frames and writes the document to `path`, replacing any
    /// existing file.
    pub fn write<S: FrameSource + ?Sized>(&self, source: &S, total_frames: u32, path: &Path) -> PiwoResult<WriteSummary> {
        let document = self.render(source, total_frames)?;
        let frames = document.frame_count();
        let bytes = write_document(path, document)?;
        Ok(WriteSummary {
            path: path.to_path_buf(),
            frames,
            bytes,
        })
    }
}

/// Writes `document` to `path`, replacing a previous file.
///
/// The text goes to a temporary file next to `path` which is then renamed
/// over it, so readers see either the old file or the complete new one.
pub fn write_document(path: &Path, document: PiwoDocument) -> PiwoResult<u64> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PiwoError::write(parent, e))?;

    let text = document.into_string();
    let mut staged = NamedTempFile::new_in(parent).map_err(|e| PiwoError::write(parent, e))?;
    staged
        .write_all(text.as_bytes())
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| PiwoError::write(staged.path(), e))?;
    staged.persist(path).map_err(|e| PiwoError::write(path, e.error))?;
    Ok(text.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::NEWLINE;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Frame `n` is filled with blue = n.
    struct Numbered {
        missing: Option<u32>,
    }

    impl FrameSource for Numbered {
        type Frame = RgbImage;

        fn load_frame(&self, index: u32) -> PiwoResult<RgbImage> {
            if self.missing == Some(index) {
                return Err(PiwoError::FrameSourceMissing {
                    index,
                    path: PathBuf::from(format!("raw-frame-{}.bmp", index)),
                });
            }
            Ok(RgbImage::from_pixel(12, 10, Rgb([0, 0, index as u8])))
        }
    }

    #[test]
    fn frames_are_written_in_order() {
        let doc = VariantWriter::new(12, 10)
            .render(&Numbered { missing: None }, 3)
            .unwrap();
        assert_eq!(doc.frame_count(), 3);
        let parsed = PiwoDocument::parse(doc.as_str()).unwrap();
        let blues: Vec<u32> = parsed
            .frames
            .iter()
            .map(|f| f.get(0, 0).unwrap().value())
            .collect();
        assert_eq!(blues, [1, 2, 3]);
    }

    #[test]
    fn progress_is_monotonic() {
        let seen = Mutex::new(Vec::new());
        let record = |cur: u32, total: u32| seen.lock().unwrap().push((cur, total));
        VariantWriter::new(12, 10)
            .with_progress(&record)
            .render(&Numbered { missing: None }, 4)
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), [(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn missing_frame_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output-test.piwo7");
        let err = VariantWriter::new(12, 10)
            .write(&Numbered { missing: Some(2) }, 3, &out)
            .unwrap_err();
        assert_eq!(err.frame_index(), Some(2));
        assert!(matches!(err.root(), PiwoError::FrameSourceMissing { index: 2, .. }));
        assert!(!out.exists());
    }

    #[test]
    fn cancel_flag_stops_before_next_frame() {
        let cancel = AtomicBool::new(false);
        let stop_after_first = |cur: u32, _: u32| {
            if cur == 1 {
                cancel.store(true, Ordering::SeqCst);
            }
        };
        let err = VariantWriter::new(12, 10)
            .with_progress(&stop_after_first)
            .with_cancel_flag(&cancel)
            .render(&Numbered { missing: None }, 5)
            .unwrap_err();
        assert!(matches!(err, PiwoError::Cancelled));
    }

    #[test]
    fn rewrite_overwrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output-test.piwo7");
        let writer = VariantWriter::new(12, 10);
        let first = writer.write(&Numbered { missing: None }, 2, &out).unwrap();
        let bytes_once = fs::read(&out).unwrap();
        let second = writer.write(&Numbered { missing: None }, 2, &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), bytes_once);
        assert_eq!(first, second);
        assert_eq!(second.bytes, bytes_once.len() as u64);
    }

    #[test]
    fn interrupted_rewrite_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output-test.piwo7");
        VariantWriter::new(12, 10)
            .write(&Numbered { missing: None }, 3, &out)
            .unwrap();
        let before = fs::read(&out).unwrap();

        let cancel = AtomicBool::new(false);
        let stop_after_first = |cur: u32, _: u32| {
            if cur == 1 {
                cancel.store(true, Ordering::SeqCst);
            }
        };
        let err = VariantWriter::new(12, 10)
            .with_progress(&stop_after_first)
            .with_cancel_flag(&cancel)
            .write(&Numbered { missing: None }, 3, &out)
            .unwrap_err();
        assert!(matches!(err, PiwoError::Cancelled));
        assert_eq!(fs::read(&out).unwrap(), before);

        VariantWriter::new(12, 10)
            .write(&Numbered { missing: Some(3) }, 3, &out)
            .unwrap_err();
        assert_eq!(fs::read(&out).unwrap(), before);
    }

    #[test]
    fn write_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output-test.piwo7");
        let writer = VariantWriter::new(12, 10);
        writer.write(&Numbered { missing: None }, 2, &out).unwrap();
        writer.write(&Numbered { missing: None }, 2, &out).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["output-test.piwo7"]);
    }

    #[test]
    fn failed_persist_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // a directory occupies the target name, so the rename cannot land
        let out = dir.path().join("output-test.piwo7");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("keep"), b"x").unwrap();
        let err = write_document(&out, PiwoDocument::new(12, 10)).unwrap_err();
        assert!(matches!(err, PiwoError::OutputWriteFailure { .. }));
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn zero_frames_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.piwo7");
        VariantWriter::new(12, 10)
            .write(&Numbered { missing: None }, 0, &out)
            .unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text, format!("PIWO_7_FILE{nl}12 10{nl}{nl}", nl = NEWLINE));
    }
}
