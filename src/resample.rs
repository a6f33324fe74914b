use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use walkdir::WalkDir;

use crate::batch::Resampler;
use crate::error::{PiwoError, PiwoResult};
use crate::ffmpeg::{FfmpegConfig, Scale};
use crate::frames::{frame_file_name, BitmapSequence, FRAME_FILE_EXTENSION, FRAME_FILE_PREFIX};
use crate::variant::Variant;

/// ffmpeg numbers extracted bitmaps from here.
pub const FIRST_FRAME_NUMBER: u32 = 1;

const RAW_FRAMES_DIR: &str = "raw";

/// Resamples a video for each variant.
///
/// Scaler variants ask ffmpeg for frames already scaled with the variant's
/// `sws_flags`, each into `frames_root/<variant>/`. Interpolation variants
/// share one native-resolution extraction in `frames_root/raw/` and resize
/// in-process.
pub struct MediaResampler {
    ffmpeg: FfmpegConfig,
    input: PathBuf,
    frames_root: PathBuf,
    width: u32,
    height: u32,
    raw_extracted: Mutex<bool>,
    regenerating: Arc<Mutex<()>>,
}

impl MediaResampler {
    pub fn new(ffmpeg: FfmpegConfig, input: impl Into<PathBuf>, frames_root: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            ffmpeg,
            input: input.into(),
            frames_root: frames_root.into(),
            width,
            height,
            raw_extracted: Mutex::new(false),
            regenerating: Arc::new(Mutex::new(())),
        }
    }

    pub fn frames_root(&self) -> &Path {
        &self.frames_root
    }

    fn ensure_raw_frames(&self) -> PiwoResult<PathBuf> {
        let dir = self.frames_root.join(RAW_FRAMES_DIR);
        let mut extracted = self
            .raw_extracted
            .lock()
            .map_err(|_| PiwoError::tool("ffmpeg", "raw frame extraction panicked"))?;
        if !*extracted {
            reset_dir(&dir)?;
            self.ffmpeg
                .extract_frames(&self.input, &dir, FIRST_FRAME_NUMBER, None)?;
            tracing::info!(frames = count_frames(&dir), dir = %dir.display(), "raw frames extracted");
            *extracted = true;
        }
        Ok(dir)
    }

    fn sequence(&self, dir: PathBuf, scale: Option<Scale>) -> BitmapSequence {
        let ffmpeg = self.ffmpeg.clone();
        let input = self.input.clone();
        let lock = Arc::clone(&self.regenerating);
        BitmapSequence::new(dir, FIRST_FRAME_NUMBER).with_regenerate(move |file_number, path| {
            // parallel variants may share the raw frames directory
            let _guard = lock
                .lock()
                .map_err(|_| PiwoError::tool("ffmpeg", "frame regeneration panicked"))?;
            if path.is_file() {
                return Ok(());
            }
            let frame_number = file_number.saturating_sub(FIRST_FRAME_NUMBER);
            regenerate_frame(&ffmpeg, &input, frame_number, file_number, scale, path)
        })
    }
}

/// Extracts one frame into a staging directory next to `path`, then renames
/// it into place so readers never see a half-written bitmap.
fn regenerate_frame(ffmpeg: &FfmpegConfig, input: &Path, frame_number: u32, file_number: u32, scale: Option<Scale>, path: &Path) -> PiwoResult<()> {
    let out_dir = path
        .parent()
        .ok_or_else(|| PiwoError::tool("ffmpeg", "frame path has no directory"))?;
    let staging = tempfile::Builder::new()
        .prefix(".regen-")
        .tempdir_in(out_dir)
        .map_err(|e| PiwoError::write(out_dir, e))?;
    ffmpeg.extract_single_frame(input, staging.path(), frame_number, file_number, scale)?;
    let staged = staging.path().join(frame_file_name(file_number));
    fs::rename(&staged, path).map_err(|e| PiwoError::write(path, e))
}

impl Resampler for MediaResampler {
    type Source = BitmapSequence;

    fn resample(&self, variant: Variant) -> PiwoResult<BitmapSequence> {
        match variant {
            Variant::Scaler(algorithm) => {
                let dir = self.frames_root.join(variant.name());
                reset_dir(&dir)?;
                let scale = Scale {
                    width: self.width,
                    height: self.height,
                    algorithm,
                };
                self.ffmpeg
                    .extract_frames(&self.input, &dir, FIRST_FRAME_NUMBER, Some(scale))?;
                tracing::info!(frames = count_frames(&dir), dir = %dir.display(), "scaled frames extracted");
                Ok(self.sequence(dir, Some(scale)))
            }
            Variant::Interpolation(method) => {
                let dir = self.ensure_raw_frames()?;
                Ok(self
                    .sequence(dir, None)
                    .with_resize(self.width, self.height, method.filter()))
            }
        }
    }
}

/// Empties `dir`, creating it if needed, so frames from an earlier run never
/// leak into this one.
fn reset_dir(dir: &Path) -> PiwoResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| PiwoError::write(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| PiwoError::write(dir, e))
}

/// Number of `raw-frame-*.bmp` files directly inside `dir`.
pub fn count_frames(dir: &Path) -> usize {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with(FRAME_FILE_PREFIX)
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext == FRAME_FILE_EXTENSION)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::InterpolationMethod;
    use crate::writer::FrameSource;
    use image::GenericImageView;

    #[test]
    fn counts_only_frame_bitmaps() {
        let dir = tempfile::tempdir().unwrap();
        for name in [frame_file_name(1), frame_file_name(2), "audio.mp3".to_string(), "raw-frame-3.png".to_string()] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(count_frames(dir.path()), 2);
    }

    #[test]
    fn reset_dir_clears_previous_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("bilinear");
        fs::create_dir_all(&frames).unwrap();
        fs::write(frames.join(frame_file_name(1)), b"stale").unwrap();
        reset_dir(&frames).unwrap();
        assert!(frames.is_dir());
        assert_eq!(count_frames(&frames), 0);
    }

    /// Stand-in for ffmpeg that copies `bitmap` to its last argument slowly
    /// and counts its invocations in `calls`.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, bitmap: &Path, calls: &Path) -> FfmpegConfig {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nfor last; do :; done\necho x >> '{}'\nsleep 0.2\ncp '{}' \"$last\"\n",
                calls.display(),
                bitmap.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        FfmpegConfig {
            ffmpeg: script,
            ..FfmpegConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn shared_raw_frame_is_regenerated_once() {
        let dir = tempfile::tempdir().unwrap();
        let bitmap = dir.path().join("green.bmp");
        image::RgbImage::from_pixel(4, 4, image::Rgb([0, 255, 0]))
            .save(&bitmap)
            .unwrap();
        let calls = dir.path().join("calls");
        let ffmpeg = fake_ffmpeg(dir.path(), &bitmap, &calls);

        let root = dir.path().join("frames");
        let raw = root.join(RAW_FRAMES_DIR);
        fs::create_dir_all(&raw).unwrap();
        fs::copy(&bitmap, raw.join(frame_file_name(1))).unwrap();
        fs::copy(&bitmap, raw.join(frame_file_name(3))).unwrap();

        let resampler = MediaResampler::new(ffmpeg, dir.path().join("input.mp4"), &root, 12, 10);
        *resampler.raw_extracted.lock().unwrap() = true;

        let variants = [
            Variant::Interpolation(InterpolationMethod::Nearest),
            Variant::Interpolation(InterpolationMethod::Lanczos3),
            Variant::Interpolation(InterpolationMethod::Triangle),
        ];
        std::thread::scope(|scope| {
            let handles: Vec<_> = variants
                .iter()
                .map(|&variant| {
                    let resampler = &resampler;
                    scope.spawn(move || {
                        let source = resampler.resample(variant).unwrap();
                        source.load_frame(2).unwrap()
                    })
                })
                .collect();
            for handle in handles {
                let frame = handle.join().unwrap();
                assert_eq!(frame.dimensions(), (12, 10));
            }
        });

        assert_eq!(fs::read_to_string(&calls).unwrap().lines().count(), 1);
        assert_eq!(count_frames(&raw), 3);
        assert_eq!(fs::read_dir(&raw).unwrap().count(), 3);
    }
}
