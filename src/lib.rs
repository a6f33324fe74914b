//! # piwo7 - video to PIWO7 pixel animation converter
//!
//! `piwo7` turns a video into the PIWO7 text animation format: a small fixed
//! grid (12x10 by default) of 24-bit colors per frame. Since the result
//! depends heavily on how the video is downscaled, the video is converted
//! once per scaling algorithm so the outputs can be compared side by side.
//!
//! ## Features
//!
//! - Framerate normalisation and audio extraction through `ffmpeg`
//! - One `.piwo7` file per ffmpeg scaler or in-process interpolation filter
//! - Variant failures are isolated; the rest of the batch still runs
//! - Headless operation: confirmations and progress are callbacks
//!
//! ## Example
//!
//! ```no_run
//! use piwo7::{AppConfig, ConvertOptions, PiwoConverter};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ConvertOptions::from_config(&AppConfig::default());
//! let converter = PiwoConverter::new(options);
//! converter.convert_video(
//!     Path::new("input.mp4"),
//!     |_checkpoint| true,
//!     |progress| println!("{}", progress.message),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Encoding a single frame
//!
//! ```
//! use piwo7::{encoder, PixelGrid};
//! use image::{Rgb, RgbImage};
//!
//! let frame = RgbImage::from_pixel(12, 10, Rgb([10, 20, 30]));
//! let grid = PixelGrid::sample(&frame, 12, 10).unwrap();
//! let block = encoder::encode_frame(&grid);
//! assert!(block.starts_with("50"));
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod batch;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod resample;
pub mod sampler;
pub mod variant;
pub mod writer;

pub use batch::{BatchOptions, BatchOrchestrator, BatchReport, Resampler, VariantOutcome};
pub use config::AppConfig;
pub use encoder::{ParsedDocument, PiwoDocument};
pub use error::{PiwoError, PiwoResult};
pub use ffmpeg::{FfmpegConfig, MediaMetadata};
pub use frames::BitmapSequence;
pub use resample::MediaResampler;
pub use sampler::{PackedColor, PixelGrid, PixelSource};
pub use variant::{Catalog, InterpolationMethod, ScalingAlgorithm, Variant};
pub use writer::{FrameSource, VariantWriter, WriteSummary};

/// Represents the current phase of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Reading duration and framerate with ffprobe
    ProbingMedia,
    /// Re-encoding the video at the target framerate
    NormalizingFramerate,
    /// Extracting the audio track
    ExtractingAudio,
    /// Extracting (and scaling) bitmaps for a variant
    ExtractingFrames,
    /// Encoding bitmaps of a variant into PIWO7
    EncodingFrames,
    /// A variant's file was written
    VariantFinished,
    /// A variant failed; the batch continues
    VariantFailed,
    /// All variants processed
    Complete,
}

/// Progress information for conversion operations
///
/// `completed` and `total` count frames during [`ProgressPhase::EncodingFrames`]
/// and variants during [`ProgressPhase::Complete`]; they are 0 for phases
/// without a known size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    /// Variant this update belongs to, if any
    pub variant: Option<String>,
    pub completed: usize,
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

impl Progress {
    fn simple(phase: ProgressPhase, variant: Option<Variant>, message: String) -> Self {
        Self {
            phase,
            variant: variant.map(|v| v.name().to_string()),
            completed: 0,
            total: 0,
            percentage: 0.0,
            message,
        }
    }

    pub fn probing_media() -> Self {
        Self::simple(ProgressPhase::ProbingMedia, None, "Reading video metadata...".to_string())
    }

    pub fn normalizing_framerate(fps: u32) -> Self {
        Self::simple(
            ProgressPhase::NormalizingFramerate,
            None,
            format!("Changing video framerate to {} fps...", fps),
        )
    }

    pub fn extracting_audio() -> Self {
        Self::simple(ProgressPhase::ExtractingAudio, None, "Exporting audio...".to_string())
    }

    pub fn extracting_frames(variant: Option<Variant>) -> Self {
        let message = match variant {
            Some(v) => format!("Exporting video frames for {} {}...", v, v.kind()),
            None => "Exporting video frames...".to_string(),
        };
        Self::simple(ProgressPhase::ExtractingFrames, variant, message)
    }

    pub fn encoding_frames(variant: Variant, completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::EncodingFrames,
            variant: Some(variant.name().to_string()),
            completed,
            total,
            percentage,
            message: format!("Frames processed ({} {}): {}/{}", variant, variant.kind(), completed, total),
        }
    }

    pub fn variant_finished(variant: Variant, frames: usize) -> Self {
        Self {
            phase: ProgressPhase::VariantFinished,
            variant: Some(variant.name().to_string()),
            completed: frames,
            total: frames,
            percentage: 100.0,
            message: format!("Output file created for {} {}", variant, variant.kind()),
        }
    }

    pub fn variant_failed(variant: Variant, error: &PiwoError) -> Self {
        Self::simple(
            ProgressPhase::VariantFailed,
            Some(variant),
            format!("{} {} failed: {}", variant, variant.kind(), error),
        )
    }

    pub fn complete(succeeded: usize, total: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            variant: None,
            completed: succeeded,
            total,
            percentage: 100.0,
            message: format!("Conversion complete: {} of {} variants written", succeeded, total),
        }
    }
}

/// A point where the run waits for the user before doing something slow or
/// destructive. Declining ends the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Checkpoint {
    ExtractAudio {
        estimate: Duration,
    },
    ExtractFrames {
        per_variant: Duration,
        variants: usize,
        total_frames: u32,
    },
    RemoveTemporaryFiles {
        frames_dir: PathBuf,
        normalized_video: Option<PathBuf>,
    },
}

impl Checkpoint {
    /// Question to show the user.
    pub fn prompt(&self) -> String {
        match self {
            Checkpoint::ExtractAudio { estimate } => format!(
                "Exporting audio will take approximately {} seconds. Do you want to continue?",
                estimate.as_secs()
            ),
            Checkpoint::ExtractFrames {
                per_variant,
                variants,
                ..
            } => format!(
                "Exporting video frames will take approximately {} seconds. \
                 They need to be exported for each scaling algorithm defined so in total this will take {} seconds. \
                 Do you want to continue?",
                per_variant.as_secs(),
                per_variant.as_secs() * *variants as u64
            ),
            Checkpoint::RemoveTemporaryFiles { .. } => "Remove temporary files?".to_string(),
        }
    }
}

/// Options for a full video conversion
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub data_dir: PathBuf,
    pub variants: Vec<Variant>,
    pub parallel: bool,
    pub ffmpeg: FfmpegConfig,
}

impl ConvertOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fps: config.fps,
            width: config.width,
            height: config.height,
            data_dir: config.data_dir.clone(),
            variants: config.variants(),
            parallel: config.parallel,
            ffmpeg: config.ffmpeg_config(),
        }
    }

    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn audio_path(&self) -> PathBuf {
        self.data_dir.join("audio.mp3")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.data_dir.join("frames")
    }

    pub fn normalized_video_path(&self) -> PathBuf {
        self.data_dir.join(format!("video-{}-fps.mp4", self.fps))
    }
}

/// How a conversion ended.
#[derive(Debug)]
pub enum ConversionOutcome {
    /// The user declined a checkpoint; nothing after it ran.
    Declined(Checkpoint),
    Completed(ConversionSummary),
}

#[derive(Debug)]
pub struct ConversionSummary {
    pub metadata: MediaMetadata,
    pub total_frames: u32,
    pub audio: Option<PathBuf>,
    pub report: BatchReport,
    pub temporary_files_removed: bool,
}

/// Number of frames the animation will have: `floor(fps * duration)`.
pub fn total_frames(fps: u32, duration_secs: f64) -> u32 {
    let frames = (fps as f64 * duration_secs).floor();
    if frames.is_finite() && frames > 0.0 {
        frames.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Rough time to export the audio track. Audio size is
/// `duration * bitrate / 8`, written at roughly `bitrate` per second.
pub fn audio_export_estimate(metadata: &MediaMetadata) -> Duration {
    secs(metadata.duration_secs / 8.0)
}

/// Rough time to export one variant's frames.
pub fn frame_export_estimate(total_frames: u32, fps: u32) -> Duration {
    if fps == 0 {
        return Duration::ZERO;
    }
    secs(total_frames as f64 / fps as f64)
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Main converter: video in, one `.piwo7` file per variant out.
pub struct PiwoConverter {
    options: ConvertOptions,
    cancel: Arc<AtomicBool>,
}

impl PiwoConverter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Setting this flag stops the batch after the frame in flight. A variant
    /// interrupted this way writes no file.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs the whole conversion.
    ///
    /// `confirm` is asked at each [`Checkpoint`]; returning `false` stops the
    /// run with [`ConversionOutcome::Declined`]. Per-variant failures do not
    /// make this return `Err`; they are in the summary's report.
    pub fn convert_video<C, P>(&self, input: &Path, confirm: C, progress: P) -> PiwoResult<ConversionOutcome>
    where
        C: Fn(&Checkpoint) -> bool,
        P: Fn(Progress) + Send + Sync,
    {
        let opts = &self.options;
        let ffmpeg = &opts.ffmpeg;
        let frames_dir = opts.frames_dir();
        fs::create_dir_all(&frames_dir).map_err(|e| PiwoError::write(&frames_dir, e))?;

        progress(Progress::probing_media());
        let mut metadata = ffmpeg.probe(input)?;
        tracing::info!(
            duration = metadata.duration_secs,
            fps = metadata.fps,
            audio_kbps = ?metadata.audio_bitrate_kbps,
            "probed input"
        );

        let mut video = input.to_path_buf();
        let mut normalized_video = None;
        if (metadata.fps - opts.fps as f64).abs() > 0.1 {
            progress(Progress::normalizing_framerate(opts.fps));
            let out = opts.normalized_video_path();
            ffmpeg.change_framerate(input, opts.fps, &out)?;
            metadata = ffmpeg.probe(&out)?;
            tracing::info!(path = %out.display(), fps = metadata.fps, "framerate normalised");
            video = out.clone();
            normalized_video = Some(out);
        }

        let checkpoint = Checkpoint::ExtractAudio {
            estimate: audio_export_estimate(&metadata),
        };
        if !confirm(&checkpoint) {
            return Ok(ConversionOutcome::Declined(checkpoint));
        }
        let audio = if metadata.has_audio {
            progress(Progress::extracting_audio());
            let out = opts.audio_path();
            ffmpeg.extract_audio(&video, &out)?;
            tracing::info!(path = %out.display(), "audio exported");
            Some(out)
        } else {
            tracing::warn!("input has no audio stream, skipping audio export");
            None
        };

        let total_frames = total_frames(opts.fps, metadata.duration_secs);
        if total_frames == 0 {
            tracing::warn!("video is shorter than one frame; outputs will contain no frames");
        }
        let checkpoint = Checkpoint::ExtractFrames {
            per_variant: frame_export_estimate(total_frames, opts.fps),
            variants: opts.variants.len(),
            total_frames,
        };
        if !confirm(&checkpoint) {
            return Ok(ConversionOutcome::Declined(checkpoint));
        }

        let resampler = MediaResampler::new(ffmpeg.clone(), &video, &frames_dir, opts.width, opts.height);
        let batch = BatchOptions {
            width: opts.width,
            height: opts.height,
            total_frames,
            output_dir: opts.data_dir.clone(),
            parallel: opts.parallel,
        };
        let report = BatchOrchestrator::new(&resampler, batch)
            .with_cancel_flag(&self.cancel)
            .run(&opts.variants, &progress);
        progress(Progress::complete(report.succeeded().count(), report.outcomes.len()));

        let checkpoint = Checkpoint::RemoveTemporaryFiles {
            frames_dir: frames_dir.clone(),
            normalized_video: normalized_video.clone(),
        };
        let temporary_files_removed = confirm(&checkpoint);
        if temporary_files_removed {
            remove_temporary_files(&frames_dir, normalized_video.as_deref())?;
        }

        Ok(ConversionOutcome::Completed(ConversionSummary {
            metadata,
            total_frames,
            audio,
            report,
            temporary_files_removed,
        }))
    }
}

/// Deletes the extracted bitmaps and the normalised video, if present.
pub fn remove_temporary_files(frames_dir: &Path, normalized_video: Option<&Path>) -> PiwoResult<()> {
    if frames_dir.exists() {
        fs::remove_dir_all(frames_dir).map_err(|e| PiwoError::write(frames_dir, e))?;
    }
    if let Some(video) = normalized_video.filter(|p| p.exists()) {
        fs::remove_file(video).map_err(|e| PiwoError::write(video, e))?;
    }
    Ok(())
}
