use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::error::{PiwoError, PiwoResult};
use crate::variant::Variant;
use crate::writer::{FrameSource, VariantWriter, WriteSummary};
use crate::Progress;

/// Produces the per-variant frames at the target resolution.
pub trait Resampler: Sync {
    type Source: FrameSource;

    fn resample(&self, variant: Variant) -> PiwoResult<Self::Source>;
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub width: u32,
    pub height: u32,
    pub total_frames: u32,
    pub output_dir: PathBuf,
    /// Run variants on the rayon pool instead of one after another.
    pub parallel: bool,
}

#[derive(Debug)]
pub struct VariantOutcome {
    pub variant: Variant,
    pub result: PiwoResult<WriteSummary>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<VariantOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&Variant, &WriteSummary)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|s| (&o.variant, s)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Variant, &PiwoError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.variant, e)))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Runs every variant through resample + write. A failing variant is
/// recorded in the report and the remaining variants still run.
pub struct BatchOrchestrator<'a, R: Resampler> {
    resampler: &'a R,
    options: BatchOptions,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, R: Resampler> BatchOrchestrator<'a, R> {
    pub fn new(resampler: &'a R, options: BatchOptions) -> Self {
        Self {
            resampler,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn output_path(&self, variant: Variant) -> PathBuf {
        self.options.output_dir.join(variant.output_file_name())
    }

    /// Processes `variants`; outcomes are reported in catalog order either way.
    pub fn run<F>(&self, variants: &[Variant], progress: &F) -> BatchReport
    where
        F: Fn(Progress) + Send + Sync,
    {
        let outcomes = if self.options.parallel {
            variants
                .par_iter()
                .map(|v| self.run_variant(*v, progress))
                .collect()
        } else {
            variants
                .iter()
                .map(|v| self.run_variant(*v, progress))
                .collect()
        };
        BatchReport { outcomes }
    }

    #[tracing::instrument(name = "variant", skip(self, variant, progress), fields(variant = %variant))]
    fn run_variant<F>(&self, variant: Variant, progress: &F) -> VariantOutcome
    where
        F: Fn(Progress) + Send + Sync,
    {
        let result = self.process(variant, progress);
        match &result {
            Ok(summary) => {
                tracing::info!(frames = summary.frames, path = %summary.path.display(), "variant written");
                progress(Progress::variant_finished(variant, summary.frames as usize));
            }
            Err(e) => {
                tracing::error!(frame = ?e.frame_index(), error = %e, "variant failed");
                progress(Progress::variant_failed(variant, e));
            }
        }
        VariantOutcome { variant, result }
    }

    fn process<F>(&self, variant: Variant, progress: &F) -> PiwoResult<WriteSummary>
    where
        F: Fn(Progress) + Send + Sync,
    {
        if self.cancelled() {
            return Err(PiwoError::Cancelled);
        }
        let output = self.output_path(variant);
        remove_stale_output(&output)?;

        progress(Progress::extracting_frames(Some(variant)));
        tracing::info!("resampling frames");
        let source = self.resampler.resample(variant)?;

        let total = self.options.total_frames;
        let report = |current: u32, total: u32| {
            progress(Progress::encoding_frames(variant, current as usize, total as usize))
        };
        let mut writer = VariantWriter::new(self.options.width, self.options.height).with_progress(&report);
        if let Some(cancel) = self.cancel {
            writer = writer.with_cancel_flag(cancel);
        }
        writer.write(&source, total, &output)
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

fn remove_stale_output(path: &Path) -> PiwoResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| PiwoError::write(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::ScalingAlgorithm;
    use crate::ProgressPhase;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    struct Solid(u8);

    impl FrameSource for Solid {
        type Frame = RgbImage;

        fn load_frame(&self, _index: u32) -> PiwoResult<RgbImage> {
            Ok(RgbImage::from_pixel(12, 10, Rgb([self.0, 0, 0])))
        }
    }

    struct FakeResampler;

    impl Resampler for FakeResampler {
        type Source = Solid;

        fn resample(&self, variant: Variant) -> PiwoResult<Solid> {
            match variant {
                Variant::Scaler(ScalingAlgorithm::Area) => Err(PiwoError::tool("ffmpeg", "exit status 1")),
                Variant::Scaler(alg) => Ok(Solid(alg as u8)),
                Variant::Interpolation(_) => Ok(Solid(0)),
            }
        }
    }

    fn options(dir: &Path, parallel: bool) -> BatchOptions {
        BatchOptions {
            width: 12,
            height: 10,
            total_frames: 2,
            output_dir: dir.to_path_buf(),
            parallel,
        }
    }

    #[test]
    fn failed_resample_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let variants = [
            Variant::Scaler(ScalingAlgorithm::Bilinear),
            Variant::Scaler(ScalingAlgorithm::Area),
            Variant::Scaler(ScalingAlgorithm::Bicubic),
        ];
        let report = BatchOrchestrator::new(&FakeResampler, options(dir.path(), false)).run(&variants, &|_: Progress| {});

        assert!(!report.is_success());
        let ok: Vec<&str> = report.succeeded().map(|(v, _)| v.name()).collect();
        assert_eq!(ok, ["bilinear", "bicubic"]);
        let failed: Vec<&str> = report.failed().map(|(v, _)| v.name()).collect();
        assert_eq!(failed, ["area"]);
        assert!(dir.path().join("output-bicubic.piwo7").is_file());
        assert!(!dir.path().join("output-area.piwo7").exists());
    }

    #[test]
    fn parallel_run_reports_in_catalog_order() {
        let dir = tempfile::tempdir().unwrap();
        let variants: Vec<Variant> = ScalingAlgorithm::ALL.iter().map(|a| Variant::Scaler(*a)).collect();
        let report = BatchOrchestrator::new(&FakeResampler, options(dir.path(), true)).run(&variants, &|_: Progress| {});
        let names: Vec<&str> = report.outcomes.iter().map(|o| o.variant.name()).collect();
        let expected: Vec<&str> = variants.iter().map(Variant::name).collect();
        assert_eq!(names, expected);
        assert_eq!(report.succeeded().count(), variants.len() - 1);
    }

    #[test]
    fn failed_variant_removes_stale_output() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("output-area.piwo7");
        fs::write(&stale, "old").unwrap();
        BatchOrchestrator::new(&FakeResampler, options(dir.path(), false))
            .run(&[Variant::Scaler(ScalingAlgorithm::Area)], &|_: Progress| {});
        assert!(!stale.exists());
    }

    #[test]
    fn cancelled_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(true);
        let report = BatchOrchestrator::new(&FakeResampler, options(dir.path(), false))
            .with_cancel_flag(&cancel)
            .run(&[Variant::Scaler(ScalingAlgorithm::Bilinear)], &|_: Progress| {});
        assert!(matches!(report.outcomes[0].result, Err(PiwoError::Cancelled)));
        assert!(!dir.path().join("output-bilinear.piwo7").exists());
    }

    #[test]
    fn progress_per_variant_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let events = Mutex::new(Vec::new());
        let variants = [
            Variant::Scaler(ScalingAlgorithm::Bilinear),
            Variant::Scaler(ScalingAlgorithm::Bicubic),
        ];
        BatchOrchestrator::new(&FakeResampler, options(dir.path(), true)).run(&variants, &|p: Progress| {
            if p.phase == ProgressPhase::EncodingFrames {
                events.lock().unwrap().push((p.variant.clone().unwrap(), p.completed));
            }
        });
        let events = events.into_inner().unwrap();
        for name in ["bilinear", "bicubic"] {
            let seen: Vec<usize> = events.iter().filter(|(v, _)| v == name).map(|(_, c)| *c).collect();
            assert_eq!(seen, [1, 2]);
        }
    }
}
