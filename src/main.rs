use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use piwo7::{
    AppConfig, Catalog, Checkpoint, ConversionOutcome, ConvertOptions, PiwoConverter, PiwoDocument, Progress, ProgressPhase,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(version, about = "Convert a video into PIWO7 animations, one per scaling algorithm.")]
struct Args {
    /// Path to the input video file
    #[arg(short, long, required_unless_present = "check")]
    input: Option<PathBuf>,

    /// Directory for audio, intermediate frames and .piwo7 output
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Target framerate of the animation
    #[arg(long)]
    fps: Option<u32>,

    /// Animation width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Animation height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Resize in-process with interpolation filters instead of ffmpeg scalers
    #[arg(long, default_value_t = false)]
    interpolation: bool,

    /// Only produce these variants (comma separated, e.g. bilinear,bicubic)
    #[arg(long, value_delimiter = ',')]
    variants: Vec<String>,

    /// Process variants in parallel
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Maximum seconds a single ffmpeg invocation may run
    #[arg(long)]
    timeout: Option<u64>,

    /// Config file (JSON or TOML) instead of the default locations
    #[arg(long)]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Inspect an existing .piwo7 file instead of converting
    #[arg(long, conflicts_with = "input")]
    check: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    if let Some(path) = &args.check {
        return run_check(path);
    }

    let mut cfg = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::load()?,
    };
    apply_overrides(&mut cfg, &args)?;

    let mut options = ConvertOptions::from_config(&cfg);
    if !args.variants.is_empty() {
        let variants = args
            .variants
            .iter()
            .map(|name| cfg.catalog.parse_variant(name))
            .collect::<Result<Vec<_>, _>>()?;
        options = options.with_variants(variants);
    }

    let input = args
        .input
        .as_ref()
        .ok_or_else(|| anyhow!("--input is required"))?;
    if !input.is_file() {
        return Err(anyhow!("Input video {} does not exist", input.display()));
    }
    if !options.ffmpeg.is_available() {
        return Err(anyhow!(
            "{} was not found; install ffmpeg or set `ffmpeg` in the config",
            options.ffmpeg.ffmpeg.display()
        ));
    }

    let converter = PiwoConverter::new(options);
    let cancel = converter.cancel_handle();
    ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            // second Ctrl-C: stop waiting for the frame in flight
            std::process::exit(130);
        }
        eprintln!("Cancelling after the current frame...");
    })
    .context("installing Ctrl-C handler")?;
    let bars = VariantBars::new();
    let assume_yes = args.yes;

    let outcome = converter.convert_video(
        input,
        |checkpoint| confirm(checkpoint, assume_yes, &bars),
        |progress| bars.update(progress),
    )?;
    bars.finish();

    let summary = match outcome {
        ConversionOutcome::Declined(_) => {
            println!("Operation cancelled.");
            return Ok(());
        }
        ConversionOutcome::Completed(summary) => summary,
    };

    if let Some(audio) = &summary.audio {
        println!("Audio exported to {}.", audio.display());
    }
    for (variant, written) in summary.report.succeeded() {
        println!(
            "Output file created for {} {}: {} ({} frames)",
            variant,
            variant.kind(),
            written.path.display(),
            written.frames
        );
    }

    if converter.cancel_handle().load(Ordering::SeqCst) {
        return Err(anyhow!("conversion cancelled"));
    }

    let failures: Vec<String> = summary
        .report
        .failed()
        .map(|(variant, e)| match e.frame_index() {
            Some(frame) => format!("{} (frame {}): {}", variant, frame, e.root()),
            None => format!("{}: {}", variant, e),
        })
        .collect();
    if !failures.is_empty() {
        for line in &failures {
            eprintln!("Failed: {}", line);
        }
        return Err(anyhow!(
            "{} of {} variants failed",
            failures.len(),
            summary.report.outcomes.len()
        ));
    }

    Ok(())
}

fn init_tracing(args: &Args) {
    let level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(cfg: &mut AppConfig, args: &Args) -> Result<()> {
    if let Some(dir) = &args.data_dir {
        cfg.data_dir = dir.clone();
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(width) = args.width {
        cfg.width = width;
    }
    if let Some(height) = args.height {
        cfg.height = height;
    }
    if let Some(timeout) = args.timeout {
        cfg.timeout_secs = timeout;
    }
    if args.interpolation {
        cfg.catalog = Catalog::Interpolations;
    }
    if args.parallel {
        cfg.parallel = true;
    }
    cfg.validate().context("invalid settings")?;
    Ok(())
}

fn confirm(checkpoint: &Checkpoint, assume_yes: bool, bars: &VariantBars) -> bool {
    if assume_yes {
        return true;
    }
    let default = !matches!(checkpoint, Checkpoint::RemoveTemporaryFiles { .. });
    bars.suspend(|| {
        Confirm::new()
            .with_prompt(checkpoint.prompt())
            .default(default)
            .interact()
            .unwrap_or(false)
    })
}

fn run_check(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = PiwoDocument::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
    println!(
        "{}: {}x{}, {} frames",
        path.display(),
        doc.width,
        doc.height,
        doc.frames.len()
    );
    Ok(())
}

/// One progress bar per variant, created on first use.
struct VariantBars {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl VariantBars {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn update(&self, progress: Progress) {
        let Some(variant) = progress.variant.clone() else {
            if progress.phase != ProgressPhase::Complete {
                let _ = self.multi.println(&progress.message);
            }
            return;
        };
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(variant.clone()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(progress.total.max(1) as u64));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix:>14} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_prefix(variant);
            pb
        });
        match progress.phase {
            ProgressPhase::ExtractingFrames => bar.set_message("extracting"),
            ProgressPhase::EncodingFrames => {
                bar.set_length(progress.total.max(1) as u64);
                bar.set_position(progress.completed as u64);
                bar.set_message("encoding");
            }
            ProgressPhase::VariantFinished => bar.finish_with_message("done"),
            ProgressPhase::VariantFailed => bar.abandon_with_message("failed"),
            _ => {}
        }
    }

    fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        self.multi.suspend(f)
    }

    fn finish(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.values().filter(|b| !b.is_finished()) {
                bar.abandon();
            }
        }
    }
}
