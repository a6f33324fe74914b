use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PiwoError, PiwoResult};
use crate::ffmpeg::FfmpegConfig;
use crate::variant::{Catalog, InterpolationMethod, ScalingAlgorithm, Variant};

const CONFIG_STEM: &str = "piwo7";

/// Application configuration. Every field has a default, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Target framerate of the animation.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Where audio, intermediate frames and `.piwo7` files go.
    pub data_dir: PathBuf,
    /// Upper bound for a single ffmpeg/ffprobe invocation.
    pub timeout_secs: u64,
    pub catalog: Catalog,
    pub scalers: Vec<ScalingAlgorithm>,
    pub interpolations: Vec<InterpolationMethod>,
    pub parallel: bool,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fps: 20,
            width: 12,
            height: 10,
            data_dir: PathBuf::from("data"),
            timeout_secs: 900,
            catalog: Catalog::Scalers,
            scalers: ScalingAlgorithm::ALL.to_vec(),
            interpolations: InterpolationMethod::ALL.to_vec(),
            parallel: false,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl AppConfig {
    /// Looks for `piwo7.json` / `piwo7.toml` in the app data directory, then
    /// the current directory, then falls back to the built-in defaults.
    pub fn load() -> PiwoResult<Self> {
        for path in Self::candidate_paths() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::from_path(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut dirs_to_try: Vec<PathBuf> = Vec::new();
        if let Some(mut d) = dirs::data_dir() {
            d.push(CONFIG_STEM);
            dirs_to_try.push(d);
        }
        dirs_to_try.push(PathBuf::from("."));

        dirs_to_try
            .into_iter()
            .flat_map(|d| {
                ["json", "toml"]
                    .into_iter()
                    .map(move |ext| d.join(format!("{}.{}", CONFIG_STEM, ext)))
            })
            .collect()
    }

    /// Reads a config file; the extension picks the format.
    pub fn from_path(path: &Path) -> PiwoResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| PiwoError::config(format!("reading {}: {}", path.display(), e)))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| PiwoError::config(format!("parsing {}: {}", path.display(), e)))?,
            _ => serde_json::from_str(&text)
                .map_err(|e| PiwoError::config(format!("parsing {}: {}", path.display(), e)))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(text: &str) -> PiwoResult<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| PiwoError::config(format!("parsing config json: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> PiwoResult<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| PiwoError::config(format!("parsing config toml: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> PiwoResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PiwoError::config("width and height must be non-zero"));
        }
        if self.fps == 0 {
            return Err(PiwoError::config("fps must be non-zero"));
        }
        if self.timeout_secs == 0 {
            return Err(PiwoError::config("timeout_secs must be non-zero"));
        }
        if self.variants().is_empty() {
            return Err(PiwoError::config(format!(
                "no variants configured for the {:?} catalog",
                self.catalog
            )));
        }
        Ok(())
    }

    /// Variants of the configured catalog, in configured order.
    pub fn variants(&self) -> Vec<Variant> {
        match self.catalog {
            Catalog::Scalers => self.scalers.iter().map(|a| Variant::Scaler(*a)).collect(),
            Catalog::Interpolations => self
                .interpolations
                .iter()
                .map(|m| Variant::Interpolation(*m))
                .collect(),
        }
    }

    pub fn ffmpeg_config(&self) -> FfmpegConfig {
        FfmpegConfig {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
