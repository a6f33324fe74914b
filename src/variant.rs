use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::encoder::FILE_EXTENSION;
use crate::error::PiwoError;

/// ffmpeg `sws_flags` scaler algorithms, in catalog order.
///
/// See <https://ffmpeg.org/ffmpeg-scaler.html#Scaler-Options>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAlgorithm {
    FastBilinear,
    Bilinear,
    Bicubic,
    Experimental,
    Neighbor,
    Area,
    Bicublin,
    Gauss,
    Sinc,
    Lanczos,
    Spline,
}

impl ScalingAlgorithm {
    pub const ALL: [ScalingAlgorithm; 11] = [
        Self::FastBilinear,
        Self::Bilinear,
        Self::Bicubic,
        Self::Experimental,
        Self::Neighbor,
        Self::Area,
        Self::Bicublin,
        Self::Gauss,
        Self::Sinc,
        Self::Lanczos,
        Self::Spline,
    ];

    /// The value passed to ffmpeg as `sws_flags`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastBilinear => "fast_bilinear",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Experimental => "experimental",
            Self::Neighbor => "neighbor",
            Self::Area => "area",
            Self::Bicublin => "bicublin",
            Self::Gauss => "gauss",
            Self::Sinc => "sinc",
            Self::Lanczos => "lanczos",
            Self::Spline => "spline",
        }
    }
}

/// In-process resize filters applied to full-resolution frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl InterpolationMethod {
    pub const ALL: [InterpolationMethod; 5] = [
        Self::Nearest,
        Self::Triangle,
        Self::CatmullRom,
        Self::Gaussian,
        Self::Lanczos3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Triangle => "triangle",
            Self::CatmullRom => "catmull_rom",
            Self::Gaussian => "gaussian",
            Self::Lanczos3 => "lanczos3",
        }
    }

    pub fn filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// One resizing configuration; produces one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Scaler(ScalingAlgorithm),
    Interpolation(InterpolationMethod),
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scaler(alg) => alg.as_str(),
            Self::Interpolation(method) => method.as_str(),
        }
    }

    /// How the variant resizes, for messages: `scaling` or `interpolation`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scaler(_) => "scaling",
            Self::Interpolation(_) => "interpolation",
        }
    }

    /// `output-{name}.piwo7`
    pub fn output_file_name(&self) -> String {
        format!("output-{}.{}", self.name(), FILE_EXTENSION)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which family of variants a run enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Catalog {
    #[default]
    Scalers,
    Interpolations,
}

impl Catalog {
    /// Resolves a variant name within this catalog.
    pub fn parse_variant(self, name: &str) -> Result<Variant, PiwoError> {
        let name = name.trim();
        let found = match self {
            Catalog::Scalers => ScalingAlgorithm::ALL
                .iter()
                .find(|alg| alg.as_str().eq_ignore_ascii_case(name))
                .map(|alg| Variant::Scaler(*alg)),
            Catalog::Interpolations => InterpolationMethod::ALL
                .iter()
                .find(|m| m.as_str().eq_ignore_ascii_case(name))
                .map(|m| Variant::Interpolation(*m)),
        };
        found.ok_or_else(|| {
            let available = self
                .all()
                .iter()
                .map(Variant::name)
                .collect::<Vec<_>>()
                .join(", ");
            PiwoError::config(format!(
                "unknown variant '{}'. Available: {}",
                name, available
            ))
        })
    }

    /// Every variant of the catalog, in order.
    pub fn all(self) -> Vec<Variant> {
        match self {
            Catalog::Scalers => ScalingAlgorithm::ALL.iter().map(|a| Variant::Scaler(*a)).collect(),
            Catalog::Interpolations => InterpolationMethod::ALL
                .iter()
                .map(|m| Variant::Interpolation(*m))
                .collect(),
        }
    }
}

impl FromStr for Catalog {
    type Err = PiwoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalers" | "scaler" => Ok(Catalog::Scalers),
            "interpolations" | "interpolation" => Ok(Catalog::Interpolations),
            other => Err(PiwoError::config(format!("unknown catalog '{}'", other))),
        }
    }
}
