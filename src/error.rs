use std::path::PathBuf;

pub type PiwoResult<T> = Result<T, PiwoError>;

#[derive(thiserror::Error, Debug)]
pub enum PiwoError {
    #[error("no color sample for pixel ({x}, {y})")]
    ColorSampleMissing { x: u32, y: u32 },

    #[error("bitmap for frame {index} is missing: {}", path.display())]
    FrameSourceMissing { index: u32, path: PathBuf },

    #[error("{tool} failed: {message}")]
    ExternalToolFailure { tool: String, message: String },

    #[error("failed to write '{}': {source}", path.display())]
    OutputWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode '{}': {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("frame {index}: {source}")]
    AtFrame {
        index: u32,
        #[source]
        source: Box<PiwoError>,
    },

    #[error("conversion cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl PiwoError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputWriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Tags the error with the 1-based frame index it happened at.
    /// Already-tagged errors and cancellations are left alone.
    pub fn at_frame(self, index: u32) -> Self {
        match self {
            Self::AtFrame { .. } | Self::Cancelled => self,
            other => Self::AtFrame {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Frame index carried by the error, if any.
    pub fn frame_index(&self) -> Option<u32> {
        match self {
            Self::AtFrame { index, .. } => Some(*index),
            Self::FrameSourceMissing { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The innermost error, skipping frame tags.
    pub fn root(&self) -> &PiwoError {
        match self {
            Self::AtFrame { source, .. } => source.root(),
            other => other,
        }
    }
}
