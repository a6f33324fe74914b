//! PIWO7 text format.
//!
//! ```text
//! PIWO_7_FILE
//! 12 10
//!
//! 50
//! 660510 660510 ... 660510
//! ...
//!
//! ```
//!
//! Every value on a data row is followed by a single space, including the
//! last one. Each frame starts with a `50` marker line and ends with a blank
//! line. Both quirks are part of the format and are reproduced byte for byte.

use crate::error::{PiwoError, PiwoResult};
use crate::sampler::{PackedColor, PixelGrid};

pub const FILE_MAGIC: &str = "PIWO_7_FILE";
pub const FRAME_MARKER: &str = "50";
pub const FILE_EXTENSION: &str = "piwo7";

#[cfg(windows)]
pub const NEWLINE: &str = "\r\n";
#[cfg(not(windows))]
pub const NEWLINE: &str = "\n";

/// Appends the file header: magic line, `{width} {height}`, blank line.
pub fn write_header(out: &mut String, width: u32, height: u32) {
    out.push_str(FILE_MAGIC);
    out.push_str(NEWLINE);
    out.push_str(&format!("{} {}", width, height));
    out.push_str(NEWLINE);
    out.push_str(NEWLINE);
}

/// Appends one frame block for `grid`.
pub fn write_frame(out: &mut String, grid: &PixelGrid) {
    out.push_str(FRAME_MARKER);
    out.push_str(NEWLINE);
    for row in grid.rows() {
        for value in row {
            out.push_str(&value.to_string());
            out.push(' ');
        }
        out.push_str(NEWLINE);
    }
    out.push_str(NEWLINE);
}

/// The frame block for `grid` as a standalone string.
pub fn encode_frame(grid: &PixelGrid) -> String {
    // marker + rows of up to 8 digits and a space each + newlines
    let mut out = String::with_capacity(
        8 + (grid.width() as usize * 9 + 2) * grid.height() as usize,
    );
    write_frame(&mut out, grid);
    out
}

/// An output file under construction: the header followed by frame blocks
/// in the order they were pushed.
#[derive(Debug, Clone)]
pub struct PiwoDocument {
    width: u32,
    height: u32,
    frame_count: u32,
    text: String,
}

impl PiwoDocument {
    pub fn new(width: u32, height: u32) -> Self {
        let mut text = String::new();
        write_header(&mut text, width, height);
        Self {
            width,
            height,
            frame_count: 0,
            text,
        }
    }

    /// Appends the next frame. The grid must match the document dimensions.
    pub fn push_frame(&mut self, grid: &PixelGrid) -> PiwoResult<()> {
        if grid.width() != self.width || grid.height() != self.height {
            return Err(PiwoError::config(format!(
                "frame is {}x{}, document is {}x{}",
                grid.width(),
                grid.height(),
                self.width,
                self.height
            )));
        }
        write_frame(&mut self.text, grid);
        self.frame_count += 1;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Parses a PIWO7 file back into its frames. Accepts either newline
    /// convention.
    pub fn parse(text: &str) -> PiwoResult<ParsedDocument> {
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
        let bad = |line: usize, msg: &str| PiwoError::config(format!("line {}: {}", line, msg));

        match lines.next() {
            Some((_, FILE_MAGIC)) => {}
            Some((n, _)) => return Err(bad(n, "missing PIWO_7_FILE magic")),
            None => return Err(PiwoError::config("empty document")),
        }
        let (n, dims) = lines.next().ok_or_else(|| bad(2, "missing dimensions"))?;
        let mut parts = dims.split(' ');
        let (width, height) = match (parts.next(), parts.next(), parts.next()) {
            (Some(w), Some(h), None) => (
                w.parse::<u32>().map_err(|_| bad(n, "invalid width"))?,
                h.parse::<u32>().map_err(|_| bad(n, "invalid height"))?,
            ),
            _ => return Err(bad(n, "expected `<width> <height>`")),
        };
        let cells_per_frame = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| bad(n, "dimensions too large"))?;
        match lines.next() {
            Some((_, "")) => {}
            Some((n, _)) => return Err(bad(n, "expected blank line after header")),
            None => return Err(bad(3, "missing blank line after header")),
        }

        let mut frames = Vec::new();
        while let Some((n, marker)) = lines.next() {
            if marker != FRAME_MARKER {
                return Err(bad(n, "expected frame marker `50`"));
            }
            // grown row by row; the header is untrusted
            let mut cells = Vec::new();
            for _ in 0..height {
                let (n, row) = lines.next().ok_or_else(|| bad(n, "truncated frame"))?;
                let row = row
                    .strip_suffix(' ')
                    .ok_or_else(|| bad(n, "row must end with a space"))?;
                let before = cells.len();
                for token in row.split(' ') {
                    let value = token
                        .parse::<u32>()
                        .ok()
                        .and_then(PackedColor::from_value)
                        .ok_or_else(|| bad(n, "invalid color value"))?;
                    cells.push(value);
                }
                if cells.len() - before != width as usize {
                    return Err(bad(n, "wrong number of values in row"));
                }
            }
            match lines.next() {
                Some((_, "")) => {}
                Some((n, _)) => return Err(bad(n, "expected blank line after frame")),
                None => return Err(PiwoError::config("missing blank line after last frame")),
            }
            if cells.len() != cells_per_frame {
                return Err(bad(n, "frame size mismatch"));
            }
            let grid = PixelGrid::from_cells(width, height, cells)
                .ok_or_else(|| bad(n, "frame size mismatch"))?;
            frames.push(grid);
        }

        Ok(ParsedDocument {
            width,
            height,
            frames,
        })
    }
}

/// A PIWO7 file read back from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<PixelGrid>,
}
