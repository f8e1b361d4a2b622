//! PNG text chunks: the side channel generation metadata lives in.
//!
//! Backends write their provenance as `tEXt` (Latin-1), `zTXt` (compressed
//! Latin-1) or `iTXt` (UTF-8) chunks. Each chunk is a keyword plus text; the
//! metadata codec consumes them rendered as `"keyword: text"`.
//!
//! Only chunks ahead of the first `IDAT` are read. Every backend in use
//! writes its text there, and stopping early avoids inflating pixel data.
//!
//! Re-encoding a PNG through the `image` crate drops all text chunks, so
//! [`embed_text_chunks`] exists to put them back afterwards.

use super::ImagingError;
use image::{DynamicImage, GenericImageView};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// One keyword/text pair from a PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub keyword: String,
    pub text: String,
}

impl TextChunk {
    pub fn new(keyword: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            text: text.into(),
        }
    }

    /// The chunk as a side-channel entry, `keyword: text`.
    pub fn side_channel_text(&self) -> String {
        format!("{}: {}", self.keyword, self.text)
    }
}

/// Read all text chunks of a PNG, in tEXt, zTXt, iTXt order.
///
/// A compressed chunk that fails to inflate is skipped, not fatal.
pub fn read_text_chunks(path: &Path) -> Result<Vec<TextChunk>, ImagingError> {
    let file = File::open(path)?;
    let decoder = png::Decoder::new(BufReader::new(file));
    let reader = decoder.read_info()?;
    let info = reader.info();

    let mut chunks: Vec<TextChunk> = info
        .uncompressed_latin1_text
        .iter()
        .map(|c| TextChunk::new(c.keyword.clone(), c.text.clone()))
        .collect();

    for c in &info.compressed_latin1_text {
        match c.get_text() {
            Ok(text) => chunks.push(TextChunk::new(c.keyword.clone(), text)),
            Err(e) => tracing::debug!(keyword = %c.keyword, error = %e, "skipping unreadable zTXt chunk"),
        }
    }

    for c in &info.utf8_text {
        match c.get_text() {
            Ok(text) => chunks.push(TextChunk::new(c.keyword.clone(), text)),
            Err(e) => tracing::debug!(keyword = %c.keyword, error = %e, "skipping unreadable iTXt chunk"),
        }
    }

    Ok(chunks)
}

/// Encode `image` as PNG at `path`, carrying the given text chunks.
///
/// Latin-1 text goes into `tEXt`, anything else into `iTXt`. The file is
/// written next to the target and renamed over it, so readers never see a
/// half-written image.
pub fn write_png(path: &Path, image: &DynamicImage, chunks: &[TextChunk]) -> Result<(), ImagingError> {
    let (width, height) = image.dimensions();
    let (color, data) = if image.color().has_alpha() {
        (png::ColorType::Rgba, image.to_rgba8().into_raw())
    } else {
        (png::ColorType::Rgb, image.to_rgb8().into_raw())
    };

    let staging = staging_path(path);
    {
        let file = File::create(&staging)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);

        for chunk in chunks {
            if is_latin1(&chunk.text) {
                encoder.add_text_chunk(chunk.keyword.clone(), chunk.text.clone())?;
            } else {
                encoder.add_itxt_chunk(chunk.keyword.clone(), chunk.text.clone())?;
            }
        }

        let mut writer = encoder.write_header()?;
        writer.write_image_data(&data)?;
        writer.finish()?;
    }
    std::fs::rename(&staging, path)?;
    Ok(())
}

/// Replace the text chunks of the PNG at `path` with `chunks`.
pub fn embed_text_chunks(path: &Path, chunks: &[TextChunk]) -> Result<(), ImagingError> {
    let image = image::open(path)?;
    write_png(path, &image, chunks)
}

fn is_latin1(text: &str) -> bool {
    text.chars().all(|c| (c as u32) < 0x100)
}

/// Hidden sibling used while encoding; never carries the artifact extension.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}
