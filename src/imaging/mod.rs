//! Image I/O: PNG text chunks and mask compositing.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Read text chunks** | `png::Decoder` (`tEXt`, `zTXt`, `iTXt`) |
//! | **Write text chunks** | `png::Encoder` + staging file rename |
//! | **Mask overlay** | `image::imageops::overlay` |
//!
//! The module is split into:
//! - **png_text**: [`TextChunk`] plus reading and re-embedding chunks
//! - **overlay**: [`MaskOverlay`] trait + [`AlphaOverlay`]

mod overlay;
mod png_text;

use thiserror::Error;

pub use overlay::{AlphaOverlay, MaskOverlay, apply_mask_preserving_metadata};
pub use png_text::{TextChunk, embed_text_chunks, read_text_chunks, write_png};

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PNG decode failed: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("PNG encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
}
