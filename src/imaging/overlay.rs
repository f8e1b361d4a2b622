//! Inpainting mask overlay.
//!
//! When a generation ran with an inpainting mask, the untouched region of
//! the init image is composited back over each result. The collaborator only
//! works on pixels in memory; [`apply_mask_preserving_metadata`] decodes the
//! source once and writes the composite together with the source's text
//! chunks in a single staged write, so the file on disk is either the
//! original or the finished result.

use super::ImagingError;
use super::png_text::{read_text_chunks, write_png};
use image::DynamicImage;
use image::GenericImageView;
use image::imageops::FilterType;
use std::path::Path;

/// Composites the image at `mask` over `base`.
pub trait MaskOverlay: Send + Sync {
    fn composite(&self, base: DynamicImage, mask: &Path) -> Result<DynamicImage, ImagingError>;
}

/// Alpha-composites the mask over the source, resizing the mask to fit.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphaOverlay;

impl MaskOverlay for AlphaOverlay {
    fn composite(&self, base: DynamicImage, mask: &Path) -> Result<DynamicImage, ImagingError> {
        let (width, height) = base.dimensions();
        let mut base = base.to_rgba8();

        let mut top = image::open(mask)?.to_rgba8();
        if top.dimensions() != (width, height) {
            top = image::imageops::resize(&top, width, height, FilterType::Lanczos3);
        }

        image::imageops::overlay(&mut base, &top, 0, 0);
        Ok(DynamicImage::ImageRgba8(base))
    }
}

/// Overlay `mask` onto `source` without losing the source's text chunks.
///
/// On any error the source file is left as it was.
pub fn apply_mask_preserving_metadata(
    overlay: &dyn MaskOverlay,
    source: &Path,
    mask: &Path,
) -> Result<(), ImagingError> {
    let chunks = read_text_chunks(source)?;
    let base = image::open(source)?;
    let composite = overlay.composite(base, mask)?;
    write_png(source, &composite, &chunks)
}
