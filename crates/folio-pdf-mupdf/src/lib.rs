use std::path::Path;

use mupdf::{
    Colorspace, Device, Document, IRect, ImageFormat, Matrix, Page, Pixmap, Rect, TextBlockType,
    TextPageFlags,
};

use folio_core::text_utils::expand_ligatures;
use folio_core::{BackendError, PageImage, TextPages};

/// Image regions are rendered at 144 dpi.
const IMAGE_ZOOM: f32 = 2.0;
/// Image blocks narrower or shorter than this (in points) are ornaments.
const MIN_IMAGE_SIDE: f32 = 24.0;

/// Decodes a PDF into per-page text with MuPDF.
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (AGPL-3.0) so that plain-text inputs never link it.
///
/// Running headers and footers ("Chapter 3 | Monsters", page numbers) land in
/// the middle of stat blocks that cross a page break. By default text in the
/// bottom 5% and top 4% of each page is dropped.
///
/// Image blocks (portraits, maps) are rendered to PNG and attached to their
/// page unless disabled with [`MupdfBackend::with_images`].
pub struct MupdfBackend {
    /// Fraction of page height from the bottom to drop. `None` keeps footers.
    footer_exclusion_ratio: Option<f32>,
    /// Fraction of page height from the top to drop. `None` keeps headers.
    header_exclusion_ratio: Option<f32>,
    images: bool,
}

impl Default for MupdfBackend {
    fn default() -> Self {
        Self {
            footer_exclusion_ratio: Some(0.05),
            header_exclusion_ratio: Some(0.04),
            images: true,
        }
    }
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the footer exclusion ratio. Pass `0.0` to disable.
    pub fn with_footer_exclusion(mut self, ratio: f32) -> Self {
        self.footer_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    /// Set the header exclusion ratio. Pass `0.0` to disable.
    pub fn with_header_exclusion(mut self, ratio: f32) -> Self {
        self.header_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    /// Whether to render the images on each page.
    pub fn with_images(mut self, images: bool) -> Self {
        self.images = images;
        self
    }

    /// Decode every page of the document.
    ///
    /// MuPDF documents cannot cross threads, so the text is read eagerly and
    /// handed out as a [`TextPages`] provider.
    pub fn load(&self, path: &Path) -> Result<TextPages, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        let mut pages = Vec::new();
        let mut images = Vec::new();
        for (idx, page_result) in document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
            .enumerate()
        {
            let page = page_result.map_err(|e| BackendError::ExtractionError(e.to_string()))?;
            let (text, regions) = self.decode_page(&page)?;
            pages.push(text);
            images.push(
                regions
                    .iter()
                    .filter_map(|region| match render_region(&page, region) {
                        Ok(image) => Some(image),
                        Err(e) => {
                            tracing::warn!(page = idx + 1, error = %e, "image not rendered");
                            None
                        }
                    })
                    .collect::<Vec<_>>(),
            );
        }

        tracing::debug!(
            path = %path.display(),
            pages = pages.len(),
            images = images.iter().map(Vec::len).sum::<usize>(),
            "decoded pdf"
        );
        Ok(TextPages::new(pages).with_images(images))
    }

    /// Page text plus the bounds of its image blocks.
    fn decode_page(&self, page: &Page) -> Result<(String, Vec<Rect>), BackendError> {
        let flags = if self.images {
            TextPageFlags::PRESERVE_IMAGES
        } else {
            TextPageFlags::empty()
        };
        let text_page = page
            .to_text_page(flags)
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

        let bounds = page
            .bounds()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        let height = bounds.y1 - bounds.y0;
        let header_limit = self.header_exclusion_ratio.map(|r| bounds.y0 + height * r);
        let footer_limit = self.footer_exclusion_ratio.map(|r| bounds.y1 - height * r);

        let mut text = String::new();
        let mut regions = Vec::new();
        for block in text_page.blocks() {
            let block_bounds = block.bounds();
            if block.r#type() == TextBlockType::Image {
                let (w, h) = (
                    block_bounds.x1 - block_bounds.x0,
                    block_bounds.y1 - block_bounds.y0,
                );
                if self.images && w >= MIN_IMAGE_SIDE && h >= MIN_IMAGE_SIDE {
                    regions.push(block_bounds);
                }
                continue;
            }
            if header_limit.is_some_and(|limit| block_bounds.y1 <= limit) {
                continue;
            }
            if footer_limit.is_some_and(|limit| block_bounds.y0 >= limit) {
                continue;
            }

            for line in block.lines() {
                let line_text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                text.push_str(&line_text);
                text.push('\n');
            }
        }

        Ok((expand_ligatures(&text), regions))
    }
}

/// Render one region of `page` to a PNG.
fn render_region(page: &Page, region: &Rect) -> Result<PageImage, mupdf::Error> {
    let rect = IRect {
        x0: (region.x0 * IMAGE_ZOOM).floor() as i32,
        y0: (region.y0 * IMAGE_ZOOM).floor() as i32,
        x1: (region.x1 * IMAGE_ZOOM).ceil() as i32,
        y1: (region.y1 * IMAGE_ZOOM).ceil() as i32,
    };
    let mut pixmap = Pixmap::new_with_rect(&Colorspace::device_rgb(), rect, false)?;
    pixmap.clear_with(255)?;
    {
        let device = Device::from_pixmap(&pixmap)?;
        page.run(&device, &Matrix::new_scale(IMAGE_ZOOM, IMAGE_ZOOM))?;
    }

    let mut data = Vec::new();
    pixmap.write_to(&mut data, ImageFormat::PNG)?;
    Ok(PageImage {
        data,
        ext: "png".into(),
        width: pixmap.width() as u32,
        height: pixmap.height() as u32,
    })
}
