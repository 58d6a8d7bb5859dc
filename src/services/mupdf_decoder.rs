use std::sync::Arc;

use image::{Rgba, RgbaImage};
use mupdf::{Colorspace, Document, Matrix};
use tracing::debug;

use super::pdf_service::{DecodedDocument, DocumentDecoder};
use crate::error::{Error, Result};
use crate::models::PageSize;

const PDF_MIME: &str = "application/pdf";

impl From<mupdf::Error> for Error {
    fn from(err: mupdf::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfDecoder;

impl DocumentDecoder for MupdfDecoder {
    fn decode(&self, bytes: Vec<u8>) -> Result<Box<dyn DecodedDocument>> {
        let doc = Document::from_bytes(&bytes, PDF_MIME)?;
        let count = doc.page_count()?;

        let mut sizes = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let bounds = doc.load_page(index)?.bounds()?;
            sizes.push(PageSize {
                width: bounds.x1 - bounds.x0,
                height: bounds.y1 - bounds.y0,
            });
        }
        debug!(pages = sizes.len(), "decoded pdf");

        Ok(Box::new(MupdfDocument {
            bytes: Arc::new(bytes),
            sizes,
        }))
    }
}

struct MupdfDocument {
    bytes: Arc<Vec<u8>>,
    sizes: Vec<PageSize>,
}

impl DecodedDocument for MupdfDocument {
    fn page_count(&self) -> u32 {
        self.sizes.len() as u32
    }

    fn page_size(&self, page_number: u32) -> Result<PageSize> {
        page_number
            .checked_sub(1)
            .and_then(|index| self.sizes.get(index as usize))
            .copied()
            .ok_or_else(|| Error::Decode(format!("page {} out of range", page_number)))
    }

    fn rasterize(&self, page_number: u32, scale: f32, target: &mut RgbaImage) -> Result<()> {
        self.page_size(page_number)?;

        let doc = Document::from_bytes(&self.bytes, PDF_MIME)?;
        let page = doc.load_page(page_number as i32 - 1)?;
        let pixmap = page.to_pixmap(
            &Matrix::new_scale(scale, scale),
            &Colorspace::device_rgb(),
            false,
            true,
        )?;

        let width = pixmap.width() as u32;
        let height = pixmap.height() as u32;
        let samples = pixmap.samples();
        let n = pixmap.n() as usize;

        // the pixmap may be a pixel off from the ceil'd backing size
        for y in 0..height.min(target.height()) {
            for x in 0..width.min(target.width()) {
                let offset = (y as usize * width as usize + x as usize) * n;
                let r = samples.get(offset).copied().unwrap_or(255);
                let g = samples.get(offset + 1).copied().unwrap_or(255);
                let b = samples.get(offset + 2).copied().unwrap_or(255);
                target.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
        Ok(())
    }
}
