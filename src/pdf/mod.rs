//! PDF writer. Turns an ordered list of page images into a document with one page per image,
//! each page sized to the image's pixel dimensions.

use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat};
use miniz_oxide::deflate::{compress_to_vec_zlib, CompressionLevel};
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref, TextStr};
use std::io::{Cursor, Write};
use thiserror::Error;

const CREATOR: &str = "manhwa-cli";

/// Errors from decoding page images or writing the document.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Cannot write PDF: no pages.")]
    NoPages,

    #[error("Could not decode image for page {position}: {source}")]
    Decode {
        position: u32,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write PDF: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel data in the form it will be embedded.
#[derive(Debug)]
enum Encoded {
    /// Original JPEG bytes, embedded as-is.
    Dct { data: Vec<u8>, gray: bool },
    /// Zlib-compressed 8-bit RGB samples plus an optional compressed alpha channel.
    Flate { rgb: Vec<u8>, alpha: Option<Vec<u8>> },
}

/// One decoded page, ready to be written.
#[derive(Debug)]
pub struct PageImage {
    /// 1-based position of the source image in the chapter.
    pub position: u32,
    pub width: u32,
    pub height: u32,
    encoded: Encoded,
}

/// Decode raw image bytes (JPEG, PNG, WebP, GIF) into a page.
///
/// RGB and grayscale JPEGs keep their original compressed data; every other image is re-encoded as
/// Flate RGB, with its alpha channel as a soft mask when present.
pub fn encode_page(position: u32, data: Vec<u8>) -> Result<PageImage, PdfError> {
    let decode_err = |source| PdfError::Decode { position, source };
    let format = image::guess_format(&data).map_err(decode_err)?;
    let decoded = image::load_from_memory_with_format(&data, format).map_err(decode_err)?;
    let (width, height) = (decoded.width(), decoded.height());
    let encoded = match (format, decoded.color()) {
        (ImageFormat::Jpeg, ColorType::Rgb8) if !is_cmyk_jpeg(&data) => Encoded::Dct {
            data,
            gray: false,
        },
        (ImageFormat::Jpeg, ColorType::L8) => Encoded::Dct { data, gray: true },
        _ => flate(&decoded),
    };
    Ok(PageImage {
        position,
        width,
        height,
        encoded,
    })
}

/// CMYK JPEGs decode to RGB but their DCT data is still four-channel.
fn is_cmyk_jpeg(data: &[u8]) -> bool {
    JpegDecoder::new(Cursor::new(data))
        .map(|d| d.original_color_type() == ExtendedColorType::Cmyk8)
        .unwrap_or(false)
}

fn flate(decoded: &DynamicImage) -> Encoded {
    let level = CompressionLevel::DefaultLevel as u8;
    let rgb = compress_to_vec_zlib(decoded.to_rgb8().as_raw(), level);
    let alpha = decoded.color().has_alpha().then(|| {
        let alphas: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        compress_to_vec_zlib(&alphas, level)
    });
    Encoded::Flate { rgb, alpha }
}

/// Write `pages` in order as a PDF document to `out`.
pub fn write_pdf<W: Write>(pages: &[PageImage], title: &str, out: &mut W) -> Result<(), PdfError> {
    if pages.is_empty() {
        return Err(PdfError::NoPages);
    }

    let mut pdf = Pdf::new();
    let catalog_id = Ref::new(1);
    let page_tree_id = Ref::new(2);
    let info_id = Ref::new(3);
    // Four objects per page: page, image, soft mask, content stream.
    let ids = |i: usize| {
        let base = 4 + 4 * i as i32;
        (
            Ref::new(base),
            Ref::new(base + 1),
            Ref::new(base + 2),
            Ref::new(base + 3),
        )
    };

    pdf.catalog(catalog_id).pages(page_tree_id);
    pdf.pages(page_tree_id)
        .kids((0..pages.len()).map(|i| ids(i).0))
        .count(pages.len() as i32);
    pdf.document_info(info_id)
        .title(TextStr(title))
        .creator(TextStr(CREATOR));

    for (i, page_image) in pages.iter().enumerate() {
        let (page_id, image_id, mask_id, content_id) = ids(i);
        let image_name = format!("Im{}", page_image.position);
        let image_name = Name(image_name.as_bytes());
        let w = page_image.width as f32;
        let h = page_image.height as f32;

        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, w, h));
        page.parent(page_tree_id);
        page.contents(content_id);
        page.resources().x_objects().pair(image_name, image_id);
        page.finish();

        match &page_image.encoded {
            Encoded::Dct { data, gray } => {
                let mut image = pdf.image_xobject(image_id, data);
                image.filter(Filter::DctDecode);
                image.width(page_image.width as i32);
                image.height(page_image.height as i32);
                if *gray {
                    image.color_space().device_gray();
                } else {
                    image.color_space().device_rgb();
                }
                image.bits_per_component(8);
                image.finish();
            }
            Encoded::Flate { rgb, alpha } => {
                let mut image = pdf.image_xobject(image_id, rgb);
                image.filter(Filter::FlateDecode);
                image.width(page_image.width as i32);
                image.height(page_image.height as i32);
                image.color_space().device_rgb();
                image.bits_per_component(8);
                if alpha.is_some() {
                    image.s_mask(mask_id);
                }
                image.finish();

                if let Some(alpha) = alpha {
                    let mut s_mask = pdf.image_xobject(mask_id, alpha);
                    s_mask.filter(Filter::FlateDecode);
                    s_mask.width(page_image.width as i32);
                    s_mask.height(page_image.height as i32);
                    s_mask.color_space().device_gray();
                    s_mask.bits_per_component(8);
                    s_mask.finish();
                }
            }
        }

        // Scale the unit image square to fill the page.
        let mut content = Content::new();
        content.save_state();
        content.transform([w, 0.0, 0.0, h, 0.0, 0.0]);
        content.x_object(image_name);
        content.restore_state();
        pdf.stream(content_id, &content.finish());
    }

    out.write_all(&pdf.finish())?;
    Ok(())
}
