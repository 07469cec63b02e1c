//! Chapter assembly: download a chapter's images in order and write them into one temp PDF.

use crate::model::ImageRef;
use crate::pdf::{encode_page, write_pdf, PageImage, PdfError};
use crate::site::{FetchError, ImageFetcher};
use crate::tempfiles::{TempPdf, TempRegistry};
use serde::Deserialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// What to do when a single page cannot be downloaded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPagePolicy {
    /// Leave the page out, log it, and keep going (default).
    #[default]
    Skip,
    /// Give up on the whole chapter.
    Abort,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Chapter has no images.")]
    NoImages,

    #[error("Page {position} could not be downloaded: {source}")]
    PageFailed {
        position: u32,
        #[source]
        source: FetchError,
    },

    #[error("None of the {attempted} pages could be downloaded.")]
    NoPages { attempted: usize },

    #[error("Page {position} is not a readable image: {source}")]
    Decode {
        position: u32,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not create temp file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("{0}")]
    Write(#[source] PdfError),
}

pub struct AssembleOptions<'a> {
    /// Document title, "<series> - <chapter label>".
    pub title: &'a str,
    /// Chapter page URL, sent as `Referer` with every image request.
    pub referer: &'a str,
    pub missing_pages: MissingPagePolicy,
    /// Where to put the PDF. `None` means the OS temp directory.
    pub temp_dir: Option<&'a Path>,
}

/// A finished chapter PDF. Dropping it deletes the file.
#[derive(Debug)]
pub struct AssembledChapter {
    pub pdf: TempPdf,
    /// Number of pages written.
    pub pages: usize,
    /// Positions of pages left out under [MissingPagePolicy::Skip].
    pub skipped: Vec<u32>,
}

/// Download `images` in order and write them as one PDF in a fresh temp file.
///
/// The file is created only after every page has been fetched, and is removed again if writing
/// fails. Optional progress callback is called with (done, total) after each image.
pub fn assemble(
    fetcher: &mut dyn ImageFetcher,
    images: &[ImageRef],
    options: &AssembleOptions,
    registry: &TempRegistry,
    progress: Option<&dyn Fn(u32, u32)>,
) -> Result<AssembledChapter, AssemblyError> {
    if images.is_empty() {
        return Err(AssemblyError::NoImages);
    }

    let total = images.len() as u32;
    let mut pages: Vec<PageImage> = Vec::with_capacity(images.len());
    let mut skipped = Vec::new();
    for (i, image) in images.iter().enumerate() {
        match fetch_page(fetcher, image, options.referer) {
            Ok(page) => pages.push(page),
            Err(e) => match options.missing_pages {
                MissingPagePolicy::Abort => return Err(e),
                MissingPagePolicy::Skip => {
                    warn!("skipping page {}: {}", image.position, e);
                    skipped.push(image.position);
                }
            },
        }
        if let Some(cb) = progress {
            cb(i as u32 + 1, total);
        }
    }

    if pages.is_empty() {
        return Err(AssemblyError::NoPages {
            attempted: images.len(),
        });
    }

    let (file, pdf) = match options.temp_dir {
        Some(dir) => TempPdf::create_in(registry, dir),
        None => TempPdf::create(registry),
    }
    .map_err(AssemblyError::TempFile)?;

    // On error `pdf` is dropped here, which deletes the partial file.
    let mut writer = BufWriter::new(file);
    write_pdf(&pages, options.title, &mut writer).map_err(AssemblyError::Write)?;
    writer
        .flush()
        .map_err(|e| AssemblyError::Write(PdfError::Io(e)))?;
    drop(writer);

    info!(
        "wrote {} pages ({} skipped) to {}",
        pages.len(),
        skipped.len(),
        pdf.path().display()
    );
    Ok(AssembledChapter {
        pdf,
        pages: pages.len(),
        skipped,
    })
}

fn fetch_page(
    fetcher: &mut dyn ImageFetcher,
    image: &ImageRef,
    referer: &str,
) -> Result<PageImage, AssemblyError> {
    let bytes = fetcher
        .fetch_image(&image.url, referer)
        .map_err(|source| AssemblyError::PageFailed {
            position: image.position,
            source,
        })?;
    encode_page(image.position, bytes).map_err(|e| match e {
        PdfError::Decode { position, source } => AssemblyError::Decode { position, source },
        other => AssemblyError::Write(other),
    })
}
