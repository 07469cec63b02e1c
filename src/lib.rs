//! manhwa-cli: search toonily.com from the terminal, pick a chapter, and read it as a PDF in the
//! system viewer. The PDF lives in a temp file for as long as the viewer is open.

pub mod assembler;
pub mod cli;
pub mod config;
pub mod logging;
pub mod menu;
pub mod model;
pub mod pdf;
pub mod site;
pub mod tempfiles;
pub mod viewer;

// Re-exports for CLI and consumers.
pub use assembler::{assemble, AssembleOptions, AssembledChapter, AssemblyError, MissingPagePolicy};
pub use menu::{MenuBackend, MenuController, MenuExit, MenuSettings, MenuState, ReadError};
pub use model::{ChapterEntry, ImageRef, SearchResult};
pub use site::{
    FetchError, ImageFetcher, ParseError, PoliteClient, PoliteClientBuilder, SiteClient, SiteError,
};
pub use tempfiles::{TempPdf, TempRegistry};
pub use viewer::{view_and_discard, SystemViewer, Viewer, ViewerError};
