//! CLI parsing and orchestration. Parses args, resolves settings against the config file, then
//! either prints search results as JSON or runs the interactive menu. Maps errors to exit codes.

use crate::assembler::{assemble, AssembleOptions, MissingPagePolicy};
use crate::config::{self, Config};
use crate::logging;
use crate::menu::{MenuBackend, MenuController, MenuExit, MenuSettings, ReadError, ReadSummary};
use crate::model::{ChapterEntry, SearchResult};
use crate::site::{PoliteClient, SiteClient, SiteError};
use crate::tempfiles::TempRegistry;
use crate::viewer::{view_and_discard, SystemViewer, Viewer, ViewerError};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 250;
const DEFAULT_RETRY_COUNT: u32 = 2;
const DEFAULT_BACKOFF_SECS: [u64; 1] = [1];

const WELCOME: &str = "\
manhwa-cli: search toonily.com and read chapters in your PDF viewer.

Usage:   manhwa-cli <search words...> [--limit N]
Example: manhwa-cli solo leveling

Run `manhwa-cli --help` for all options.";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Site(#[from] SiteError),

    #[error("No manhwas found for \"{0}\".")]
    NoResults(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Io(_) => 1,
            CliRunError::Site(_) => 2,
            CliRunError::NoResults(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "manhwa-cli")]
#[command(about = "Search toonily.com and read manhwa chapters as PDF in the system viewer")]
#[command(
    after_help = "Config file keys (user_agent, timeout_secs, request_delay_ms, retry_count, retry_backoff_secs, default_limit, page_size, missing_pages) are read from ./manhwa-cli.toml or <config dir>/manhwa-cli/config.toml. CLI flags override config."
)]
pub struct Args {
    /// Search query. Several words are joined with spaces.
    pub query: Vec<String>,

    /// Maximum number of search results (overrides config; default 10).
    #[arg(short, long, value_parser = parse_positive)]
    pub limit: Option<usize>,

    /// Chapters per menu page (overrides config; default 20).
    #[arg(long, value_parser = parse_positive)]
    pub page_size: Option<usize>,

    /// What to do when a page image cannot be downloaded: skip (default) or abort.
    #[arg(long, value_parser = parse_missing_pages)]
    pub missing_pages: Option<MissingPagePolicy>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Delay between requests in milliseconds (overrides config; default 250).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Print search results as JSON and exit without opening the menu.
    #[arg(long)]
    pub json: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// The query words joined with single spaces.
    pub fn query_text(&self) -> String {
        self.query
            .iter()
            .flat_map(|w| w.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn parse_positive(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive whole number, got '{}'", s)),
    }
}

fn parse_missing_pages(s: &str) -> Result<MissingPagePolicy, String> {
    match s.to_lowercase().as_str() {
        "skip" => Ok(MissingPagePolicy::Skip),
        "abort" => Ok(MissingPagePolicy::Abort),
        _ => Err(format!(
            "Invalid --missing-pages value: '{}'. Use skip or abort.",
            s
        )),
    }
}

/// Effective settings after applying CLI flags over config over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    pub delay_ms: u64,
    pub retry_count: u32,
    pub retry_backoff_secs: Vec<u64>,
    pub limit: usize,
    pub page_size: usize,
    pub missing_pages: MissingPagePolicy,
}

pub fn resolve_settings(args: &Args, config: Option<&Config>) -> Result<Settings, CliRunError> {
    let limit = args
        .limit
        .or_else(|| config.and_then(|c| c.default_limit))
        .unwrap_or(DEFAULT_LIMIT);
    let page_size = args
        .page_size
        .or_else(|| config.and_then(|c| c.page_size))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 {
        return Err(CliRunError::InvalidInput(
            "Invalid config: default_limit must be at least 1.".to_string(),
        ));
    }
    if page_size == 0 {
        return Err(CliRunError::InvalidInput(
            "Invalid config: page_size must be at least 1.".to_string(),
        ));
    }

    Ok(Settings {
        user_agent: args
            .user_agent
            .clone()
            .or_else(|| config.and_then(|c| c.user_agent.clone())),
        timeout_secs: args
            .timeout
            .or_else(|| config.and_then(|c| c.timeout_secs))
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        delay_ms: args
            .delay
            .or_else(|| config.and_then(|c| c.request_delay_ms))
            .unwrap_or(DEFAULT_DELAY_MS),
        retry_count: config
            .and_then(|c| c.retry_count)
            .unwrap_or(DEFAULT_RETRY_COUNT)
            .max(1),
        retry_backoff_secs: config
            .and_then(|c| c.retry_backoff_secs.clone())
            .unwrap_or_else(|| DEFAULT_BACKOFF_SECS.to_vec()),
        limit,
        page_size,
        missing_pages: args
            .missing_pages
            .or_else(|| config.and_then(|c| c.missing_pages))
            .unwrap_or_default(),
    })
}

fn build_site_client(settings: &Settings) -> Result<SiteClient, CliRunError> {
    let mut builder = PoliteClient::builder()
        .delay_ms(settings.delay_ms)
        .timeout_secs(settings.timeout_secs)
        .retry_count(settings.retry_count)
        .retry_backoff_secs(settings.retry_backoff_secs.clone());
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    let http = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;
    Ok(SiteClient::new(http)?)
}

fn download_bar(total: u32) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Menu backend talking to the live site, the PDF assembler and the system viewer.
struct LiveSession {
    site: SiteClient,
    viewer: SystemViewer,
    registry: TempRegistry,
    missing_pages: MissingPagePolicy,
}

impl MenuBackend for LiveSession {
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SiteError> {
        self.site.search(query, limit)
    }

    fn chapters(&mut self, title: &SearchResult) -> Result<Vec<ChapterEntry>, SiteError> {
        self.site.fetch_chapter_list(&title.url)
    }

    fn read(
        &mut self,
        title: &SearchResult,
        chapter: &ChapterEntry,
        wait_for_reader: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<ReadSummary, ReadError> {
        let viewed = self.read_as_pdf(title, chapter, wait_for_reader);
        read_or_browse(&mut self.viewer, &chapter.url, viewed)
    }
}

impl LiveSession {
    fn read_as_pdf(
        &mut self,
        title: &SearchResult,
        chapter: &ChapterEntry,
        wait_for_reader: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<ReadSummary, ReadError> {
        let images = self.site.fetch_chapter_images(&chapter.url)?;
        let doc_title = format!("{} - {}", title.title, chapter.label);
        let options = AssembleOptions {
            title: &doc_title,
            referer: &chapter.url,
            missing_pages: self.missing_pages,
            temp_dir: None,
        };

        let progress_state: RefCell<Option<ProgressBar>> = RefCell::new(None);
        let progress_cb = |n: u32, total: u32| {
            if total == 0 {
                return;
            }
            let mut state = progress_state.borrow_mut();
            let pb = state.get_or_insert_with(|| download_bar(total));
            pb.set_position(n as u64);
            pb.set_message(format!("Downloading page {}/{}", n, total));
        };
        let progress: Option<&dyn Fn(u32, u32)> = Some(&progress_cb);
        let assembled = assemble(&mut self.site, &images, &options, &self.registry, progress);
        if let Some(pb) = progress_state.borrow_mut().take() {
            pb.finish_and_clear();
        }
        let assembled = assembled?;

        view_and_discard(&mut self.viewer, assembled.pdf, wait_for_reader)?;
        Ok(ReadSummary::Viewed {
            pages: assembled.pages,
            skipped: assembled.skipped,
        })
    }
}

/// When the chapter could not be fetched, assembled or shown as a PDF, open its page in the web
/// browser. A failed wait for the reader is returned unchanged, and so is the original error when
/// the browser cannot be opened either.
fn read_or_browse(
    viewer: &mut dyn Viewer,
    chapter_url: &str,
    viewed: Result<ReadSummary, ReadError>,
) -> Result<ReadSummary, ReadError> {
    match viewed {
        Ok(_) | Err(ReadError::Viewer(ViewerError::Wait { .. })) => viewed,
        Err(e) => {
            warn!("could not show chapter as PDF: {}", e);
            match viewer.open_url(chapter_url) {
                Ok(()) => Ok(ReadSummary::OpenedInBrowser {
                    reason: e.to_string(),
                }),
                Err(browser_err) => {
                    warn!("could not open {} in the browser: {}", chapter_url, browser_err);
                    Err(e)
                }
            }
        }
    }
}

fn print_json(results: &[SearchResult]) -> Result<(), CliRunError> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, results).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on a normal quit; Err with exit code and message
/// otherwise.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    if let Err(e) = logging::init(args.verbose) {
        eprintln!("Warning: {}", e);
    }

    let query = args.query_text();
    if query.is_empty() {
        println!("{}", WELCOME);
        return Ok(());
    }

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = resolve_settings(args, config.as_ref())?;
    let mut site = build_site_client(&settings)?;

    if args.json {
        let results = site.search(&query, settings.limit)?;
        print_json(&results)?;
        if results.is_empty() {
            return Err(CliRunError::NoResults(query));
        }
        return Ok(());
    }

    let registry = TempRegistry::new();
    if let Err(e) = registry.install_interrupt_handler() {
        warn!("could not install Ctrl+C handler: {}", e);
    }
    let session = LiveSession {
        site,
        viewer: SystemViewer,
        registry: registry.clone(),
        missing_pages: settings.missing_pages,
    };
    let menu_settings = MenuSettings {
        limit: settings.limit,
        page_size: settings.page_size,
    };
    let mut menu = MenuController::new(
        session,
        io::stdin().lock(),
        io::stdout().lock(),
        &query,
        menu_settings,
    );
    let exit = menu.run();
    registry.remove_all();

    match exit? {
        MenuExit::Quit => Ok(()),
        MenuExit::NoResults => Err(CliRunError::NoResults(query)),
        MenuExit::Failed(e) => Err(CliRunError::Site(e)),
    }
}
