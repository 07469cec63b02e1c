//! Interactive menu: search, pick a title, page through its chapters, read one.
//!
//! The menu is a small state machine ([MenuState]). Parsing of user input and page arithmetic are
//! plain functions; the controller is generic over its backend and its I/O streams.

use crate::assembler::AssemblyError;
use crate::model::{ChapterEntry, SearchResult};
use crate::site::SiteError;
use crate::viewer::ViewerError;
use std::io::{self, BufRead, Write};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Failure of one reading step. The menu reports it and returns to the chapter list.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    Site(#[from] SiteError),

    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    #[error("{0}")]
    Viewer(#[from] ViewerError),
}

/// Result of reading one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSummary {
    /// The chapter PDF was shown and has been deleted.
    Viewed { pages: usize, skipped: Vec<u32> },
    /// No PDF could be shown; the chapter page was opened in the web browser instead.
    OpenedInBrowser { reason: String },
}

/// What the menu needs from the outside world.
pub trait MenuBackend {
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SiteError>;

    fn chapters(&mut self, title: &SearchResult) -> Result<Vec<ChapterEntry>, SiteError>;

    /// Fetch, assemble and show one chapter, deleting its PDF afterwards. `wait_for_reader` blocks
    /// until the user says they are done, for viewers that return immediately.
    fn read(
        &mut self,
        title: &SearchResult,
        chapter: &ChapterEntry,
        wait_for_reader: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<ReadSummary, ReadError>;
}

#[derive(Debug)]
pub enum MenuExit {
    Quit,
    /// The search came back empty. Reported by the caller.
    NoResults,
    /// The search itself failed. Reported by the caller.
    Failed(SiteError),
}

#[derive(Debug)]
pub enum MenuState {
    Searching,
    ResultsShown,
    ChapterListShown { page: usize },
    /// `chapter` is a 0-based index into the chapter list.
    Reading { page: usize, chapter: usize },
    Exit(MenuExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultChoice {
    /// 0-based index into the results.
    Select(usize),
    Quit,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterChoice {
    /// 0-based index into the chapter list.
    Read(usize),
    NextPage,
    PrevPage,
    Back,
    Quit,
    Invalid,
}

/// Interpret a line typed at the results prompt. `None` is end of input.
pub fn parse_result_choice(line: Option<&str>, count: usize) -> ResultChoice {
    let Some(line) = line else {
        return ResultChoice::Quit;
    };
    match line.trim().to_lowercase().as_str() {
        "0" | "q" => ResultChoice::Quit,
        s => match s.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => ResultChoice::Select(n - 1),
            _ => ResultChoice::Invalid,
        },
    }
}

/// Interpret a line typed at the chapter prompt. Chapter numbers are global 1-based indices, not
/// positions on the current page.
pub fn parse_chapter_choice(line: Option<&str>, total: usize) -> ChapterChoice {
    let Some(line) = line else {
        return ChapterChoice::Quit;
    };
    match line.trim().to_lowercase().as_str() {
        "n" => ChapterChoice::NextPage,
        "p" => ChapterChoice::PrevPage,
        "b" | "0" => ChapterChoice::Back,
        "q" => ChapterChoice::Quit,
        s => match s.parse::<usize>() {
            Ok(n) if (1..=total).contains(&n) => ChapterChoice::Read(n - 1),
            _ => ChapterChoice::Invalid,
        },
    }
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1))
}

/// Indices shown on `page` (0-based). Pages past the end are empty.
pub fn page_range(total: usize, page_size: usize, page: usize) -> Range<usize> {
    let size = page_size.max(1);
    let start = page.saturating_mul(size).min(total);
    let end = start.saturating_add(size).min(total);
    start..end
}

#[derive(Debug, Clone, Copy)]
pub struct MenuSettings {
    /// Maximum number of search results.
    pub limit: usize,
    /// Chapters per page.
    pub page_size: usize,
}

pub struct MenuController<B, R, W> {
    backend: B,
    input: R,
    output: W,
    query: String,
    settings: MenuSettings,
    results: Vec<SearchResult>,
    selected: Option<usize>,
    chapters: Vec<ChapterEntry>,
}

impl<B: MenuBackend, R: BufRead, W: Write> MenuController<B, R, W> {
    pub fn new(backend: B, input: R, output: W, query: &str, settings: MenuSettings) -> Self {
        MenuController {
            backend,
            input,
            output,
            query: query.to_string(),
            settings,
            results: Vec::new(),
            selected: None,
            chapters: Vec::new(),
        }
    }

    /// Run from [MenuState::Searching] until an exit state is reached.
    pub fn run(&mut self) -> io::Result<MenuExit> {
        let mut state = MenuState::Searching;
        loop {
            state = match state {
                MenuState::Exit(exit) => return Ok(exit),
                other => self.step(other)?,
            };
        }
    }

    /// Perform one transition.
    pub fn step(&mut self, state: MenuState) -> io::Result<MenuState> {
        debug!("menu state: {:?}", state);
        match state {
            MenuState::Searching => self.search(),
            MenuState::ResultsShown => self.results_shown(),
            MenuState::ChapterListShown { page } => self.chapter_list_shown(page),
            MenuState::Reading { page, chapter } => self.reading(page, chapter),
            MenuState::Exit(exit) => Ok(MenuState::Exit(exit)),
        }
    }

    fn search(&mut self) -> io::Result<MenuState> {
        writeln!(self.output, "Searching for: {}", self.query)?;
        match self.backend.search(&self.query, self.settings.limit) {
            Ok(results) if results.is_empty() => Ok(MenuState::Exit(MenuExit::NoResults)),
            Ok(results) => {
                self.results = results;
                Ok(MenuState::ResultsShown)
            }
            Err(e) => Ok(MenuState::Exit(MenuExit::Failed(e))),
        }
    }

    fn results_shown(&mut self) -> io::Result<MenuState> {
        writeln!(self.output)?;
        for (i, r) in self.results.iter().enumerate() {
            writeln!(
                self.output,
                "{:>3}. {}  [{}]  {}",
                i + 1,
                r.title,
                r.rating_label(),
                r.latest_chapter.as_deref().unwrap_or("-")
            )?;
        }
        let line = self.prompt(&format!(
            "Select a manhwa (1-{}, 0 or q to quit): ",
            self.results.len()
        ))?;
        match parse_result_choice(line.as_deref(), self.results.len()) {
            ResultChoice::Quit => Ok(MenuState::Exit(MenuExit::Quit)),
            ResultChoice::Invalid => {
                writeln!(self.output, "Invalid choice.")?;
                Ok(MenuState::ResultsShown)
            }
            ResultChoice::Select(i) => self.open_title(i),
        }
    }

    fn open_title(&mut self, index: usize) -> io::Result<MenuState> {
        let title = &self.results[index];
        writeln!(self.output, "Fetching chapters for: {}", title.title)?;
        match self.backend.chapters(title) {
            Ok(chapters) if chapters.is_empty() => {
                writeln!(self.output, "No chapters found for this manhwa.")?;
                Ok(MenuState::ResultsShown)
            }
            Ok(chapters) => {
                self.selected = Some(index);
                self.chapters = chapters;
                Ok(MenuState::ChapterListShown { page: 0 })
            }
            Err(e) => {
                writeln!(self.output, "Could not load chapters: {}", e)?;
                Ok(MenuState::ResultsShown)
            }
        }
    }

    fn chapter_list_shown(&mut self, page: usize) -> io::Result<MenuState> {
        let total = self.chapters.len();
        let pages = page_count(total, self.settings.page_size);
        let page = page.min(pages.saturating_sub(1));
        let title = self
            .selected
            .and_then(|i| self.results.get(i))
            .map(|r| r.title.as_str())
            .unwrap_or_default();

        writeln!(self.output)?;
        writeln!(
            self.output,
            "{} - page {}/{} ({} chapters)",
            title,
            page + 1,
            pages,
            total
        )?;
        for i in page_range(total, self.settings.page_size, page) {
            let c = &self.chapters[i];
            match &c.release_date {
                Some(date) => writeln!(self.output, "{:>5}. {}  ({})", c.index, c.label, date)?,
                None => writeln!(self.output, "{:>5}. {}", c.index, c.label)?,
            }
        }
        let line = self.prompt(&format!(
            "Chapter (1-{}), n next, p previous, b back, q quit: ",
            total
        ))?;
        let next = match parse_chapter_choice(line.as_deref(), total) {
            ChapterChoice::Read(chapter) => MenuState::Reading { page, chapter },
            ChapterChoice::NextPage if page + 1 < pages => {
                MenuState::ChapterListShown { page: page + 1 }
            }
            ChapterChoice::NextPage => {
                writeln!(self.output, "Already on the last page.")?;
                MenuState::ChapterListShown { page }
            }
            ChapterChoice::PrevPage if page > 0 => MenuState::ChapterListShown { page: page - 1 },
            ChapterChoice::PrevPage => {
                writeln!(self.output, "Already on the first page.")?;
                MenuState::ChapterListShown { page }
            }
            ChapterChoice::Back => MenuState::ResultsShown,
            ChapterChoice::Quit => MenuState::Exit(MenuExit::Quit),
            ChapterChoice::Invalid => {
                writeln!(self.output, "Invalid choice.")?;
                MenuState::ChapterListShown { page }
            }
        };
        Ok(next)
    }

    fn reading(&mut self, page: usize, chapter: usize) -> io::Result<MenuState> {
        let (Some(title), Some(entry)) = (
            self.selected.and_then(|i| self.results.get(i)),
            self.chapters.get(chapter),
        ) else {
            return Ok(MenuState::ChapterListShown { page });
        };
        writeln!(self.output, "Opening chapter: {}", entry.label)?;
        self.output.flush()?;

        let input = &mut self.input;
        let output = &mut self.output;
        let mut wait_for_reader = || -> io::Result<()> {
            write!(output, "Press Enter when you are done reading...")?;
            output.flush()?;
            let mut line = String::new();
            input.read_line(&mut line)?;
            Ok(())
        };
        let result = self.backend.read(title, entry, &mut wait_for_reader);

        match result {
            Ok(ReadSummary::Viewed { pages, skipped }) if skipped.is_empty() => {
                writeln!(self.output, "Finished {} ({} pages).", entry.label, pages)?;
            }
            Ok(ReadSummary::Viewed { pages, skipped }) => {
                let missing: Vec<String> = skipped.iter().map(|p| p.to_string()).collect();
                writeln!(
                    self.output,
                    "Finished {} ({} pages; missing pages: {}).",
                    entry.label,
                    pages,
                    missing.join(", ")
                )?;
            }
            Ok(ReadSummary::OpenedInBrowser { reason }) => writeln!(
                self.output,
                "Could not show {} as a PDF ({}). Opened it in your web browser instead.",
                entry.label, reason
            )?,
            Err(e) => writeln!(self.output, "Could not read {}: {}", entry.label, e)?,
        }
        Ok(MenuState::ChapterListShown { page })
    }

    /// Print `text` and read one line. `None` at end of input.
    fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Ok(None);
        }
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{FetchError, ParseError};
    use std::io::Cursor;

    #[derive(Default)]
    struct FakeBackend {
        results: Vec<SearchResult>,
        chapters: Vec<ChapterEntry>,
        fail_search: bool,
        fail_chapters: bool,
        fail_read: bool,
        read_in_browser: bool,
        searches: Vec<(String, usize)>,
        reads: Vec<String>,
    }

    impl MenuBackend for FakeBackend {
        fn search(&mut self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SiteError> {
            self.searches.push((query.to_string(), limit));
            if self.fail_search {
                return Err(SiteError::Fetch(FetchError::HttpStatus {
                    status: 503,
                    url: "https://toonily.com/search/x".to_string(),
                }));
            }
            Ok(self.results.iter().take(limit).cloned().collect())
        }

        fn chapters(&mut self, _title: &SearchResult) -> Result<Vec<ChapterEntry>, SiteError> {
            if self.fail_chapters {
                return Err(SiteError::Parse(ParseError::MissingContainer {
                    page: "title page",
                    container: "chapter listing",
                }));
            }
            Ok(self.chapters.clone())
        }

        fn read(
            &mut self,
            _title: &SearchResult,
            chapter: &ChapterEntry,
            wait_for_reader: &mut dyn FnMut() -> io::Result<()>,
        ) -> Result<ReadSummary, ReadError> {
            self.reads.push(chapter.label.clone());
            if self.fail_read {
                return Err(ReadError::Assembly(AssemblyError::NoImages));
            }
            if self.read_in_browser {
                return Ok(ReadSummary::OpenedInBrowser {
                    reason: "Chapter has no images.".to_string(),
                });
            }
            wait_for_reader().map_err(|source| ViewerError::Wait { source })?;
            Ok(ReadSummary::Viewed {
                pages: 12,
                skipped: Vec::new(),
            })
        }
    }

    fn result(title: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: format!("https://toonily.com/webtoon/{}/", title),
            rating: Some(4.5),
            latest_chapter: Some("Chapter 9".to_string()),
            cover_url: None,
        }
    }

    fn chapters(n: u32) -> Vec<ChapterEntry> {
        (1..=n)
            .map(|i| ChapterEntry {
                index: i,
                label: format!("Chapter {}", i),
                number: Some(i as f32),
                url: format!("https://toonily.com/webtoon/x/chapter-{}/", i),
                release_date: None,
            })
            .collect()
    }

    fn settings() -> MenuSettings {
        MenuSettings {
            limit: 10,
            page_size: 20,
        }
    }

    fn run(backend: FakeBackend, input: &str) -> (MenuExit, FakeBackend, String) {
        let mut menu = MenuController::new(
            backend,
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
            "solo leveling",
            settings(),
        );
        let exit = menu.run().expect("in-memory I/O");
        let MenuController {
            backend, output, ..
        } = menu;
        (exit, backend, String::from_utf8_lossy(&output).into_owned())
    }

    #[test]
    fn result_choice_parsing() {
        assert_eq!(parse_result_choice(Some("2\n"), 3), ResultChoice::Select(1));
        assert_eq!(parse_result_choice(Some(" 3 "), 3), ResultChoice::Select(2));
        assert_eq!(parse_result_choice(Some("4"), 3), ResultChoice::Invalid);
        assert_eq!(parse_result_choice(Some("abc"), 3), ResultChoice::Invalid);
        assert_eq!(parse_result_choice(Some(""), 3), ResultChoice::Invalid);
        assert_eq!(parse_result_choice(Some("0"), 3), ResultChoice::Quit);
        assert_eq!(parse_result_choice(Some("Q"), 3), ResultChoice::Quit);
        assert_eq!(parse_result_choice(None, 3), ResultChoice::Quit);
    }

    #[test]
    fn chapter_choice_parsing() {
        assert_eq!(parse_chapter_choice(Some("45"), 50), ChapterChoice::Read(44));
        assert_eq!(parse_chapter_choice(Some("51"), 50), ChapterChoice::Invalid);
        assert_eq!(parse_chapter_choice(Some("n"), 50), ChapterChoice::NextPage);
        assert_eq!(parse_chapter_choice(Some("P"), 50), ChapterChoice::PrevPage);
        assert_eq!(parse_chapter_choice(Some("b"), 50), ChapterChoice::Back);
        assert_eq!(parse_chapter_choice(Some("0"), 50), ChapterChoice::Back);
        assert_eq!(parse_chapter_choice(Some("q"), 50), ChapterChoice::Quit);
        assert_eq!(parse_chapter_choice(None, 50), ChapterChoice::Quit);
    }

    #[test]
    fn paging_arithmetic() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(45, 20), 3);
        assert_eq!(page_range(45, 20, 0), 0..20);
        assert_eq!(page_range(45, 20, 2), 40..45);
        assert_eq!(page_range(45, 20, 5), 45..45);
        assert_eq!(page_range(5, 0, 0), 0..1);
    }

    #[test]
    fn pages_cover_every_chapter_once_in_order() {
        let total = 47;
        let shown: Vec<usize> = (0..page_count(total, 20))
            .flat_map(|p| page_range(total, 20, p))
            .collect();
        assert_eq!(shown, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn empty_search_exits_with_no_results() {
        let (exit, backend, out) = run(FakeBackend::default(), "");
        assert!(matches!(exit, MenuExit::NoResults));
        assert_eq!(backend.searches, vec![("solo leveling".to_string(), 10)]);
        assert!(!out.contains("Select a manhwa"));
    }

    #[test]
    fn search_failure_exits_with_error() {
        let backend = FakeBackend {
            fail_search: true,
            ..Default::default()
        };
        let (exit, _, out) = run(backend, "");
        assert!(matches!(exit, MenuExit::Failed(SiteError::Fetch(_))));
        assert!(!out.contains("Select a manhwa"));
    }

    #[test]
    fn invalid_result_choice_reprompts_then_quit() {
        let backend = FakeBackend {
            results: vec![result("a"), result("b")],
            ..Default::default()
        };
        let (exit, _, out) = run(backend, "7\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert!(out.contains("Invalid choice."));
        assert_eq!(out.matches("Select a manhwa").count(), 2);
        assert!(out.contains("[4.5]"));
    }

    #[test]
    fn end_of_input_quits() {
        let backend = FakeBackend {
            results: vec![result("a")],
            ..Default::default()
        };
        let (exit, _, _) = run(backend, "");
        assert!(matches!(exit, MenuExit::Quit));
    }

    #[test]
    fn chapter_list_error_stays_on_results() {
        let backend = FakeBackend {
            results: vec![result("a")],
            fail_chapters: true,
            ..Default::default()
        };
        let (exit, _, out) = run(backend, "1\n0\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert!(out.contains("Could not load chapters"));
        assert_eq!(out.matches("Select a manhwa").count(), 2);
    }

    #[test]
    fn empty_chapter_list_stays_on_results() {
        let backend = FakeBackend {
            results: vec![result("a")],
            ..Default::default()
        };
        let (exit, _, out) = run(backend, "1\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert!(out.contains("No chapters found"));
    }

    #[test]
    fn paging_next_and_previous_with_bounds() {
        let backend = FakeBackend {
            results: vec![result("a")],
            chapters: chapters(45),
            ..Default::default()
        };
        // p at first page, n twice to the last page, n again, p back, quit.
        let (exit, _, out) = run(backend, "1\np\nn\nn\nn\np\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert!(out.contains("Already on the first page."));
        assert!(out.contains("Already on the last page."));
        let pages: Vec<&str> = out
            .lines()
            .filter_map(|l| l.split(" - page ").nth(1))
            .map(|rest| rest.split(' ').next().unwrap_or_default())
            .collect();
        assert_eq!(pages, ["1/3", "1/3", "2/3", "3/3", "3/3", "2/3"]);
    }

    #[test]
    fn chapter_page_lists_entries_in_stored_order() {
        let backend = FakeBackend {
            results: vec![result("a")],
            chapters: chapters(25),
            ..Default::default()
        };
        let (_, _, out) = run(backend, "1\nq\n");
        let first = out.find("    1. Chapter 1\n").unwrap_or(usize::MAX);
        let twentieth = out.find("   20. Chapter 20\n").unwrap_or(0);
        assert!(first < twentieth);
        assert!(!out.contains("Chapter 21\n"));
    }

    #[test]
    fn reading_returns_to_same_page() {
        let backend = FakeBackend {
            results: vec![result("a")],
            chapters: chapters(45),
            ..Default::default()
        };
        // Go to page 2, read chapter 30, press Enter in the viewer wait, then quit.
        let (exit, backend, out) = run(backend, "1\nn\n30\n\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert_eq!(backend.reads, vec!["Chapter 30".to_string()]);
        assert!(out.contains("Opening chapter: Chapter 30"));
        assert!(out.contains("Finished Chapter 30 (12 pages)."));
        assert_eq!(out.matches(" - page 2/3").count(), 2);
    }

    #[test]
    fn read_error_is_reported_and_menu_continues() {
        let backend = FakeBackend {
            results: vec![result("a")],
            chapters: chapters(3),
            fail_read: true,
            ..Default::default()
        };
        let (exit, backend, out) = run(backend, "1\n2\nb\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert_eq!(backend.reads.len(), 1);
        assert!(out.contains("Could not read Chapter 2: Chapter has no images."));
        assert_eq!(out.matches("Select a manhwa").count(), 2);
    }

    #[test]
    fn browser_fallback_is_reported_and_menu_continues() {
        let backend = FakeBackend {
            results: vec![result("a")],
            chapters: chapters(3),
            read_in_browser: true,
            ..Default::default()
        };
        let (exit, backend, out) = run(backend, "1\n3\nq\n");
        assert!(matches!(exit, MenuExit::Quit));
        assert_eq!(backend.reads, vec!["Chapter 3".to_string()]);
        assert!(out.contains(
            "Could not show Chapter 3 as a PDF (Chapter has no images.). Opened it in your web browser instead."
        ));
        assert!(!out.contains("Finished"));
    }
}
