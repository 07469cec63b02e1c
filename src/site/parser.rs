//! Page parser for toonily.com (Madara WordPress theme). Pure functions from HTML to records.
//!
//! Every site-specific selector lives in this file. When the site changes its markup, this is the
//! only place to edit. Child elements that are missing yield empty results; a missing top-level
//! container (search listing, chapter listing, reader content) is a [ParseError].

use crate::model::{ChapterEntry, ImageRef, SearchResult};
use crate::site::error::ParseError;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

const SEARCH_CONTAINER: &str =
    ".page-listing-item, .c-tabs-item, .search-wrap, .tab-content-wrap, .c-page-content";
const SEARCH_ITEM: &str = ".page-item-detail.manga, .c-tabs-item__content";
const SEARCH_TITLE_LINK: &str = ".post-title h3 a, .post-title h4 a, .post-title a";
const SEARCH_RATING: &str = "#averagerate, .score";
const SEARCH_LATEST_CHAPTER: &str =
    ".latest-chap .chapter a, .list-chapter .chapter-item .chapter a, .chapter-item .chapter a";
const SEARCH_COVER: &str = "img";

const CHAPTER_CONTAINER: &str = ".listing-chapters_wrap, .page-content-listing, .version-chap, #manga-chapters-holder";
/// Tried in order; the first selector that matches anything wins.
const CHAPTER_ITEMS: [&str; 4] = [
    "li.wp-manga-chapter",
    ".version-chap li",
    ".chapter-item",
    ".chapters li",
];
const CHAPTER_LINK: &str = "a[href]";
const CHAPTER_DATE: &str = ".chapter-release-date, .date, .chapterdate";
const CHAPTER_DATE_TITLE: &str = "a[title]";
const AJAX_CHAPTER_HOLDER: &str = "#manga-chapters-holder";

const READER_CONTAINER: &str = "#reader-content, .reading-content";
const READER_IMAGE: &str = "img";
/// Tried in order on chapter pages that have reader content.
const READER_MODE_LINKS: [&str; 2] = ["a.reading-mode", "a[href*=\"reader\"]"];
/// Lazy-loading attributes first; `src` is often a placeholder.
const IMAGE_SOURCE_ATTRS: [&str; 3] = ["data-src", "data-lazy-src", "src"];

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector, ParseError> {
    Selector::parse(sel).map_err(|e| ParseError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// Element text with whitespace runs collapsed to single spaces. Adjacent text nodes are joined
/// as-is, so inline markup inside a word does not split it.
fn clean_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn image_source(el: ElementRef<'_>) -> Option<String> {
    IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|s| !s.is_empty() && !s.starts_with("data:"))
        .map(String::from)
}

/// Parse a full search results page.
///
/// Returns `MissingContainer` only when the page has neither a result listing nor any result items;
/// a listing with no items is a valid empty result.
pub fn parse_search_page(html: &str) -> Result<Vec<SearchResult>, ParseError> {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector(SEARCH_CONTAINER)?;
    let has_container = doc.select(&container_sel).next().is_some();
    let results = collect_search_results(doc.root_element())?;
    if results.is_empty() && !has_container {
        return Err(ParseError::MissingContainer {
            page: "search results page",
            container: "result listing",
        });
    }
    Ok(results)
}

/// Parse the HTML fragment returned by the AJAX search endpoint. A fragment has no page container,
/// so this never reports structure errors; it returns whatever items it finds.
pub fn parse_search_fragment(html: &str) -> Vec<SearchResult> {
    let fragment = Html::parse_fragment(html);
    collect_search_results(fragment.root_element()).unwrap_or_default()
}

fn collect_search_results(root: ElementRef<'_>) -> Result<Vec<SearchResult>, ParseError> {
    let item_sel = parse_selector(SEARCH_ITEM)?;
    let title_sel = parse_selector(SEARCH_TITLE_LINK)?;
    let rating_sel = parse_selector(SEARCH_RATING)?;
    let latest_sel = parse_selector(SEARCH_LATEST_CHAPTER)?;
    let cover_sel = parse_selector(SEARCH_COVER)?;

    let mut results: Vec<SearchResult> = Vec::new();
    for item in root.select(&item_sel) {
        let Some(link) = item.select(&title_sel).next() else {
            continue;
        };
        let title = clean_text(link);
        let url = link.value().attr("href").unwrap_or_default().trim().to_string();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        let rating = item
            .select(&rating_sel)
            .next()
            .and_then(|e| clean_text(e).parse::<f32>().ok());
        let latest_chapter = item
            .select(&latest_sel)
            .next()
            .map(clean_text)
            .filter(|s| !s.is_empty());
        let cover_url = item.select(&cover_sel).next().and_then(image_source);
        results.push(SearchResult {
            title,
            url,
            rating,
            latest_chapter,
            cover_url,
        });
    }
    Ok(results)
}

/// Parse the chapter list from a title's detail page, in reading order (first chapter first).
///
/// The site lists newest first; entries are reversed once here and given 1-based indices.
/// A detail page whose listing container is present but empty yields `Ok(vec![])` (chapters may be
/// loaded over AJAX, see [has_ajax_chapter_holder]).
pub fn parse_chapter_list(html: &str) -> Result<Vec<ChapterEntry>, ParseError> {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector(CHAPTER_CONTAINER)?;
    if doc.select(&container_sel).next().is_none() {
        return Err(ParseError::MissingContainer {
            page: "title page",
            container: "chapter listing",
        });
    }
    collect_chapters(doc.root_element())
}

/// Parse the chapter list fragment returned by the AJAX chapters endpoint.
pub fn parse_chapter_fragment(html: &str) -> Vec<ChapterEntry> {
    let fragment = Html::parse_fragment(html);
    collect_chapters(fragment.root_element()).unwrap_or_default()
}

/// True when the title page defers its chapter list to the AJAX endpoint.
pub fn has_ajax_chapter_holder(html: &str) -> bool {
    let doc = Html::parse_document(html);
    match parse_selector(AJAX_CHAPTER_HOLDER) {
        Ok(sel) => doc.select(&sel).next().is_some(),
        Err(_) => false,
    }
}

fn collect_chapters(root: ElementRef<'_>) -> Result<Vec<ChapterEntry>, ParseError> {
    let link_sel = parse_selector(CHAPTER_LINK)?;
    let date_sel = parse_selector(CHAPTER_DATE)?;
    let date_title_sel = parse_selector(CHAPTER_DATE_TITLE)?;

    let mut items: Vec<ElementRef<'_>> = Vec::new();
    for candidate in CHAPTER_ITEMS {
        let sel = parse_selector(candidate)?;
        items = root.select(&sel).collect();
        if !items.is_empty() {
            break;
        }
    }

    let mut newest_first: Vec<(String, String, Option<String>)> = Vec::with_capacity(items.len());
    for item in items {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let url = link.value().attr("href").unwrap_or_default().trim().to_string();
        if url.is_empty() {
            continue;
        }
        let label = clean_text(link);
        // Recent chapters show "N hours ago" as a link title instead of a date text.
        let release_date = item.select(&date_sel).next().and_then(|d| {
            let text = clean_text(d);
            if !text.is_empty() {
                return Some(text);
            }
            d.select(&date_title_sel)
                .next()
                .and_then(|a| a.value().attr("title"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        });
        newest_first.push((label, url, release_date));
    }

    let chapters = newest_first
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, (label, url, release_date))| {
            let label = if label.is_empty() {
                format!("Chapter {}", i + 1)
            } else {
                label
            };
            ChapterEntry {
                index: i as u32 + 1,
                number: parse_chapter_number(&label),
                label,
                url,
                release_date,
            }
        })
        .collect();
    Ok(chapters)
}

/// Extract page images from a chapter page, in document order.
///
/// Relative image URLs are resolved against `page_url`.
pub fn parse_chapter_images(html: &str, page_url: &str) -> Result<Vec<ImageRef>, ParseError> {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector(READER_CONTAINER)?;
    let img_sel = parse_selector(READER_IMAGE)?;
    let container = doc
        .select(&container_sel)
        .next()
        .ok_or(ParseError::MissingContainer {
            page: "chapter page",
            container: "reader content",
        })?;
    let base = Url::parse(page_url).ok();

    let images = container
        .select(&img_sel)
        .filter_map(image_source)
        .map(|src| match &base {
            Some(b) => b.join(&src).map(|u| u.to_string()).unwrap_or(src),
            None => src,
        })
        .enumerate()
        .map(|(i, url)| ImageRef {
            position: i as u32 + 1,
            url,
        })
        .collect();
    Ok(images)
}

/// Link to the chapter's dedicated reading-mode page, resolved against `page_url`.
///
/// Only chapter pages with reader content are considered. `None` when there is no such link or it
/// has no href.
pub fn parse_reader_link(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let container_sel = parse_selector(READER_CONTAINER).ok()?;
    doc.select(&container_sel).next()?;
    let link = READER_MODE_LINKS
        .iter()
        .filter_map(|s| parse_selector(s).ok())
        .find_map(|sel| doc.select(&sel).next())?;
    let href = link.value().attr("href").map(str::trim).filter(|h| !h.is_empty())?;
    match Url::parse(page_url) {
        Ok(base) => base.join(href).map(|u| u.to_string()).ok(),
        Err(_) => Some(href.to_string()),
    }
}

/// Chapter number from a label: the number after the last "chapter" keyword, else the first number.
pub fn parse_chapter_number(label: &str) -> Option<f32> {
    let lower = label.to_ascii_lowercase();
    let after_keyword = lower
        .rfind("chapter")
        .map(|i| &lower[i + "chapter".len()..]);
    after_keyword
        .and_then(leading_number)
        .or_else(|| leading_number(&lower))
}

fn leading_number(s: &str) -> Option<f32> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let rest = &s[start..];
    let mut end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if let Some(frac) = rest[end..].strip_prefix('.') {
        let frac_len = frac
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frac.len());
        if frac_len > 0 {
            end += 1 + frac_len;
        }
    }
    rest[..end].parse().ok()
}
