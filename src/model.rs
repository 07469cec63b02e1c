//! Records produced by the page parser and consumed by the menu and assembler.
//!
//! Nothing here outlives one invocation; `SearchResult` is serializable so `--json` can print it.

use serde::{Deserialize, Serialize};

/// One title in a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Detail page of the title; chapter lists are fetched from here.
    pub url: String,
    /// Average rating as shown on the site (usually 0-5). `None` when absent or unparsable.
    pub rating: Option<f32>,
    #[serde(rename = "latestChapter")]
    pub latest_chapter: Option<String>,
    #[serde(rename = "coverUrl", skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl SearchResult {
    /// Rating formatted for display, "N/A" when missing.
    pub fn rating_label(&self) -> String {
        match self.rating {
            Some(r) => format!("{:.1}", r),
            None => "N/A".to_string(),
        }
    }
}

/// One chapter of a title, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterEntry {
    /// 1-based position in reading order (chapter list is reversed from the site's newest-first order).
    pub index: u32,
    /// Link text as published, e.g. "Chapter 12".
    pub label: String,
    /// Number parsed from `label`, if any (e.g. 12.5 for "Chapter 12.5").
    pub number: Option<f32>,
    pub url: String,
    pub release_date: Option<String>,
}

/// One page image of a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// 1-based page position within the chapter.
    pub position: u32,
    pub url: String,
}
