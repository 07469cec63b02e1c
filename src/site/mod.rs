//! Site client for toonily.com: search, chapter lists, chapter images and image bytes.

mod client;
mod error;
#[cfg(test)]
mod test_server;

pub mod parser;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::{FetchError, ParseError, SiteError};

use crate::model::{ChapterEntry, ImageRef, SearchResult};
use reqwest::Url;
use tracing::{debug, info};

pub const BASE_URL: &str = "https://toonily.com";
const AJAX_PATH: &str = "wp-admin/admin-ajax.php";

/// Source of raw image bytes. Implemented by [SiteClient]; tests substitute an in-memory fetcher.
pub trait ImageFetcher {
    /// Download one image. `referer` is the chapter page the image belongs to.
    fn fetch_image(&mut self, url: &str, referer: &str) -> Result<Vec<u8>, FetchError>;
}

/// Client for the one supported site. Created once at startup and passed to whoever needs it.
#[derive(Debug)]
pub struct SiteClient {
    http: PoliteClient,
    base: Url,
}

impl SiteClient {
    pub fn new(http: PoliteClient) -> Result<Self, SiteError> {
        Self::with_base_url(http, BASE_URL)
    }

    /// Point the client at a different host running the same theme (mirrors, local fixtures).
    pub fn with_base_url(http: PoliteClient, base: &str) -> Result<Self, SiteError> {
        let base = Url::parse(base).map_err(|e| SiteError::InvalidUrl {
            input: base.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { http, base })
    }

    /// Search titles, trying the search page, the `?s=` listing, then the AJAX endpoint until one
    /// yields results. Results are de-duplicated by title and truncated to `limit`.
    ///
    /// A method that fails (HTTP error, challenge page without a listing) moves on to the next one.
    /// The first failure is returned only when no method succeeded; if at least one answered with
    /// an empty listing the search is simply empty.
    pub fn search(&mut self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SiteError> {
        let mut first_error: Option<SiteError> = None;
        let mut answered = false;
        for method in SearchMethod::ALL {
            match self.search_with(method, query) {
                Ok(results) if !results.is_empty() => return Ok(finalize_results(results, limit)),
                Ok(_) => {
                    debug!("no results from {:?} search", method);
                    answered = true;
                }
                Err(e) => {
                    debug!("{:?} search failed: {}", method, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !answered => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    fn search_with(
        &mut self,
        method: SearchMethod,
        query: &str,
    ) -> Result<Vec<SearchResult>, SiteError> {
        match method {
            SearchMethod::SearchPage => {
                let url = search_page_url(&self.base, query);
                info!("searching {}", url);
                let html = self.get_text(url.as_str())?;
                Ok(parser::parse_search_page(&html)?)
            }
            SearchMethod::Listing => {
                let url = alternate_search_url(&self.base, query);
                debug!("trying {}", url);
                let html = self.get_text(url.as_str())?;
                Ok(parser::parse_search_page(&html)?)
            }
            SearchMethod::Ajax => {
                let url = self.join(AJAX_PATH)?;
                debug!("trying {}", url);
                let form = ajax_search_form(query);
                let form_refs: Vec<(&str, &str)> =
                    form.iter().map(|(k, v)| (*k, v.as_str())).collect();
                let html = self.post_text(url.as_str(), &form_refs)?;
                Ok(parser::parse_search_fragment(&html))
            }
        }
    }

    /// Fetch a title's chapter list in reading order.
    pub fn fetch_chapter_list(&mut self, title_url: &str) -> Result<Vec<ChapterEntry>, SiteError> {
        info!("fetching chapter list {}", title_url);
        let html = self.get_text(title_url)?;
        let chapters = parser::parse_chapter_list(&html)?;
        if !chapters.is_empty() || !parser::has_ajax_chapter_holder(&html) {
            return Ok(chapters);
        }
        let ajax_url = ajax_chapters_url(title_url)?;
        debug!("chapter list is loaded over AJAX, posting {}", ajax_url);
        let fragment = self.post_text(ajax_url.as_str(), &[])?;
        Ok(parser::parse_chapter_fragment(&fragment))
    }

    /// Fetch the ordered image list of a chapter page.
    ///
    /// When the page links to a separate reading-mode page, images are taken from there; if that
    /// page fails or has no images, the chapter page's own images are used.
    pub fn fetch_chapter_images(&mut self, chapter_url: &str) -> Result<Vec<ImageRef>, SiteError> {
        info!("fetching chapter page {}", chapter_url);
        let html = self.get_text(chapter_url)?;
        let reader_url =
            parser::parse_reader_link(&html, chapter_url).filter(|u| u.as_str() != chapter_url);
        if let Some(reader_url) = reader_url {
            debug!("chapter has a reading-mode page {}", reader_url);
            match self.reader_images(&reader_url) {
                Ok(images) if !images.is_empty() => return Ok(images),
                Ok(_) => debug!("reading-mode page has no images, using chapter page"),
                Err(e) => debug!("reading-mode page failed, using chapter page: {}", e),
            }
        }
        Ok(parser::parse_chapter_images(&html, chapter_url)?)
    }

    fn reader_images(&mut self, reader_url: &str) -> Result<Vec<ImageRef>, SiteError> {
        let html = self.get_text(reader_url)?;
        Ok(parser::parse_chapter_images(&html, reader_url)?)
    }

    fn join(&self, path: &str) -> Result<Url, SiteError> {
        self.base.join(path).map_err(|e| SiteError::InvalidUrl {
            input: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .get_with_retry(url, None)
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        read_text(response, url)
    }

    fn post_text(&mut self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError> {
        let response = self
            .http
            .post_form(url, form)
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        read_text(response, url)
    }
}

impl ImageFetcher for SiteClient {
    fn fetch_image(&mut self, url: &str, referer: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get_with_retry(url, Some(referer))
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let response = check_status(response, url)?;
        let bytes = response.bytes().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Search strategies in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMethod {
    SearchPage,
    Listing,
    Ajax,
}

impl SearchMethod {
    const ALL: [SearchMethod; 3] = [Self::SearchPage, Self::Listing, Self::Ajax];
}

fn check_status(
    response: reqwest::blocking::Response,
    url: &str,
) -> Result<reqwest::blocking::Response, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

fn read_text(response: reqwest::blocking::Response, url: &str) -> Result<String, FetchError> {
    check_status(response, url)?
        .text()
        .map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })
}

/// `{base}/search/{words joined by '+'}`; other characters are percent-encoded.
fn search_page_url(base: &Url, query: &str) -> Url {
    let words = query.split_whitespace().collect::<Vec<_>>().join("+");
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("search").push(&words);
    }
    url
}

/// `{base}/?s={query}&post_type=wp-manga`
fn alternate_search_url(base: &Url, query: &str) -> Url {
    let mut url = base.clone();
    url.set_path("/");
    url.query_pairs_mut()
        .clear()
        .append_pair("s", query.trim())
        .append_pair("post_type", "wp-manga");
    url
}

/// Form for the theme's `madara_load_more` search action.
fn ajax_search_form(query: &str) -> Vec<(&'static str, String)> {
    vec![
        ("action", "madara_load_more".to_string()),
        ("page", "0".to_string()),
        (
            "template",
            "madara-core/content/content-search".to_string(),
        ),
        ("vars[s]", query.trim().to_string()),
        ("vars[orderby]", "relevance".to_string()),
        ("vars[paged]", "1".to_string()),
        ("vars[template]", "search".to_string()),
        ("vars[post_type]", "wp-manga".to_string()),
        ("vars[post_status]", "publish".to_string()),
    ]
}

/// `{title_url}/ajax/chapters/`
fn ajax_chapters_url(title_url: &str) -> Result<Url, SiteError> {
    let with_slash = if title_url.ends_with('/') {
        title_url.to_string()
    } else {
        format!("{}/", title_url)
    };
    Url::parse(&with_slash)
        .and_then(|u| u.join("ajax/chapters/"))
        .map_err(|e| SiteError::InvalidUrl {
            input: title_url.to_string(),
            reason: e.to_string(),
        })
}

/// Drop repeated titles (first occurrence wins) and cap at `limit`.
fn finalize_results(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut unique: Vec<SearchResult> = Vec::with_capacity(results.len().min(limit));
    for r in results {
        if unique.len() >= limit {
            break;
        }
        if !unique.iter().any(|u| u.title == r.title) {
            unique.push(r);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::test_server::{Reply, TestServer};
    use super::*;
    use std::error::Error;

    const LISTING: &str = r#"<html><body><div class="c-tabs-item"><div class="c-tabs-item__content">
<div class="post-title"><h3><a href="https://toonily.com/webtoon/solo-leveling/">Solo Leveling</a></h3></div>
</div></div></body></html>"#;
    const EMPTY_LISTING: &str = r#"<html><body><div class="c-tabs-item"></div></body></html>"#;
    const CHALLENGE: &str = "<html><head><title>Just a moment...</title></head><body></body></html>";

    fn site(server: &TestServer) -> Result<SiteClient, Box<dyn Error>> {
        let http = PoliteClient::builder()
            .delay_ms(0)
            .retry_backoff_secs(vec![0])
            .build()?;
        Ok(SiteClient::with_base_url(http, &server.base)?)
    }

    fn base() -> Url {
        Url::parse(BASE_URL).unwrap()
    }

    fn result(title: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: format!("https://toonily.com/webtoon/{}/", title.to_lowercase()),
            rating: None,
            latest_chapter: None,
            cover_url: None,
        }
    }

    #[test]
    fn search_page_url_joins_words_with_plus() {
        let url = search_page_url(&base(), "  solo   leveling ");
        assert_eq!(url.as_str(), "https://toonily.com/search/solo+leveling");
    }

    #[test]
    fn search_page_url_encodes_reserved_characters() {
        let url = search_page_url(&base(), "a/b?");
        assert_eq!(url.as_str(), "https://toonily.com/search/a%2Fb%3F");
    }

    #[test]
    fn alternate_search_url_uses_query_string() {
        let url = alternate_search_url(&base(), "solo leveling");
        assert_eq!(
            url.as_str(),
            "https://toonily.com/?s=solo+leveling&post_type=wp-manga"
        );
    }

    #[test]
    fn ajax_search_form_carries_query() {
        let form = ajax_search_form(" martial peak ");
        assert!(form.contains(&("action", "madara_load_more".to_string())));
        assert!(form.contains(&("vars[s]", "martial peak".to_string())));
    }

    #[test]
    fn ajax_chapters_url_appends_path_with_or_without_slash() -> Result<(), SiteError> {
        assert_eq!(
            ajax_chapters_url("https://toonily.com/webtoon/x/")?.as_str(),
            "https://toonily.com/webtoon/x/ajax/chapters/"
        );
        assert_eq!(
            ajax_chapters_url("https://toonily.com/webtoon/x")?.as_str(),
            "https://toonily.com/webtoon/x/ajax/chapters/"
        );
        assert!(ajax_chapters_url("not a url").is_err());
        Ok(())
    }

    #[test]
    fn finalize_results_dedupes_and_respects_limit() {
        let results = vec![result("A"), result("B"), result("A"), result("C"), result("D")];
        let out = finalize_results(results.clone(), 3);
        let titles: Vec<&str> = out.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "C"]);
        for limit in 0..6 {
            assert!(finalize_results(results.clone(), limit).len() <= limit);
        }
    }

    #[test]
    fn invalid_base_url_is_rejected() -> Result<(), reqwest::Error> {
        let http = PoliteClient::new()?;
        assert!(matches!(
            SiteClient::with_base_url(http, "not a url"),
            Err(SiteError::InvalidUrl { .. })
        ));
        Ok(())
    }

    #[test]
    fn search_moves_on_after_http_error() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| {
            if req.target.starts_with("/search/") {
                Reply::html(404, "<html>Not Found</html>")
            } else if req.target.starts_with("/?s=") {
                Reply::html(200, LISTING)
            } else {
                Reply::html(500, "")
            }
        })?;
        let results = site(&server)?.search("solo leveling", 10)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Solo Leveling");
        let targets: Vec<String> = server.requests().into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            ["/search/solo+leveling", "/?s=solo+leveling&post_type=wp-manga"]
        );
        Ok(())
    }

    #[test]
    fn search_moves_on_after_challenge_page() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| {
            if req.target.starts_with("/search/") {
                Reply::html(200, CHALLENGE)
            } else {
                Reply::html(200, LISTING)
            }
        })?;
        let results = site(&server)?.search("solo", 10)?;
        assert_eq!(results.len(), 1);
        assert_eq!(server.requests().len(), 2);
        Ok(())
    }

    #[test]
    fn search_posts_ajax_form_when_listings_are_empty() -> Result<(), Box<dyn Error>> {
        let fragment = r#"<div class="c-tabs-item__content"><div class="post-title"><h4><a href="https://toonily.com/webtoon/b/">B Title</a></h4></div></div>"#;
        let server = TestServer::start(move |req, _| {
            if req.method == "POST" {
                Reply::html(200, fragment)
            } else {
                Reply::html(200, EMPTY_LISTING)
            }
        })?;
        let results = site(&server)?.search("b title", 10)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "B Title");
        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].method, "POST");
        assert_eq!(requests[2].target, "/wp-admin/admin-ajax.php");
        assert!(requests[2].body.contains("action=madara_load_more"));
        Ok(())
    }

    #[test]
    fn search_returns_first_error_when_every_method_fails() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| {
            if req.target.starts_with("/search/") {
                Reply::html(404, "")
            } else if req.method == "POST" {
                Reply::html(403, "")
            } else {
                Reply::html(200, CHALLENGE)
            }
        })?;
        let err = site(&server)?
            .search("solo", 10)
            .expect_err("every method failed");
        assert!(matches!(
            err,
            SiteError::Fetch(FetchError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(server.requests().len(), 3);
        Ok(())
    }

    #[test]
    fn search_is_empty_when_a_method_answers_without_results() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| {
            if req.target.starts_with("/search/") {
                Reply::html(404, "")
            } else if req.method == "POST" {
                Reply::html(200, "")
            } else {
                Reply::html(200, EMPTY_LISTING)
            }
        })?;
        assert!(site(&server)?.search("nothing", 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn chapter_list_falls_back_to_ajax_post_for_holder_pages() -> Result<(), Box<dyn Error>> {
        let fragment = r#"<ul class="main version-chap">
<li class="wp-manga-chapter"><a href="https://toonily.com/webtoon/x/chapter-2/">Chapter 2</a></li>
<li class="wp-manga-chapter"><a href="https://toonily.com/webtoon/x/chapter-1/">Chapter 1</a></li>
</ul>"#;
        let server = TestServer::start(move |req, _| match (req.method.as_str(), req.target.as_str()) {
            ("GET", "/webtoon/x/") => Reply::html(
                200,
                r#"<html><body><div id="manga-chapters-holder" data-id="7"></div></body></html>"#,
            ),
            ("POST", "/webtoon/x/ajax/chapters/") => Reply::html(200, fragment),
            _ => Reply::html(404, ""),
        })?;
        let title_url = format!("{}/webtoon/x/", server.base);
        let chapters = site(&server)?.fetch_chapter_list(&title_url)?;
        let labels: Vec<&str> = chapters.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["Chapter 1", "Chapter 2"]);
        assert_eq!(server.requests().len(), 2);
        Ok(())
    }

    #[test]
    fn chapter_images_come_from_reading_mode_page_when_linked() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| match req.target.as_str() {
            "/webtoon/x/chapter-1/" => Reply::html(
                200,
                r#"<html><body><a class="reading-mode" href="/reader/x/1/">Reading mode</a>
<div class="reading-content"><img src="/thumb.jpg"></div></body></html>"#,
            ),
            "/reader/x/1/" => Reply::html(
                200,
                r#"<html><body><div id="reader-content"><img src="01.jpg"><img src="02.jpg"></div></body></html>"#,
            ),
            _ => Reply::html(404, ""),
        })?;
        let chapter_url = format!("{}/webtoon/x/chapter-1/", server.base);
        let images = site(&server)?.fetch_chapter_images(&chapter_url)?;
        let urls: Vec<String> = images.into_iter().map(|i| i.url).collect();
        assert_eq!(
            urls,
            [
                format!("{}/reader/x/1/01.jpg", server.base),
                format!("{}/reader/x/1/02.jpg", server.base),
            ]
        );
        Ok(())
    }

    #[test]
    fn chapter_images_fall_back_to_chapter_page_when_reader_fails() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| match req.target.as_str() {
            "/webtoon/x/chapter-1/" => Reply::html(
                200,
                r#"<html><body><a class="reading-mode" href="/reader/x/1/">Reading mode</a>
<div class="reading-content"><img src="01.jpg"></div></body></html>"#,
            ),
            _ => Reply::html(404, ""),
        })?;
        let chapter_url = format!("{}/webtoon/x/chapter-1/", server.base);
        let images = site(&server)?.fetch_chapter_images(&chapter_url)?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, format!("{}01.jpg", chapter_url));
        Ok(())
    }

    #[test]
    fn image_requests_carry_chapter_referer() -> Result<(), Box<dyn Error>> {
        let server = TestServer::start(|req, _| match req.target.as_str() {
            "/img/01.png" => Reply {
                status: 200,
                body: vec![0x89, b'P', b'N', b'G'],
            },
            _ => Reply::html(403, "hotlinking denied"),
        })?;
        let referer = "https://toonily.com/webtoon/x/chapter-1/";
        let mut client = site(&server)?;

        let bytes = client.fetch_image(&format!("{}/img/01.png", server.base), referer)?;
        assert_eq!(bytes, [0x89, b'P', b'N', b'G']);
        let denied = client.fetch_image(&format!("{}/img/02.png", server.base), referer);
        assert!(matches!(denied, Err(FetchError::HttpStatus { status: 403, .. })));

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.header("referer") == Some(referer)));
        Ok(())
    }
}
