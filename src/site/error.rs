//! Error types for talking to the site: transport failures and markup that no longer matches.

use thiserror::Error;

/// Network or HTTP failure. Always carries the URL that was requested.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// HTTP status if the server answered, `None` for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The page was fetched but its structure is not what the parser expects.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Could not parse {page}: {container} not found (the site layout may have changed).")]
    MissingContainer {
        page: &'static str,
        container: &'static str,
    },

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Any failure of a site operation (search, chapter list, chapter images, image download).
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },
}
