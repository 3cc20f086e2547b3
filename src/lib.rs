pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod listing;
pub mod record;
pub mod search;

use thiserror::Error;

/// Custom error types for better error handling
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Disallowed by robots.txt: {0}")]
    RobotsDisallowed(String),
    #[error("Giving up on {url} after {attempts} attempt(s)")]
    RetriesExhausted { url: String, attempts: u32 },
    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
