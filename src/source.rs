//! Script Sources
//!
//! Opens the character stream a batch reads its statements from:
//! - `http://` and `https://` URLs are fetched with a blocking client
//! - `file:` URLs and plain paths are read from the filesystem

use crate::error::{RunResult, RunnerError};
use std::fs::File;
use std::io::{self, BufRead, BufReader};

/// Open `location` for reading.
pub fn open_reader(location: &str) -> RunResult<Box<dyn BufRead + Send>> {
    let opened = if is_url(location) {
        fetch(location)
    } else {
        let path = location.strip_prefix("file://").or_else(|| location.strip_prefix("file:"));
        File::open(path.unwrap_or(location))
            .map(|file| Box::new(BufReader::new(file)) as Box<dyn BufRead + Send>)
    };
    opened.map_err(|source| RunnerError::Source {
        location: location.to_string(),
        source,
    })
}

fn is_url(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn fetch(url: &str) -> io::Result<Box<dyn BufRead + Send>> {
    let response = reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(io::Error::other)?;
    Ok(Box::new(BufReader::new(response)))
}
