use std::fmt;
use std::path::Path;

use crate::error::Result;

/// One proxy configuration line awaiting validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Zero-based position among the non-blank input lines
    pub index: usize,
    line: String,
}

impl Candidate {
    pub fn new(index: usize, line: impl Into<String>) -> Self {
        Self {
            index,
            line: line.into(),
        }
    }

    /// The raw configuration text
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Split input text into candidates, one per non-blank line
    pub fn parse_lines(text: &str) -> Vec<Candidate> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(index, line)| Candidate::new(index, line))
            .collect()
    }

    /// Read every candidate from a file
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected;
    /// candidates are opaque to the pipeline.
    pub async fn load(path: &Path) -> Result<Vec<Candidate>> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::parse_lines(&String::from_utf8_lossy(&bytes)))
    }

    /// Short, log-friendly prefix of the candidate
    pub fn preview(&self) -> &str {
        const MAX: usize = 48;
        match self.line.char_indices().nth(MAX) {
            Some((end, _)) => &self.line[..end],
            None => &self.line,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.preview())
    }
}
