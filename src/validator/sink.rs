//! Append-only store of accepted candidates

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Output file holding one accepted candidate per line
pub struct ResultSink {
    path: PathBuf,
    file: File,
    written: usize,
}

impl ResultSink {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Append one candidate and flush it to disk
    pub async fn append(&mut self, line: &str) -> Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        self.file.write_all(record.as_bytes()).await?;
        self.file.flush().await?;
        self.written += 1;
        Ok(())
    }

    /// Lines appended through this handle
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
