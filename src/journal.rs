//! append-only csv log of every reading.
//!
//! the local journal is the durable record when the remote store is down.
//! rows are `timestamp,moisture,temperature`; the file is never rewritten.

use crate::domain::Reading;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub const HEADER: &str = "timestamp,moisture,temperature";

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// open the journal, writing the header row if the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(format!("{}\n", HEADER).as_bytes()).await?;
                file.flush().await?;
                tracing::info!("created csv file: {}", path.display());
            }
            // existing journal: header already there, never touch it
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create journal {}", path.display()));
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, reading: &Reading) -> Result<()> {
        let line = format!(
            "{},{:.1},{:.1}\n",
            reading.captured_at.to_rfc3339(),
            reading.moisture,
            reading.temperature
        );

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_header_once_and_appends_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sensor_data.csv");

        let journal = Journal::open(&path).await.unwrap();
        let at = Utc.with_ymd_and_hms(2025, 4, 2, 8, 30, 0).unwrap();
        journal.append(&codec::decode(412, 187, at)).await.unwrap();

        // reopening must not duplicate the header
        let journal = Journal::open(&path).await.unwrap();
        journal.append(&codec::decode(400, 190, at)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "2025-04-02T08:30:00+00:00,41.2,18.7");
        assert_eq!(lines[2], "2025-04-02T08:30:00+00:00,40.0,19.0");
    }

    #[tokio::test]
    async fn existing_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(&path, "timestamp,moisture,temperature\nx,1.0,2.0\n").unwrap();

        Journal::open(&path).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sensor_data.csv");
        // no trailing newline: open must leave the file exactly as it was
        let original = "timestamp,moisture,temperature\n2025-04-02T08:30:00+00:00,41.2,18.7";
        std::fs::write(&path, original).unwrap();

        for _ in 0..3 {
            Journal::open(&path).await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn unwritable_location_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("log.csv");
        assert!(Journal::open(&path).await.is_err());
    }
}
