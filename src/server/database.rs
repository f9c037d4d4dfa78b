//! # Fortune Database
//!
//! Flat text file of fortunes. Each entry is followed by a line holding a
//! single `%`:
//!
//! ```text
//! You will have a long and happy life.
//! %
//! Beware of low-flying butterflies.
//! %
//! ```
//!
//! The whole file is loaded at startup; writes append to both the file and the
//! in-memory list.

use log::{debug, info};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::common::error::{Error, Result};

const SEPARATOR: &str = "%";

pub struct Database {
    path: PathBuf,
    entries: Mutex<Vec<String>>,
}

impl Database {
    /// Load `path`, creating an empty database if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path).await {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await.map_err(|e| storage(&path, e))?;
                }
                fs::write(&path, "").await.map_err(|e| storage(&path, e))?;
                Vec::new()
            }
            Err(e) => return Err(storage(&path, e)),
        };

        info!("📚 Loaded {} fortunes from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// A uniformly random fortune, or an empty string when there are none.
    pub async fn read(&self) -> String {
        let entries = self.entries.lock().await;
        let mut rng = rand::thread_rng();
        entries.choose(&mut rng).cloned().unwrap_or_default()
    }

    pub async fn write(&self, fortune: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| storage(&self.path, e))?;
        file.write_all(format!("{fortune}\n{SEPARATOR}\n").as_bytes())
            .await
            .map_err(|e| storage(&self.path, e))?;
        file.flush().await.map_err(|e| storage(&self.path, e))?;

        entries.push(fortune.to_string());
        debug!("📝 Stored fortune #{} in {}", entries.len(), self.path.display());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn storage(path: &Path, error: std::io::Error) -> Error {
    Error::Storage(format!("{}: {error}", path.display()))
}

fn parse(content: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line == SEPARATOR {
            if !current.is_empty() {
                entries.push(current.join("\n"));
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    if current.iter().any(|line| !line.trim().is_empty()) {
        entries.push(current.join("\n"));
    }
    entries
}
