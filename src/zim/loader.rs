//! Building archives from storage backends.
//!
//! A split archive is stored as `name.zimaa`, `name.zimab`, … up to
//! `name.zimzz`; the loader opens parts in that order until the backend
//! reports one missing.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use super::archive::Archive;
use super::fulltext::FullTextEngine;
use super::options::ArchiveOptions;
use crate::error::{Result, ZimError};
use crate::io::{ReadAt, Storage};

/// Length of the `zimXX` extension of a split part
const SPLIT_EXTENSION_LEN: usize = 5;

/// Whether `name` is a part of a split archive: `.zim` followed by two
/// letters, in any case.
pub fn is_split_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < SPLIT_EXTENSION_LEN + 1 {
        return false;
    }
    let ext = &bytes[bytes.len() - SPLIT_EXTENSION_LEN - 1..];
    ext[0] == b'.'
        && ext[1..4].eq_ignore_ascii_case(b"zim")
        && ext[4..].iter().all(u8::is_ascii_alphabetic)
}

/// Whether `name` is the first (`…aa`) part of a split archive.
pub fn is_first_part(name: &str) -> bool {
    is_split_name(name) && name[name.len() - 2..].eq_ignore_ascii_case("aa")
}

/// Candidate part names for `name`: itself for an ordinary archive, or
/// `…zimaa` through `…zimzz` for any part of a split one. The letters keep
/// the case of the given name.
pub fn split_part_names(name: &str) -> Vec<String> {
    if !is_split_name(name) {
        return vec![name.to_string()];
    }
    let stem = &name[..name.len() - 2];
    let base = if name.as_bytes()[name.len() - 1].is_ascii_uppercase() {
        b'A'
    } else {
        b'a'
    };
    (0..26u8)
        .flat_map(|first| (0..26u8).map(move |second| (first, second)))
        .map(|(first, second)| {
            format!("{stem}{}{}", (base + first) as char, (base + second) as char)
        })
        .collect()
}

/// Opens archives from a [`Storage`] backend.
#[derive(Clone)]
pub struct ArchiveLoader {
    storage: Arc<dyn Storage>,
    options: ArchiveOptions,
    fulltext: Option<Arc<dyn FullTextEngine>>,
}

impl ArchiveLoader {
    pub fn new(storage: Arc<dyn Storage>, options: ArchiveOptions) -> Self {
        Self {
            storage,
            options,
            fulltext: None,
        }
    }

    /// Attach a full-text engine to every archive this loader opens.
    pub fn with_fulltext(mut self, engine: Arc<dyn FullTextEngine>) -> Self {
        self.fulltext = Some(engine);
        self
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Open the archive stored under `name`, gathering all split parts.
    pub async fn load(&self, name: &str) -> Result<Archive> {
        let parts = self.open_parts(name).await?;
        self.load_files(parts).await
    }

    /// Open an archive from already-opened parts, in order.
    pub async fn load_files(&self, parts: Vec<Arc<dyn ReadAt>>) -> Result<Archive> {
        Archive::open_with_fulltext(parts, self.options.clone(), self.fulltext.clone()).await
    }

    async fn open_parts(&self, name: &str) -> Result<Vec<Arc<dyn ReadAt>>> {
        if !is_split_name(name) {
            return Ok(vec![self.storage.open(name).await?]);
        }

        let mut parts = Vec::new();
        for part_name in split_part_names(name) {
            match self.storage.open(&part_name).await {
                Ok(part) => {
                    debug!("Opened part {} ({} bytes)", part_name, part.size());
                    parts.push(part);
                }
                Err(e) if e.is_missing() && !parts.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        info!("Loaded {} with {} parts", name, parts.len());
        Ok(parts)
    }

    /// Start opening `name` in the background.
    pub fn spawn(&self, name: &str) -> PendingArchive {
        let loader = self.clone();
        let name = name.to_string();
        let (sender, outcome) = watch::channel(None);
        tokio::spawn(async move {
            let result = loader.load(&name).await.map(Arc::new);
            // Nobody waiting is fine
            let _ = sender.send(Some(result));
        });
        PendingArchive { outcome }
    }
}

/// An archive still being opened by [`ArchiveLoader::spawn`].
///
/// Every waiter sees the same outcome, including the original
/// construction error.
pub struct PendingArchive {
    outcome: watch::Receiver<Option<Result<Arc<Archive>>>>,
}

impl PendingArchive {
    /// The archive if construction has finished.
    ///
    /// # Errors
    ///
    /// `ArchiveNotReady` while loading, or the construction error once it
    /// has failed.
    pub fn archive(&self) -> Result<Arc<Archive>> {
        match &*self.outcome.borrow() {
            Some(result) => result.clone(),
            None => Err(ZimError::ArchiveNotReady),
        }
    }

    /// Wait for construction to finish.
    pub async fn ready(&self) -> Result<Arc<Archive>> {
        let mut outcome = self.outcome.clone();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ZimError::SourceRead("archive loader task ended without a result".into()))?;
        match &*finished {
            Some(result) => result.clone(),
            None => Err(ZimError::ArchiveNotReady),
        }
    }
}

/// Names of the archives in a local directory: every `*.zim` file and the
/// first part of every split archive, sorted.
pub async fn discover(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".zim") || is_first_part(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
