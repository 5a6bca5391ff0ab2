//! High-level archive access: path lookup, redirects, metadata and content.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use super::fulltext::FullTextEngine;
use super::options::ArchiveOptions;
use super::parser::{ArchiveFile, DEFAULT_LISTINGS};
use super::structures::{DirEntry, EntryKind};
use crate::error::{Result, ZimError};
use crate::io::{MultiPartReader, ReadAt};

/// Producer family of an archive, where it changes lookup rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZimType {
    Default,
    /// Web capture (warc2zim / zimit); responses carry separate header entries
    Zimit,
}

/// Payload of a content entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContent {
    pub mimetype: String,
    pub data: Vec<u8>,
}

/// An opened ZIM archive.
pub struct Archive {
    file: ArchiveFile,
    options: ArchiveOptions,
    zim_type: ZimType,
    pub(crate) fulltext: Option<Arc<dyn FullTextEngine>>,
}

/// Map "this entry does not exist" failures to `None`.
///
/// Lookups treat a dangling index like a missing path; I/O and codec
/// failures still propagate.
pub(crate) fn missing_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ZimError::InvalidEntry(reason)) => {
            debug!("Treating invalid entry as missing: {}", reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl Archive {
    /// Open an archive from its parts (one part for an ordinary file).
    pub async fn open(parts: Vec<Arc<dyn ReadAt>>, options: ArchiveOptions) -> Result<Self> {
        Self::open_with_fulltext(parts, options, None).await
    }

    /// Open an archive and try to attach a full-text engine.
    ///
    /// The engine is only initialized when the archive carries a full-text
    /// index and is not split. Initialization failures are logged and the
    /// archive falls back to prefix search.
    pub async fn open_with_fulltext(
        parts: Vec<Arc<dyn ReadAt>>,
        options: ArchiveOptions,
        engine: Option<Arc<dyn FullTextEngine>>,
    ) -> Result<Self> {
        if parts.is_empty() {
            return Err(ZimError::NotFound("archive has no parts".into()));
        }
        let reader = Arc::new(MultiPartReader::new(parts));
        let mut file = ArchiveFile::open(reader, options.chunk_size).await?;
        file.set_listings(DEFAULT_LISTINGS).await?;

        let mut archive = Self {
            file,
            options,
            zim_type: ZimType::Default,
            fulltext: None,
        };
        archive.zim_type = archive.detect_zim_type().await?;

        if let Some(engine) = engine {
            archive.fulltext = archive.init_fulltext(engine).await;
        }
        Ok(archive)
    }

    async fn detect_zim_type(&self) -> Result<ZimType> {
        let scraper = self.metadata("Scraper").await?.unwrap_or_default();
        let scraper = scraper.to_lowercase();
        if scraper.contains("warc2zim") || scraper.contains("zimit") {
            debug!("Detected zimit archive (scraper: {})", scraper);
            Ok(ZimType::Zimit)
        } else {
            Ok(ZimType::Default)
        }
    }

    async fn init_fulltext(&self, engine: Arc<dyn FullTextEngine>) -> Option<Arc<dyn FullTextEngine>> {
        if self.file.fulltext_index().is_none() {
            debug!("No full-text index in archive, not starting the engine");
            return None;
        }
        if self.is_split() {
            info!("Full-text search is unavailable for split archives");
            return None;
        }
        match engine.init(self.file.reader().parts()).await {
            Ok(()) => Some(engine),
            Err(e) => {
                warn!("Full-text engine failed to initialize: {}", e);
                None
            }
        }
    }

    pub fn file(&self) -> &ArchiveFile {
        &self.file
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn zim_type(&self) -> ZimType {
        self.zim_type
    }

    pub fn is_split(&self) -> bool {
        self.file.part_count() > 1
    }

    pub fn content_namespace(&self) -> char {
        self.file.header().content_namespace()
    }

    pub fn entry_count(&self) -> u32 {
        self.file.entry_count()
    }

    pub fn article_count(&self) -> Option<u32> {
        self.file.article_count()
    }

    pub fn uuid(&self) -> String {
        self.file.header().uuid_string()
    }

    pub fn has_fulltext(&self) -> bool {
        self.fulltext.is_some()
    }

    /// Metadata value stored under `M/<name>`, following redirects.
    pub async fn metadata(&self, name: &str) -> Result<Option<String>> {
        let Some(entry) = self.file.find_by_path(&format!("M/{name}")).await? else {
            return Ok(None);
        };
        Ok(self
            .read_content(&entry)
            .await?
            .map(|content| String::from_utf8_lossy(&content.data).into_owned()))
    }

    pub async fn title(&self) -> Result<Option<String>> {
        self.metadata("Title").await
    }

    pub async fn language(&self) -> Result<Option<String>> {
        self.metadata("Language").await
    }

    /// Find an entry by its full `namespace/url` path.
    ///
    /// When the exact path is missing, zimit archives retry under the
    /// header namespace, then (if `path_fallback` is on) leading path
    /// segments below the content namespace are stripped one by one.
    pub async fn get_dir_entry_by_path(&self, path: &str) -> Result<Option<DirEntry>> {
        if let Some(entry) = self.file.find_by_path(path).await? {
            return Ok(Some(entry));
        }

        if self.zim_type == ZimType::Zimit {
            if let Some(header_path) = self.zimit_header_path(path) {
                if let Some(entry) = self.file.find_by_path(&header_path).await? {
                    debug!("Resolved {} through header entry {}", path, header_path);
                    return Ok(Some(entry));
                }
            }
        }

        if self.options.path_fallback {
            let mut candidate = path.to_string();
            while let Some(shorter) = strip_leading_segment(&candidate, self.content_namespace()) {
                if let Some(entry) = self.file.find_by_path(&shorter).await? {
                    debug!("Resolved {} as {}", path, shorter);
                    return Ok(Some(entry));
                }
                candidate = shorter;
            }
        }
        Ok(None)
    }

    /// Header entry path for a zimit content path: `A/x` becomes `H/x`
    /// under the legacy layout, `C/A/x` becomes `C/H/x` otherwise.
    fn zimit_header_path(&self, path: &str) -> Option<String> {
        let cns = self.content_namespace();
        let rest = path.strip_prefix(cns)?.strip_prefix('/')?;
        if cns == 'A' {
            Some(format!("H/{rest}"))
        } else {
            let rest = rest.strip_prefix("A/")?;
            Some(format!("C/H/{rest}"))
        }
    }

    pub async fn get_dir_entry_by_url_index(&self, index: u32) -> Result<Option<DirEntry>> {
        missing_as_none(self.file.dir_entry_by_url_index(index).await)
    }

    pub async fn get_main_page_dir_entry(&self) -> Result<Option<DirEntry>> {
        match self.file.header().main_page {
            Some(index) => self.get_dir_entry_by_url_index(index).await,
            None => Ok(None),
        }
    }

    /// A uniformly drawn article.
    ///
    /// Draws from the article listing when there is one, otherwise from the
    /// content namespace's slice of the title index.
    pub async fn get_random_dir_entry(&self) -> Result<Option<DirEntry>> {
        let range = match self.file.article_count() {
            Some(count) => 0..count,
            None => self.content_title_range().await?,
        };
        if range.is_empty() {
            return Ok(None);
        }
        let index = rand::thread_rng().gen_range(range);
        missing_as_none(self.file.dir_entry_by_article_index(index).await)
    }

    /// Title-index positions of the content namespace.
    ///
    /// The title index is sorted by namespace first, so the namespace is one
    /// contiguous block found with two binary searches.
    pub(crate) async fn content_title_range(&self) -> Result<std::ops::Range<u32>> {
        let cns = self.content_namespace();
        let start = self.title_namespace_bound(cns, false).await?;
        let end = self.title_namespace_bound(cns, true).await?;
        Ok(start..end.max(start))
    }

    /// First title index whose namespace is `>= ns`, or `> ns` when
    /// `past` is set.
    async fn title_namespace_bound(&self, ns: char, past: bool) -> Result<u32> {
        let (mut lo, mut hi) = (0u32, self.file.entry_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.file.dir_entry_by_title_index(mid).await?;
            let go_right = if past {
                entry.namespace <= ns
            } else {
                entry.namespace < ns
            };
            if go_right {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Follow one redirect. Content entries resolve to themselves.
    ///
    /// Returns `None` when the redirect target does not exist.
    pub async fn resolve_redirect(&self, entry: &DirEntry) -> Result<Option<DirEntry>> {
        match entry.kind {
            EntryKind::Content { .. } => Ok(Some(entry.clone())),
            EntryKind::Redirect { target } => self.get_dir_entry_by_url_index(target).await,
        }
    }

    /// Follow redirects until a content entry is reached.
    ///
    /// # Errors
    ///
    /// Returns `RedirectLoop` when the chain needs `redirect_hop_limit` hops
    /// or more, which includes every cycle.
    pub async fn resolve_redirect_chain(&self, entry: &DirEntry) -> Result<Option<DirEntry>> {
        let limit = self.options.redirect_hop_limit;
        let mut current = entry.clone();
        let mut hops = 0usize;
        while current.is_redirect() {
            if hops + 1 >= limit {
                return Err(ZimError::RedirectLoop {
                    path: entry.path(),
                    hops: limit,
                });
            }
            hops += 1;
            match self.resolve_redirect(&current).await? {
                Some(next) => current = next,
                None => {
                    debug!("Redirect {} points to a missing entry", current.path());
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    /// Read an entry's payload, following redirects first.
    ///
    /// Returns `None` for broken redirects or dangling cluster references.
    pub async fn read_content(&self, entry: &DirEntry) -> Result<Option<EntryContent>> {
        let Some(target) = self.resolve_redirect_chain(entry).await? else {
            return Ok(None);
        };
        let EntryKind::Content {
            mimetype,
            cluster,
            blob,
        } = target.kind
        else {
            return Ok(None);
        };
        let data = missing_as_none(self.file.get_blob(cluster, blob).await)?;
        Ok(data.map(|data| EntryContent { mimetype, data }))
    }

    pub async fn read_content_by_path(&self, path: &str) -> Result<Option<EntryContent>> {
        match self.get_dir_entry_by_path(path).await? {
            Some(entry) => self.read_content(&entry).await,
            None => Ok(None),
        }
    }
}

/// `C/a/b/c` → `C/b/c`. `None` when nothing below the namespace can go.
fn strip_leading_segment(path: &str, ns: char) -> Option<String> {
    let rest = path.strip_prefix(ns)?.strip_prefix('/')?;
    let (_, tail) = rest.split_once('/')?;
    if tail.is_empty() {
        return None;
    }
    Some(format!("{ns}/{tail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_one_segment_at_a_time() {
        assert_eq!(
            strip_leading_segment("A/wiki/images/x.png", 'A').as_deref(),
            Some("A/images/x.png")
        );
        assert_eq!(
            strip_leading_segment("A/images/x.png", 'A').as_deref(),
            Some("A/x.png")
        );
        assert_eq!(strip_leading_segment("A/x.png", 'A'), None);
        assert_eq!(strip_leading_segment("M/a/b", 'A'), None);
        assert_eq!(strip_leading_segment("C/a/", 'C'), None);
    }

    #[test]
    fn invalid_entries_become_none() {
        let missing: Result<u32> = Err(ZimError::InvalidEntry("gone".into()));
        assert!(missing_as_none(missing).unwrap().is_none());

        let io: Result<u32> = Err(ZimError::SourceRead("disk".into()));
        assert!(missing_as_none(io).is_err());
    }
}
