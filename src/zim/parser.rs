//! Low-level ZIM archive parser.
//!
//! This module handles the binary parsing of ZIM index structures,
//! reading from a [`MultiPartReader`] so split archives look like one file.
//!
//! ## Parsing Strategy
//!
//! ZIM files are designed to be read from the front:
//! 1. Read the fixed 80-byte header
//! 2. Read the mime type list it points to
//! 3. Resolve directory entries on demand through the URL and title
//!    pointer lists; nothing is loaded eagerly or cached
//! 4. Optionally locate listing entries (`X/listing/titleOrdered/v1`, the
//!    full-text index) and remember where their payloads live
//!
//! Every lookup by ordinal is one pointer read plus one record read, which
//! keeps the parser usable over HTTP Range requests.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;
use tracing::{debug, warn};

use super::cluster::{BlobLocation, ClusterStore};
use super::structures::*;
use crate::error::{Result, ZimError};
use crate::io::{MultiPartReader, ReadAt};

/// Initial read size for a directory entry record
const DIRENT_READ_SIZE: usize = 256;

/// Upper bound on the bytes read while looking for the mime list terminator
const MAX_MIME_LIST_SIZE: u64 = 64 * 1024;

/// What a listing entry provides once found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    /// Title-ordered u32 URL indices of the articles
    Articles,
    /// Embedded full-text index
    FullText,
}

/// An optional index stored as an ordinary entry under a well-known path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingDescriptor {
    pub path: &'static str,
    pub kind: ListingKind,
}

/// Listings looked up when an archive is opened. For each kind the first
/// path found wins.
pub const DEFAULT_LISTINGS: &[ListingDescriptor] = &[
    ListingDescriptor {
        path: "X/listing/titleOrdered/v1",
        kind: ListingKind::Articles,
    },
    ListingDescriptor {
        path: "X/fulltext/xapian",
        kind: ListingKind::FullText,
    },
    ListingDescriptor {
        path: "Z//fulltextIndex/xapian",
        kind: ListingKind::FullText,
    },
];

/// Article-only title index.
#[derive(Debug, Clone)]
pub enum ArticleListing {
    /// Stored uncompressed at a known archive offset
    Stored { ptr_pos: u64, count: u32 },
    /// Decoded from a compressed cluster
    Loaded(Arc<[u32]>),
}

impl ArticleListing {
    pub fn count(&self) -> u32 {
        match self {
            ArticleListing::Stored { count, .. } => *count,
            ArticleListing::Loaded(indices) => indices.len() as u32,
        }
    }
}

/// Index structures of one logical archive.
///
/// Parsed once by [`ArchiveFile::open`]; every later call only reads.
pub struct ArchiveFile {
    /// The underlying data source (all parts of the archive)
    reader: Arc<MultiPartReader>,
    header: ZimHeader,
    mimetypes: Vec<String>,
    clusters: ClusterStore,
    article_listing: Option<ArticleListing>,
    fulltext_index: Option<BlobLocation>,
}

impl ArchiveFile {
    /// Parse the header and mime list of an archive.
    ///
    /// # Arguments
    ///
    /// * `reader` - All parts of the archive, in order
    /// * `chunk_size` - Compressed bytes fetched per read while decompressing
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader` if the magic number, version or table
    /// positions are wrong, or any read error from the source.
    pub async fn open(reader: Arc<MultiPartReader>, chunk_size: usize) -> Result<Self> {
        let size = reader.size();
        if size < ZimHeader::SIZE as u64 {
            return Err(ZimError::InvalidHeader(format!(
                "file is only {size} bytes"
            )));
        }
        let header = ZimHeader::from_bytes(&reader.read_vec(0, ZimHeader::SIZE).await?)?;

        let table_fits = |pos: u64, count: u32, width: u64| {
            pos.checked_add(count as u64 * width)
                .is_some_and(|end| end <= size)
        };
        if !table_fits(header.url_ptr_pos, header.entry_count, 8) {
            return Err(ZimError::InvalidHeader("url pointer list out of bounds".into()));
        }
        if !table_fits(header.title_ptr_pos, header.entry_count, 4) {
            return Err(ZimError::InvalidHeader("title pointer list out of bounds".into()));
        }
        if !table_fits(header.cluster_ptr_pos, header.cluster_count, 8) {
            return Err(ZimError::InvalidHeader("cluster pointer list out of bounds".into()));
        }
        if header.mime_list_pos >= size {
            return Err(ZimError::InvalidHeader("mime list out of bounds".into()));
        }

        // The mime list is small and usually sits right after the header
        let mime_len = (size - header.mime_list_pos).min(MAX_MIME_LIST_SIZE) as usize;
        let mime_bytes = reader.read_vec(header.mime_list_pos, mime_len).await?;
        let mimetypes = parse_mime_list(&mime_bytes)
            .ok_or_else(|| ZimError::InvalidHeader("unterminated mime list".into()))?;

        debug!(
            "Opened ZIM {}.{} with {} entries, {} clusters, {} parts",
            header.major_version,
            header.minor_version,
            header.entry_count,
            header.cluster_count,
            reader.part_count()
        );

        let clusters = ClusterStore::new(
            reader.clone(),
            header.cluster_ptr_pos,
            header.cluster_count,
            chunk_size,
        );

        Ok(Self {
            reader,
            header,
            mimetypes,
            clusters,
            article_listing: None,
            fulltext_index: None,
        })
    }

    pub fn header(&self) -> &ZimHeader {
        &self.header
    }

    pub fn minor_version(&self) -> u16 {
        self.header.minor_version
    }

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn mimetypes(&self) -> &[String] {
        &self.mimetypes
    }

    pub fn reader(&self) -> &Arc<MultiPartReader> {
        &self.reader
    }

    pub fn part_count(&self) -> usize {
        self.reader.part_count()
    }

    pub fn clusters(&self) -> &ClusterStore {
        &self.clusters
    }

    /// Number of entries in the article-only listing, if one was found.
    pub fn article_count(&self) -> Option<u32> {
        self.article_listing.as_ref().map(ArticleListing::count)
    }

    pub fn article_listing(&self) -> Option<&ArticleListing> {
        self.article_listing.as_ref()
    }

    /// Location of the embedded full-text index, if one was found.
    pub fn fulltext_index(&self) -> Option<BlobLocation> {
        self.fulltext_index
    }

    /// Read the directory entry at position `index` of the URL pointer list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntry` if `index` is out of range or the record is
    /// malformed.
    pub async fn dir_entry_by_url_index(&self, index: u32) -> Result<DirEntry> {
        if index >= self.header.entry_count {
            return Err(ZimError::InvalidEntry(format!(
                "url index {index} out of range ({} entries)",
                self.header.entry_count
            )));
        }
        let mut ptr = [0u8; 8];
        self.reader
            .read_exact_at(self.header.url_ptr_pos + 8 * index as u64, &mut ptr)
            .await?;
        self.read_dir_entry(LittleEndian::read_u64(&ptr), index).await
    }

    /// URL index stored at position `index` of the title pointer list.
    pub async fn url_index_by_title_index(&self, index: u32) -> Result<u32> {
        if index >= self.header.entry_count {
            return Err(ZimError::InvalidEntry(format!(
                "title index {index} out of range ({} entries)",
                self.header.entry_count
            )));
        }
        let mut ptr = [0u8; 4];
        self.reader
            .read_exact_at(self.header.title_ptr_pos + 4 * index as u64, &mut ptr)
            .await?;
        Ok(LittleEndian::read_u32(&ptr))
    }

    /// Read the directory entry at position `index` of the title pointer list.
    pub async fn dir_entry_by_title_index(&self, index: u32) -> Result<DirEntry> {
        let url_index = self.url_index_by_title_index(index).await?;
        self.dir_entry_by_url_index(url_index).await
    }

    /// Read the directory entry at position `index` of the article listing,
    /// falling back to the full title pointer list when there is none.
    pub async fn dir_entry_by_article_index(&self, index: u32) -> Result<DirEntry> {
        let url_index = match &self.article_listing {
            None => return self.dir_entry_by_title_index(index).await,
            Some(listing) if index >= listing.count() => {
                return Err(ZimError::InvalidEntry(format!(
                    "article index {index} out of range ({} articles)",
                    listing.count()
                )));
            }
            Some(ArticleListing::Stored { ptr_pos, .. }) => {
                let mut ptr = [0u8; 4];
                self.reader
                    .read_exact_at(ptr_pos + 4 * index as u64, &mut ptr)
                    .await?;
                LittleEndian::read_u32(&ptr)
            }
            Some(ArticleListing::Loaded(indices)) => indices[index as usize],
        };
        self.dir_entry_by_url_index(url_index).await
    }

    /// Read and parse the record at archive offset `offset`.
    ///
    /// Records have no length field, so a fixed-size read is grown until
    /// both string terminators are inside it.
    async fn read_dir_entry(&self, offset: u64, url_index: u32) -> Result<DirEntry> {
        let available = self.reader.size().saturating_sub(offset);
        if available < DirEntry::REDIRECT_HEADER_SIZE as u64 {
            return Err(ZimError::InvalidEntry(format!(
                "entry {url_index} points past the end of the archive"
            )));
        }

        let mut len = DIRENT_READ_SIZE as u64;
        loop {
            let want = len.min(available) as usize;
            let buf = self.reader.read_vec(offset, want).await?;
            if record_complete(&buf) || want as u64 == available {
                return DirEntry::from_bytes(&buf, url_index, &self.mimetypes);
            }
            len *= 4;
        }
    }

    /// First URL index whose `namespace/url` is not less than `path`.
    ///
    /// Returns `entry_count` when every entry sorts before `path`.
    pub async fn url_lower_bound(&self, path: &str) -> Result<u32> {
        let (mut lo, mut hi) = (0u32, self.header.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.dir_entry_by_url_index(mid).await?;
            if entry.path().as_str() < path {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Binary search the URL pointer list for an exact `namespace/url` path.
    ///
    /// # Returns
    ///
    /// The matching entry, or `None` when no entry has that path.
    pub async fn find_by_path(&self, path: &str) -> Result<Option<DirEntry>> {
        let index = self.url_lower_bound(path).await?;
        if index >= self.header.entry_count {
            return Ok(None);
        }
        let entry = self.dir_entry_by_url_index(index).await?;
        Ok((entry.path() == path).then_some(entry))
    }

    /// Look up optional listing entries and record where their data lives.
    ///
    /// Missing listings are skipped silently; the corresponding accessor
    /// keeps returning `None`.
    pub async fn set_listings(&mut self, descriptors: &[ListingDescriptor]) -> Result<()> {
        for descriptor in descriptors {
            let already_set = match descriptor.kind {
                ListingKind::Articles => self.article_listing.is_some(),
                ListingKind::FullText => self.fulltext_index.is_some(),
            };
            if already_set {
                continue;
            }

            let Some(entry) = self.find_by_path(descriptor.path).await? else {
                continue;
            };
            let EntryKind::Content { cluster, blob, .. } = entry.kind else {
                warn!("Listing {} is a redirect, ignoring it", descriptor.path);
                continue;
            };

            let location = self.clusters.blob_location(cluster, blob).await?;
            match (descriptor.kind, location) {
                (ListingKind::Articles, Some(location)) => {
                    self.article_listing = Some(ArticleListing::Stored {
                        ptr_pos: location.offset,
                        count: (location.size / 4) as u32,
                    });
                }
                (ListingKind::Articles, None) => {
                    let bytes = self.clusters.get_blob(cluster, blob).await?;
                    let indices: Vec<u32> = bytes
                        .chunks_exact(4)
                        .map(LittleEndian::read_u32)
                        .collect();
                    self.article_listing = Some(ArticleListing::Loaded(indices.into()));
                }
                (ListingKind::FullText, Some(location)) => {
                    self.fulltext_index = Some(location);
                }
                (ListingKind::FullText, None) => {
                    warn!(
                        "Full-text index {} is stored compressed, ignoring it",
                        descriptor.path
                    );
                    continue;
                }
            }
            debug!("Found listing {}", descriptor.path);
        }
        Ok(())
    }

    /// Content of a blob, see [`ClusterStore::get_blob`].
    pub async fn get_blob(&self, cluster: u32, blob: u32) -> Result<Vec<u8>> {
        self.clusters.get_blob(cluster, blob).await
    }
}

/// Whether `buf` holds a whole record up to the title terminator.
fn record_complete(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let mimetype = LittleEndian::read_u16(buf);
    let fixed = if mimetype == REDIRECT_MIMETYPE {
        DirEntry::REDIRECT_HEADER_SIZE
    } else {
        DirEntry::CONTENT_HEADER_SIZE
    };
    buf.get(fixed..)
        .is_some_and(|strings| strings.iter().filter(|&&b| b == 0).count() >= 2)
}
