//! ZIM archive parsing, decompression and lookup.
//!
//! ## Architecture
//!
//! - [`structures`]: header, directory entry and cluster descriptors
//! - [`decompress`]: streaming xz/zstd/zlib decoding of cluster data
//! - [`cluster`]: blob extraction from (possibly compressed) clusters
//! - [`parser`]: the [`ArchiveFile`] index tables
//! - [`archive`]: path lookup, redirects, metadata and content
//! - [`search`]: title and URL prefix search
//! - [`loader`]: split-archive discovery and background opening
//!
//! ## ZIM Format Overview
//!
//! A ZIM file starts with a fixed 80-byte header pointing at:
//! 1. The mime type list
//! 2. The URL pointer list, one offset per directory entry, sorted by path
//! 3. The title pointer list, URL indices sorted by title
//! 4. The cluster pointer list
//!
//! Content lives in clusters, each holding several blobs behind an offset
//! table. Clusters are compressed as a whole, so reading one blob means
//! decoding the cluster from its start up to the end of that blob.
//!
//! ## Limitations
//!
//! - No bzip2 clusters (deprecated in the format)
//! - No checksum verification
//! - Full-text search needs an external [`FullTextEngine`]

pub mod archive;
pub mod cluster;
pub mod decompress;
pub mod fulltext;
pub mod loader;
pub mod options;
pub mod parser;
pub mod search;
pub mod structures;

pub use archive::{Archive, EntryContent, ZimType};
pub use cluster::{BlobLocation, ClusterStore};
pub use decompress::{DecompressSession, StreamingDecompressor};
pub use fulltext::{FullTextEngine, FullTextHit};
pub use loader::{
    ArchiveLoader, PendingArchive, discover, is_first_part, is_split_name, split_part_names,
};
pub use options::{ArchiveOptions, SearchMode};
pub use parser::{ArchiveFile, ArticleListing, ListingDescriptor, ListingKind};
pub use search::{Search, SearchResults};
pub use structures::*;
