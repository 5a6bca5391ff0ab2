//! # runzim
//!
//! Async access to ZIM archives (the openzim offline-content format) from
//! local files, split archives and HTTP servers.
//!
//! Remote archives are read with HTTP Range requests, so looking up one
//! article only fetches the header, a handful of index pointers and the
//! cluster holding the article, never the whole file.
//!
//! ## Features
//!
//! - Local, HTTP/HTTPS and split (`.zimaa`, `.zimab`, …) archives
//! - xz, zstd and legacy zlib clusters, decoded as a stream
//! - Path lookup with redirect resolution
//! - Title prefix search with case variants and regex suffixes
//! - Optional delegation to an external full-text engine
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runzim::{Archive, ArchiveOptions, LocalFileReader, ReadAt, Search};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader: Arc<dyn ReadAt> =
//!         Arc::new(LocalFileReader::new(std::path::Path::new("wikipedia.zim"))?);
//!     let archive = Archive::open(vec![reader], ArchiveOptions::default()).await?;
//!
//!     if let Some(main) = archive.get_main_page_dir_entry().await? {
//!         println!("Main page: {}", main.path());
//!     }
//!
//!     let results = archive
//!         .find_dir_entries_with_prefix(&Search::new("ray ch", 10))
//!         .await?;
//!     for entry in &results.entries {
//!         println!("{}", entry.title_or_url());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zim;

pub use cli::Cli;
pub use error::{Result, ZimError};
pub use io::{
    HttpRangeReader, HttpStorage, LocalFileReader, LocalStorage, MemoryReader, MultiPartReader,
    ReadAt, Storage,
};
pub use zim::{
    Archive, ArchiveLoader, ArchiveOptions, DirEntry, EntryContent, EntryKind, FullTextEngine,
    FullTextHit, PendingArchive, Search, SearchMode, SearchResults, ZimType,
};
