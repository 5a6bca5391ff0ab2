//! Interface to an external full-text search engine.
//!
//! The engine itself (typically libzim's Xapian search, compiled
//! separately) is not part of this crate. An [`Archive`](super::Archive)
//! only initializes it when the archive advertises a full-text index and is
//! not split, and only consults it when prefix search comes up short.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::io::ReadAt;

/// One result returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextHit {
    /// Entry path; may lack the namespace under the single-namespace layout
    pub path: String,
    pub title: Option<String>,
}

#[async_trait]
pub trait FullTextEngine: Send + Sync {
    /// Prepare the engine for the archive made of `parts`.
    async fn init(&self, parts: &[Arc<dyn ReadAt>]) -> Result<()>;

    /// Up to `num_results` hits for `text`, best first.
    async fn search(&self, text: &str, num_results: usize) -> Result<Vec<FullTextHit>>;
}
