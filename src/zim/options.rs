use super::decompress::DEFAULT_CHUNK_SIZE;

/// How aggressively prefix search expands the typed text into case variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// First-letter upper/lower per word of the text as typed
    #[default]
    Basic,
    /// Additionally title-case, lower-case and upper-case per word
    Full,
}

/// Tunables for opening and reading an archive.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Compressed bytes fetched per read while decompressing a cluster
    pub chunk_size: usize,
    /// Maximum redirects followed before giving up with `RedirectLoop`
    pub redirect_hop_limit: usize,
    /// Retry failed path lookups with one leading segment stripped.
    ///
    /// Compensates for encoders that produced inconsistent path depths;
    /// not something the format guarantees.
    pub path_fallback: bool,
    pub search_mode: SearchMode,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            redirect_hop_limit: 20,
            path_fallback: true,
            search_mode: SearchMode::Basic,
        }
    }
}
