//! Title and URL prefix search.
//!
//! ## Algorithm
//!
//! 1. An optional regular expression may follow the literal prefix, starting
//!    at the first `.*`, `.+` or `(?:`. It is matched case-insensitively
//!    against the rest of each candidate title.
//! 2. A query of the form `X/...` (a namespace letter and a slash) searches
//!    full paths in the URL index instead of titles.
//! 3. Title queries are expanded into case variants of the literal prefix,
//!    most likely first, and each variant gets its own binary search plus a
//!    short forward scan over the title index.
//! 4. When the variants leave the page short and a full-text engine is
//!    attached, it fills the remainder.
//!
//! Work is bounded by the variant cap and the scan window, and every step
//! checks the [`Search`] cancellation flag.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::{Regex, RegexBuilder};
use tracing::{debug, trace, warn};

use super::archive::Archive;
use super::options::SearchMode;
use super::structures::DirEntry;
use crate::error::Result;

/// Hard cap on generated case combinations
const MAX_VARIANT_COMBINATIONS: usize = 1024;
/// Full mode falls back to basic above this many words...
const MAX_FULL_MODE_WORDS: usize = 6;
/// ...or above this many full-mode combinations
const MAX_FULL_MODE_COMBINATIONS: usize = 300;
/// Scan window multiplier while a regex filters the matches
const REGEX_WINDOW_FACTOR: usize = 10_000;

/// Namespaces that make a query a URL query
const URL_QUERY_NAMESPACES: &str = "-ABCHIJMUVWX";

/// A prefix search request, shared with whoever may cancel it.
#[derive(Debug)]
pub struct Search {
    pub text: String,
    /// Number of results wanted
    pub size: usize,
    pub mode: SearchMode,
    cancelled: AtomicBool,
}

impl Search {
    pub fn new(text: impl Into<String>, size: usize) -> Self {
        Self {
            text: text.into(),
            size,
            mode: SearchMode::Basic,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Ask a running search to stop; it returns no results.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct SearchResults {
    /// Prefix matches in index order, then full-text hits
    pub entries: Vec<DirEntry>,
    pub fulltext_used: bool,
    pub cancelled: bool,
}

impl SearchResults {
    fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Parsed form of the query text.
#[derive(Debug)]
struct Query {
    literal: String,
    filter: Option<Regex>,
    url_mode: bool,
}

impl Query {
    fn parse(text: &str) -> Result<Self> {
        let (literal, pattern) = split_regex_suffix(text);
        let filter = match pattern {
            Some(pattern) => Some(
                RegexBuilder::new(&format!("^(?:{pattern})"))
                    .case_insensitive(true)
                    .build()?,
            ),
            None => None,
        };
        let url_mode = is_url_query(literal);
        Ok(Self {
            literal: literal.to_string(),
            filter,
            url_mode,
        })
    }
}

/// Split `text` at the first `.*`, `.+` or `(?:`.
fn split_regex_suffix(text: &str) -> (&str, Option<&str>) {
    let start = [".*", ".+", "(?:"]
        .iter()
        .filter_map(|marker| text.find(marker))
        .min();
    match start {
        Some(idx) => (&text[..idx], Some(&text[idx..])),
        None => (text, None),
    }
}

fn is_url_query(literal: &str) -> bool {
    let mut chars = literal.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(ns), Some('/')) if URL_QUERY_NAMESPACES.contains(ns)
    )
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Separator(&'a str),
}

/// Alternating runs of alphanumeric and other characters.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_word = None;
    for (idx, c) in text.char_indices() {
        let is_word = c.is_alphanumeric();
        match in_word {
            Some(current) if current != is_word => {
                tokens.push(token(&text[start..idx], current));
                start = idx;
            }
            _ => {}
        }
        in_word = Some(is_word);
    }
    if let Some(current) = in_word {
        tokens.push(token(&text[start..], current));
    }
    tokens
}

fn token(text: &str, is_word: bool) -> Token<'_> {
    if is_word {
        Token::Word(text)
    } else {
        Token::Separator(text)
    }
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn word_options(word: &str, mode: SearchMode) -> Vec<String> {
    let mut options = Vec::new();
    match mode {
        SearchMode::Basic => {
            push_unique(&mut options, upper_first(word));
            push_unique(&mut options, lower_first(word));
        }
        SearchMode::Full => {
            let lower = word.to_lowercase();
            push_unique(&mut options, upper_first(&lower));
            push_unique(&mut options, lower.to_uppercase());
            push_unique(&mut options, lower);
        }
    }
    options
}

/// Every combination of per-word options, last word varying fastest,
/// capped at `MAX_VARIANT_COMBINATIONS`.
fn combinations(tokens: &[Token<'_>], mode: SearchMode) -> Vec<String> {
    let options: Vec<Vec<String>> = tokens
        .iter()
        .map(|t| match t {
            Token::Word(w) => word_options(w, mode),
            Token::Separator(s) => vec![s.to_string()],
        })
        .collect();

    let mut results = Vec::new();
    let mut counters = vec![0usize; options.len()];
    loop {
        let candidate: String = options
            .iter()
            .zip(&counters)
            .map(|(opts, &i)| opts[i].as_str())
            .collect();
        results.push(candidate);
        if results.len() >= MAX_VARIANT_COMBINATIONS {
            break;
        }

        // Advance the mixed-radix counter
        let mut pos = options.len();
        loop {
            if pos == 0 {
                return results;
            }
            pos -= 1;
            counters[pos] += 1;
            if counters[pos] < options[pos].len() {
                break;
            }
            counters[pos] = 0;
        }
    }
    results
}

/// Case variants of `literal`, most likely first, without duplicates.
///
/// Order: as typed, first letter capitalized, the basic per-word
/// combinations, then (full mode only) the title/lower/upper combinations.
/// Full mode is downgraded to basic for long queries.
pub(crate) fn case_variants(literal: &str, mode: SearchMode) -> Vec<String> {
    let tokens = tokenize(literal);
    let words = tokens
        .iter()
        .filter(|t| matches!(t, Token::Word(_)))
        .count();

    let mut mode = mode;
    if mode == SearchMode::Full {
        let full_count = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(word_options(w, SearchMode::Full).len()),
                Token::Separator(_) => None,
            })
            .try_fold(1usize, |acc, n| acc.checked_mul(n));
        if words > MAX_FULL_MODE_WORDS
            || full_count.is_none_or(|count| count > MAX_FULL_MODE_COMBINATIONS)
        {
            debug!(
                "Query has {} words, searching basic case variants only",
                words
            );
            mode = SearchMode::Basic;
        }
    }

    let mut variants = Vec::new();
    push_unique(&mut variants, literal.to_string());
    push_unique(&mut variants, upper_first(literal));
    for candidate in combinations(&tokens, SearchMode::Basic) {
        push_unique(&mut variants, candidate);
    }
    if mode == SearchMode::Full {
        for candidate in combinations(&tokens, SearchMode::Full) {
            push_unique(&mut variants, candidate);
        }
    }
    variants
}

impl Archive {
    /// Find up to `search.size` entries whose title starts with the query.
    pub async fn find_dir_entries_with_prefix(&self, search: &Search) -> Result<SearchResults> {
        self.find_dir_entries_with_prefix_interim(search, |_: &[DirEntry]| {})
            .await
    }

    /// Like [`Archive::find_dir_entries_with_prefix`], calling `on_interim`
    /// with the results so far every time one is added.
    pub async fn find_dir_entries_with_prefix_interim<F>(
        &self,
        search: &Search,
        mut on_interim: F,
    ) -> Result<SearchResults>
    where
        F: FnMut(&[DirEntry]) + Send,
    {
        let query = Query::parse(&search.text)?;
        if search.size == 0 {
            return Ok(SearchResults::default());
        }

        let variants = if query.url_mode {
            vec![query.literal.clone()]
        } else {
            case_variants(&query.literal, search.mode)
        };
        let window = if query.filter.is_some() {
            search.size.saturating_mul(REGEX_WINDOW_FACTOR)
        } else {
            search.size
        };

        let mut found: Vec<DirEntry> = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();
        for variant in &variants {
            if search.is_cancelled() {
                return Ok(SearchResults::cancelled());
            }
            if found.len() >= search.size {
                break;
            }
            let completed = self
                .scan_prefix(
                    variant,
                    &query,
                    window,
                    search,
                    &mut found,
                    &mut seen,
                    &mut on_interim,
                )
                .await?;
            if !completed {
                return Ok(SearchResults::cancelled());
            }
        }

        let mut fulltext_used = false;
        if found.len() < search.size {
            fulltext_used = self
                .fill_from_fulltext(&query.literal, search, &mut found)
                .await?;
            if search.is_cancelled() {
                return Ok(SearchResults::cancelled());
            }
        }

        Ok(SearchResults {
            entries: found,
            fulltext_used,
            cancelled: false,
        })
    }

    /// One binary search plus forward scan for `prefix`.
    ///
    /// Returns `false` when the search was cancelled midway.
    #[allow(clippy::too_many_arguments)]
    async fn scan_prefix<F>(
        &self,
        prefix: &str,
        query: &Query,
        window: usize,
        search: &Search,
        found: &mut Vec<DirEntry>,
        seen: &mut HashSet<u32>,
        on_interim: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&[DirEntry]) + Send,
    {
        let cns = self.content_namespace();
        let file = self.file();
        let count = if query.url_mode {
            file.entry_count()
        } else {
            file.article_count().unwrap_or(file.entry_count())
        };

        // Lower bound: first entry ordered at or after the prefix
        let (mut lo, mut hi) = (0u32, count);
        while lo < hi {
            if search.is_cancelled() {
                return Ok(false);
            }
            let mid = lo + (hi - lo) / 2;
            let go_left = if query.url_mode {
                let entry = file.dir_entry_by_url_index(mid).await?;
                prefix <= entry.path().as_str()
            } else {
                let entry = file.dir_entry_by_article_index(mid).await?;
                match entry.namespace.cmp(&cns) {
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => prefix <= entry.title_or_url(),
                }
            };
            if go_left {
                hi = mid;
            } else {
                lo = mid + 1;
            }
            tokio::task::yield_now().await;
        }

        let first = lo;
        let mut index = first;
        let mut matches = 0usize;
        while index < count && found.len() < search.size && ((index - first) as usize) < window {
            if search.is_cancelled() {
                return Ok(false);
            }
            let (entry, key) = if query.url_mode {
                let entry = file.dir_entry_by_url_index(index).await?;
                let key = entry.path();
                (entry, key)
            } else {
                let entry = file.dir_entry_by_article_index(index).await?;
                if entry.namespace != cns {
                    break;
                }
                let key = entry.title_or_url().to_string();
                (entry, key)
            };
            if !key.starts_with(prefix) {
                break;
            }

            let accepted = query
                .filter
                .as_ref()
                .is_none_or(|re| re.is_match(&key[prefix.len()..]));
            if accepted && seen.insert(entry.url_index) {
                found.push(entry);
                matches += 1;
                on_interim(found);
            }
            index += 1;
            tokio::task::yield_now().await;
        }

        if matches > 0 {
            trace!(
                "Scanned {} entries for \"{}\" ({} matches)",
                index - first,
                prefix,
                matches
            );
        }
        Ok(true)
    }

    /// Top up `found` with full-text hits. Engine failures are logged and
    /// ignored. Returns whether the engine was consulted.
    async fn fill_from_fulltext(
        &self,
        text: &str,
        search: &Search,
        found: &mut Vec<DirEntry>,
    ) -> Result<bool> {
        let Some(engine) = &self.fulltext else {
            return Ok(false);
        };
        let wanted = search.size - found.len();
        let hits = match engine.search(text, wanted).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Full-text search for \"{}\" failed: {}", text, e);
                return Ok(false);
            }
        };

        let cns = self.content_namespace();
        let mut paths: HashSet<String> = found.iter().map(DirEntry::path).collect();
        for hit in hits {
            if found.len() >= search.size || search.is_cancelled() {
                break;
            }
            let path = fulltext_hit_path(&hit.path, cns);
            if !paths.insert(path.clone()) {
                continue;
            }
            match self.get_dir_entry_by_path(&path).await? {
                // Fallbacks can resolve a new path to an entry already listed
                Some(entry) if found.iter().any(|e| e.url_index == entry.url_index) => {
                    debug!("Full-text hit {} duplicates {}", path, entry.path())
                }
                Some(entry) => found.push(entry),
                None => debug!("Full-text hit {} has no entry", path),
            }
        }
        Ok(true)
    }
}

/// Archive path for a full-text hit.
///
/// Under the single-namespace layout the engine reports paths relative to
/// `C/`, and those paths may themselves look namespaced (zimit's `A/...`),
/// so the prefix is always added. Legacy hits carry their namespace unless
/// they plainly lack one.
fn fulltext_hit_path(hit: &str, cns: char) -> String {
    if cns == 'C' || !has_namespace(hit) {
        format!("{cns}/{hit}")
    } else {
        hit.to_string()
    }
}

/// `X/...` where X is a namespace character
fn has_namespace(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b'/' && (bytes[0].is_ascii_uppercase() || bytes[0] == b'-')
}
