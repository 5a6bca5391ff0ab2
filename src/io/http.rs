use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{trace, warn};

use super::ReadAt;
use crate::error::{Result, ZimError};

/// Reads are served from aligned blocks of this size
pub const BLOCK_SIZE: u64 = 64 * 1024;
/// Blocks kept per reader
const CACHED_BLOCKS: usize = 32;

/// HTTP Range reader for remote ZIM files and split parts.
///
/// Small reads (dirents, pointer table slots, cluster headers) are rounded
/// out to [`BLOCK_SIZE`] blocks and the most recently used blocks are kept.
/// Reads larger than a block go straight to the server.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    requests: AtomicU64,
    max_retry: u32,
    blocks: Mutex<BlockCache>,
}

impl HttpRangeReader {
    /// Send a HEAD request to check Range support and learn the size.
    ///
    /// A 404 maps to `NotFound`, which ends split-part discovery.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Self::with_client(client, url).await
    }

    pub async fn with_client(client: Client, url: String) -> Result<Self> {
        let resp = client.head(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ZimError::NotFound(url));
        }
        if !resp.status().is_success() {
            return Err(ZimError::SourceRead(format!(
                "HEAD {} failed with status {}",
                url,
                resp.status()
            )));
        }

        let accepts_bytes = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));
        if !accepts_bytes {
            return Err(ZimError::SourceRead(format!(
                "{url} does not support Range requests"
            )));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ZimError::SourceRead(format!("{url} has no Content-Length")))?;

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            max_retry: 10,
            blocks: Mutex::new(BlockCache::new(CACHED_BLOCKS)),
        })
    }

    /// Bytes received from the network so far
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Range requests sent so far, retries included
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fill `buf` from `offset`, which must lie inside the file, with as
    /// many Range requests as the server needs. Returns the bytes received.
    async fn fetch(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let last = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected = (last - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;
        while received < expected {
            let range = format!("bytes={}-{}", offset + received as u64, last);
            self.requests.fetch_add(1, Ordering::Relaxed);
            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(ZimError::SourceRead(format!(
                            "GET {} ({}) failed with status {}",
                            self.url,
                            range,
                            resp.status()
                        )));
                    }
                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        break;
                    }
                    let len = bytes.len().min(expected - received);
                    buf[received..received + len].copy_from_slice(&bytes[..len]);
                    received += len;
                    self.transferred_bytes.fetch_add(len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(ZimError::SourceRead(format!(
                            "max retries exceeded for {}",
                            self.url
                        )));
                    }
                    warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(received)
    }

    async fn block(&self, index: u64) -> Result<Arc<[u8]>> {
        if let Some(block) = self.cached(index) {
            return Ok(block);
        }
        let start = index * BLOCK_SIZE;
        let len = BLOCK_SIZE.min(self.size - start) as usize;
        let mut data = vec![0u8; len];
        let n = self.fetch(start, &mut data).await?;
        data.truncate(n);
        trace!("Fetched block {} of {} ({} bytes)", index, self.url, n);

        let block: Arc<[u8]> = data.into();
        // Short blocks mean the server gave up early; don't keep them
        if n == len {
            self.lock_blocks().insert(index, block.clone());
        }
        Ok(block)
    }

    fn cached(&self, index: u64) -> Option<Arc<[u8]>> {
        self.lock_blocks().get(index)
    }

    fn lock_blocks(&self) -> std::sync::MutexGuard<'_, BlockCache> {
        // Poisoning is harmless here
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }
        if buf.len() as u64 > BLOCK_SIZE {
            return self.fetch(offset, buf).await;
        }

        let mut filled = 0;
        for index in block_span(offset, buf.len(), self.size) {
            let block = self.block(index).await?;
            let pos = offset + filled as u64;
            // A short previous block leaves a gap
            if pos < index * BLOCK_SIZE {
                break;
            }
            let within = (pos - index * BLOCK_SIZE) as usize;
            if within >= block.len() {
                break;
            }
            let n = (block.len() - within).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&block[within..within + n]);
            filled += n;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Indices of the blocks covering `len` bytes at `offset` of a `size`-byte
/// file. `offset` must be below `size` and `len` non-zero.
fn block_span(offset: u64, len: usize, size: u64) -> RangeInclusive<u64> {
    let last = (offset + len as u64 - 1).min(size - 1);
    offset / BLOCK_SIZE..=last / BLOCK_SIZE
}

/// Least-recently-used set of fetched blocks
struct BlockCache {
    capacity: usize,
    blocks: VecDeque<(u64, Arc<[u8]>)>,
}

impl BlockCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, index: u64) -> Option<Arc<[u8]>> {
        let pos = self.blocks.iter().position(|(i, _)| *i == index)?;
        let entry = self.blocks.remove(pos)?;
        let block = entry.1.clone();
        self.blocks.push_front(entry);
        Some(block)
    }

    fn insert(&mut self, index: u64, block: Arc<[u8]>) {
        if let Some(pos) = self.blocks.iter().position(|(i, _)| *i == index) {
            self.blocks.remove(pos);
        }
        if self.blocks.len() == self.capacity {
            self.blocks.pop_back();
        }
        self.blocks.push_front((index, block));
    }
}
