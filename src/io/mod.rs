mod http;
mod local;
mod memory;
mod multipart;
mod storage;

pub use http::{BLOCK_SIZE, HttpRangeReader};
pub use local::LocalFileReader;
pub use memory::MemoryReader;
pub use multipart::MultiPartReader;
pub use storage::{HttpStorage, LocalStorage, Storage};

use async_trait::async_trait;

use crate::error::{Result, ZimError};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill the whole buffer from `offset`, failing with `OutOfRange` when
    /// the source ends first.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let size = self.size();
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > size) {
            return Err(ZimError::OutOfRange {
                offset,
                length: buf.len() as u64,
                size,
            });
        }

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(ZimError::OutOfRange {
                    offset,
                    length: buf.len() as u64,
                    size,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` into a new vector.
    async fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf).await?;
        Ok(buf)
    }
}
