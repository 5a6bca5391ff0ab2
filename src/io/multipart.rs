//! Logical reader over the physical parts of a split archive.
//!
//! Parts are concatenated in order; a logical offset is mapped to a part by
//! the running sum of the preceding parts' sizes. A single-part archive is
//! simply a `MultiPartReader` with one part.

use async_trait::async_trait;
use std::sync::Arc;

use super::ReadAt;
use crate::error::{Result, ZimError};

pub struct MultiPartReader {
    parts: Vec<Arc<dyn ReadAt>>,
    /// Logical start offset of each part, plus the total size as last element
    starts: Vec<u64>,
}

impl MultiPartReader {
    pub fn new(parts: Vec<Arc<dyn ReadAt>>) -> Self {
        let mut starts = Vec::with_capacity(parts.len() + 1);
        let mut total = 0u64;
        for part in &parts {
            starts.push(total);
            total += part.size();
        }
        starts.push(total);
        Self { parts, starts }
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part_sizes(&self) -> Vec<u64> {
        self.parts.iter().map(|p| p.size()).collect()
    }

    pub fn parts(&self) -> &[Arc<dyn ReadAt>] {
        &self.parts
    }

    /// Index of the part holding logical `offset`.
    fn part_for(&self, offset: u64) -> Option<usize> {
        if offset >= self.size() {
            return None;
        }
        // starts is sorted; the last start <= offset wins. Empty parts share
        // their start with the next part and are skipped by taking the last.
        let idx = self.starts.partition_point(|&start| start <= offset);
        Some(idx - 1)
    }
}

#[async_trait]
impl ReadAt for MultiPartReader {
    /// Fills `buf` completely, crossing part boundaries as needed.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.size();
        let length = buf.len() as u64;
        let out_of_range = || ZimError::OutOfRange {
            offset,
            length,
            size,
        };
        if offset.checked_add(length).is_none_or(|end| end > size) {
            return Err(out_of_range());
        }

        let mut part = self.part_for(offset).ok_or_else(out_of_range)?;
        let mut filled = 0usize;
        while filled < buf.len() {
            let logical = offset + filled as u64;
            while logical >= self.starts[part + 1] {
                part += 1;
                if part >= self.parts.len() {
                    return Err(out_of_range());
                }
            }
            let local = logical - self.starts[part];
            let available = (self.starts[part + 1] - logical) as usize;
            let want = (buf.len() - filled).min(available);
            self.parts[part]
                .read_exact_at(local, &mut buf[filled..filled + want])
                .await?;
            filled += want;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.starts.last().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    fn two_parts() -> MultiPartReader {
        let first: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let second: Vec<u8> = (0..1000u32).map(|i| (i % 13) as u8 + 100).collect();
        MultiPartReader::new(vec![
            Arc::new(MemoryReader::new(first)),
            Arc::new(MemoryReader::new(second)),
        ])
    }

    #[tokio::test]
    async fn read_straddles_part_boundary() {
        let reader = two_parts();
        assert_eq!(reader.size(), 2000);

        let bytes = reader.read_vec(990, 20).await.unwrap();
        let expected_head: Vec<u8> = (990..1000u32).map(|i| (i % 251) as u8).collect();
        let expected_tail: Vec<u8> = (0..10u32).map(|i| (i % 13) as u8 + 100).collect();
        assert_eq!(&bytes[..10], &expected_head[..]);
        assert_eq!(&bytes[10..], &expected_tail[..]);
    }

    #[tokio::test]
    async fn read_past_last_part_is_out_of_range() {
        let reader = two_parts();
        let err = reader.read_vec(1990, 20).await.unwrap_err();
        assert!(matches!(err, ZimError::OutOfRange { .. }));
        assert!(err.is_missing());
    }

    #[tokio::test]
    async fn empty_parts_are_skipped() {
        let reader = MultiPartReader::new(vec![
            Arc::new(MemoryReader::new(vec![1u8, 2, 3])),
            Arc::new(MemoryReader::new(Vec::<u8>::new())),
            Arc::new(MemoryReader::new(vec![4u8, 5])),
        ]);
        assert_eq!(reader.read_vec(1, 4).await.unwrap(), vec![2, 3, 4, 5]);
    }
}
