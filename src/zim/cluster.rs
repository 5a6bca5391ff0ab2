//! Blob extraction from clusters.
//!
//! A cluster is one info byte followed by a blob offset table and the blob
//! data, the table and data being compressed as a single stream unless the
//! info byte says otherwise. Offsets are relative to the first byte after
//! the info byte.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;
use tracing::debug;

use super::decompress::StreamingDecompressor;
use super::structures::{ClusterInfo, Compression};
use crate::error::{Result, ZimError};
use crate::io::ReadAt;

/// Position of a blob stored in an uncompressed cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    /// Logical archive offset of the first byte
    pub offset: u64,
    pub size: u64,
}

pub struct ClusterStore {
    reader: Arc<dyn ReadAt>,
    cluster_ptr_pos: u64,
    cluster_count: u32,
    decompressor: StreamingDecompressor,
}

fn read_offset(bytes: &[u8], info: ClusterInfo) -> u64 {
    if info.extended {
        LittleEndian::read_u64(bytes)
    } else {
        LittleEndian::read_u32(bytes) as u64
    }
}

/// Number of blobs given the first table offset.
fn blob_count_from(first: u64, info: ClusterInfo, cluster: u32) -> Result<u32> {
    let size = info.offset_size() as u64;
    if first < size || first % size != 0 {
        return Err(ZimError::InvalidEntry(format!(
            "cluster {cluster} has a malformed offset table (first offset {first})"
        )));
    }
    Ok((first / size - 1) as u32)
}

impl ClusterStore {
    pub fn new(
        reader: Arc<dyn ReadAt>,
        cluster_ptr_pos: u64,
        cluster_count: u32,
        chunk_size: usize,
    ) -> Self {
        Self {
            decompressor: StreamingDecompressor::new(reader.clone(), chunk_size),
            reader,
            cluster_ptr_pos,
            cluster_count,
        }
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Archive offset of a cluster's info byte.
    pub async fn cluster_offset(&self, cluster: u32) -> Result<u64> {
        if cluster >= self.cluster_count {
            return Err(ZimError::InvalidEntry(format!(
                "cluster {cluster} out of range ({} clusters)",
                self.cluster_count
            )));
        }
        let mut buf = [0u8; 8];
        self.reader
            .read_exact_at(self.cluster_ptr_pos + 8 * cluster as u64, &mut buf)
            .await?;
        Ok(LittleEndian::read_u64(&buf))
    }

    pub async fn cluster_info(&self, cluster: u32) -> Result<(u64, ClusterInfo)> {
        let offset = self.cluster_offset(cluster).await?;
        let mut byte = [0u8; 1];
        self.reader.read_exact_at(offset, &mut byte).await?;
        Ok((offset, ClusterInfo::from_u8(byte[0])))
    }

    pub async fn blob_count(&self, cluster: u32) -> Result<u32> {
        let (offset, info) = self.cluster_info(cluster).await?;
        let size = info.offset_size();
        let first = match info.compression {
            Compression::None => {
                let bytes = self.reader.read_vec(offset + 1, size).await?;
                read_offset(&bytes, info)
            }
            compression => {
                let bytes = self
                    .decompressor
                    .read_slice(offset + 1, compression, 0, size)
                    .await?;
                if bytes.len() < size {
                    return Err(ZimError::InvalidEntry(format!(
                        "cluster {cluster} is truncated"
                    )));
                }
                read_offset(&bytes, info)
            }
        };
        blob_count_from(first, info, cluster)
    }

    /// Location of a blob when its cluster is stored uncompressed.
    ///
    /// Returns `None` for compressed clusters.
    pub async fn blob_location(&self, cluster: u32, blob: u32) -> Result<Option<BlobLocation>> {
        let (offset, info) = self.cluster_info(cluster).await?;
        if info.compression != Compression::None {
            return Ok(None);
        }
        let (start, end) = self.raw_blob_bounds(offset, info, cluster, blob).await?;
        Ok(Some(BlobLocation {
            offset: offset + 1 + start,
            size: end - start,
        }))
    }

    async fn raw_blob_bounds(
        &self,
        offset: u64,
        info: ClusterInfo,
        cluster: u32,
        blob: u32,
    ) -> Result<(u64, u64)> {
        let size = info.offset_size();
        let data_start = offset + 1;

        let first = read_offset(&self.reader.read_vec(data_start, size).await?, info);
        let count = blob_count_from(first, info, cluster)?;
        if blob >= count {
            return Err(ZimError::InvalidEntry(format!(
                "blob {blob} out of range in cluster {cluster} ({count} blobs)"
            )));
        }

        let pair = self
            .reader
            .read_vec(data_start + (blob as u64) * size as u64, 2 * size)
            .await?;
        let start = read_offset(&pair[..size], info);
        let end = read_offset(&pair[size..], info);
        if end < start {
            return Err(ZimError::InvalidEntry(format!(
                "blob {blob} in cluster {cluster} has negative size"
            )));
        }
        Ok((start, end))
    }

    /// Extract one blob.
    ///
    /// Compressed clusters are decoded in a single forward pass that stops
    /// after the requested blob. Nothing is cached.
    pub async fn get_blob(&self, cluster: u32, blob: u32) -> Result<Vec<u8>> {
        let (offset, info) = self.cluster_info(cluster).await?;

        if info.compression == Compression::None {
            let (start, end) = self.raw_blob_bounds(offset, info, cluster, blob).await?;
            return self
                .reader
                .read_vec(offset + 1 + start, (end - start) as usize)
                .await;
        }

        let size = info.offset_size();
        let truncated = || ZimError::InvalidEntry(format!("cluster {cluster} is truncated"));
        let mut session = self
            .decompressor
            .session(offset + 1, info.compression)
            .await?;

        let head = session.read_slice(0, size).await?;
        if head.len() < size {
            return Err(truncated());
        }
        let first = read_offset(&head, info);
        let count = blob_count_from(first, info, cluster)?;
        if blob >= count {
            return Err(ZimError::InvalidEntry(format!(
                "blob {blob} out of range in cluster {cluster} ({count} blobs)"
            )));
        }

        // offsets[1..=blob + 1]
        let table_len = (blob as usize + 1) * size;
        let table = session.read_slice(size as u64, table_len).await?;
        if table.len() < table_len {
            return Err(truncated());
        }
        let start = if blob == 0 {
            first
        } else {
            read_offset(&table[(blob as usize - 1) * size..], info)
        };
        let end = read_offset(&table[blob as usize * size..], info);
        if end < start || start < first {
            return Err(ZimError::InvalidEntry(format!(
                "blob {blob} in cluster {cluster} has invalid bounds {start}..{end}"
            )));
        }

        let data = session.read_slice(start, (end - start) as usize).await?;
        if (data.len() as u64) < end - start {
            return Err(truncated());
        }
        debug!(
            "Extracted blob {} of cluster {} ({:?}, {} bytes)",
            blob,
            cluster,
            info.compression,
            data.len()
        );
        Ok(data)
    }
}
