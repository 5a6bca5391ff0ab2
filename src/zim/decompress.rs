//! Streaming cluster decompression.
//!
//! A [`StreamingDecompressor`] belongs to one archive and hands out
//! [`DecompressSession`]s, one at a time. A session decodes a single
//! compressed stream starting at a fixed offset of the archive, pulling
//! input in `chunk_size` pieces only when the decoder has consumed the
//! previous piece. Callers ask for windows of the decompressed stream with
//! [`DecompressSession::read_slice`]; windows must move forward, and bytes
//! outside them are dropped as soon as they are produced.
//!
//! Decoders are stateful and can hold large dictionaries (xz in
//! particular), so the per-archive gate keeps at most one session alive.

use std::sync::Arc;

use flate2::{Decompress, FlushDecompress};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use xz2::stream::{Action, Status, Stream};
use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

use super::structures::Compression;
use crate::error::{Result, ZimError};
use crate::io::ReadAt;

/// Compressed bytes fetched per reader call
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024;

/// Outcome of feeding one input chunk to a decoder
#[derive(Debug, Clone, Copy)]
struct Progress {
    consumed: usize,
    produced: usize,
    finished: bool,
}

trait StreamDecoder: Send {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress>;
}

struct XzDecoder(Stream);

impl StreamDecoder for XzDecoder {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let (in_before, out_before) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .process(input, output, Action::Run)
            .map_err(|e| ZimError::Decompression(format!("xz: {e}")))?;
        Ok(Progress {
            consumed: (self.0.total_in() - in_before) as usize,
            produced: (self.0.total_out() - out_before) as usize,
            finished: matches!(status, Status::StreamEnd),
        })
    }
}

struct ZstdDecoder(zstd::stream::raw::Decoder<'static>);

impl StreamDecoder for ZstdDecoder {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);
        let hint = self
            .0
            .run(&mut src, &mut dst)
            .map_err(|e| ZimError::Decompression(format!("zstd: {e}")))?;
        Ok(Progress {
            consumed: src.pos(),
            produced: dst.pos(),
            // 0 means the frame is fully decoded and flushed
            finished: hint == 0,
        })
    }
}

struct ZlibDecoder(Decompress);

impl StreamDecoder for ZlibDecoder {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let (in_before, out_before) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| ZimError::Decompression(format!("zlib: {e}")))?;
        Ok(Progress {
            consumed: (self.0.total_in() - in_before) as usize,
            produced: (self.0.total_out() - out_before) as usize,
            finished: status == flate2::Status::StreamEnd,
        })
    }
}

fn decoder_for(compression: Compression) -> Result<Box<dyn StreamDecoder>> {
    match compression {
        Compression::Xz => {
            let stream = Stream::new_stream_decoder(u64::MAX, 0)
                .map_err(|e| ZimError::Decompression(format!("xz: {e}")))?;
            Ok(Box::new(XzDecoder(stream)))
        }
        Compression::Zstd => {
            let decoder = zstd::stream::raw::Decoder::new()
                .map_err(|e| ZimError::Decompression(format!("zstd: {e}")))?;
            Ok(Box::new(ZstdDecoder(decoder)))
        }
        Compression::Zlib => Ok(Box::new(ZlibDecoder(Decompress::new(true)))),
        other => Err(ZimError::UnsupportedCompression(other.as_u8())),
    }
}

/// Per-archive decompression front-end.
pub struct StreamingDecompressor {
    reader: Arc<dyn ReadAt>,
    chunk_size: usize,
    gate: Arc<Mutex<()>>,
}

impl StreamingDecompressor {
    pub fn new(reader: Arc<dyn ReadAt>, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Open a session over the stream starting at logical offset `start`.
    ///
    /// Waits until no other session of this decompressor is alive.
    pub async fn session(&self, start: u64, compression: Compression) -> Result<DecompressSession> {
        let guard = self.gate.clone().lock_owned().await;
        let decoder = decoder_for(compression)?;
        Ok(DecompressSession {
            _guard: guard,
            reader: self.reader.clone(),
            decoder,
            scratch: vec![0u8; self.chunk_size],
            chunk_size: self.chunk_size,
            source_pos: start,
            source_done: false,
            input: Vec::new(),
            input_pos: 0,
            produced: 0,
            cursor: 0,
            pending: Vec::new(),
            finished: false,
        })
    }

    /// Decode `length` bytes at `offset` of the stream starting at `start`,
    /// in a session of its own.
    pub async fn read_slice(
        &self,
        start: u64,
        compression: Compression,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        self.session(start, compression)
            .await?
            .read_slice(offset, length)
            .await
    }
}

/// State of one decompression pass.
pub struct DecompressSession {
    _guard: OwnedMutexGuard<()>,
    reader: Arc<dyn ReadAt>,
    decoder: Box<dyn StreamDecoder>,
    scratch: Vec<u8>,
    chunk_size: usize,
    /// Next archive offset to fetch compressed input from
    source_pos: u64,
    source_done: bool,
    input: Vec<u8>,
    input_pos: usize,
    /// Decompressed bytes emitted by the decoder so far
    produced: u64,
    /// Stream position below which output is no longer wanted
    cursor: u64,
    /// Wanted output not yet handed out; ends at `produced`
    pending: Vec<u8>,
    finished: bool,
}

impl DecompressSession {
    /// Return `length` decompressed bytes starting at stream offset `offset`.
    ///
    /// The result is shorter than `length` only when the stream ends first.
    /// Offsets must not go backwards or overlap a previous slice.
    pub async fn read_slice(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if offset < self.cursor {
            return Err(ZimError::InvalidEntry(format!(
                "decompression read at {offset} is behind stream position {}",
                self.cursor
            )));
        }

        self.cursor = offset;
        let pending_start = self.produced - self.pending.len() as u64;
        if offset > pending_start {
            let skip = ((offset - pending_start) as usize).min(self.pending.len());
            self.pending.drain(..skip);
        }

        let end = offset + length as u64;
        while self.produced < end && !self.finished {
            self.step().await?;
            tokio::task::yield_now().await;
        }

        let available = self.produced.min(end).saturating_sub(offset) as usize;
        let slice: Vec<u8> = self.pending.drain(..available).collect();
        self.cursor = end;
        trace!(
            "Decompressed slice {}+{} ({} bytes returned)",
            offset,
            length,
            slice.len()
        );
        Ok(slice)
    }

    async fn step(&mut self) -> Result<()> {
        if self.input_pos == self.input.len() && !self.source_done {
            let remaining = self.reader.size().saturating_sub(self.source_pos);
            let want = (self.chunk_size as u64).min(remaining) as usize;
            if want == 0 {
                self.source_done = true;
                self.input.clear();
            } else {
                self.input = self.reader.read_vec(self.source_pos, want).await?;
                self.source_pos += want as u64;
            }
            self.input_pos = 0;
        }

        let progress = self
            .decoder
            .decode(&self.input[self.input_pos..], &mut self.scratch)?;
        self.input_pos += progress.consumed;

        let chunk_start = self.produced;
        self.produced += progress.produced as u64;
        let skip = (self.cursor.saturating_sub(chunk_start) as usize).min(progress.produced);
        self.pending
            .extend_from_slice(&self.scratch[skip..progress.produced]);

        if progress.finished {
            self.finished = true;
        } else if progress.consumed == 0 && progress.produced == 0 {
            let reason = if self.source_done {
                "compressed stream ended unexpectedly"
            } else {
                "decoder made no progress"
            };
            return Err(ZimError::Decompression(reason.into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::io::Write;
    use std::time::Duration;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7 + i / 13) % 256) as u8).collect()
    }

    fn compress(compression: Compression, data: &[u8]) -> Vec<u8> {
        match compression {
            Compression::Xz => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            Compression::Zstd => zstd::encode_all(data, 3).unwrap(),
            Compression::Zlib => {
                let mut enc =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            _ => unreachable!(),
        }
    }

    /// Compressed stream placed after a 7 byte prefix, as inside an archive
    fn decompressor_for(compression: Compression, data: &[u8], chunk: usize) -> StreamingDecompressor {
        let mut file = b"prefix!".to_vec();
        file.extend(compress(compression, data));
        StreamingDecompressor::new(Arc::new(MemoryReader::new(file)), chunk)
    }

    #[tokio::test]
    async fn slices_match_original_for_every_codec() {
        let data = sample(40_000);
        for compression in [Compression::Xz, Compression::Zstd, Compression::Zlib] {
            let dec = decompressor_for(compression, &data, 512);
            let slice = dec.read_slice(7, compression, 12_345, 1_000).await.unwrap();
            assert_eq!(slice, &data[12_345..13_345], "{compression:?}");
        }
    }

    #[tokio::test]
    async fn session_reads_move_forward() {
        let data = sample(20_000);
        let dec = decompressor_for(Compression::Zstd, &data, 100);
        let mut session = dec.session(7, Compression::Zstd).await.unwrap();

        assert_eq!(session.read_slice(0, 4).await.unwrap(), &data[0..4]);
        assert_eq!(session.read_slice(4, 8).await.unwrap(), &data[4..12]);
        assert_eq!(
            session.read_slice(15_000, 10).await.unwrap(),
            &data[15_000..15_010]
        );

        let err = session.read_slice(100, 1).await.unwrap_err();
        assert!(matches!(err, ZimError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn read_past_end_of_stream_is_short() {
        let data = sample(300);
        let dec = decompressor_for(Compression::Xz, &data, 64);
        let slice = dec.read_slice(7, Compression::Xz, 250, 100).await.unwrap();
        assert_eq!(slice, &data[250..]);
    }

    #[tokio::test]
    async fn corrupt_stream_reports_codec_error() {
        let mut file = b"prefix!".to_vec();
        file.extend_from_slice(&[0xFD, b'7', b'z', b'X', b'Z', 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        file.extend_from_slice(&[0x55; 64]);
        let dec = StreamingDecompressor::new(Arc::new(MemoryReader::new(file)), 16);
        let err = dec.read_slice(7, Compression::Xz, 0, 10).await.unwrap_err();
        assert!(matches!(err, ZimError::Decompression(_)), "{err:?}");
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let data = sample(50_000);
        let mut file = b"prefix!".to_vec();
        let compressed = compress(Compression::Zlib, &data);
        file.extend_from_slice(&compressed[..compressed.len() / 2]);
        let dec = StreamingDecompressor::new(Arc::new(MemoryReader::new(file)), 256);
        let err = dec
            .read_slice(7, Compression::Zlib, 0, data.len())
            .await
            .unwrap_err();
        assert!(matches!(err, ZimError::Decompression(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unsupported_codec_is_rejected() {
        let dec = decompressor_for(Compression::Zstd, b"abc", 16);
        let err = dec.read_slice(7, Compression::Bzip2, 0, 1).await.unwrap_err();
        assert!(matches!(err, ZimError::UnsupportedCompression(3)));
    }

    #[tokio::test]
    async fn only_one_session_at_a_time() {
        let dec = decompressor_for(Compression::Zstd, &sample(100), 16);
        let first = dec.session(7, Compression::Zstd).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            dec.session(7, Compression::Zstd),
        )
        .await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(
            Duration::from_millis(500),
            dec.session(7, Compression::Zstd),
        )
        .await;
        assert!(second.is_ok());
    }
}
