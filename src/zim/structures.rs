use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Result, ZimError};

/// Mimetype sentinel marking a redirect entry
pub const REDIRECT_MIMETYPE: u16 = 0xFFFF;
/// Deprecated link-target entry
pub const LINKTARGET_MIMETYPE: u16 = 0xFFFE;
/// Deprecated deleted entry
pub const DELETED_MIMETYPE: u16 = 0xFFFD;

/// ZIM file header - 80 bytes
#[derive(Debug, Clone)]
pub struct ZimHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: [u8; 16],
    pub entry_count: u32,
    pub cluster_count: u32,
    pub url_ptr_pos: u64,
    pub title_ptr_pos: u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos: u64,
    pub main_page: Option<u32>,
    pub layout_page: Option<u32>,
    pub checksum_pos: u64,
}

impl ZimHeader {
    pub const MAGIC: u32 = 0x044D_495A;
    pub const SIZE: usize = 80;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ZimError::InvalidHeader(format!(
                "header is {} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != Self::MAGIC {
            return Err(ZimError::InvalidHeader(format!(
                "bad magic number {magic:#010x}"
            )));
        }

        let major_version = cursor.read_u16::<LittleEndian>()?;
        let minor_version = cursor.read_u16::<LittleEndian>()?;
        if !(5..=6).contains(&major_version) {
            return Err(ZimError::InvalidHeader(format!(
                "unsupported major version {major_version}"
            )));
        }

        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;

        let entry_count = cursor.read_u32::<LittleEndian>()?;
        let cluster_count = cursor.read_u32::<LittleEndian>()?;
        let url_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let title_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let cluster_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let mime_list_pos = cursor.read_u64::<LittleEndian>()?;
        let main_page = cursor.read_u32::<LittleEndian>()?;
        let layout_page = cursor.read_u32::<LittleEndian>()?;
        let checksum_pos = cursor.read_u64::<LittleEndian>()?;

        let index = |v: u32| (v != u32::MAX).then_some(v);

        Ok(Self {
            major_version,
            minor_version,
            uuid,
            entry_count,
            cluster_count,
            url_ptr_pos,
            title_ptr_pos,
            cluster_ptr_pos,
            mime_list_pos,
            main_page: index(main_page),
            layout_page: index(layout_page),
            checksum_pos,
        })
    }

    /// Namespace holding articles: `'C'` for the single-namespace layout
    /// (minor version 1 and later), `'A'` for the legacy layout.
    pub fn content_namespace(&self) -> char {
        if self.minor_version >= 1 { 'C' } else { 'A' }
    }

    pub fn uuid_string(&self) -> String {
        self.uuid.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Cluster compression, low nibble of the cluster info byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Bzip2,
    Xz,
    Zstd,
    Unknown(u8),
}

impl Compression {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 | 1 => Compression::None,
            2 => Compression::Zlib,
            3 => Compression::Bzip2,
            4 => Compression::Xz,
            5 => Compression::Zstd,
            _ => Compression::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Compression::None => 1,
            Compression::Zlib => 2,
            Compression::Bzip2 => 3,
            Compression::Xz => 4,
            Compression::Zstd => 5,
            Compression::Unknown(v) => *v,
        }
    }
}

/// Decoded cluster info byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterInfo {
    pub compression: Compression,
    /// Offsets are 8 bytes wide instead of 4
    pub extended: bool,
}

impl ClusterInfo {
    pub fn from_u8(value: u8) -> Self {
        Self {
            compression: Compression::from_u8(value & 0x0F),
            extended: value & 0x10 != 0,
        }
    }

    pub fn offset_size(&self) -> usize {
        if self.extended { 8 } else { 4 }
    }
}

/// Where an entry's payload lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Content {
        mimetype: String,
        cluster: u32,
        blob: u32,
    },
    Redirect {
        /// URL index of the entry this one points to
        target: u32,
    },
}

/// Parsed directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Position of this entry in the URL pointer list
    pub url_index: u32,
    pub namespace: char,
    pub url: String,
    pub title: String,
    pub revision: u32,
    pub kind: EntryKind,
}

impl DirEntry {
    /// Fixed part of a content record: mimetype, parameter length, namespace,
    /// revision, cluster, blob
    pub const CONTENT_HEADER_SIZE: usize = 16;
    pub const REDIRECT_HEADER_SIZE: usize = 12;

    /// Parse a record from `data`, which must start at the record and hold
    /// at least the url and title terminators.
    pub fn from_bytes(data: &[u8], url_index: u32, mimetypes: &[String]) -> Result<Self> {
        // A short fixed part is a broken entry, not an I/O failure
        let truncated =
            |_: std::io::Error| ZimError::InvalidEntry(format!("entry {url_index} is truncated"));

        let mut cursor = Cursor::new(data);
        let mimetype = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let _parameter_len = cursor.read_u8().map_err(truncated)?;
        let namespace = cursor.read_u8().map_err(truncated)? as char;
        let revision = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

        let kind = match mimetype {
            REDIRECT_MIMETYPE => EntryKind::Redirect {
                target: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            },
            LINKTARGET_MIMETYPE | DELETED_MIMETYPE => {
                return Err(ZimError::InvalidEntry(format!(
                    "entry {url_index} uses deprecated mimetype {mimetype:#06x}"
                )));
            }
            _ => {
                let mimetype = mimetypes
                    .get(mimetype as usize)
                    .cloned()
                    .ok_or_else(|| {
                        ZimError::InvalidEntry(format!(
                            "entry {url_index} has unknown mimetype index {mimetype}"
                        ))
                    })?;
                EntryKind::Content {
                    mimetype,
                    cluster: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
                    blob: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
                }
            }
        };

        let mut pos = cursor.position() as usize;
        let url = read_nul_string(data, &mut pos)
            .ok_or_else(|| ZimError::InvalidEntry(format!("entry {url_index} has no url")))?;
        let title = read_nul_string(data, &mut pos)
            .ok_or_else(|| ZimError::InvalidEntry(format!("entry {url_index} has no title")))?;

        Ok(Self {
            url_index,
            namespace,
            url,
            title,
            revision,
            kind,
        })
    }

    /// Title used for display and title ordering: the url when the title is empty
    pub fn title_or_url(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    /// Full path, `namespace/url`
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.url)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, EntryKind::Redirect { .. })
    }

    pub fn mimetype(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Content { mimetype, .. } => Some(mimetype),
            EntryKind::Redirect { .. } => None,
        }
    }

    pub fn redirect_target(&self) -> Option<u32> {
        match self.kind {
            EntryKind::Redirect { target } => Some(target),
            EntryKind::Content { .. } => None,
        }
    }
}

/// Read a NUL-terminated UTF-8 string starting at `*pos`, advancing past the NUL.
///
/// Returns `None` when no terminator is found.
pub(crate) fn read_nul_string(data: &[u8], pos: &mut usize) -> Option<String> {
    let rest = data.get(*pos..)?;
    let len = rest.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&rest[..len]).into_owned();
    *pos += len + 1;
    Some(s)
}

/// Parse the mime list: NUL-terminated strings closed by an empty string.
///
/// Returns `None` when `data` ends before the closing empty string.
pub(crate) fn parse_mime_list(data: &[u8]) -> Option<Vec<String>> {
    let mut types = Vec::new();
    let mut pos = 0;
    loop {
        let s = read_nul_string(data, &mut pos)?;
        if s.is_empty() {
            return Some(types);
        }
        types.push(s);
    }
}
