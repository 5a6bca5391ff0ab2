//! In-memory ZIM writer for tests.
//!
//! Produces small but structurally complete archives: header, mime list,
//! URL and title pointer lists, directory entries and clusters. Entries in
//! the `X` namespace (listings, full-text markers) go into a separate
//! uncompressed cluster, the way real writers store them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use runzim::{Archive, ArchiveOptions, MemoryReader, ReadAt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zlib,
    Xz,
    Zstd,
}

impl Codec {
    fn info_byte(self) -> u8 {
        match self {
            Codec::None => 1,
            Codec::Zlib => 2,
            Codec::Xz => 4,
            Codec::Zstd => 5,
        }
    }

    fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Codec::None => data.to_vec(),
            Codec::Zlib => {
                let mut enc =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            Codec::Xz => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            Codec::Zstd => zstd::encode_all(data, 3).unwrap(),
        }
    }
}

#[derive(Debug, Clone)]
enum Body {
    Content { mimetype: String, data: Vec<u8> },
    Redirect { target: String },
}

#[derive(Debug, Clone)]
struct Item {
    /// `None` means the content namespace of the archive
    namespace: Option<char>,
    url: String,
    title: String,
    body: Body,
}

pub struct ZimBuilder {
    minor_version: u16,
    codec: Codec,
    blobs_per_cluster: usize,
    extended: bool,
    listing: bool,
    compress_index: bool,
    main_page: Option<String>,
    items: Vec<Item>,
}

impl Default for ZimBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZimBuilder {
    pub fn new() -> Self {
        Self {
            minor_version: 1,
            codec: Codec::Zstd,
            blobs_per_cluster: 4,
            extended: false,
            listing: false,
            compress_index: false,
            main_page: None,
            items: Vec::new(),
        }
    }

    /// 0 for the legacy `A` namespace layout, 1 for `C`
    pub fn minor_version(mut self, minor: u16) -> Self {
        self.minor_version = minor;
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn blobs_per_cluster(mut self, count: usize) -> Self {
        self.blobs_per_cluster = count.max(1);
        self
    }

    /// Use 64-bit blob offsets
    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Write an `X/listing/titleOrdered/v1` article listing
    pub fn with_listing(mut self) -> Self {
        self.listing = true;
        self
    }

    /// Store the `X` entries with the archive codec instead of raw
    pub fn compress_index_cluster(mut self) -> Self {
        self.compress_index = true;
        self
    }

    /// Main page as a full `namespace/url` path
    pub fn main_page(mut self, path: &str) -> Self {
        self.main_page = Some(path.to_string());
        self
    }

    /// HTML article in the content namespace
    pub fn article(self, url: &str, title: &str, html: &str) -> Self {
        self.push(None, url, title, Body::Content {
            mimetype: "text/html".into(),
            data: html.as_bytes().to_vec(),
        })
    }

    pub fn content(self, ns: char, url: &str, title: &str, mimetype: &str, data: &[u8]) -> Self {
        self.push(Some(ns), url, title, Body::Content {
            mimetype: mimetype.into(),
            data: data.to_vec(),
        })
    }

    /// Redirect from a content-namespace url to a full `namespace/url` path
    pub fn redirect(self, url: &str, title: &str, target: &str) -> Self {
        self.push(None, url, title, Body::Redirect {
            target: target.into(),
        })
    }

    pub fn redirect_in(self, ns: char, url: &str, title: &str, target: &str) -> Self {
        self.push(Some(ns), url, title, Body::Redirect {
            target: target.into(),
        })
    }

    pub fn metadata(self, name: &str, value: &str) -> Self {
        self.content('M', name, "", "text/plain", value.as_bytes())
    }

    /// Marker entry advertising an embedded full-text index
    pub fn fulltext_index(self) -> Self {
        self.content('X', "fulltext/xapian", "", "application/octet-stream", b"xapian")
    }

    fn push(mut self, namespace: Option<char>, url: &str, title: &str, body: Body) -> Self {
        self.items.push(Item {
            namespace,
            url: url.to_string(),
            title: title.to_string(),
            body,
        });
        self
    }

    fn content_namespace(&self) -> char {
        if self.minor_version >= 1 { 'C' } else { 'A' }
    }

    pub fn build(&self) -> Vec<u8> {
        let cns = self.content_namespace();
        let mut items: Vec<(char, Item)> = self
            .items
            .iter()
            .map(|item| (item.namespace.unwrap_or(cns), item.clone()))
            .collect();

        let article_count = items
            .iter()
            .filter(|(ns, item)| *ns == cns && matches!(item.body, Body::Content { .. }))
            .count();
        if self.listing {
            items.push((
                'X',
                Item {
                    namespace: Some('X'),
                    url: "listing/titleOrdered/v1".into(),
                    title: String::new(),
                    body: Body::Content {
                        mimetype: "application/octet-stream+zimlisting".into(),
                        data: vec![0; article_count * 4],
                    },
                },
            ));
        }

        // URL order
        items.sort_by(|a, b| (a.0, &a.1.url).cmp(&(b.0, &b.1.url)));
        let index_of: HashMap<String, u32> = items
            .iter()
            .enumerate()
            .map(|(i, (ns, item))| (format!("{ns}/{}", item.url), i as u32))
            .collect();

        // Title order
        let title_key = |i: usize| {
            let (ns, item) = &items[i];
            let title = if item.title.is_empty() {
                &item.url
            } else {
                &item.title
            };
            (*ns, title.clone())
        };
        let mut title_order: Vec<usize> = (0..items.len()).collect();
        title_order.sort_by_key(|&i| title_key(i));

        if self.listing {
            let articles: Vec<u8> = title_order
                .iter()
                .filter(|&&i| items[i].0 == cns && matches!(items[i].1.body, Body::Content { .. }))
                .flat_map(|&i| (i as u32).to_le_bytes())
                .collect();
            let listing = index_of["X/listing/titleOrdered/v1"] as usize;
            if let Body::Content { data, .. } = &mut items[listing].1.body {
                *data = articles;
            }
        }

        // Mime types in first-use order
        let mut mimetypes: Vec<String> = Vec::new();
        for (_, item) in &items {
            if let Body::Content { mimetype, .. } = &item.body {
                if !mimetypes.contains(mimetype) {
                    mimetypes.push(mimetype.clone());
                }
            }
        }

        // Clusters: compressed ones for regular content, one raw cluster for X/
        let mut clusters: Vec<(Codec, Vec<Vec<u8>>)> = Vec::new();
        let mut location: HashMap<usize, (u32, u32)> = HashMap::new();
        let mut current: Vec<Vec<u8>> = Vec::new();
        let mut current_items: Vec<usize> = Vec::new();
        let mut raw: Vec<Vec<u8>> = Vec::new();
        let mut raw_items: Vec<usize> = Vec::new();
        for (i, (ns, item)) in items.iter().enumerate() {
            let Body::Content { data, .. } = &item.body else {
                continue;
            };
            if *ns == 'X' {
                raw.push(data.clone());
                raw_items.push(i);
                continue;
            }
            current.push(data.clone());
            current_items.push(i);
            if current.len() == self.blobs_per_cluster {
                flush_cluster(
                    &mut clusters,
                    &mut location,
                    self.codec,
                    &mut current,
                    &mut current_items,
                );
            }
        }
        if !current.is_empty() {
            flush_cluster(
                &mut clusters,
                &mut location,
                self.codec,
                &mut current,
                &mut current_items,
            );
        }
        if !raw.is_empty() {
            let codec = if self.compress_index {
                self.codec
            } else {
                Codec::None
            };
            flush_cluster(
                &mut clusters,
                &mut location,
                codec,
                &mut raw,
                &mut raw_items,
            );
        }

        // Directory entries
        let dirents: Vec<Vec<u8>> = items
            .iter()
            .enumerate()
            .map(|(i, (ns, item))| {
                let mut record = Vec::new();
                match &item.body {
                    Body::Content { mimetype, .. } => {
                        let mime = mimetypes.iter().position(|m| m == mimetype).unwrap() as u16;
                        let (cluster, blob) = location[&i];
                        record.extend_from_slice(&mime.to_le_bytes());
                        record.push(0);
                        record.push(*ns as u8);
                        record.extend_from_slice(&0u32.to_le_bytes());
                        record.extend_from_slice(&cluster.to_le_bytes());
                        record.extend_from_slice(&blob.to_le_bytes());
                    }
                    Body::Redirect { target } => {
                        let target = *index_of
                            .get(target)
                            .unwrap_or_else(|| panic!("redirect target {target} missing"));
                        record.extend_from_slice(&0xFFFFu16.to_le_bytes());
                        record.push(0);
                        record.push(*ns as u8);
                        record.extend_from_slice(&0u32.to_le_bytes());
                        record.extend_from_slice(&target.to_le_bytes());
                    }
                }
                record.extend_from_slice(item.url.as_bytes());
                record.push(0);
                record.extend_from_slice(item.title.as_bytes());
                record.push(0);
                record
            })
            .collect();

        let cluster_bytes: Vec<Vec<u8>> = clusters
            .iter()
            .map(|(codec, blobs)| encode_cluster(*codec, blobs, self.extended))
            .collect();

        // Layout
        let mut mime_list = Vec::new();
        for mime in &mimetypes {
            mime_list.extend_from_slice(mime.as_bytes());
            mime_list.push(0);
        }
        mime_list.push(0);

        let entry_count = items.len() as u64;
        let mime_list_pos = 80u64;
        let url_ptr_pos = mime_list_pos + mime_list.len() as u64;
        let title_ptr_pos = url_ptr_pos + entry_count * 8;
        let dirents_pos = title_ptr_pos + entry_count * 4;
        let mut dirent_offsets = Vec::new();
        let mut pos = dirents_pos;
        for record in &dirents {
            dirent_offsets.push(pos);
            pos += record.len() as u64;
        }
        let cluster_ptr_pos = pos;
        let mut cluster_offsets = Vec::new();
        let mut pos = cluster_ptr_pos + cluster_bytes.len() as u64 * 8;
        for cluster in &cluster_bytes {
            cluster_offsets.push(pos);
            pos += cluster.len() as u64;
        }
        let checksum_pos = pos;

        let main_page = self
            .main_page
            .as_ref()
            .map(|path| index_of[path])
            .unwrap_or(u32::MAX);

        let mut out = Vec::new();
        out.extend_from_slice(&0x044D_495Au32.to_le_bytes());
        out.extend_from_slice(&6u16.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&[0x5a; 16]);
        out.extend_from_slice(&(entry_count as u32).to_le_bytes());
        out.extend_from_slice(&(cluster_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&url_ptr_pos.to_le_bytes());
        out.extend_from_slice(&title_ptr_pos.to_le_bytes());
        out.extend_from_slice(&cluster_ptr_pos.to_le_bytes());
        out.extend_from_slice(&mime_list_pos.to_le_bytes());
        out.extend_from_slice(&main_page.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&checksum_pos.to_le_bytes());
        assert_eq!(out.len(), 80);

        out.extend_from_slice(&mime_list);
        for offset in &dirent_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for &i in &title_order {
            out.extend_from_slice(&(i as u32).to_le_bytes());
        }
        for record in &dirents {
            out.extend_from_slice(record);
        }
        for offset in &cluster_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for cluster in &cluster_bytes {
            out.extend_from_slice(cluster);
        }
        out.extend_from_slice(&[0u8; 16]);
        out
    }

    pub async fn open(&self) -> Archive {
        self.open_with(ArchiveOptions::default()).await
    }

    pub async fn open_with(&self, options: ArchiveOptions) -> Archive {
        Archive::open(vec![memory_part(self.build())], options)
            .await
            .unwrap()
    }
}

fn flush_cluster(
    clusters: &mut Vec<(Codec, Vec<Vec<u8>>)>,
    location: &mut HashMap<usize, (u32, u32)>,
    codec: Codec,
    blobs: &mut Vec<Vec<u8>>,
    items: &mut Vec<usize>,
) {
    let cluster = clusters.len() as u32;
    for (blob, item) in items.drain(..).enumerate() {
        location.insert(item, (cluster, blob as u32));
    }
    clusters.push((codec, std::mem::take(blobs)));
}

fn encode_cluster(codec: Codec, blobs: &[Vec<u8>], extended: bool) -> Vec<u8> {
    let width = if extended { 8 } else { 4 };
    let mut body = Vec::new();
    let mut offset = ((blobs.len() + 1) * width) as u64;
    let mut offsets = vec![offset];
    for blob in blobs {
        offset += blob.len() as u64;
        offsets.push(offset);
    }
    for offset in offsets {
        if extended {
            body.extend_from_slice(&offset.to_le_bytes());
        } else {
            body.extend_from_slice(&(offset as u32).to_le_bytes());
        }
    }
    for blob in blobs {
        body.extend_from_slice(blob);
    }

    let info = codec.info_byte() | if extended { 0x10 } else { 0 };
    let mut out = vec![info];
    out.extend(codec.compress(&body));
    out
}

pub fn memory_part(bytes: Vec<u8>) -> Arc<dyn ReadAt> {
    Arc::new(MemoryReader::new(bytes))
}

/// Cut `bytes` into consecutive parts of at most `part_size` bytes.
pub fn split(bytes: &[u8], part_size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(part_size).map(<[u8]>::to_vec).collect()
}

/// Name of the `n`th split part of `stem` (`wiki.zimaa`, `wiki.zimab`, …)
pub fn part_name(stem: &str, n: usize) -> String {
    let first = (b'a' + (n / 26) as u8) as char;
    let second = (b'a' + (n % 26) as u8) as char;
    format!("{stem}.zim{first}{second}")
}
