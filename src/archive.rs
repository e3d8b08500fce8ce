//! Append-only builder for uncompressed (stored) ZIP archives.
//!
//! Local blocks are written as entries arrive, so every entry's header offset
//! is known the moment it is appended. The central directory and the end
//! record are produced by [`ZipArchiveBuilder::finish`].

use tracing::debug;

use crate::crc32::crc32;
use crate::error::ArchiveError;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_RECORD_SIGNATURE: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const END_RECORD_LEN: usize = 22;

/// ZIP 2.0, the minimum for plain stored files.
const VERSION: u16 = 20;
const METHOD_STORE: u16 = 0;

struct ZipEntry {
    name: Vec<u8>,
    crc32: u32,
    size: u32,
    offset: u32,
}

#[derive(Default)]
pub struct ZipArchiveBuilder {
    local: Vec<u8>,
    entries: Vec<ZipEntry>,
}

impl ZipArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(ArchiveError::TooManyEntries);
        }
        let name_bytes = name.as_bytes();
        let name_len = u16::try_from(name_bytes.len()).map_err(|_| ArchiveError::NameTooLong {
            name: name.to_string(),
        })?;
        let size = u32::try_from(data.len()).map_err(|_| ArchiveError::TooLarge)?;
        let offset = u32::try_from(self.local.len()).map_err(|_| ArchiveError::TooLarge)?;

        let block_len = LOCAL_HEADER_LEN + name_bytes.len() + data.len();
        if u32::try_from(self.local.len() + block_len).is_err() {
            return Err(ArchiveError::TooLarge);
        }

        let crc = crc32(data);
        let out = &mut self.local;
        out.reserve(block_len);
        put_u32(out, LOCAL_HEADER_SIGNATURE);
        put_u16(out, VERSION);
        put_u16(out, 0); // flags
        put_u16(out, METHOD_STORE);
        put_u16(out, 0); // mod time
        put_u16(out, 0); // mod date
        put_u32(out, crc);
        put_u32(out, size);
        put_u32(out, size);
        put_u16(out, name_len);
        put_u16(out, 0); // extra field length
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(data);

        debug!(name, size, offset, crc, "Archive entry appended");

        self.entries.push(ZipEntry {
            name: name_bytes.to_vec(),
            crc32: crc,
            size,
            offset,
        });
        Ok(())
    }

    /// Local blocks, then the central directory, then the end record.
    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let Self { mut local, entries } = self;

        let expected: u64 = entries
            .iter()
            .map(|e| (LOCAL_HEADER_LEN + e.name.len()) as u64 + e.size as u64)
            .sum();
        if expected != local.len() as u64 {
            return Err(ArchiveError::OffsetMismatch {
                expected,
                actual: local.len() as u64,
            });
        }

        let central_offset = u32::try_from(local.len()).map_err(|_| ArchiveError::TooLarge)?;
        let central_len: usize = entries
            .iter()
            .map(|e| CENTRAL_HEADER_LEN + e.name.len())
            .sum();
        let central_size = u32::try_from(central_len).map_err(|_| ArchiveError::TooLarge)?;
        if u32::try_from(local.len() + central_len + END_RECORD_LEN).is_err() {
            return Err(ArchiveError::TooLarge);
        }
        let count = u16::try_from(entries.len()).map_err(|_| ArchiveError::TooManyEntries)?;

        local.reserve(central_len + END_RECORD_LEN);
        let out = &mut local;
        for entry in &entries {
            put_u32(out, CENTRAL_HEADER_SIGNATURE);
            put_u16(out, VERSION); // made by
            put_u16(out, VERSION); // needed
            put_u16(out, 0); // flags
            put_u16(out, METHOD_STORE);
            put_u16(out, 0); // mod time
            put_u16(out, 0); // mod date
            put_u32(out, entry.crc32);
            put_u32(out, entry.size);
            put_u32(out, entry.size);
            put_u16(out, entry.name.len() as u16);
            put_u16(out, 0); // extra field length
            put_u16(out, 0); // comment length
            put_u16(out, 0); // disk number start
            put_u16(out, 0); // internal attributes
            put_u32(out, 0); // external attributes
            put_u32(out, entry.offset);
            out.extend_from_slice(&entry.name);
        }

        put_u32(out, END_RECORD_SIGNATURE);
        put_u16(out, 0); // this disk
        put_u16(out, 0); // disk with central directory
        put_u16(out, count);
        put_u16(out, count);
        put_u32(out, central_size);
        put_u32(out, central_offset);
        put_u16(out, 0); // comment length

        Ok(local)
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Read};

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn empty_archive_is_just_an_end_record() {
        let bytes = ZipArchiveBuilder::new().finish().unwrap();
        assert_eq!(bytes.len(), END_RECORD_LEN);
        assert_eq!(u32_at(&bytes, 0), END_RECORD_SIGNATURE);
        assert_eq!(u16_at(&bytes, 8), 0);
        assert_eq!(u16_at(&bytes, 10), 0);
        assert_eq!(u32_at(&bytes, 12), 0);
        assert_eq!(u32_at(&bytes, 16), 0);

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn standard_reader_sees_identical_entries() {
        let files: Vec<(&str, Vec<u8>)> = vec![
            ("example_2024-01-02_1.jpg", b"first image bytes".to_vec()),
            ("example_2024-01-02_2.png", Vec::new()),
            ("example_2024-01-02_3.gif", (0..=255u8).cycle().take(5000).collect()),
        ];

        let mut builder = ZipArchiveBuilder::new();
        for (name, data) in &files {
            builder.append(name, data).unwrap();
        }
        assert_eq!(builder.len(), 3);
        let bytes = builder.finish().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), files.len());
        for (i, (name, data)) in files.iter().enumerate() {
            let mut entry = archive.by_index(i).unwrap();
            assert_eq!(entry.name(), *name);
            assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
            assert_eq!(entry.crc32(), crc32(data));
            let mut read = Vec::new();
            entry.read_to_end(&mut read).unwrap();
            assert_eq!(&read, data);
        }
    }

    #[test]
    fn layout_offsets_are_consistent() {
        let mut builder = ZipArchiveBuilder::new();
        builder.append("a.jpg", b"abc").unwrap();
        builder.append("bb.jpg", b"defgh").unwrap();
        let bytes = builder.finish().unwrap();

        let first_block = LOCAL_HEADER_LEN + 5 + 3;
        let second_block = LOCAL_HEADER_LEN + 6 + 5;
        let central_offset = first_block + second_block;
        let central_len = (CENTRAL_HEADER_LEN + 5) + (CENTRAL_HEADER_LEN + 6);
        assert_eq!(bytes.len(), central_offset + central_len + END_RECORD_LEN);

        assert_eq!(u32_at(&bytes, 0), LOCAL_HEADER_SIGNATURE);
        assert_eq!(u32_at(&bytes, first_block), LOCAL_HEADER_SIGNATURE);
        assert_eq!(u32_at(&bytes, 14), crc32(b"abc"));
        assert_eq!(u32_at(&bytes, 18), 3);
        assert_eq!(u32_at(&bytes, 22), 3);
        assert_eq!(u16_at(&bytes, 26), 5);

        let second_central = central_offset + CENTRAL_HEADER_LEN + 5;
        assert_eq!(u32_at(&bytes, central_offset), CENTRAL_HEADER_SIGNATURE);
        assert_eq!(u32_at(&bytes, central_offset + 42), 0);
        assert_eq!(u32_at(&bytes, second_central), CENTRAL_HEADER_SIGNATURE);
        assert_eq!(u32_at(&bytes, second_central + 42), first_block as u32);

        let end = central_offset + central_len;
        assert_eq!(u32_at(&bytes, end), END_RECORD_SIGNATURE);
        assert_eq!(u16_at(&bytes, end + 8), 2);
        assert_eq!(u16_at(&bytes, end + 10), 2);
        assert_eq!(u32_at(&bytes, end + 12), central_len as u32);
        assert_eq!(u32_at(&bytes, end + 16), central_offset as u32);
    }

    #[test]
    fn overlong_name_is_rejected() {
        let name = "x".repeat(u16::MAX as usize + 1);
        let err = ZipArchiveBuilder::new().append(&name, b"").unwrap_err();
        assert!(matches!(err, ArchiveError::NameTooLong { .. }));
    }
}
