//! Play Counts log reader
//!
//! One fixed-size entry per track position in the database. Unlike the
//! track database there is no resynchronization strategy, so the declared
//! sizes must account for the file exactly; any mismatch is a hard format
//! error. Entry sizes vary between firmware generations - entries shorter
//! than the decoded prefix are zero-padded, longer ones carry fields this
//! reader does not surface.

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::{binrw, BinRead};

use crate::error::{Error, Result};
use crate::time::MacTime;

#[binrw]
#[brw(little, magic = b"mhdp")]
struct FileHeader {
    header_size: u32,
    entry_size: u32,
    entry_count: u32,
}

/// The decoded 28-byte entry prefix.
#[binrw]
#[brw(little)]
struct RawEntry {
    play_count: u32,
    last_played: u32,
    bookmark: u32,
    rating: u32,
    reserved: u32,
    skip_count: u32,
    last_skipped: u32,
}

/// One play-count entry, times already converted to local Unix time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayCountEntry {
    /// Track position in the database this entry belongs to.
    pub index: u32,
    pub play_count: u32,
    pub last_played: i64,
    pub bookmark: u32,
    pub rating: u32,
    pub skip_count: u32,
    pub last_skipped: i64,
}

/// Iterator over the entries of a play-count log.
pub struct PlayCountsReader<R> {
    inner: R,
    entry_size: usize,
    index: u32,
    mac: MacTime,
}

impl<R: Read + Seek> PlayCountsReader<R> {
    /// Validate the header and the exact file size.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_time(inner, MacTime::local())
    }

    /// Same as [`PlayCountsReader::new`] with an explicit time context.
    pub fn with_time(mut inner: R, mac: MacTime) -> Result<Self> {
        let file_size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        if file_size < 16 {
            return Err(Error::Format("play counts file too small".into()));
        }
        let header = FileHeader::read(&mut inner)?;
        let declared = u64::from(header.header_size)
            + u64::from(header.entry_size) * u64::from(header.entry_count);
        if file_size != declared {
            return Err(Error::Format(format!(
                "play counts size mismatch: declared {declared}, actual {file_size}"
            )));
        }
        inner.seek(SeekFrom::Start(u64::from(header.header_size)))?;
        Ok(Self {
            inner,
            entry_size: header.entry_size as usize,
            index: 0,
            mac,
        })
    }

    fn decode(&mut self, prefix: [u8; 28]) -> Result<PlayCountEntry> {
        let raw = RawEntry::read(&mut Cursor::new(&prefix[..]))?;
        let entry = PlayCountEntry {
            index: self.index,
            play_count: raw.play_count,
            last_played: self.mac.to_unix(raw.last_played),
            bookmark: raw.bookmark,
            rating: raw.rating,
            skip_count: raw.skip_count,
            last_skipped: self.mac.to_unix(raw.last_skipped),
        };
        self.index += 1;
        Ok(entry)
    }
}

impl<R: Read + Seek> Iterator for PlayCountsReader<R> {
    type Item = Result<PlayCountEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut raw = vec![0u8; self.entry_size];
        let mut filled = 0;
        while filled < raw.len() {
            match self.inner.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Some(Err(e.into())),
            }
        }
        if filled == 0 {
            return None;
        }
        // short trailing entries decode zero-padded
        let mut prefix = [0u8; 28];
        let n = filled.min(28);
        prefix[..n].copy_from_slice(&raw[..n]);
        Some(self.decode(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_file(entry_size: u32, entries: &[[u32; 7]]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"mhdp");
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&entry_size.to_le_bytes());
        data.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            let mut raw = Vec::new();
            for field in entry {
                raw.extend_from_slice(&field.to_le_bytes());
            }
            raw.resize(entry_size as usize, 0);
            data.extend_from_slice(&raw[..entry_size as usize]);
        }
        data
    }

    #[test]
    fn test_reads_entries() {
        let data = make_file(28, &[[3, 0, 0, 80, 0, 1, 0], [0, 0, 500, 0, 0, 0, 0]]);
        let entries: Vec<PlayCountEntry> =
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(0))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[0].play_count, 3);
        assert_eq!(entries[0].rating, 80);
        assert_eq!(entries[0].skip_count, 1);
        assert_eq!(entries[1].index, 1);
        assert_eq!(entries[1].bookmark, 500);
    }

    #[test]
    fn test_size_mismatch_is_a_format_error() {
        let mut data = make_file(28, &[[1, 0, 0, 0, 0, 0, 0]]);
        data.push(0);
        assert!(matches!(
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(0)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_wrong_magic_is_a_format_error() {
        let mut data = make_file(28, &[]);
        data[..4].copy_from_slice(b"nope");
        assert!(matches!(
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(0)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_short_entries_decode_zero_padded() {
        // twelve-byte entries only carry play count, last played, bookmark
        let data = make_file(12, &[[9, 0, 77, 0, 0, 0, 0]]);
        let entries: Vec<PlayCountEntry> =
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(0))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(entries[0].play_count, 9);
        assert_eq!(entries[0].bookmark, 77);
        assert_eq!(entries[0].rating, 0);
        assert_eq!(entries[0].skip_count, 0);
    }

    #[test]
    fn test_oversized_entries_skip_trailing_fields() {
        let data = make_file(40, &[[1, 0, 0, 0, 0, 2, 0], [3, 0, 0, 0, 0, 4, 0]]);
        let entries: Vec<PlayCountEntry> =
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(0))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].play_count, 3);
        assert_eq!(entries[1].skip_count, 4);
    }

    #[test]
    fn test_time_fields_convert_from_device_epoch() {
        let device_time = MacTime::with_offset(3600).to_mac(1_000_000);
        let data = make_file(28, &[[1, device_time, 0, 0, 0, 0, 0]]);
        let entries: Vec<PlayCountEntry> =
            PlayCountsReader::with_time(Cursor::new(data), MacTime::with_offset(3600))
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(entries[0].last_played, 1_000_000);
    }
}
