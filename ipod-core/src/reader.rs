//! Tolerant reader for the on-device track database
//!
//! Decoding is forward-only over any `Read` source. Outer sections are
//! located by skipping siblings of a declared size until the track-list
//! discriminator appears, which tolerates extra or reordered sections from
//! newer firmware. Inside a track record, string sub-objects are walked by
//! their own declared sizes (they vary), and unknown sub-object types are
//! size-skipped without being surfaced.

use std::io::Read;

use tracing::debug;

use crate::error::{Error, Result};

/// String values recovered from one track record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackEntry {
    pub track_number: Option<u32>,
    pub title: Option<String>,
    pub path: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub file_type: Option<String>,
    pub comment: Option<String>,
    pub composer: Option<String>,
}

/// Iterator over the track records of a database.
pub struct DatabaseReader<R> {
    inner: R,
}

impl<R: Read> DatabaseReader<R> {
    /// Walk the outer headers down to the track list.
    pub fn new(mut inner: R) -> Result<Self> {
        read_header(&mut inner, b"mhbd")?;
        loop {
            let header = read_header(&mut inner, b"mhsd")?;
            if header.len() < 16 {
                return Err(Error::Format("short section header".into()));
            }
            let total = le32(&header, 8) as usize;
            let discriminator = le32(&header, 12);
            if discriminator == 1 {
                break;
            }
            if total < header.len() {
                return Err(Error::Format("section size smaller than header".into()));
            }
            debug!(discriminator, "skipping section");
            skip(&mut inner, (total - header.len()) as u64)?;
        }
        read_header(&mut inner, b"mhlt")?;
        Ok(Self { inner })
    }

    fn read_track(&mut self, header: &[u8]) -> Result<TrackEntry> {
        let total = le32(header, 8) as usize;
        let payload_len = total
            .checked_sub(header.len())
            .ok_or_else(|| Error::Format("track size smaller than header".into()))?;
        let mut payload = vec![0u8; payload_len];
        self.inner
            .read_exact(&mut payload)
            .map_err(|_| Error::Format("truncated track record".into()))?;
        if payload.len() < 48 {
            return Err(Error::Format("track record too short".into()));
        }

        let mut entry = TrackEntry::default();
        let track_number = le32(header, 44);
        if track_number != 0 {
            entry.track_number = Some(track_number);
        }

        let mut rest = payload.as_slice();
        while rest.len() > 40 && &rest[..4] == b"mhod" {
            let size = le32(rest, 8) as usize;
            let kind = le32(rest, 12);
            let end = size.min(rest.len());
            if end < 40 {
                break;
            }
            let value = decode_utf16le(&rest[40..end]);
            match kind {
                1 => entry.title = Some(value),
                2 => entry.path = Some(value),
                3 => entry.album = Some(value),
                4 => entry.artist = Some(value),
                5 => entry.genre = Some(value),
                6 => entry.file_type = Some(value),
                8 => entry.comment = Some(value),
                12 => entry.composer = Some(value),
                // kept for size-skipping, not surfaced
                _ => {}
            }
            rest = &rest[end..];
        }
        Ok(entry)
    }
}

impl<R: Read> Iterator for DatabaseReader<R> {
    type Item = Result<TrackEntry>;

    /// A header that is not another track record ends the stream; it is the
    /// start of the next section or a clean end of file.
    fn next(&mut self) -> Option<Self::Item> {
        let header = read_header(&mut self.inner, b"mhit").ok()?;
        Some(self.read_track(&header))
    }
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Read an 8-byte tag+size header and the rest of the declared size.
///
/// The size field of the outer records declares the header length only, so
/// this leaves the reader positioned at the first child.
fn read_header(inner: &mut impl Read, tag: &[u8; 4]) -> Result<Vec<u8>> {
    let mut head = [0u8; 8];
    inner
        .read_exact(&mut head)
        .map_err(|_| Error::Format("unexpected end of data".into()))?;
    if &head[..4] != tag {
        return Err(Error::Format(format!(
            "expected `{}` tag",
            String::from_utf8_lossy(tag)
        )));
    }
    let size = le32(&head, 4) as usize;
    if size < 8 {
        return Err(Error::Format("declared size smaller than header".into()));
    }
    let mut full = vec![0u8; size];
    full[..8].copy_from_slice(&head);
    inner
        .read_exact(&mut full[8..])
        .map_err(|_| Error::Format("truncated header".into()))?;
    Ok(full)
}

fn skip(inner: &mut impl Read, n: u64) -> Result<()> {
    let copied = std::io::copy(&mut inner.take(n), &mut std::io::sink())?;
    if copied < n {
        return Err(Error::Format("truncated section".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{section_chunk, Chunk, Field};
    use crate::database::{Database, DEFAULT_VERSION};
    use crate::time::MacTime;
    use crate::track::TrackInfo;
    use rand::rngs::mock::StepRng;

    fn build_db(tracks: &[TrackInfo]) -> Vec<u8> {
        let mut rng = StepRng::new(7, 1);
        Database::with_time(
            tracks,
            "Library",
            None,
            DEFAULT_VERSION,
            MacTime::with_offset(0),
            &mut rng,
        )
        .unwrap()
        .finish()
    }

    #[test]
    fn test_round_trip() {
        let tracks = vec![TrackInfo {
            id: Some(1),
            dbid: 42,
            title: Some("Test".into()),
            artist: Some("Artist".into()),
            album: Some("Album".into()),
            track_number: Some(3),
            ..TrackInfo::default()
        }];
        let data = build_db(&tracks);

        let entries: Vec<TrackEntry> = DatabaseReader::new(data.as_slice())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Test"));
        assert_eq!(entries[0].artist.as_deref(), Some("Artist"));
        assert_eq!(entries[0].album.as_deref(), Some("Album"));
        assert_eq!(entries[0].track_number, Some(3));
    }

    #[test]
    fn test_path_round_trips_in_device_form() {
        let tracks = vec![TrackInfo {
            id: Some(1),
            title: Some("Test".into()),
            path: Some("Music/a.mp3".into()),
            ..TrackInfo::default()
        }];
        let data = build_db(&tracks);
        let entries: Vec<TrackEntry> = DatabaseReader::new(data.as_slice())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries[0].path.as_deref(), Some(":Music:a.mp3"));
    }

    #[test]
    fn test_unknown_sections_are_skipped() {
        // root with an unrecognized section before the track section
        let mut mhbd = Chunk::new(&[
            Field::Bytes(b"mhbd"),
            Field::HeaderLength,
            Field::TotalLength,
            Field::U32(0),
            Field::U32(DEFAULT_VERSION),
            Field::ChildCount,
            Field::Padding(148),
        ]);

        let mut unknown = section_chunk(9);
        unknown.add(&[0xAA; 123]);
        mhbd.add(&unknown.render());

        let tracks = vec![TrackInfo {
            id: Some(1),
            title: Some("Later".into()),
            ..TrackInfo::default()
        }];
        let mut mhlt = Chunk::new(&[
            Field::Bytes(b"mhlt"),
            Field::HeaderLength,
            Field::ChildCount,
            Field::Padding(80),
        ]);
        mhlt.add(
            &crate::track::build_track_record(&tracks[0], &MacTime::with_offset(0)).unwrap(),
        );
        let mut mhsd = section_chunk(1);
        mhsd.add(&mhlt.render());
        mhbd.add(&mhsd.render());

        let data = mhbd.render();
        let entries: Vec<TrackEntry> = DatabaseReader::new(data.as_slice())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Later"));
    }

    #[test]
    fn test_wrong_root_tag_is_a_format_error() {
        let data = b"nope\x08\x00\x00\x00";
        assert!(matches!(
            DatabaseReader::new(&data[..]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_declared_size_below_header_is_a_format_error() {
        let data = b"mhbd\x04\x00\x00\x00";
        assert!(matches!(
            DatabaseReader::new(&data[..]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_iteration_ends_cleanly_at_next_section() {
        let tracks = vec![
            TrackInfo {
                id: Some(1),
                title: Some("Track One".into()),
                ..TrackInfo::default()
            },
            TrackInfo {
                id: Some(2),
                title: Some("Track Two".into()),
                ..TrackInfo::default()
            },
        ];
        let data = build_db(&tracks);
        let mut reader = DatabaseReader::new(data.as_slice()).unwrap();
        assert!(reader.next().is_some());
        assert!(reader.next().is_some());
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }
}
