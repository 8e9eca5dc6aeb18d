//! Typed track records and the `mhit` schema
//!
//! [`TrackInfo`] is the typed hand-off point between the metadata extractor
//! and the database writer: every attribute the writer consumes is an
//! explicit field with a documented default, so a record can be built
//! without consulting the extractor again.
//!
//! The `mhit` layout reproduces what shipped devices expect byte for byte.
//! Two oddities are deliberate and must not be "fixed": the artwork-presence
//! flag is 1 when artwork exists and 2 when it does not, and the 64-bit
//! `dbid` is stored at two different offsets.

use std::path::PathBuf;

use crate::chunk::{utf16le, Chunk, Field};
use crate::error::{Error, Result};
use crate::time::MacTime;

/// String sub-object type codes.
pub(crate) mod mhod_type {
    pub const TITLE: u32 = 1;
    pub const PATH: u32 = 2;
    pub const ALBUM: u32 = 3;
    pub const ARTIST: u32 = 4;
    pub const GENRE: u32 = 5;
    pub const FILE_TYPE: u32 = 6;
    pub const COMMENT: u32 = 8;
    pub const COMPOSER: u32 = 12;
}

/// Audio codec family of a track file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Mp3Cbr,
    Mp3Vbr,
    Aac,
    Mp4a,
    Wave,
    Audible,
}

impl Codec {
    /// Four-byte codec family tag (stored reversed on the wire).
    ///
    /// mp4a, wave and audible carry the zero wildcard tag; the device keys
    /// off the other codes for those.
    fn family_tag(self) -> &'static [u8; 4] {
        match self {
            Codec::Mp3Cbr | Codec::Mp3Vbr => b" 3PM",
            Codec::Aac => b" CAA",
            _ => b"\0\0\0\0",
        }
    }

    fn type_code(self) -> u16 {
        match self {
            Codec::Mp3Cbr => 0x100,
            Codec::Mp3Vbr => 0x101,
            _ => 0,
        }
    }

    /// Marker distinguishing wave and audiobook files from everything else.
    fn file_kind(self) -> u16 {
        match self {
            Codec::Wave => 0,
            Codec::Audible => 1,
            _ => 0xFFFF,
        }
    }

    fn file_type_code(self) -> u16 {
        match self {
            Codec::Aac | Codec::Mp4a => 0x0033,
            Codec::Audible => 0x0029,
            _ => 0x0C,
        }
    }

    const fn is_mp3(self) -> bool {
        matches!(self, Codec::Mp3Cbr | Codec::Mp3Vbr)
    }
}

/// One track's attributes, as consumed by the database writers.
///
/// Defaults are the values a fresh, never-played track gets: visible,
/// counted as one artwork slot, participating in shuffle, marked played,
/// everything else zero or absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Process-unique id in the 16-bit range. Required for rendering.
    pub id: Option<u32>,
    /// Globally unique 64-bit id; cross-reference key for the artwork
    /// catalog.
    pub dbid: u64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    /// Only consulted by sort indices; never written as a sub-object.
    pub composer: Option<String>,
    /// Display name of the file type, e.g. "MPEG audio file".
    pub file_type: Option<String>,
    /// Device-relative path with `/` separators.
    pub path: Option<String>,
    pub codec: Codec,
    pub visible: u32,
    pub compilation: u8,
    pub rating: u8,
    /// Source file modification time, Unix seconds.
    pub mtime: i64,
    /// Source file size in bytes.
    pub size: u32,
    pub duration_secs: f64,
    pub track_number: Option<u32>,
    pub total_tracks: u32,
    pub year: u32,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub volume: u32,
    pub start_time: u32,
    pub stop_time: u32,
    pub soundcheck: u32,
    pub play_count: u32,
    /// Unix seconds.
    pub last_played: i64,
    pub disc_number: Option<u32>,
    pub total_discs: u32,
    pub user_id: u32,
    pub date_added: u32,
    pub bookmark_secs: f64,
    pub checked: u8,
    pub application_rating: u8,
    pub bpm: u16,
    pub artwork_count: u16,
    /// Stored artwork byte size; derived from `artwork` when absent.
    pub artwork_size: Option<u32>,
    pub release_date: u32,
    pub explicit_flag: u16,
    pub skip_count: u32,
    /// Unix seconds.
    pub last_skipped: i64,
    /// Source image for the artwork catalog, when the track has cover art.
    pub artwork: Option<PathBuf>,
    /// Overrides the artwork-presence flag; derived from `artwork` when
    /// absent.
    pub has_artwork: Option<bool>,
    /// Whether the track participates in shuffle playback.
    pub shuffle: bool,
    pub bookmark_flag: u8,
    pub podcast_flag: u8,
    pub lyrics_flag: u8,
    pub movie_flag: u8,
    pub played_mark: u8,
    /// PCM sample count; zeroed on the wire for mp3 tracks.
    pub sample_count: u32,
    /// Present for video tracks; switches the media type classifier.
    pub video_format: Option<u32>,
    pub gapless_data: u32,
    pub gapless_track_flag: u16,
    pub gapless_album_flag: u16,
    pub album_id: u16,
    pub mhii_link: u32,
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self {
            id: None,
            dbid: 0,
            title: None,
            artist: None,
            album: None,
            genre: None,
            composer: None,
            file_type: None,
            path: None,
            codec: Codec::default(),
            visible: 1,
            compilation: 0,
            rating: 0,
            mtime: 0,
            size: 0,
            duration_secs: 0.0,
            track_number: None,
            total_tracks: 0,
            year: 0,
            bitrate: 0,
            sample_rate: 0,
            volume: 0,
            start_time: 0,
            stop_time: 0,
            soundcheck: 0,
            play_count: 0,
            last_played: 0,
            disc_number: None,
            total_discs: 0,
            user_id: 0,
            date_added: 0,
            bookmark_secs: 0.0,
            checked: 0,
            application_rating: 0,
            bpm: 0,
            artwork_count: 1,
            artwork_size: None,
            release_date: 0,
            explicit_flag: 0,
            skip_count: 0,
            last_skipped: 0,
            artwork: None,
            has_artwork: None,
            shuffle: true,
            bookmark_flag: 0,
            podcast_flag: 0,
            lyrics_flag: 0,
            movie_flag: 0,
            played_mark: 1,
            sample_count: 0,
            video_format: None,
            gapless_data: 0,
            gapless_track_flag: 0,
            gapless_album_flag: 0,
            album_id: 0,
            mhii_link: 0,
        }
    }
}

/// Rewrite a `/`-separated path for the device: `:` separators and a
/// leading `:`.
pub(crate) fn device_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push(':');
    for c in path.chars() {
        out.push(if c == '/' || c == '\\' { ':' } else { c });
    }
    out
}

/// Render a string sub-object for the track database.
pub(crate) fn string_object(kind: u32, text: &str) -> Vec<u8> {
    let content = utf16le(text);
    let mut mhod = Chunk::new(&[
        Field::Bytes(b"mhod"),
        Field::U32(0x18),
        Field::TotalLength,
        Field::U32(kind),
        Field::Padding(8),
        Field::U32(1),
        Field::U32(content.len() as u32),
        Field::U32(1),
        Field::Padding(4),
    ]);
    mhod.add(&content);
    mhod.render()
}

/// Render the `mhit` record plus trailing string sub-objects.
pub fn build_track_record(info: &TrackInfo, mac: &MacTime) -> Result<Vec<u8>> {
    let id = info.id.ok_or(Error::MissingField("id"))?;
    let has_artwork = info.has_artwork.unwrap_or(info.artwork.is_some());
    let artwork_size = info
        .artwork_size
        .unwrap_or(u32::from(info.artwork.is_some()));
    let media_type: u32 = if info.video_format.is_some() { 2 } else { 1 };

    let mut mhit = Chunk::new(&[
        Field::Bytes(b"mhit"),
        Field::HeaderLength,
        Field::TotalLength,
        Field::ChildCount,
        Field::U32(id),
        Field::U32(info.visible),
        Field::Bytes(info.codec.family_tag()),
        Field::U16(info.codec.type_code()),
        Field::U8(info.compilation),
        Field::U8(info.rating),
        Field::U32(mac.to_mac(info.mtime)),
        Field::U32(info.size),
        Field::U32((info.duration_secs * 1000.0) as u32),
        Field::U32(info.track_number.unwrap_or(0)),
        Field::U32(info.total_tracks),
        Field::U32(info.year),
        Field::U32(info.bitrate),
        Field::U16(0),
        Field::U16(info.sample_rate as u16),
        Field::U32(info.volume),
        Field::U32(info.start_time),
        Field::U32(info.stop_time),
        Field::U32(info.soundcheck),
        Field::U32(info.play_count),
        Field::U32(0),
        Field::U32(mac.to_mac(info.last_played)),
        Field::U32(info.disc_number.unwrap_or(0)),
        Field::U32(info.total_discs),
        Field::U32(info.user_id),
        Field::U32(info.date_added),
        Field::U32((info.bookmark_secs * 1000.0) as u32),
        Field::U64(info.dbid),
        Field::U8(info.checked),
        Field::U8(info.application_rating),
        Field::U16(info.bpm),
        Field::U16(info.artwork_count),
        Field::U16(info.codec.file_kind()),
        Field::U32(artwork_size),
        Field::U32(0),
        Field::F32(info.sample_rate as f32),
        Field::U32(info.release_date),
        Field::U16(info.codec.file_type_code()),
        Field::U16(info.explicit_flag),
        Field::Padding(8),
        Field::U32(info.skip_count),
        Field::U32(mac.to_mac(info.last_skipped)),
        // 1 = artwork present, 2 = absent; not a boolean
        Field::U8(if has_artwork { 1 } else { 2 }),
        Field::U8(u8::from(!info.shuffle)),
        Field::U8(info.bookmark_flag),
        Field::U8(info.podcast_flag),
        // second copy of the dbid, at a fixed distance from the first
        Field::U64(info.dbid),
        Field::U8(info.lyrics_flag),
        Field::U8(info.movie_flag),
        Field::U8(info.played_mark),
        Field::Padding(9),
        Field::U32(if info.codec.is_mp3() {
            0
        } else {
            info.sample_count
        }),
        Field::Padding(16),
        Field::U32(media_type),
        Field::U32(0), // season number
        Field::U32(0), // episode number
        Field::Padding(28),
        Field::U32(info.gapless_data),
        Field::U32(0),
        Field::U16(info.gapless_track_flag),
        Field::U16(info.gapless_album_flag),
        Field::Padding(20), // signature hash, filled by the signing step
        Field::Padding(18),
        Field::U16(info.album_id),
        Field::Padding(52),
        Field::U32(info.mhii_link),
    ]);

    for (kind, value) in [
        (mhod_type::TITLE, &info.title),
        (mhod_type::ARTIST, &info.artist),
        (mhod_type::ALBUM, &info.album),
        (mhod_type::GENRE, &info.genre),
        (mhod_type::FILE_TYPE, &info.file_type),
    ] {
        if let Some(value) = value {
            mhit.add(&string_object(kind, value));
        }
    }
    if let Some(path) = &info.path {
        mhit.add(&string_object(mhod_type::PATH, &device_path(path)));
    }

    Ok(mhit.render())
}

/// Tags recovered from a file name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GuessedTags {
    pub track_number: Option<u32>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Best-effort tag guess from a file name like `07-Artist - Title.mp3`.
///
/// A run of leading digits followed by a space or dash becomes the track
/// number; a remaining dash splits artist from title; otherwise the whole
/// stem is the title.
pub fn guess_title_and_artist(filename: &str) -> GuessedTags {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = stem.replace('_', " ");

    let mut guess = GuessedTags::default();
    let mut digits = String::new();
    let mut rest = name.as_str();
    for (i, c) in name.char_indices() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if c == ' ' || c == '-' {
            if !digits.is_empty() {
                guess.track_number = digits.parse().ok();
            }
            rest = &name[i + 1..];
        }
        break;
    }

    match rest.split_once('-') {
        Some((artist, title)) => {
            let artist = artist.trim();
            if !artist.is_empty() {
                guess.artist = Some(artist.to_string());
            }
            let title = title.trim_matches(&[' ', '-', '\r', '\n', '\t', '\x0B'][..]);
            if !title.is_empty() {
                guess.title = Some(title.to_string());
            }
        }
        None => {
            let title = rest.trim();
            if !title.is_empty() {
                guess.title = Some(title.to_string());
            }
        }
    }
    guess
}

/// Fill absent title/artist/track-number fields from the file name.
pub fn fill_missing_title_and_artist(track: &mut TrackInfo) {
    if track.title.is_some() && track.artist.is_some() {
        return;
    }
    let Some(path) = track.path.as_deref() else {
        return;
    };
    let guess = guess_title_and_artist(path);
    if track.title.is_none() {
        track.title = guess.title;
    }
    if track.artist.is_none() {
        track.artist = guess.artist;
    }
    if track.track_number.is_none() {
        track.track_number = guess.track_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le32(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn le16(data: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([data[at], data[at + 1]])
    }

    fn basic_track() -> TrackInfo {
        TrackInfo {
            id: Some(100),
            dbid: 0x1122334455667788,
            title: Some("Test".into()),
            size: 5_000_000,
            duration_secs: 182.5,
            track_number: Some(3),
            sample_rate: 44100,
            ..TrackInfo::default()
        }
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let info = TrackInfo::default();
        assert!(matches!(
            build_track_record(&info, &MacTime::with_offset(0)),
            Err(Error::MissingField("id"))
        ));
    }

    #[test]
    fn test_mhit_fixed_offsets() {
        let data = build_track_record(&basic_track(), &MacTime::with_offset(0)).unwrap();
        assert_eq!(&data[..4], b"mhit");
        let header_len = le32(&data, 4) as usize;
        // first sub-object starts right after the fixed prefix
        assert_eq!(&data[header_len..header_len + 4], b"mhod");
        assert_eq!(le32(&data, 8) as usize, data.len());
        assert_eq!(le32(&data, 16), 100);
        assert_eq!(le32(&data, 36), 5_000_000);
        assert_eq!(le32(&data, 40), 182_500);
        assert_eq!(le32(&data, 44), 3);
        assert_eq!(le16(&data, 62), 44100);
    }

    #[test]
    fn test_dbid_is_stored_twice() {
        let data = build_track_record(&basic_track(), &MacTime::with_offset(0)).unwrap();
        let first = u64::from_le_bytes(data[112..120].try_into().unwrap());
        let second = u64::from_le_bytes(data[168..176].try_into().unwrap());
        assert_eq!(first, 0x1122334455667788);
        assert_eq!(second, first);
    }

    #[test]
    fn test_artwork_flag_encoding() {
        let mut info = basic_track();
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(data[164], 2); // no artwork
        assert_eq!(le32(&data, 128), 0);

        info.artwork = Some("cover.jpg".into());
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(data[164], 1); // artwork present
        assert_eq!(le32(&data, 128), 1);
    }

    #[test]
    fn test_codec_codes() {
        let mut info = basic_track();
        info.codec = Codec::Mp3Vbr;
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(&data[24..28], b" 3PM");
        assert_eq!(le16(&data, 28), 0x101);
        assert_eq!(le16(&data, 126), 0xFFFF);
        assert_eq!(le16(&data, 144), 0x0C);

        info.codec = Codec::Aac;
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(&data[24..28], b" CAA");
        assert_eq!(le16(&data, 28), 0);
        assert_eq!(le16(&data, 144), 0x0033);

        info.codec = Codec::Audible;
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(&data[24..28], b"\0\0\0\0");
        assert_eq!(le16(&data, 126), 1);
        assert_eq!(le16(&data, 144), 0x0029);
    }

    #[test]
    fn test_sample_rate_stored_as_float_too() {
        let data = build_track_record(&basic_track(), &MacTime::with_offset(0)).unwrap();
        let as_float = f32::from_le_bytes(data[136..140].try_into().unwrap());
        assert_eq!(as_float, 44100.0);
    }

    #[test]
    fn test_media_type_classifier() {
        let mut info = basic_track();
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(le32(&data, 208), 1);

        info.video_format = Some(5);
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        assert_eq!(le32(&data, 208), 2);
    }

    #[test]
    fn test_device_path_rewrite() {
        assert_eq!(device_path("a/b/c.mp3"), ":a:b:c.mp3");
        assert_eq!(device_path("a\\b.mp3"), ":a:b.mp3");
    }

    #[test]
    fn test_path_sub_object_is_rewritten() {
        let mut info = basic_track();
        info.path = Some("Music/F00/song.mp3".into());
        let data = build_track_record(&info, &MacTime::with_offset(0)).unwrap();
        let expected = utf16le(":Music:F00:song.mp3");
        assert!(data
            .windows(expected.len())
            .any(|window| window == expected.as_slice()));
    }

    #[test]
    fn test_guess_with_number_and_title() {
        let guess = guess_title_and_artist("07 - Highway Song.mp3");
        assert_eq!(guess.track_number, Some(7));
        assert_eq!(guess.artist, None);
        assert_eq!(guess.title.as_deref(), Some("Highway Song"));
    }

    #[test]
    fn test_guess_artist_and_title() {
        let guess = guess_title_and_artist("Some Artist - Some Title.ogg");
        assert_eq!(guess.track_number, None);
        assert_eq!(guess.artist.as_deref(), Some("Some Artist"));
        assert_eq!(guess.title.as_deref(), Some("Some Title"));
    }

    #[test]
    fn test_guess_bare_title_with_underscores() {
        let guess = guess_title_and_artist("just_a_title.mp3");
        assert_eq!(guess.track_number, None);
        assert_eq!(guess.artist, None);
        assert_eq!(guess.title.as_deref(), Some("just a title"));
    }

    #[test]
    fn test_fill_missing_only_overwrites_absent_fields() {
        let mut track = TrackInfo {
            title: Some("Kept".into()),
            path: Some("Music/02-Artist - Title.mp3".into()),
            ..TrackInfo::default()
        };
        fill_missing_title_and_artist(&mut track);
        assert_eq!(track.title.as_deref(), Some("Kept"));
        assert_eq!(track.artist.as_deref(), Some("Artist"));
        assert_eq!(track.track_number, Some(2));
    }
}
