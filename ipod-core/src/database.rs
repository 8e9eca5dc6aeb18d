//! Track database assembly (the `mhbd` tree)
//!
//! A [`Database`] is built once per generation run: the track section is
//! rendered up front, playlists accumulate until [`Database::finish`] seals
//! the playlist section and renders the root. The returned buffer is handed
//! to the external checksum/signing step unchanged; the hash slots inside
//! the root header are left zeroed for it.

use rand::{Rng, RngCore};

use crate::chunk::{section_chunk, Chunk, Field};
use crate::error::{Error, Result};
use crate::playlist::{Playlist, STANDARD_INDICES};
use crate::time::MacTime;
use crate::track::{build_track_record, TrackInfo};

/// Default database version written to the root header.
pub const DEFAULT_VERSION: u32 = 0x19;

/// 8-byte library persistent id stored in the root header.
const LIBRARY_ID: &[u8; 8] = b"\0ipodex!";

/// Section discriminators of the track database.
const SECTION_TRACKS: u32 = 1;
const SECTION_PLAYLISTS: u32 = 2;

/// A track database under construction.
pub struct Database {
    mhbd: Chunk,
    mhlp: Chunk,
    mac: MacTime,
}

impl Database {
    /// Build the root, the track section and the master playlist.
    ///
    /// The master playlist carries every track plus the five standard sort
    /// indices. `dbid` is drawn from `rng` unless supplied.
    pub fn new(
        tracks: &[TrackInfo],
        name: &str,
        dbid: Option<u64>,
        version: u32,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        Self::with_time(tracks, name, dbid, version, MacTime::local(), rng)
    }

    /// Same as [`Database::new`] with an explicit time context.
    pub fn with_time(
        tracks: &[TrackInfo],
        name: &str,
        dbid: Option<u64>,
        version: u32,
        mac: MacTime,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let dbid = dbid.unwrap_or_else(|| rng.next_u64());

        let mut mhbd = Chunk::new(&[
            Field::Bytes(b"mhbd"),
            Field::HeaderLength,
            Field::TotalLength,
            Field::U32(0),
            Field::U32(version),
            Field::ChildCount,
            Field::U64(dbid),
            Field::U16(2),
            Field::Padding(14),
            Field::U16(0),      // hash indicator, set by the signing step
            Field::Padding(20), // first hash
            Field::Bytes(b"en"),
            Field::Bytes(LIBRARY_ID),
            Field::Padding(20), // second hash
            Field::Padding(80),
        ]);

        let mut mhlt = Chunk::new(&[
            Field::Bytes(b"mhlt"),
            Field::HeaderLength,
            Field::ChildCount,
            Field::Padding(80),
        ]);
        for track in tracks {
            mhlt.add(&build_track_record(track, &mac)?);
        }
        let mut mhsd = section_chunk(SECTION_TRACKS);
        mhsd.add(&mhlt.render());
        mhbd.add(&mhsd.render());

        let mhlp = Chunk::new(&[
            Field::Bytes(b"mhlp"),
            Field::HeaderLength,
            Field::ChildCount,
            Field::Padding(80),
        ]);

        let mut db = Self { mhbd, mhlp, mac };

        let mut master = Playlist::new(name, tracks.len() as u32, true, None, 10, rng);
        for &(index_type, fields) in STANDARD_INDICES {
            master.add_index(tracks, index_type, fields);
        }
        master.set_members(&track_ids(tracks)?);
        db.mhlp.add(&master.render());

        Ok(db)
    }

    /// Append a playlist holding the given tracks, in order.
    pub fn add_playlist(
        &mut self,
        tracks: &[TrackInfo],
        name: &str,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let mut playlist = Playlist::new(name, tracks.len() as u32, false, None, 1, rng);
        playlist.set_members(&track_ids(tracks)?);
        self.mhlp.add(&playlist.render());
        Ok(())
    }

    /// The time context the track records were rendered with.
    pub fn time_context(&self) -> MacTime {
        self.mac
    }

    /// Seal the playlist section and render the database.
    pub fn finish(self) -> Vec<u8> {
        let mut mhsd = section_chunk(SECTION_PLAYLISTS);
        mhsd.add(&self.mhlp.render());
        let mut mhbd = self.mhbd;
        mhbd.add(&mhsd.render());
        mhbd.render()
    }
}

fn track_ids(tracks: &[TrackInfo]) -> Result<Vec<u32>> {
    tracks
        .iter()
        .map(|track| track.id.ok_or(Error::MissingField("id")))
        .collect()
}

/// Assign consecutive track ids and dbids from one random base each.
///
/// The id base leaves room for the whole list below the point where the
/// membership order hash would leave the 16-bit range.
pub fn generate_ids(tracks: &mut [TrackInfo], rng: &mut dyn RngCore) {
    let count = tracks.len() as u64;
    let id_span = u64::from(0xFFFFu32 - 0x1337).saturating_sub(count);
    let mut id = rng.gen_range(0..=id_span) as u32;
    let mut dbid = rng.gen_range(0..u64::MAX - count);
    for track in tracks {
        track.id = Some(id);
        track.dbid = dbid;
        id += 1;
        dbid += 1;
    }
}
