//! Playlist records, membership entries and device sort indices
//!
//! Playback order and display order are two different things on the device:
//! membership records (`mhip`) fix the playback order, while sort indices
//! are auxiliary permutation arrays telling the UI how to traverse the same
//! tracks under a recognized ordering. The master playlist always carries
//! the five standard indices.

use std::cmp::Ordering;

use rand::RngCore;

use crate::chunk::{Chunk, Field};
use crate::track::{mhod_type, string_object, TrackInfo};

/// Fields the device recognizes in sort-index comparator tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    Album,
    Artist,
    Genre,
    Composer,
    DiscNumber,
    TrackNumber,
}

/// The five standard indices of the master playlist, with their device
/// index type codes.
pub(crate) const STANDARD_INDICES: &[(u32, &[SortField])] = &[
    (0x03, &[SortField::Title]),
    (
        0x04,
        &[
            SortField::Album,
            SortField::DiscNumber,
            SortField::TrackNumber,
            SortField::Title,
        ],
    ),
    (
        0x05,
        &[
            SortField::Artist,
            SortField::Album,
            SortField::DiscNumber,
            SortField::TrackNumber,
            SortField::Title,
        ],
    ),
    (
        0x07,
        &[
            SortField::Genre,
            SortField::Artist,
            SortField::Album,
            SortField::DiscNumber,
            SortField::TrackNumber,
            SortField::Title,
        ],
    ),
    (0x12, &[SortField::Composer, SortField::Title]),
];

fn compare_text(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn compare_tracks(a: &TrackInfo, b: &TrackInfo, fields: &[SortField]) -> Ordering {
    for &field in fields {
        let ord = match field {
            SortField::Title => compare_text(a.title.as_deref(), b.title.as_deref()),
            SortField::Album => compare_text(a.album.as_deref(), b.album.as_deref()),
            SortField::Artist => compare_text(a.artist.as_deref(), b.artist.as_deref()),
            SortField::Genre => compare_text(a.genre.as_deref(), b.genre.as_deref()),
            SortField::Composer => compare_text(a.composer.as_deref(), b.composer.as_deref()),
            SortField::DiscNumber => a.disc_number.cmp(&b.disc_number),
            SortField::TrackNumber => a.track_number.cmp(&b.track_number),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compute the positional permutation for one comparator tuple.
///
/// Case-insensitive per field, absent values sort before present ones, ties
/// fall through to the next field; the sort is stable, so full ties keep
/// list order.
pub fn sort_order(tracks: &[TrackInfo], fields: &[SortField]) -> Vec<u32> {
    let mut order: Vec<u32> = (0..tracks.len() as u32).collect();
    order.sort_by(|&a, &b| compare_tracks(&tracks[a as usize], &tracks[b as usize], fields));
    order
}

/// Render the order sub-object carried by playlists and membership records.
fn order_object(order: u32) -> Vec<u8> {
    Chunk::new(&[
        Field::Bytes(b"mhod"),
        Field::U32(0x18),
        Field::U32(0x2C),
        Field::U32(100),
        Field::Padding(8),
        Field::U32(order),
        Field::Padding(16),
    ])
    .render()
}

/// Render a sort-index sub-object from a precomputed permutation.
///
/// The position array is emitted little-endian regardless of host byte
/// order.
fn sort_index_object(index_type: u32, order: &[u32]) -> Vec<u8> {
    let mut mhod = Chunk::new(&[
        Field::Bytes(b"mhod"),
        Field::U32(24),
        Field::TotalLength,
        Field::U32(52),
        Field::Padding(8),
        Field::U32(index_type),
        Field::U32(order.len() as u32),
        Field::Padding(40),
    ]);
    let mut positions = Vec::with_capacity(order.len() * 4);
    for &pos in order {
        positions.extend_from_slice(&pos.to_le_bytes());
    }
    mhod.add(&positions);
    mhod.render()
}

/// Render one membership record: a 1-based order position plus the track
/// reference.
fn membership_record(order: u32, track_id: u32) -> Vec<u8> {
    let mut mhip = Chunk::new(&[
        Field::Bytes(b"mhip"),
        Field::HeaderLength,
        Field::TotalLength,
        Field::ChildCount,
        Field::U32(0),
        // order hash the device uses for internal cross-referencing
        Field::U32((track_id + 0x1337) & 0xFFFF),
        Field::U32(track_id),
        Field::U32(0), // timestamp
        Field::U32(0),
        Field::Padding(40),
    ]);
    mhip.add(&order_object(order));
    mhip.render()
}

/// An `mhyp` playlist record under construction.
pub(crate) struct Playlist {
    mhyp: Chunk,
}

impl Playlist {
    pub(crate) fn new(
        name: &str,
        track_count: u32,
        master: bool,
        plid: Option<u64>,
        sort_order: u32,
        rng: &mut dyn RngCore,
    ) -> Self {
        let plid = plid.unwrap_or_else(|| rng.next_u64());
        let mut mhyp = Chunk::new(&[
            Field::Bytes(b"mhyp"),
            Field::HeaderLength,
            Field::TotalLength,
            Field::ChildCount,
            Field::U32(track_count),
            Field::U32(u32::from(master)),
            Field::U32(0), // timestamp
            Field::U64(plid),
            Field::U32(0),
            Field::U16(1),
            Field::U16(0),
            Field::U32(sort_order),
            Field::Padding(60),
        ]);
        mhyp.add(&string_object(mhod_type::TITLE, name));
        mhyp.add(&order_object(0));
        Self { mhyp }
    }

    pub(crate) fn add_index(&mut self, tracks: &[TrackInfo], index_type: u32, fields: &[SortField]) {
        let order = sort_order(tracks, fields);
        self.mhyp.add(&sort_index_object(index_type, &order));
    }

    /// Append one membership record per track, in playback order.
    ///
    /// Membership records contribute 0 to the child count; the track-count
    /// header field covers them.
    pub(crate) fn set_members(&mut self, track_ids: &[u32]) {
        for (i, &track_id) in track_ids.iter().enumerate() {
            self.mhyp
                .add_counted(&membership_record(i as u32 + 1, track_id), 0);
        }
    }

    pub(crate) fn render(self) -> Vec<u8> {
        self.mhyp.render()
    }
}
