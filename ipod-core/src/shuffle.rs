//! Shuffle-device playlist writer
//!
//! Shuffle devices take a flat array instead of the chunk tree: a small
//! header with a 3-byte big-endian track count, then one fixed-size record
//! per track. No nesting and no deferred length fields - every size here is
//! known up front.

use crate::error::{Error, Result};
use crate::track::{Codec, TrackInfo};

/// Fixed size of one track record.
const ENTRY_SIZE: usize = 558;

/// Maximum path length in UTF-16 code units; longer paths are truncated.
const MAX_PATH_UNITS: usize = 261;

fn be3(value: u32) -> [u8; 3] {
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

const fn sd_type(codec: Codec) -> u8 {
    match codec {
        Codec::Aac | Codec::Mp4a => 2,
        Codec::Wave => 4,
        _ => 1,
    }
}

fn sd_entry(track: &TrackInfo) -> Result<Vec<u8>> {
    let path = track.path.as_deref().ok_or(Error::MissingField("path"))?;
    let device_path = format!("/{path}");
    let mut units: Vec<u16> = device_path.encode_utf16().collect();
    units.truncate(MAX_PATH_UNITS);

    let mut entry = Vec::with_capacity(ENTRY_SIZE);
    entry.extend_from_slice(&be3(ENTRY_SIZE as u32));
    entry.extend_from_slice(&[0x5A, 0xA5, 0x01]);
    entry.extend_from_slice(&[0; 20]);
    entry.extend_from_slice(&[0x64, 0x00, 0x00]);
    entry.push(sd_type(track.codec));
    entry.extend_from_slice(&[0x00, 0x02, 0x00]);
    for unit in &units {
        entry.extend_from_slice(&unit.to_le_bytes());
    }
    // NUL-pad the path field to its fixed width
    entry.resize(33 + MAX_PATH_UNITS * 2, 0);
    entry.push(u8::from(track.shuffle));
    entry.push(track.bookmark_flag);
    entry.push(0);
    Ok(entry)
}

/// Render the whole shuffle playlist from the in-memory track list.
pub fn build_shuffle_playlist(tracks: &[TrackInfo]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(18 + tracks.len() * ENTRY_SIZE);
    out.extend_from_slice(&be3(tracks.len() as u32));
    out.extend_from_slice(&[0x01, 0x06, 0x00]);
    out.extend_from_slice(&be3(0x12)); // header size
    out.extend_from_slice(&[0; 9]);
    for track in tracks {
        out.extend_from_slice(&sd_entry(track)?);
    }
    Ok(out)
}
