//! ipod-core: iPod library database formats with write support
//!
//! This crate provides binary serialization for the on-device library
//! metadata of click-wheel iPods:
//! - iTunesDB (track/playlist database) - little-endian nested chunks
//! - ArtworkDB plus `.ithmb` slot files (thumbnail catalog)
//! - Play Counts (per-track statistics, read side)
//! - iTunesSD (shuffle-device playlist) - flat fixed-size records
//!
//! The nested formats are trees of tagged chunks with deferred length
//! fields; see [`chunk`] for the builder they all share. Layouts follow
//! what shipped devices accept, quirks included.

pub mod artwork;
pub mod chunk;
pub mod database;
pub mod error;
pub mod playcounts;
pub mod playlist;
pub mod reader;
pub mod shuffle;
pub mod time;
pub mod track;

pub use database::{generate_ids, Database, DEFAULT_VERSION};
pub use error::{Error, Result};
pub use track::{Codec, TrackInfo};

/// On-device directory holding the track database and related files.
pub const CONTROL_DIR: &str = "iPod_Control/iTunes/";
/// On-device directory holding the artwork database and slot files.
pub const ARTWORK_DIR: &str = "iPod_Control/Artwork/";

/// File names inside [`CONTROL_DIR`].
pub const DATABASE_FILE: &str = "iTunesDB";
pub const PLAY_COUNTS_FILE: &str = "Play Counts";
pub const SHUFFLE_DB_FILE: &str = "iTunesSD";

/// File name inside [`ARTWORK_DIR`].
pub const ARTWORK_DB_FILE: &str = "ArtworkDB";
