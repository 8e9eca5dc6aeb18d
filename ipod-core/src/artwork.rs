//! Artwork catalog generation: the `mhfd` tree and `.ithmb` slot files
//!
//! Each device model supports a fixed set of thumbnail formats. Every
//! format owns one flat slot file of fixed-size pixel records, addressed by
//! a per-image index; the catalog tree cross-references each track `dbid`
//! to its placement inside those files.
//!
//! Slot files from a previous run are reused as a pixel cache when their
//! size and modification time are unchanged under the fuzzy rule. The check
//! is conservative: one stale format invalidates the image-level cache for
//! the whole run.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunk::{section_chunk, utf16le, Chunk, Field};
use crate::error::Result;
use crate::time::compare_mtime;

/// Thumbnail pixel encodings used by the enumerated devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelEncoding {
    Rgb565Le,
}

impl PixelEncoding {
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            PixelEncoding::Rgb565Le => 16,
        }
    }

    /// Pack an RGB888 canvas into the device pixel layout.
    pub fn encode(self, rgb: &[u8]) -> Vec<u8> {
        match self {
            PixelEncoding::Rgb565Le => {
                let mut out = Vec::with_capacity(rgb.len() / 3 * 2);
                for px in rgb.chunks_exact(3) {
                    let (r, g, b) = (u16::from(px[0]), u16::from(px[1]), u16::from(px[2]));
                    let value = ((r & 0xF8) << 8) | ((g & 0xFC) << 3) | (b >> 3);
                    out.extend_from_slice(&value.to_le_bytes());
                }
                out
            }
        }
    }
}

/// One thumbnail format of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format_id: u32,
    pub height: u16,
    pub width: u16,
    pub encoding: PixelEncoding,
}

impl FormatDescriptor {
    /// Byte size of one slot in this format's file.
    pub const fn slot_size(&self) -> u32 {
        self.width as u32 * self.height as u32 * self.encoding.bits_per_pixel() / 8
    }
}

const fn desc(format_id: u32, height: u16, width: u16) -> FormatDescriptor {
    FormatDescriptor {
        format_id,
        height,
        width,
        encoding: PixelEncoding::Rgb565Le,
    }
}

/// Thumbnail format sets per device model.
const MODEL_FORMATS: &[(&str, &[FormatDescriptor])] = &[
    ("nano", &[desc(1027, 100, 100), desc(1031, 42, 42)]),
    ("photo", &[desc(1016, 140, 140), desc(1017, 56, 56)]),
    ("video", &[desc(1028, 100, 100), desc(1029, 200, 200)]),
    (
        "nano3g",
        &[
            desc(1055, 128, 128),
            desc(1060, 320, 320),
            desc(1061, 55, 56),
        ],
    ),
    (
        "nano4g",
        &[
            desc(1055, 128, 128),
            desc(1078, 80, 80),
            desc(1071, 240, 240),
            desc(1074, 50, 50),
        ],
    ),
];

/// Models that share another model's format set.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("4g", "photo"),
    ("5g", "video"),
    ("6g", "nano3g"),
    ("classic", "nano3g"),
    ("nano1g", "nano"),
    ("nano2g", "nano"),
];

/// Resolve a model name to its format descriptors, following aliases.
/// `None` means the model has no artwork support.
pub fn model_formats(model: &str) -> Option<&'static [FormatDescriptor]> {
    let mut name = model;
    while let Some(&(_, target)) = MODEL_ALIASES.iter().find(|(alias, _)| *alias == name) {
        name = target;
    }
    MODEL_FORMATS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|&(_, formats)| formats)
}

fn slot_filename(format_id: u32) -> String {
    format!("F{format_id:04}_1.ithmb")
}

/// Visible size and margins of one rendered thumbnail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub sx: u16,
    pub sy: u16,
    pub mx: u16,
    pub my: u16,
}

/// Modification stamp of one slot file from the previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFileStamp {
    pub mtime: i64,
    pub size: u64,
}

/// Cache entry for one source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCacheEntry {
    /// Slot index the image occupies in every format file.
    pub index: u32,
    pub size: u64,
    pub mtime: i64,
    /// Rendered dimensions per format id.
    pub dims: HashMap<u32, ImageDims>,
}

/// Artwork cache carried between generation runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtworkCache {
    pub formats: HashMap<u32, SlotFileStamp>,
    pub images: HashMap<PathBuf, ImageCacheEntry>,
}

impl ArtworkCache {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load a prior cache, falling back to an empty one.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "starting with an empty artwork cache");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// A resized RGB888 canvas plus placement metadata, as produced by the
/// external pixel pipeline.
#[derive(Debug, Clone)]
pub struct ResizedImage {
    /// `width * height * 3` bytes, margins already filled.
    pub pixels: Vec<u8>,
    pub dims: ImageDims,
}

/// External collaborator that decodes and resizes source images.
pub trait ImageResizer {
    fn resize(&mut self, source: &Path, width: u16, height: u16) -> std::io::Result<ResizedImage>;
}

/// Output of one artwork catalog generation pass.
pub struct ArtworkOutput {
    /// The rendered artwork database.
    pub database: Vec<u8>,
    /// Cache to carry into the next run.
    pub cache: ArtworkCache,
    /// Track `dbid` to assigned image id.
    pub image_ids: HashMap<u64, u32>,
}

/// One format's slot file during a generation pass.
struct SlotFile {
    descriptor: FormatDescriptor,
    full_path: PathBuf,
    slot_size: u32,
    /// Previous run's file contents, when reusable as a pixel cache.
    cache: Option<Vec<u8>>,
    file: Option<File>,
}

impl SlotFile {
    fn open(artwork_dir: &Path, descriptor: FormatDescriptor, stamp: SlotFileStamp) -> Self {
        let filename = slot_filename(descriptor.format_id);
        let full_path = artwork_dir.join(&filename);
        let slot_size = descriptor.slot_size();

        let mut cache = None;
        if let Ok(meta) = fs::metadata(&full_path) {
            if meta.is_file() && compare_mtime(stamp.mtime, mtime_secs(&meta)) && meta.len() == stamp.size
            {
                cache = fs::read(&full_path).ok();
            }
        }

        let file = match File::create(&full_path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(file = %filename, error = %e, "error opening the artwork data file");
                None
            }
        };

        Self {
            descriptor,
            full_path,
            slot_size,
            cache,
            file,
        }
    }

    /// Pixel bytes and dimensions from the previous run's file, if this
    /// image's slot is covered by it.
    fn cached_slot(&self, entry: &ImageCacheEntry) -> Option<(Vec<u8>, ImageDims)> {
        let cache = self.cache.as_ref()?;
        let dims = entry.dims.get(&self.descriptor.format_id)?;
        let offset = self.slot_size as usize * entry.index as usize;
        let slot = cache.get(offset..offset + self.slot_size as usize)?;
        Some((slot.to_vec(), *dims))
    }

    /// Produce this format's pixels for one image and write them into the
    /// slot at `index`.
    fn generate(
        &mut self,
        resizer: &mut dyn ImageResizer,
        source: &Path,
        index: u32,
        cached: Option<&ImageCacheEntry>,
    ) -> std::io::Result<ImageDims> {
        let (data, dims) = match cached.and_then(|entry| self.cached_slot(entry)) {
            Some(slot) => slot,
            None => {
                debug!(
                    width = self.descriptor.width,
                    height = self.descriptor.height,
                    "rendering thumbnail"
                );
                let resized = resizer.resize(source, self.descriptor.width, self.descriptor.height)?;
                (self.descriptor.encoding.encode(&resized.pixels), resized.dims)
            }
        };

        if let Some(file) = self.file.as_mut() {
            let offset = u64::from(self.slot_size) * u64::from(index);
            if let Err(e) = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(&data))
            {
                warn!(file = %self.full_path.display(), error = %e, "artwork slot write error");
            }
        }
        Ok(dims)
    }

    /// Close the file and stamp it for the next run's cache check.
    fn close(self) -> (u32, SlotFileStamp) {
        drop(self.file);
        let stamp = fs::metadata(&self.full_path)
            .map(|meta| SlotFileStamp {
                mtime: mtime_secs(&meta),
                size: meta.len(),
            })
            .unwrap_or_default();
        (self.descriptor.format_id, stamp)
    }
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Render the 4-byte-aligned string sub-object of the artwork database.
fn artwork_string_object(kind: u16, text: &str) -> Vec<u8> {
    let content = utf16le(text);
    let padding = (4 - content.len() % 4) % 4;
    let mut mhod = Chunk::new(&[
        Field::Bytes(b"mhod"),
        Field::U32(0x18),
        Field::TotalLength,
        Field::U16(kind),
        Field::U16(padding as u16),
        Field::Padding(8),
        Field::U32(content.len() as u32),
        Field::U32(2),
        Field::U32(0),
    ]);
    mhod.add(&content);
    if padding > 0 {
        mhod.add(&[0u8; 3][..padding]);
    }
    mhod.render()
}

/// Render the placement of one image inside one format's slot file.
fn image_placement(descriptor: &FormatDescriptor, index: u32, dims: ImageDims) -> Vec<u8> {
    let slot_size = descriptor.slot_size();
    let mut mhni = Chunk::new(&[
        Field::Bytes(b"mhni"),
        Field::U32(0x4C),
        Field::TotalLength,
        Field::ChildCount,
        Field::U32(descriptor.format_id),
        Field::U32(slot_size * index),
        Field::U32(slot_size),
        Field::U16(dims.my),
        Field::U16(dims.mx),
        Field::U16(dims.sy),
        Field::U16(dims.sx),
        Field::Padding(4),
        Field::U32(slot_size),
        Field::Padding(32),
    ]);
    mhni.add(&artwork_string_object(
        3,
        &format!(":{}", slot_filename(descriptor.format_id)),
    ));

    let mut mhod = Chunk::new(&[
        Field::Bytes(b"mhod"),
        Field::U32(0x18),
        Field::TotalLength,
        Field::U32(2),
        Field::Padding(8),
    ]);
    mhod.add(&mhni.render());
    mhod.render()
}

/// Render one image item: the cross-reference from a track `dbid` to its
/// placements.
fn image_item(
    image_id: u32,
    dbid: u64,
    source_size: u64,
    placements: &[(FormatDescriptor, ImageDims)],
    index: u32,
) -> Vec<u8> {
    let mut mhii = Chunk::new(&[
        Field::Bytes(b"mhii"),
        Field::U32(0x98),
        Field::TotalLength,
        Field::ChildCount,
        Field::U32(image_id),
        Field::U64(dbid),
        Field::Padding(20),
        Field::U32(source_size as u32),
        Field::Padding(100),
    ]);
    for (descriptor, dims) in placements {
        mhii.add(&image_placement(descriptor, index, *dims));
    }
    mhii.render()
}

/// Build the artwork catalog for a device model.
///
/// `images` maps each distinct source path to the track dbids referencing
/// it. Returns `None` for models without artwork support. Individual image
/// failures are logged and skipped; only filesystem failures around the
/// artwork directory itself abort the pass.
pub fn build_artwork_catalog(
    root: &Path,
    model: &str,
    images: &BTreeMap<PathBuf, Vec<u64>>,
    base_id: u32,
    prior: &ArtworkCache,
    resizer: &mut dyn ImageResizer,
) -> Result<Option<ArtworkOutput>> {
    let Some(descriptors) = model_formats(model) else {
        debug!(model, "no artwork formats for this model");
        return Ok(None);
    };

    let artwork_dir = root.join(crate::ARTWORK_DIR);
    fs::create_dir_all(&artwork_dir)?;

    let mut slots: Vec<SlotFile> = Vec::with_capacity(descriptors.len());
    let mut image_cache_valid = true;
    for &descriptor in descriptors {
        let stamp = prior
            .formats
            .get(&descriptor.format_id)
            .copied()
            .unwrap_or_default();
        let slot = SlotFile::open(&artwork_dir, descriptor, stamp);
        // one stale format invalidates the image cache for the whole run
        if slot.cache.is_none() {
            image_cache_valid = false;
        }
        slots.push(slot);
    }
    let empty_images = HashMap::new();
    let image_cache = if image_cache_valid {
        &prior.images
    } else {
        &empty_images
    };

    let mut mhli = Chunk::new(&[
        Field::Bytes(b"mhli"),
        Field::HeaderLength,
        Field::ChildCount,
        Field::Padding(80),
    ]);

    let mut cache = ArtworkCache::default();
    let mut image_ids = HashMap::new();
    let mut image_id = base_id;
    let mut index = 0u32;
    let mut image_count = 0u32;

    for (source, dbids) in images {
        let meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "skipping artwork source");
                continue;
            }
        };
        let size = meta.len();
        let mtime = mtime_secs(&meta);
        let cached = image_cache
            .get(source)
            .filter(|entry| entry.size == size && compare_mtime(entry.mtime, mtime));
        if cached.is_some() {
            debug!(source = %source.display(), "reusing cached thumbnails");
        }

        let mut placements = Vec::with_capacity(slots.len());
        let mut dims_by_format = HashMap::with_capacity(slots.len());
        let mut failed = false;
        for slot in &mut slots {
            match slot.generate(resizer, source, index, cached) {
                Ok(dims) => {
                    placements.push((slot.descriptor, dims));
                    dims_by_format.insert(slot.descriptor.format_id, dims);
                }
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "skipping artwork source");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            continue;
        }

        for &dbid in dbids {
            mhli.add(&image_item(image_id, dbid, size, &placements, index));
            image_ids.insert(dbid, image_id);
            image_id += 1;
        }
        cache.images.insert(
            source.clone(),
            ImageCacheEntry {
                index,
                size,
                mtime,
                dims: dims_by_format,
            },
        );
        index += 1;
        image_count += dbids.len() as u32;
    }

    let mut mhfd = Chunk::new(&[
        Field::Bytes(b"mhfd"),
        Field::HeaderLength,
        Field::TotalLength,
        Field::U32(0),
        Field::U32(2),
        Field::U32(3),
        Field::U32(0),
        Field::U32(base_id + image_count), // next unused image id
        Field::Padding(16),
        Field::U32(2),
        Field::Padding(80),
    ]);

    // image list
    let mut mhsd = section_chunk(1);
    mhsd.add(&mhli.render());
    mhfd.add(&mhsd.render());

    // album list, always empty
    let mut mhsd = section_chunk(2);
    mhsd.add(
        &Chunk::new(&[
            Field::Bytes(b"mhla"),
            Field::HeaderLength,
            Field::U32(0),
            Field::Padding(80),
        ])
        .render(),
    );
    mhfd.add(&mhsd.render());

    // file list
    let mut mhsd = section_chunk(3);
    let mut mhlf = Chunk::new(&[
        Field::Bytes(b"mhlf"),
        Field::HeaderLength,
        Field::U32(slots.len() as u32),
        Field::Padding(80),
    ]);
    for slot in &slots {
        mhlf.add(
            &Chunk::new(&[
                Field::Bytes(b"mhif"),
                Field::HeaderLength,
                Field::TotalLength,
                Field::U32(0),
                Field::U32(slot.descriptor.format_id),
                Field::U32(slot.slot_size),
                Field::Padding(100),
            ])
            .render(),
        );
    }
    mhsd.add(&mhlf.render());
    mhfd.add(&mhsd.render());

    for slot in slots {
        let (format_id, stamp) = slot.close();
        cache.formats.insert(format_id, stamp);
    }

    Ok(Some(ArtworkOutput {
        database: mhfd.render(),
        cache,
        image_ids,
    }))
}
