//! Tag/length/child-count chunk builder shared by the nested container formats
//!
//! Every record in the track database and the artwork database is a "chunk":
//! a 4-byte ASCII tag, a fixed little-endian prefix, then zero or more fully
//! rendered child chunks. Three prefix fields cannot be filled while the
//! prefix is written: the header length (known once the prefix is complete),
//! and the total length and child count (known only after all children have
//! been appended). [`Chunk`] records the byte offsets of those slots and
//! patches them - the header length immediately in [`Chunk::new`], the other
//! two in [`Chunk::render`].
//!
//! Composition is strictly bottom-up: a child is rendered to bytes before it
//! is appended, so a parent never reaches into a child's unpatched state.

/// One encodable primitive of a chunk's fixed prefix.
///
/// All integers are little-endian on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    /// Literal bytes: the 4-byte ASCII tag and other fixed magic strings.
    Bytes(&'a [u8]),
    U64(u64),
    U32(u32),
    U16(u16),
    U8(u8),
    /// 32-bit IEEE float (the track record stores the sample rate twice,
    /// once as an integer and once as a float).
    F32(f32),
    /// A run of zero bytes.
    Padding(usize),
    /// 32-bit slot patched with the prefix length as soon as it is known.
    HeaderLength,
    /// 32-bit slot patched with the rendered chunk's full byte length.
    TotalLength,
    /// 32-bit slot patched with the accumulated child count.
    ChildCount,
}

/// A chunk under construction.
pub struct Chunk {
    data: Vec<u8>,
    total_length_at: Option<usize>,
    child_count_at: Option<usize>,
    child_count: u32,
}

impl Chunk {
    /// Render the fixed prefix and capture the patch-site offsets.
    ///
    /// The header-length slot, if present, is patched here: by the time the
    /// prefix has been emitted its length is already final.
    pub fn new(fields: &[Field<'_>]) -> Self {
        let mut data = Vec::new();
        let mut header_length_at = None;
        let mut total_length_at = None;
        let mut child_count_at = None;
        for field in fields {
            match *field {
                Field::Bytes(bytes) => data.extend_from_slice(bytes),
                Field::U64(v) => data.extend_from_slice(&v.to_le_bytes()),
                Field::U32(v) => data.extend_from_slice(&v.to_le_bytes()),
                Field::U16(v) => data.extend_from_slice(&v.to_le_bytes()),
                Field::U8(v) => data.push(v),
                Field::F32(v) => data.extend_from_slice(&v.to_le_bytes()),
                Field::Padding(n) => data.resize(data.len() + n, 0),
                Field::HeaderLength => {
                    header_length_at = Some(data.len());
                    data.extend_from_slice(&[0; 4]);
                }
                Field::TotalLength => {
                    total_length_at = Some(data.len());
                    data.extend_from_slice(&[0; 4]);
                }
                Field::ChildCount => {
                    child_count_at = Some(data.len());
                    data.extend_from_slice(&[0; 4]);
                }
            }
        }
        if let Some(at) = header_length_at {
            let len = data.len() as u32;
            data[at..at + 4].copy_from_slice(&len.to_le_bytes());
        }
        Self {
            data,
            total_length_at,
            child_count_at,
            child_count: 0,
        }
    }

    /// Append a fully rendered child, counting it as one child.
    pub fn add(&mut self, child: &[u8]) {
        self.add_counted(child, 1);
    }

    /// Append a fully rendered child with an explicit child-count
    /// contribution.
    ///
    /// Sub-objects the device counts through a separate header field (e.g.
    /// playlist membership records, covered by the playlist's track-count
    /// field) pass 0 here.
    pub fn add_counted(&mut self, child: &[u8], count: u32) {
        self.child_count += count;
        self.data.extend_from_slice(child);
    }

    /// Patch the deferred slots and return the immutable buffer.
    ///
    /// Consumes the builder, so nothing can be appended afterwards.
    pub fn render(mut self) -> Vec<u8> {
        if let Some(at) = self.total_length_at {
            let len = self.data.len() as u32;
            self.data[at..at + 4].copy_from_slice(&len.to_le_bytes());
        }
        if let Some(at) = self.child_count_at {
            self.data[at..at + 4].copy_from_slice(&self.child_count.to_le_bytes());
        }
        self.data
    }
}

/// `mhsd` section wrapper, used by both the track and artwork databases.
/// The discriminator tells the device what the single child list contains.
pub(crate) fn section_chunk(discriminator: u32) -> Chunk {
    Chunk::new(&[
        Field::Bytes(b"mhsd"),
        Field::HeaderLength,
        Field::TotalLength,
        Field::U32(discriminator),
        Field::Padding(80),
    ])
}

/// Encode text as UTF-16LE, the string encoding of every `mhod` sub-object.
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le32(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    #[test]
    fn test_header_length_patched_immediately() {
        let chunk = Chunk::new(&[
            Field::Bytes(b"test"),
            Field::HeaderLength,
            Field::U32(7),
            Field::Padding(4),
        ]);
        // 4 tag + 4 header length + 4 value + 4 padding
        assert_eq!(le32(&chunk.data, 4), 16);
    }

    #[test]
    fn test_total_length_matches_rendered_size() {
        let mut chunk = Chunk::new(&[
            Field::Bytes(b"test"),
            Field::HeaderLength,
            Field::TotalLength,
            Field::ChildCount,
        ]);
        chunk.add(b"0123456789");
        let data = chunk.render();
        assert_eq!(le32(&data, 8) as usize, data.len());
        assert_eq!(data.len(), 16 + 10);
    }

    #[test]
    fn test_child_count_sums_explicit_counts() {
        let mut chunk = Chunk::new(&[
            Field::Bytes(b"test"),
            Field::TotalLength,
            Field::ChildCount,
        ]);
        chunk.add(b"a");
        chunk.add_counted(b"b", 0);
        chunk.add_counted(b"c", 3);
        let data = chunk.render();
        assert_eq!(le32(&data, 8), 4);
    }

    #[test]
    fn test_scalar_encodings_are_little_endian() {
        let chunk = Chunk::new(&[
            Field::U32(0x01020304),
            Field::U16(0x0506),
            Field::U8(0x07),
            Field::U64(0x0807060504030201),
        ]);
        let data = chunk.render();
        assert_eq!(&data[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&data[4..6], &[0x06, 0x05]);
        assert_eq!(data[6], 0x07);
        assert_eq!(&data[7..15], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_utf16le_encoding() {
        assert_eq!(utf16le("AB"), vec![0x41, 0x00, 0x42, 0x00]);
        assert_eq!(utf16le(""), Vec::<u8>::new());
    }
}
