//! Binary STL layout
//!
//! ```text
//! 0..80    preamble (free-form, ignored)
//! 80..84   triangle count, u32 little-endian
//! 84..     triangle records, 50 bytes each:
//!            12 bytes normal (ignored)
//!            3 x 12 bytes vertices, x/y/z f32 little-endian
//!            2 bytes attribute count (ignored)
//! ```
//!
//! Input is untrusted: every field read goes through [`ByteCursor`], which
//! checks offsets against the real length of the byte view.

use crate::error::{LoaderError, LoaderResult};

pub const PREAMBLE_LEN: usize = 80;
pub const HEADER_LEN: usize = 84;
pub const RECORD_LEN: usize = 50;
pub const NORMAL_LEN: usize = 12;
pub const FLOATS_PER_TRIANGLE: usize = 9;
/// Bytes one triangle occupies in the destination buffer
pub const TRIANGLE_STRIDE_BYTES: usize = FLOATS_PER_TRIANGLE * std::mem::size_of::<f32>();

/// Prefix of the (unsupported) ASCII variant
pub const ASCII_MAGIC: &[u8; 6] = b"solid ";

/// Bounds-checked little-endian reader over a byte slice
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.bytes.get(offset..end)?.try_into().ok()
    }

    pub fn read_u32_le(&self, offset: usize) -> Option<u32> {
        self.read_array::<4>(offset).map(u32::from_le_bytes)
    }

    pub fn read_f32_le(&self, offset: usize) -> Option<f32> {
        self.read_array::<4>(offset).map(f32::from_le_bytes)
    }
}

/// Validated header of a binary STL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StlHeader {
    pub triangle_count: u32,
}

impl StlHeader {
    /// Validate the header against the full file contents.
    ///
    /// The ASCII check runs first, so a `"solid "` prefix is rejected even
    /// when the rest of the file happens to be a valid binary STL.
    pub fn parse(bytes: &[u8]) -> LoaderResult<Self> {
        if bytes.starts_with(ASCII_MAGIC) {
            return Err(LoaderError::UnsupportedFormat);
        }

        let cursor = ByteCursor::new(bytes);
        let actual = cursor.len() as u64;
        let too_short = LoaderError::SizeMismatch { expected: HEADER_LEN as u64, actual };
        if cursor.len() < HEADER_LEN {
            return Err(too_short);
        }
        let triangle_count = cursor.read_u32_le(PREAMBLE_LEN).ok_or(too_short)?;

        let expected = expected_file_len(triangle_count);
        if expected != actual {
            return Err(LoaderError::SizeMismatch { expected, actual });
        }

        Ok(Self { triangle_count })
    }

    /// Slice holding all triangle records of an already validated file
    pub fn records<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[HEADER_LEN..]
    }

    pub fn destination_len(&self) -> usize {
        self.triangle_count as usize * TRIANGLE_STRIDE_BYTES
    }
}

/// File length implied by a triangle count, without wrapping
pub fn expected_file_len(triangle_count: u32) -> u64 {
    u64::from(triangle_count) * RECORD_LEN as u64 + HEADER_LEN as u64
}

/// Write the three vertex positions of one record into `out` (9 floats).
///
/// Returns `None` if the record or the output are too short.
pub fn decode_record(record: &[u8], out: &mut [f32]) -> Option<()> {
    let cursor = ByteCursor::new(record);
    if out.len() < FLOATS_PER_TRIANGLE {
        return None;
    }
    for (i, value) in out[..FLOATS_PER_TRIANGLE].iter_mut().enumerate() {
        *value = cursor.read_f32_le(NORMAL_LEN + i * 4)?;
    }
    Some(())
}

/// Assemble a binary STL in memory. Used by tests and tooling.
pub fn encode(preamble: &[u8], triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + triangles.len() * RECORD_LEN);
    let mut head = [0u8; PREAMBLE_LEN];
    let n = preamble.len().min(PREAMBLE_LEN);
    head[..n].copy_from_slice(&preamble[..n]);
    bytes.extend_from_slice(&head);
    bytes.extend_from_slice(&(triangles.len() as u32).to_le_bytes());

    for triangle in triangles {
        bytes.extend_from_slice(&[0u8; NORMAL_LEN]);
        for vertex in triangle {
            for component in vertex {
                bytes.extend_from_slice(&component.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }
    bytes
}
