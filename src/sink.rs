//! Destination buffers owned by the consumer.
//!
//! The loader only needs a writable byte region of exactly
//! `triangle_count * 36` bytes. The consumer keeps ownership: it lends the
//! buffer to the loader when publishing it and gets it back from `finish`.

use memmap2::MmapMut;

/// A consumer-owned, writable destination for decoded geometry.
///
/// Geometry is written as tightly packed native-endian `f32` positions,
/// 3 per vertex, 3 vertices per triangle.
pub trait GeometrySink: Send + 'static {
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl GeometrySink for Vec<u8> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl GeometrySink for Box<[u8]> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// File-backed or anonymous mappings, the closest host-side analogue of a
/// mapped GPU buffer.
impl GeometrySink for MmapMut {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// Read positions back out of destination bytes, regardless of alignment.
pub fn positions(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_expose_their_bytes() {
        let mut vec_sink = vec![0u8; 36];
        assert_eq!(vec_sink.bytes_mut().len(), 36);

        let mut boxed: Box<[u8]> = vec![0u8; 72].into_boxed_slice();
        boxed.bytes_mut()[71] = 7;
        assert_eq!(boxed.bytes_mut().len(), 72);
        assert_eq!(boxed[71], 7);

        let mut anon = MmapMut::map_anon(36).expect("Failed to map anonymous memory");
        anon.bytes_mut().fill(1);
        assert!(anon.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_positions_round_trip() {
        let floats = [1.5f32, -2.0, 3.25];
        let bytes: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
        assert_eq!(positions(&bytes), floats);
    }
}
