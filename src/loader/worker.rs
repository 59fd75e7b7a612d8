/// Triangle Worker
///
/// Decodes one contiguous range of triangle records. Decoding into staging
/// starts as soon as the worker exists; copying into the destination waits
/// until the gate reaches `WorkerGpu` and the sub-slice has been bound.
use std::ops::Range;

use crossbeam_channel::Receiver;
use glam::Vec3;

use super::bounds::BoundingBox;
use crate::stage::{Stage, StageGate};
use crate::stl::{self, FLOATS_PER_TRIANGLE, RECORD_LEN};

/// Split `[0, count)` into `workers` ranges, `i*count/N .. (i+1)*count/N`.
///
/// Ranges are contiguous, disjoint and cover every triangle even when
/// `count` is not divisible by `workers`; some may be empty.
pub fn partition(count: u32, workers: usize) -> Vec<Range<usize>> {
    let count = u64::from(count);
    let n = workers.max(1) as u64;
    (0..n)
        .map(|i| (i * count / n) as usize..((i + 1) * count / n) as usize)
        .collect()
}

pub struct TriangleWorker<'a> {
    index: usize,
    range: Range<usize>,
    /// Raw records for `range`, `RECORD_LEN` bytes each
    records: &'a [u8],
    /// Staging floats for `range`, `FLOATS_PER_TRIANGLE` each
    staging: &'a mut [f32],
    bounds: BoundingBox,
}

impl<'a> TriangleWorker<'a> {
    pub fn new(index: usize, range: Range<usize>, records: &'a [u8], staging: &'a mut [f32]) -> Self {
        debug_assert_eq!(records.len(), range.len() * RECORD_LEN);
        debug_assert_eq!(staging.len(), range.len() * FLOATS_PER_TRIANGLE);
        Self {
            index,
            range,
            records,
            staging,
            bounds: BoundingBox::empty(),
        }
    }

    /// Local bounds; meaningful once [`TriangleWorker::decode`] has run.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Decode every record into staging and fold vertices into the bounds.
    pub fn decode(&mut self) {
        let records = self.records.chunks_exact(RECORD_LEN);
        let staged = self.staging.chunks_exact_mut(FLOATS_PER_TRIANGLE);
        for (record, out) in records.zip(staged) {
            let decoded = stl::decode_record(record, out);
            debug_assert!(decoded.is_some(), "record shorter than {} bytes", RECORD_LEN);
            for vertex in out.chunks_exact(3) {
                self.bounds.include(Vec3::new(vertex[0], vertex[1], vertex[2]));
            }
        }
    }

    /// Copy staged triangles into this worker's destination range.
    ///
    /// # Panics
    /// If `destination` is not exactly `range.len() * 36` bytes.
    pub fn publish(&self, destination: &mut [u8]) {
        destination.copy_from_slice(bytemuck::cast_slice::<f32, u8>(&*self.staging));
    }

    /// Full worker body: decode, wait for the destination, publish.
    ///
    /// Returns the local bounds. If the load fails before `WorkerGpu`, the
    /// publish phase is skipped.
    pub fn run(mut self, gate: &StageGate, destination: Receiver<&mut [u8]>) -> BoundingBox {
        self.decode();
        log::trace!(
            "worker {} decoded triangles {}..{}",
            self.index,
            self.range.start,
            self.range.end
        );

        let stage = gate.wait_until(Stage::WorkerGpu);
        if stage.is_error() {
            log::trace!("worker {} skipping publish, load ended in {}", self.index, stage);
            return self.bounds;
        }

        match destination.recv() {
            Ok(slice) => self.publish(slice),
            Err(_) => log::error!("worker {} never received its destination range", self.index),
        }
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stl::{encode, HEADER_LEN, TRIANGLE_STRIDE_BYTES};

    fn sample_triangles(n: usize) -> Vec<[[f32; 3]; 3]> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                [[f, -f, 0.5], [f + 1.0, 2.0 * f, -3.0], [-f, f * f, f]]
            })
            .collect()
    }

    fn decode_with(workers: usize, triangles: &[[[f32; 3]; 3]]) -> (Vec<f32>, BoundingBox) {
        let bytes = encode(b"", triangles);
        let records = &bytes[HEADER_LEN..];
        let mut staging = vec![0.0f32; triangles.len() * FLOATS_PER_TRIANGLE];
        let mut rest = staging.as_mut_slice();
        let mut bounds = Vec::new();

        for (i, range) in partition(triangles.len() as u32, workers).into_iter().enumerate() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * FLOATS_PER_TRIANGLE);
            rest = tail;
            let source = &records[range.start * RECORD_LEN..range.end * RECORD_LEN];
            let mut worker = TriangleWorker::new(i, range, source, chunk);
            worker.decode();
            bounds.push(worker.bounds());
        }

        (staging, bounds.into_iter().collect())
    }

    #[test]
    fn test_partition_covers_exactly() {
        for (count, workers) in [(0u32, 8usize), (1, 8), (7, 8), (8, 8), (1000, 8), (13, 3), (5, 1)] {
            let ranges = partition(count, workers);
            assert_eq!(ranges.len(), workers);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges[ranges.len() - 1].end, count as usize);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn test_partition_matches_integer_formula() {
        let ranges = partition(10, 4);
        assert_eq!(ranges, vec![0..2, 2..5, 5..7, 7..10]);
    }

    #[test]
    fn test_partition_invariance() {
        let triangles = sample_triangles(37);
        let (single, single_bounds) = decode_with(1, &triangles);
        let (eight, eight_bounds) = decode_with(8, &triangles);
        assert_eq!(single, eight);
        assert_eq!(single_bounds, eight_bounds);

        let flat: Vec<f32> = triangles.iter().flatten().flatten().copied().collect();
        assert_eq!(single, flat);
    }

    #[test]
    fn test_publish_copies_in_order() {
        let triangles = sample_triangles(3);
        let bytes = encode(b"", &triangles);
        let mut staging = vec![0.0f32; 27];
        let mut worker = TriangleWorker::new(0, 0..3, &bytes[HEADER_LEN..], &mut staging);
        worker.decode();

        let mut destination = vec![0u8; 3 * TRIANGLE_STRIDE_BYTES];
        worker.publish(&mut destination);
        let flat: Vec<f32> = triangles.iter().flatten().flatten().copied().collect();
        assert_eq!(crate::sink::positions(&destination), flat);
    }

    #[test]
    fn test_run_skips_publish_after_error() {
        let triangles = sample_triangles(2);
        let bytes = encode(b"", &triangles);
        let mut staging = vec![0.0f32; 18];
        let worker = TriangleWorker::new(0, 0..2, &bytes[HEADER_LEN..], &mut staging);

        let gate = StageGate::new();
        gate.advance_to(Stage::Error);
        let (_tx, rx) = crossbeam_channel::bounded::<&mut [u8]>(1);
        let bounds = worker.run(&gate, rx);
        assert!(!bounds.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_publish_rejects_mismatched_destination() {
        let triangles = sample_triangles(2);
        let bytes = encode(b"", &triangles);
        let mut staging = vec![0.0f32; 18];
        let mut worker = TriangleWorker::new(0, 0..2, &bytes[HEADER_LEN..], &mut staging);
        worker.decode();

        let mut short = vec![0u8; 2 * TRIANGLE_STRIDE_BYTES - 1];
        worker.publish(&mut short);
    }

    #[test]
    fn test_decode_fills_every_staged_float() {
        let triangles: Vec<[[f32; 3]; 3]> = (0..5)
            .map(|i| {
                let f = i as f32 + 1.0;
                [[f; 3], [-f; 3], [f * 0.5; 3]]
            })
            .collect();
        let bytes = encode(b"", &triangles);
        let mut staging = vec![0.0f32; 5 * FLOATS_PER_TRIANGLE];
        let mut worker = TriangleWorker::new(0, 0..5, &bytes[HEADER_LEN..], &mut staging);
        worker.decode();
        assert_eq!(worker.bounds().max, Vec3::splat(5.0));
        drop(worker);

        assert!(staging.iter().all(|&v| v != 0.0));
    }

    #[test]
    fn test_run_publishes_only_after_worker_gpu() {
        let triangles = sample_triangles(4);
        let bytes = encode(b"", &triangles);
        let mut staging = vec![0.0f32; 4 * FLOATS_PER_TRIANGLE];
        let mut destination = vec![0xEEu8; 4 * TRIANGLE_STRIDE_BYTES];

        let gate = StageGate::new();
        gate.advance_to(Stage::RamBuffer);
        let gate = &gate;
        let worker = TriangleWorker::new(0, 0..4, &bytes[HEADER_LEN..], &mut staging);
        let (tx, rx) = crossbeam_channel::bounded::<&mut [u8]>(1);
        let slice = destination.as_mut_slice();

        let bounds = std::thread::scope(move |scope| {
            let handle = scope.spawn(move || worker.run(gate, rx));

            // Decoding needs no destination; the worker then parks on the gate.
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!handle.is_finished());

            gate.advance_to(Stage::GpuBuffer);
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!handle.is_finished());
            assert!(slice.iter().all(|&b| b == 0xEE));

            tx.send(slice).expect("worker is waiting");
            gate.advance_to(Stage::WorkerGpu);
            handle.join().expect("worker panicked")
        });

        let flat: Vec<f32> = triangles.iter().flatten().flatten().copied().collect();
        assert_eq!(crate::sink::positions(&destination), flat);
        assert!(!bounds.is_empty());
    }
}
