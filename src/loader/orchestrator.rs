/// Load Orchestrator
///
/// Runs on the loader thread. Validates the input, fans decoding out to the
/// workers, hands them the consumer's destination once it is published and
/// reduces their bounds into the normalization transform.
use std::thread;

use super::bounds::BoundingBox;
use super::worker::{self, TriangleWorker};
use super::LoadShared;
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderErrorContext, LoaderResult};
use crate::sink::GeometrySink;
use crate::source::FileSource;
use crate::stage::Stage;
use crate::stl::{StlHeader, FLOATS_PER_TRIANGLE, RECORD_LEN, TRIANGLE_STRIDE_BYTES};

pub(crate) fn run<B: GeometrySink>(shared: &LoadShared<B>, config: &LoaderConfig) {
    let gate = &shared.gate;
    if gate.try_advance(Stage::Start).is_err() {
        return;
    }

    let view = match FileSource::open(&shared.locator) {
        Ok(view) => view,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };
    let header = match StlHeader::parse(&view) {
        Ok(header) => header,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };

    let count = header.triangle_count;
    shared.set_triangle_count(count);
    if gate.try_advance(Stage::TriangleCount).is_err() {
        return;
    }

    let mut staging = vec![0.0f32; count as usize * FLOATS_PER_TRIANGLE];
    if gate.try_advance(Stage::RamBuffer).is_err() {
        return;
    }

    let mut destination = None;
    let outcome = decode_and_publish(
        shared,
        header.records(&view),
        &mut staging,
        &mut destination,
        config,
        count,
    );
    if let Some(buffer) = destination {
        *shared.destination.lock() = Some(buffer);
    }

    match outcome {
        Ok(bounds) => {
            shared.set_transform(bounds.normalization_transform());
            if gate.try_advance(Stage::Done).is_ok() {
                log::info!(
                    "Loaded {} triangles from {} (bounds {:?} .. {:?})",
                    count,
                    shared.locator,
                    bounds.min,
                    bounds.max
                );
            }
        }
        Err(e) => {
            shared.fail(e);
        }
    }

    // Release the mapping (the built-in asset is static) and staging.
    drop(view);
    drop(staging);
}

/// Record `error` on the session, which moves the gate to its error stage
/// and releases every waiting worker.
fn abort<B: GeometrySink>(shared: &LoadShared<B>, error: LoaderError) -> LoaderError {
    let stage = error.stage();
    shared.fail(error);
    LoaderError::Failed(stage)
}

fn decode_and_publish<B: GeometrySink>(
    shared: &LoadShared<B>,
    records: &[u8],
    staging: &mut [f32],
    destination: &mut Option<B>,
    config: &LoaderConfig,
    count: u32,
) -> LoaderResult<BoundingBox> {
    let gate = &shared.gate;
    let ranges = worker::partition(count, config.worker_count);
    log::debug!("decoding {} triangles with {} workers", count, ranges.len());

    thread::scope(move |scope| -> LoaderResult<BoundingBox> {
        let mut handles = Vec::with_capacity(ranges.len());
        let mut senders = Vec::with_capacity(ranges.len());
        let mut rest = staging;

        for (index, range) in ranges.iter().cloned().enumerate() {
            let (chunk, tail) =
                std::mem::take(&mut rest).split_at_mut(range.len() * FLOATS_PER_TRIANGLE);
            rest = tail;
            let source = &records[range.start * RECORD_LEN..range.end * RECORD_LEN];
            let worker = TriangleWorker::new(index, range, source, chunk);
            let (tx, rx) = crossbeam_channel::bounded(1);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn_scoped(scope, move || worker.run(gate, rx))
                .loader_context(&format!("failed to spawn worker {}", index));
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    senders.push(tx);
                }
                Err(e) => return Err(abort(shared, e)),
            }
        }

        log::trace!("Waiting for buffer...");
        let stage = gate.wait_until(Stage::GpuBuffer);
        if stage.is_error() {
            return Err(LoaderError::Failed(stage));
        }

        let Some(buffer) = shared.destination.lock().take() else {
            return Err(abort(shared, LoaderError::Failed(Stage::Error)));
        };
        let bytes = destination.insert(buffer).bytes_mut();
        let expected = count as usize * TRIANGLE_STRIDE_BYTES;
        if bytes.len() != expected {
            let actual = bytes.len();
            return Err(abort(shared, LoaderError::BufferSize { expected, actual }));
        }

        let mut rest = bytes;
        for (range, tx) in ranges.iter().zip(&senders) {
            let (chunk, tail) =
                std::mem::take(&mut rest).split_at_mut(range.len() * TRIANGLE_STRIDE_BYTES);
            rest = tail;
            // A closed channel means the worker died; its join reports it.
            let _ = tx.send(chunk);
        }
        drop(senders);
        gate.try_advance(Stage::WorkerGpu).map_err(LoaderError::Failed)?;
        log::trace!("Sent buffers to worker threads");

        let mut bounds = BoundingBox::empty();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(local) => bounds = bounds.merge(local),
                Err(_) => return Err(abort(shared, LoaderError::WorkerPanicked { index })),
            }
        }
        log::trace!("Joined worker threads");

        Ok(bounds)
    })
}
