//! Staged mesh loading
//!
//! A [`MeshLoader`] owns one load session: a background loader thread that
//! validates the file, decodes it in parallel into staging memory and, once
//! the consumer publishes a destination buffer, copies the geometry into it.
//!
//! The consumer side of the handshake:
//!
//! 1. wait for the triangle count ([`MeshLoader::wait_triangle_count`]),
//! 2. publish a buffer of `count * 36` bytes ([`MeshLoader::publish_buffer`]
//!    or [`MeshLoader::allocate_with`]),
//! 3. call [`MeshLoader::finish`] to get the buffer back together with the
//!    normalization transform, or the reason the load failed.
//!
//! Dropping the loader, or finishing it, without publishing abandons the
//! load; its workers are released and every thread is joined.

pub mod bounds;
mod orchestrator;
pub mod worker;

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use glam::Mat4;
use parking_lot::Mutex;

use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderErrorContext, LoaderResult};
use crate::sink::GeometrySink;
use crate::stage::{Stage, StageGate};
use crate::stl::TRIANGLE_STRIDE_BYTES;

pub use bounds::BoundingBox;
pub use worker::TriangleWorker;

type Notifier = Box<dyn FnOnce() + Send>;

/// State shared between the consumer handle and the loader thread
pub(crate) struct LoadShared<B> {
    pub(crate) locator: String,
    pub(crate) gate: StageGate,
    triangle_count: OnceLock<u32>,
    transform: OnceLock<Mat4>,
    /// Published destination; lent to the loader between `GpuBuffer` and `Done`
    pub(crate) destination: Mutex<Option<B>>,
    error: Mutex<Option<LoaderError>>,
    notifier: Mutex<Option<Notifier>>,
}

impl<B> LoadShared<B> {
    fn new(locator: &str, notifier: Option<Notifier>) -> Self {
        Self {
            locator: locator.to_string(),
            gate: StageGate::new(),
            triangle_count: OnceLock::new(),
            transform: OnceLock::new(),
            destination: Mutex::new(None),
            error: Mutex::new(None),
            notifier: Mutex::new(notifier),
        }
    }

    pub(crate) fn set_triangle_count(&self, count: u32) {
        let _ = self.triangle_count.set(count);
    }

    pub(crate) fn set_transform(&self, transform: Mat4) {
        let _ = self.transform.set(transform);
    }

    /// Keep the first error reported for this session.
    fn record_error(&self, error: LoaderError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Record `error` and move the gate to the matching error stage.
    ///
    /// Returns false, and only logs at debug level, if the load had already
    /// failed.
    pub(crate) fn fail(&self, error: LoaderError) -> bool {
        let stage = error.stage();
        let current = self.gate.current();
        if current.is_error() {
            log::debug!("{} already ended in {}: {}", self.locator, current, error);
            self.record_error(error);
            return false;
        }
        log::error!("Loading {} failed: {}", self.locator, error);
        self.record_error(error);
        self.gate.try_advance(stage).is_ok()
    }

    fn notify(&self) {
        let notifier = self.notifier.lock().take();
        if let Some(notifier) = notifier {
            notifier();
        }
    }
}

/// Marks the session failed if the loader thread unwinds, so no waiter is
/// left blocked on a gate nobody will advance.
struct PanicGuard<'a, B>(&'a LoadShared<B>);

impl<B> Drop for PanicGuard<'_, B> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail(LoaderError::LoaderPanicked);
            self.0.notify();
        }
    }
}

/// A buffer the loader refused, handed back to the consumer.
pub struct Rejected<B> {
    pub buffer: B,
    pub error: LoaderError,
}

impl<B> fmt::Debug for Rejected<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish_non_exhaustive()
    }
}

impl<B> fmt::Display for Rejected<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination rejected: {}", self.error)
    }
}

/// Result of a successful load
#[derive(Debug)]
pub struct LoadedMesh<B> {
    pub triangle_count: u32,
    /// Every stage the load held, `START` through `DONE`
    pub history: Vec<Stage>,
    /// Maps mesh coordinates into a unit cube centered on the origin
    pub transform: Mat4,
    /// The published destination, now holding every triangle
    pub buffer: B,
}

/// Result of a failed load. `buffer` is the published destination, if the
/// load got that far; its contents are unspecified.
pub struct LoadFailure<B> {
    pub stage: Stage,
    pub error: LoaderError,
    pub history: Vec<Stage>,
    pub buffer: Option<B>,
}

impl<B> fmt::Debug for LoadFailure<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFailure")
            .field("stage", &self.stage)
            .field("error", &self.error)
            .field("history", &self.history)
            .field("has_buffer", &self.buffer.is_some())
            .finish()
    }
}

impl<B> fmt::Display for LoadFailure<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.stage.describe(), self.error)
    }
}

pub struct MeshLoader<B: GeometrySink> {
    shared: Arc<LoadShared<B>>,
    thread: Option<JoinHandle<()>>,
}

impl<B: GeometrySink> MeshLoader<B> {
    /// Start loading `locator` on a background thread.
    ///
    /// `locator` is a filesystem path or the built-in asset name
    /// [`crate::source::BUILTIN_SPHERE`]. Failures to open or validate the
    /// file are reported through the stage, not here.
    pub fn spawn(locator: &str, config: &LoaderConfig) -> LoaderResult<Self> {
        Self::start(locator, config, None)
    }

    /// Like [`MeshLoader::spawn`], calling `notify` once from the loader
    /// thread when the load reaches a terminal stage.
    pub fn spawn_with_notifier<F>(locator: &str, config: &LoaderConfig, notify: F) -> LoaderResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::start(locator, config, Some(Box::new(notify)))
    }

    fn start(locator: &str, config: &LoaderConfig, notifier: Option<Notifier>) -> LoaderResult<Self> {
        config.validate()?;
        let shared = Arc::new(LoadShared::new(locator, notifier));
        let config = config.clone();

        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("stl-loader".to_string())
                .spawn(move || {
                    let guard = PanicGuard(&*shared);
                    orchestrator::run(&shared, &config);
                    drop(guard);
                    log::trace!("Loader thread done");
                    shared.notify();
                })
                .loader_context("failed to spawn loader thread")?
        };
        log::debug!("started loading {}", locator);

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn locator(&self) -> &str {
        &self.shared.locator
    }

    /// Current stage, without blocking.
    pub fn stage(&self) -> Stage {
        self.shared.gate.current()
    }

    /// Every stage this load has held, oldest first.
    pub fn history(&self) -> Vec<Stage> {
        self.shared.gate.history()
    }

    /// Block until the load reaches `stage` or fails. Returns the stage held.
    pub fn wait_until(&self, stage: Stage) -> Stage {
        self.shared.gate.wait_until(stage)
    }

    /// Triangle count, once the header has been validated.
    pub fn triangle_count(&self) -> Option<u32> {
        self.shared.triangle_count.get().copied()
    }

    pub fn wait_triangle_count(&self) -> LoaderResult<u32> {
        let stage = self.wait_until(Stage::TriangleCount);
        if stage.is_error() {
            return Err(LoaderError::Failed(stage));
        }
        self.triangle_count().ok_or(LoaderError::Failed(Stage::Error))
    }

    /// Size in bytes the destination must have, once the count is known.
    pub fn destination_len(&self) -> Option<usize> {
        self.triangle_count()
            .map(|count| count as usize * TRIANGLE_STRIDE_BYTES)
    }

    /// Lend `buffer` to the loader as the destination.
    ///
    /// Blocks until the loader's staging memory exists. The buffer must be
    /// exactly [`MeshLoader::destination_len`] bytes; it is handed back
    /// if it is refused, and from [`MeshLoader::finish`] otherwise.
    pub fn publish_buffer(&self, mut buffer: B) -> Result<(), Rejected<B>> {
        let gate = &self.shared.gate;
        let stage = gate.wait_until(Stage::RamBuffer);
        if stage.is_error() {
            return Err(Rejected {
                buffer,
                error: LoaderError::Failed(stage),
            });
        }

        let expected = self.destination_len().unwrap_or(0);
        let actual = buffer.bytes_mut().len();
        if actual != expected {
            return Err(Rejected {
                buffer,
                error: LoaderError::BufferSize { expected, actual },
            });
        }

        let mut slot = self.shared.destination.lock();
        if slot.is_some() || gate.current() >= Stage::GpuBuffer {
            let error = match gate.current() {
                stage if stage.is_error() => LoaderError::Failed(stage),
                _ => LoaderError::AlreadyPublished,
            };
            return Err(Rejected { buffer, error });
        }
        match gate.try_advance(Stage::GpuBuffer) {
            Ok(()) => {
                *slot = Some(buffer);
                log::debug!("published {} byte destination for {}", actual, self.shared.locator);
                Ok(())
            }
            Err(stage) => Err(Rejected {
                buffer,
                error: LoaderError::Failed(stage),
            }),
        }
    }

    /// Wait for the triangle count, allocate the destination with
    /// `allocate(len)` and publish it.
    pub fn allocate_with<F>(&self, allocate: F) -> LoaderResult<()>
    where
        F: FnOnce(usize) -> B,
    {
        self.wait_triangle_count()?;
        let len = self.destination_len().unwrap_or(0);
        self.publish_buffer(allocate(len)).map_err(|rejected| rejected.error)
    }

    /// Wait for the load to end and collect its result.
    ///
    /// Finishing before a destination was published abandons the load.
    pub fn finish(mut self) -> Result<LoadedMesh<B>, LoadFailure<B>> {
        let shared = self.shared.clone();
        let gate = &shared.gate;

        if !gate.wait_until(Stage::TriangleCount).is_error() && gate.current() < Stage::GpuBuffer {
            shared.record_error(LoaderError::Abandoned);
            if gate.fail_unless_reached(Stage::GpuBuffer, Stage::Error) {
                log::warn!("{} finished without a destination, abandoning", shared.locator);
            }
        }

        gate.wait_until(Stage::Done);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Failed to join loader thread for {}", shared.locator);
                shared.record_error(LoaderError::LoaderPanicked);
            }
        }

        let stage = gate.current();
        let buffer = shared.destination.lock().take();
        let count = shared.triangle_count.get().copied();
        let transform = shared.transform.get().copied();
        let history = gate.history();

        match (stage, buffer, count, transform) {
            (Stage::Done, Some(buffer), Some(triangle_count), Some(transform)) => Ok(LoadedMesh {
                triangle_count,
                history,
                transform,
                buffer,
            }),
            (stage, buffer, _, _) => {
                let error = shared.error.lock().take().unwrap_or(LoaderError::Failed(stage));
                Err(LoadFailure {
                    stage,
                    error,
                    history,
                    buffer,
                })
            }
        }
    }
}

impl<B: GeometrySink> Drop for MeshLoader<B> {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.shared.gate.fail_unless_reached(Stage::GpuBuffer, Stage::Error) {
            log::debug!("{} dropped before a destination was published", self.shared.locator);
        }
        if thread.join().is_err() {
            log::error!("Failed to join loader thread for {}", self.shared.locator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_reports_only_the_first_failure() {
        let shared = LoadShared::<Vec<u8>>::new("missing.stl", None);
        let not_found = LoaderError::NotFound {
            locator: "missing.stl".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };

        assert!(shared.fail(not_found));
        assert_eq!(shared.gate.current(), Stage::ErrorNoFile);

        assert!(!shared.fail(LoaderError::Failed(Stage::ErrorNoFile)));
        assert!(!shared.fail(LoaderError::WorkerPanicked { index: 1 }));
        assert_eq!(shared.gate.current(), Stage::ErrorNoFile);
        assert!(matches!(*shared.error.lock(), Some(LoaderError::NotFound { .. })));
    }

    #[test]
    fn test_notifier_runs_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = LoadShared::<Vec<u8>>::new(
            "x.stl",
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        shared.notify();
        shared.notify();
        assert_eq!(rx.try_iter().count(), 1);
    }
}
