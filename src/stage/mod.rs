//! Load stages and the gate that publishes them across threads.
//!
//! Every participant of a load (orchestrator, decode workers, consumer)
//! coordinates only through the current [`Stage`] held by a [`StageGate`].

pub mod gate;

pub use gate::StageGate;

use std::fmt;

/// Milestones of a single load, in the order they are reached.
///
/// Error stages rank above `Done`, so a failed load satisfies every wait for
/// a non-error target. Callers must check [`Stage::is_error`] on the value
/// they get back.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Start = 0,
    /// Header validated, triangle count known.
    TriangleCount = 1,
    /// Staging buffer allocated, workers about to start.
    RamBuffer = 2,
    /// Consumer has published the destination buffer.
    GpuBuffer = 3,
    /// Destination sub-slices handed to the workers.
    WorkerGpu = 4,
    Done = 5,
    /// Generic failure: thread faults and abandoned loads.
    Error = 6,
    ErrorNoFile = 7,
    ErrorAsciiStl = 8,
    ErrorWrongSize = 9,
}

impl Stage {
    /// All stages of a successful load, in order.
    pub const SUCCESS_SEQUENCE: [Stage; 6] = [
        Stage::Start,
        Stage::TriangleCount,
        Stage::RamBuffer,
        Stage::GpuBuffer,
        Stage::WorkerGpu,
        Stage::Done,
    ];

    pub fn is_error(self) -> bool {
        self >= Stage::Error
    }

    /// True once nothing else will happen to the load.
    pub fn is_terminal(self) -> bool {
        self >= Stage::Done
    }

    /// Human readable reason for an error stage; "No error" otherwise.
    pub fn describe(self) -> &'static str {
        match self {
            Stage::Start
            | Stage::TriangleCount
            | Stage::RamBuffer
            | Stage::GpuBuffer
            | Stage::WorkerGpu
            | Stage::Done => "No error",
            Stage::Error => "Generic error",
            Stage::ErrorNoFile => "File not found",
            Stage::ErrorAsciiStl => "ASCII STLs are unsupported",
            Stage::ErrorWrongSize => "File size does not match triangle count",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "START",
            Stage::TriangleCount => "TRIANGLE_COUNT",
            Stage::RamBuffer => "RAM_BUFFER",
            Stage::GpuBuffer => "GPU_BUFFER",
            Stage::WorkerGpu => "WORKER_GPU",
            Stage::Done => "DONE",
            Stage::Error => "ERROR",
            Stage::ErrorNoFile => "ERROR_NO_FILE",
            Stage::ErrorAsciiStl => "ERROR_ASCII_STL",
            Stage::ErrorWrongSize => "ERROR_WRONG_SIZE",
        };
        f.write_str(name)
    }
}
