pub mod config;
pub mod error;
pub mod loader;
pub mod panic_handler;
pub mod sink;
pub mod source;
pub mod stage;
pub mod stl;

pub use config::LoaderConfig;
pub use error::{LoaderError, LoaderResult};
pub use loader::{BoundingBox, LoadFailure, LoadedMesh, MeshLoader, Rejected};
pub use sink::GeometrySink;
pub use source::{FileSource, BUILTIN_SPHERE};
pub use stage::{Stage, StageGate};
pub use stl::{StlHeader, TRIANGLE_STRIDE_BYTES};
