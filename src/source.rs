//! Read-only byte views over mesh inputs.
//!
//! A locator is either a filesystem path, mapped with `memmap2`, or the
//! built-in sentinel [`BUILTIN_SPHERE`], which resolves to an embedded asset
//! without touching the filesystem.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{LoaderError, LoaderResult};

/// Locator that resolves to the embedded sphere mesh
pub const BUILTIN_SPHERE: &str = ":/sphere";

/// Triangle count of the embedded sphere (a twice subdivided icosahedron)
pub const BUILTIN_SPHERE_TRIANGLES: u32 = 320;

static SPHERE_STL: &[u8] = include_bytes!("../assets/sphere.stl");

/// Bytes of a mesh input. Dropping the view releases the mapping.
pub enum ByteView {
    Mapped(Mmap),
    Builtin(&'static [u8]),
    /// Zero-length files, which cannot be mapped portably
    Empty,
}

impl ByteView {
    pub fn is_builtin(&self) -> bool {
        matches!(self, ByteView::Builtin(_))
    }
}

impl Deref for ByteView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ByteView::Mapped(mmap) => mmap,
            ByteView::Builtin(bytes) => bytes,
            ByteView::Empty => &[],
        }
    }
}

pub struct FileSource;

impl FileSource {
    /// Resolve `locator` to a byte view.
    pub fn open(locator: &str) -> LoaderResult<ByteView> {
        if locator == BUILTIN_SPHERE {
            return Ok(ByteView::Builtin(SPHERE_STL));
        }
        Self::map(Path::new(locator)).map_err(|source| LoaderError::NotFound {
            locator: locator.to_string(),
            source,
        })
    }

    fn map(path: &Path) -> std::io::Result<ByteView> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            ));
        }
        if metadata.len() == 0 {
            return Ok(ByteView::Empty);
        }

        // SAFETY: the mapping is read-only and only ever read through shared
        // slices. Concurrent truncation of the file by another process is
        // outside what the loader can guard against, as with any mmap reader.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ByteView::Mapped(mmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stl::{expected_file_len, StlHeader};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_sphere_is_valid() {
        let view = FileSource::open(BUILTIN_SPHERE).expect("builtin always resolves");
        assert!(view.is_builtin());
        assert_eq!(view.len() as u64, expected_file_len(BUILTIN_SPHERE_TRIANGLES));
        let header = StlHeader::parse(&view).expect("builtin sphere is a binary STL");
        assert_eq!(header.triangle_count, BUILTIN_SPHERE_TRIANGLES);
    }

    #[test]
    fn test_maps_file_contents() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(b"mapped bytes").expect("Failed to write temp file");
        let path = file.path().to_str().expect("utf-8 temp path");

        let view = FileSource::open(path).expect("existing file maps");
        assert_eq!(&view[..], b"mapped bytes");
        assert!(!view.is_builtin());
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().expect("Failed to create temp file");
        let path = file.path().to_str().expect("utf-8 temp path");
        let view = FileSource::open(path).expect("empty file opens");
        assert!(view.is_empty());
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let missing = dir.path().join("missing.stl");
        let missing = missing.to_str().expect("utf-8 temp path");

        assert!(matches!(FileSource::open(missing), Err(LoaderError::NotFound { .. })));
        let dir_path = dir.path().to_str().expect("utf-8 temp path");
        assert!(matches!(FileSource::open(dir_path), Err(LoaderError::NotFound { .. })));
    }
}
