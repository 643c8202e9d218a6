//! Error types for macholibre operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure of the
//! fat codec: structural problems in a container, invalid input binaries,
//! and I/O failures annotated with the path (and byte offset) involved.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use crate::fat::ArchitectureInfo;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for macholibre operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses
/// this error type. Malformed input is always reported through one of these
/// variants; the library never panics on it.
///
/// # Examples
///
/// ```no_run
/// use macholibre::{Error, Packager};
///
/// let result = Packager::default().package("universal", &["ls_x86_64", "ls_arm64"]);
/// match result {
///     Ok(layout) => println!("wrote {} slices", layout.entries().len()),
///     Err(Error::DuplicateArchitecture { arch, .. }) => eprintln!("{arch} given twice"),
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// A source path does not exist or cannot be opened.
    #[error("{}: cannot open: {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The leading bytes match neither fat magic.
    #[error("not a universal binary (magic 0x{0:08x})")]
    InvalidMagic(u32),

    /// The descriptor table declared by the header is cut short.
    #[error("truncated fat header: {slices} slices need {needed} header bytes")]
    TruncatedHeader { slices: u32, needed: u64 },

    /// A slice's byte range lies (partly) outside the container.
    #[error("slice {arch} at offset {offset:#x} with size {size:#x} is out of bounds")]
    OutOfBounds {
        arch: ArchitectureInfo,
        offset: u64,
        size: u64,
    },

    /// The fat header declares no slices.
    #[error("fat header declares zero slices")]
    ZeroSliceCount,

    /// Packaging was requested without any input binaries.
    #[error("no input binaries given")]
    NoInputSlices,

    /// An input is not a well-formed thin Mach-O binary.
    #[error("{}: not a valid thin binary: {reason}", path.display())]
    InvalidSlice { path: PathBuf, reason: String },

    /// Two inputs report the same architecture.
    #[error(
        "{} and {} both contain architecture {arch}",
        first.display(),
        second.display()
    )]
    DuplicateArchitecture {
        arch: ArchitectureInfo,
        first: PathBuf,
        second: PathBuf,
    },

    /// Two slices would be extracted to the same destination.
    #[error("{}: destination requested by more than one slice", .0.display())]
    DuplicateDestination(PathBuf),

    /// Reading a file failed.
    #[error("{}: read failed at offset {offset:#x}: {source}", path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Writing an output failed.
    #[error("{}: write failed at offset {offset:#x}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// I/O on a caller-supplied stream failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The computed layout does not fit in 64-bit offsets.
    #[error("container layout overflows 64-bit offsets")]
    LayoutOverflow,

    /// The operation was cancelled between two slices.
    #[error("operation cancelled")]
    Cancelled,
}

/// Attaches path and offset context to raw I/O results.
pub(crate) trait IoResultExt<T> {
    fn open_context(self, path: &Path) -> crate::Result<T>;
    fn read_context(self, path: &Path, offset: u64) -> crate::Result<T>;
    fn write_context(self, path: &Path, offset: u64) -> crate::Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn open_context(self, path: &Path) -> crate::Result<T> {
        self.map_err(|source| Error::NotFound {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_context(self, path: &Path, offset: u64) -> crate::Result<T> {
        self.map_err(|source| Error::Read {
            path: path.to_path_buf(),
            offset,
            source,
        })
    }

    fn write_context(self, path: &Path, offset: u64) -> crate::Result<T> {
        self.map_err(|source| Error::WriteFailure {
            path: path.to_path_buf(),
            offset,
            source,
        })
    }
}
