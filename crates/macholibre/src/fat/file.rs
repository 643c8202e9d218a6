//! Memory-mapped view of a universal binary on disk.

use super::arch::SliceDescriptor;
use super::header::{parse_header, FatHeader, MagicVariant};
use crate::error::IoResultExt;
use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// A universal binary whose header has been parsed and whose slice ranges
/// have been checked against the file length.
pub struct FatFile {
    path: PathBuf,
    data: Mmap,
    header: FatHeader,
}

impl FatFile {
    /// Open and parse a universal binary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file cannot be opened, a header
    /// error if it is not a well-formed universal binary, and
    /// [`Error::OutOfBounds`] if a slice extends past the end of the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).open_context(path)?;
        let data = unsafe { Mmap::map(&file).read_context(path, 0)? };

        let header = parse_header(&mut Cursor::new(&data[..]))?;
        let len = data.len() as u64;
        for slice in &header.slices {
            if slice.end().map_or(true, |end| end > len) {
                return Err(Error::OutOfBounds {
                    arch: slice.arch,
                    offset: slice.offset,
                    size: slice.size,
                });
            }
        }

        tracing::debug!(
            path = %path.display(),
            slices = header.slices.len(),
            variant = ?header.variant,
            "parsed universal binary"
        );

        Ok(Self {
            path: path.to_path_buf(),
            data,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variant(&self) -> MagicVariant {
        self.header.variant
    }

    /// Slice descriptors in table order.
    pub fn slices(&self) -> &[SliceDescriptor] {
        &self.header.slices
    }

    /// The bytes of one slice.
    ///
    /// Descriptors that were not taken from this file are bounds-checked.
    pub fn slice_data(&self, slice: &SliceDescriptor) -> Result<&[u8]> {
        let out_of_bounds = || Error::OutOfBounds {
            arch: slice.arch,
            offset: slice.offset,
            size: slice.size,
        };
        let start = usize::try_from(slice.offset).map_err(|_| out_of_bounds())?;
        let end = slice
            .end()
            .and_then(|end| usize::try_from(end).ok())
            .ok_or_else(out_of_bounds)?;
        self.data.get(start..end).ok_or_else(out_of_bounds)
    }
}
