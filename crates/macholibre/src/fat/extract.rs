//! Slice extraction.
//!
//! Copies each architecture's byte range out of a universal binary, either
//! into standalone files or into in-memory readers. Offsets are relative to
//! the start of the stream.
//!
//! Every destination file is written next to its final path and renamed into
//! place once its full range was copied, so a returned [`ExtractedSlice`]
//! is always complete. If a later slice fails, destinations already committed
//! by the same call are left in place for the caller to clean up.

use super::arch::{ArchitectureInfo, SliceDescriptor};
use super::file::FatFile;
use super::header::parse_header;
use super::output::AtomicFile;
use crate::cancel::{self, CancelToken};
use crate::error::IoResultExt;
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, Permissions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A slice written to its own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSlice {
    pub descriptor: SliceDescriptor,
    pub path: PathBuf,
}

/// A slice copied into memory.
#[derive(Debug, Clone)]
pub struct ExtractedReader {
    pub descriptor: SliceDescriptor,
    data: Cursor<Vec<u8>>,
}

impl ExtractedReader {
    pub fn as_bytes(&self) -> &[u8] {
        self.data.get_ref()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl Read for ExtractedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for ExtractedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

/// Names slices `<stem>-<arch>` inside a directory.
///
/// Names that already exist on disk, or were handed out before, get a
/// `-1`, `-2`, ... suffix.
#[derive(Debug)]
pub struct DirNamer {
    dir: PathBuf,
    stem: String,
    taken: HashSet<PathBuf>,
}

impl DirNamer {
    pub fn new(dir: impl AsRef<Path>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stem: stem.into(),
            taken: HashSet::new(),
        }
    }

    pub fn name(&mut self, arch: &ArchitectureInfo) -> PathBuf {
        let base = format!("{}-{}", self.stem, arch.name());
        let mut candidate = self.dir.join(&base);
        let mut n = 1;
        while candidate.exists() || self.taken.contains(&candidate) {
            candidate = self.dir.join(format!("{base}-{n}"));
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Slice extraction with optional parallelism and cancellation.
///
/// # Example
///
/// ```no_run
/// use macholibre::Extractor;
///
/// let slices = Extractor::new()
///     .parallel(true)
///     .extract_to_dir("ls_universal", "out")?;
/// for slice in &slices {
///     println!("{} -> {}", slice.descriptor.arch, slice.path.display());
/// }
/// # Ok::<(), macholibre::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    parallel: bool,
    cancel: Option<CancelToken>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract memory-mapped slices on the rayon thread pool.
    ///
    /// Only applies to [`Extractor::extract_file`] and
    /// [`Extractor::extract_to_dir`]; streams are read sequentially.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Abort between slices once `token` is cancelled.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Copy each described slice of `reader` to the path chosen by `namer`.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateDestination`] if `namer` returns the same path
    ///   twice; nothing is written in that case
    /// - [`Error::OutOfBounds`] if a range cannot be read in full
    /// - [`Error::Cancelled`] if the cancel token fires
    pub fn extract<R, F>(
        &self,
        reader: &mut R,
        slices: &[SliceDescriptor],
        namer: F,
    ) -> Result<Vec<ExtractedSlice>>
    where
        R: Read + Seek,
        F: FnMut(&ArchitectureInfo) -> PathBuf,
    {
        let destinations = resolve_destinations(slices, namer)?;

        let mut extracted = Vec::with_capacity(slices.len());
        for (slice, dest) in slices.iter().zip(destinations) {
            cancel::check(self.cancel.as_ref())?;

            let mut out = AtomicFile::create(&dest)?;
            seek_to(reader, slice)?;
            let copied = copy_bytes(reader, out.file()?, slice.size, &dest)?;
            if copied != slice.size {
                return Err(out_of_bounds(slice));
            }
            out.commit()?;

            tracing::debug!(arch = %slice.arch, dest = %dest.display(), "extracted slice");
            extracted.push(ExtractedSlice {
                descriptor: *slice,
                path: dest,
            });
        }

        tracing::info!(slices = extracted.len(), "extraction complete");
        Ok(extracted)
    }

    /// Write every slice of an opened universal binary to the path chosen by
    /// `namer`. Output files take the source file's permissions.
    pub fn extract_file<F>(&self, fat: &FatFile, namer: F) -> Result<Vec<ExtractedSlice>>
    where
        F: FnMut(&ArchitectureInfo) -> PathBuf,
    {
        self.extract_file_slices(fat, fat.slices(), namer)
    }

    /// Like [`Extractor::extract_file`], restricted to `slices`.
    pub fn extract_file_slices<F>(
        &self,
        fat: &FatFile,
        slices: &[SliceDescriptor],
        namer: F,
    ) -> Result<Vec<ExtractedSlice>>
    where
        F: FnMut(&ArchitectureInfo) -> PathBuf,
    {
        let destinations = resolve_destinations(slices, namer)?;
        let permissions = fs::metadata(fat.path())
            .read_context(fat.path(), 0)?
            .permissions();

        let work: Vec<(&SliceDescriptor, PathBuf)> = slices.iter().zip(destinations).collect();
        let write_one = |(slice, dest): (&SliceDescriptor, PathBuf)| -> Result<ExtractedSlice> {
            cancel::check(self.cancel.as_ref())?;
            let data = fat.slice_data(slice)?;
            write_slice(&dest, data, permissions.clone())?;
            tracing::debug!(arch = %slice.arch, dest = %dest.display(), "extracted slice");
            Ok(ExtractedSlice {
                descriptor: *slice,
                path: dest,
            })
        };

        let extracted = if self.parallel {
            work.into_par_iter()
                .map(write_one)
                .collect::<Result<Vec<_>>>()?
        } else {
            work.into_iter()
                .map(write_one)
                .collect::<Result<Vec<_>>>()?
        };

        tracing::info!(
            source = %fat.path().display(),
            slices = extracted.len(),
            "extraction complete"
        );
        Ok(extracted)
    }

    /// Extract every slice of the universal binary at `path` into `dir`,
    /// naming them `<file name>-<arch>`.
    pub fn extract_to_dir(
        &self,
        path: impl AsRef<Path>,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<ExtractedSlice>> {
        let path = path.as_ref();
        let dir = dir.as_ref();
        let fat = FatFile::open(path)?;
        fs::create_dir_all(dir).write_context(dir, 0)?;

        let stem = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slice".to_string());
        let mut namer = DirNamer::new(dir, stem);
        self.extract_file(&fat, |arch| namer.name(arch))
    }

    /// Parse the header at the start of `reader` and copy every slice into
    /// memory.
    pub fn extract_readers<R: Read + Seek>(&self, reader: &mut R) -> Result<Vec<ExtractedReader>> {
        reader.seek(SeekFrom::Start(0))?;
        let header = parse_header(reader)?;

        let mut readers = Vec::with_capacity(header.slices.len());
        for slice in &header.slices {
            cancel::check(self.cancel.as_ref())?;
            seek_to(reader, slice)?;

            // Sizes are untrusted; the buffer grows with what is actually read.
            let mut data = Vec::with_capacity(slice.size.min(1 << 20) as usize);
            reader.by_ref().take(slice.size).read_to_end(&mut data)?;
            if data.len() as u64 != slice.size {
                return Err(out_of_bounds(slice));
            }

            readers.push(ExtractedReader {
                descriptor: *slice,
                data: Cursor::new(data),
            });
        }

        Ok(readers)
    }
}

/// Extract the described slices of `reader` with default settings.
pub fn extract<R, F>(
    reader: &mut R,
    slices: &[SliceDescriptor],
    namer: F,
) -> Result<Vec<ExtractedSlice>>
where
    R: Read + Seek,
    F: FnMut(&ArchitectureInfo) -> PathBuf,
{
    Extractor::new().extract(reader, slices, namer)
}

/// Extract every slice of the universal binary at `path` into `dir`.
pub fn extract_to_dir(
    path: impl AsRef<Path>,
    dir: impl AsRef<Path>,
) -> Result<Vec<ExtractedSlice>> {
    Extractor::new().parallel(true).extract_to_dir(path, dir)
}

/// Copy every slice of a universal binary stream into memory.
pub fn extract_readers<R: Read + Seek>(reader: &mut R) -> Result<Vec<ExtractedReader>> {
    Extractor::new().extract_readers(reader)
}

fn resolve_destinations<F>(slices: &[SliceDescriptor], mut namer: F) -> Result<Vec<PathBuf>>
where
    F: FnMut(&ArchitectureInfo) -> PathBuf,
{
    let mut seen = HashSet::with_capacity(slices.len());
    slices
        .iter()
        .map(|slice| {
            let dest = namer(&slice.arch);
            if !seen.insert(destination_key(&dest)) {
                return Err(Error::DuplicateDestination(dest));
            }
            Ok(dest)
        })
        .collect()
}

/// The file `dest` will be renamed onto, with `.`, `..` and symlinked
/// directories resolved.
///
/// The final component is kept as is: a symlink there is replaced by the
/// rename, not followed.
fn destination_key(dest: &Path) -> PathBuf {
    match dest.file_name() {
        Some(name) => {
            let parent = match dest.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            resolve_dir(parent).join(name)
        }
        None => resolve_dir(dest),
    }
}

/// Canonicalize the longest existing ancestor of `dir` and normalize the
/// rest lexically, so directories that do not exist yet still compare.
fn resolve_dir(dir: &Path) -> PathBuf {
    let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    for ancestor in absolute.ancestors() {
        let Ok(base) = fs::canonicalize(ancestor) else {
            continue;
        };
        let rest = absolute.strip_prefix(ancestor).unwrap_or(Path::new(""));
        let mut resolved = base;
        for component in rest.components() {
            match component {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(part) => resolved.push(part),
                _ => {}
            }
        }
        return resolved;
    }
    absolute
}

fn seek_to<R: Seek>(reader: &mut R, slice: &SliceDescriptor) -> Result<()> {
    reader
        .seek(SeekFrom::Start(slice.offset))
        .map_err(|_| out_of_bounds(slice))?;
    Ok(())
}

fn out_of_bounds(slice: &SliceDescriptor) -> Error {
    Error::OutOfBounds {
        arch: slice.arch,
        offset: slice.offset,
        size: slice.size,
    }
}

/// Copy up to `size` bytes; returns how many were available.
fn copy_bytes<R: Read, W: Write>(
    reader: &mut R,
    out: &mut W,
    size: u64,
    dest: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    while copied < size {
        let want = (size - copied).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        out.write_all(&buf[..n]).write_context(dest, copied)?;
        copied += n as u64;
    }
    Ok(copied)
}

fn write_slice(dest: &Path, data: &[u8], permissions: Permissions) -> Result<()> {
    let mut out = AtomicFile::create(dest)?;
    out.file()?.write_all(data).write_context(dest, 0)?;
    out.set_permissions(permissions)?;
    out.commit()
}
