//! Universal binary creation.
//!
//! Packaging inspects every input through a [`ThinParser`], computes a
//! [`ContainerLayout`] and only then writes header, table and padded slices.
//! Writing to a path goes through a temporary file in the destination
//! directory, so a failed call never leaves a partial container behind.

use super::arch::ArchitectureInfo;
use super::header::write_header;
use super::layout::{ContainerLayout, PlannedSlice};
use super::output::AtomicFile;
use crate::cancel::{self, CancelToken};
use crate::error::IoResultExt;
use crate::macho::{GoblinParser, ThinInfo, ThinParser, MAX_ALIGN};
use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const ZEROS: [u8; 4096] = [0; 4096];

/// A mapped input binary and what the parser reported about it.
struct Source {
    path: PathBuf,
    data: Mmap,
    info: ThinInfo,
}

/// Builds universal binaries from thin binaries.
///
/// # Example
///
/// ```no_run
/// use macholibre::Packager;
///
/// let layout = Packager::default()
///     .force_fat64(false)
///     .package("ls_universal", &["ls_x86_64", "ls_arm64e"])?;
/// println!("{} bytes", layout.total_size());
/// # Ok::<(), macholibre::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Packager<P = GoblinParser> {
    parser: P,
    force_fat64: bool,
    cancel: Option<CancelToken>,
}

impl Default for Packager<GoblinParser> {
    fn default() -> Self {
        Self::new(GoblinParser)
    }
}

impl<P: ThinParser> Packager<P> {
    /// Create a packager that inspects inputs with `parser`.
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            force_fat64: false,
            cancel: None,
        }
    }

    /// Always emit the 64-bit fat table.
    pub fn force_fat64(mut self, force: bool) -> Self {
        self.force_fat64 = force;
        self
    }

    /// Abort between slices once `token` is cancelled.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Compute the layout `inputs` would get, without writing anything.
    pub fn plan<Q: AsRef<Path> + Sync>(&self, inputs: &[Q]) -> Result<ContainerLayout> {
        self.prepare(inputs).map(|(layout, _)| layout)
    }

    /// Write a universal binary containing `inputs`, in order, to `output`.
    ///
    /// The output takes the permissions of the first input. It only appears
    /// at `output` once completely written.
    ///
    /// # Errors
    ///
    /// - [`Error::NoInputSlices`] if `inputs` is empty
    /// - [`Error::NotFound`] if an input cannot be opened
    /// - [`Error::InvalidSlice`] if an input is not a thin binary
    /// - [`Error::DuplicateArchitecture`] if two inputs share an architecture
    /// - [`Error::WriteFailure`] if writing the output fails
    pub fn package<Q: AsRef<Path> + Sync>(
        &self,
        output: impl AsRef<Path>,
        inputs: &[Q],
    ) -> Result<ContainerLayout> {
        let output = output.as_ref();
        let (layout, sources) = self.prepare(inputs)?;

        let mut out = AtomicFile::create(output)?;
        {
            let mut writer = BufWriter::new(out.file()?);
            self.write_container(&mut writer, Some(output), &layout, &sources)?;
        }
        let permissions = fs::metadata(&sources[0].path)
            .read_context(&sources[0].path, 0)?
            .permissions();
        out.set_permissions(permissions)?;
        out.commit()?;

        tracing::info!(
            output = %output.display(),
            slices = sources.len(),
            size = layout.total_size(),
            variant = ?layout.variant(),
            "created universal binary"
        );
        Ok(layout)
    }

    /// Stream a universal binary containing `inputs` to `writer`.
    ///
    /// Nothing is written until every input has been mapped and validated
    /// and the layout is known. A write error or cancellation afterwards
    /// leaves a partial stream that the caller must discard.
    pub fn package_to_writer<W: Write, Q: AsRef<Path> + Sync>(
        &self,
        writer: &mut W,
        inputs: &[Q],
    ) -> Result<ContainerLayout> {
        let (layout, sources) = self.prepare(inputs)?;
        self.write_container(writer, None, &layout, &sources)?;
        Ok(layout)
    }

    fn prepare<Q: AsRef<Path> + Sync>(
        &self,
        inputs: &[Q],
    ) -> Result<(ContainerLayout, Vec<Source>)> {
        if inputs.is_empty() {
            return Err(Error::NoInputSlices);
        }

        let sources = inputs
            .par_iter()
            .map(|path| self.load(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        check_duplicates(&sources)?;

        let planned: Vec<PlannedSlice> = sources
            .iter()
            .map(|source| PlannedSlice {
                arch: source.info.arch,
                align: source.info.align,
                size: source.data.len() as u64,
            })
            .collect();
        let layout = ContainerLayout::plan(&planned, self.force_fat64)?;

        for entry in layout.entries() {
            tracing::debug!(
                arch = %entry.descriptor.arch,
                offset = entry.descriptor.offset,
                size = entry.descriptor.size,
                padding = entry.padding,
                "placed slice"
            );
        }
        Ok((layout, sources))
    }

    fn load(&self, path: &Path) -> Result<Source> {
        let invalid = |reason: String| Error::InvalidSlice {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).open_context(path)?;
        let len = file.metadata().read_context(path, 0)?.len();
        if len == 0 {
            return Err(invalid("file is empty".into()));
        }
        let data = unsafe { Mmap::map(&file).read_context(path, 0)? };

        let info = self
            .parser
            .parse(&data)
            .map_err(|e| invalid(e.to_string()))?;
        if info.align > MAX_ALIGN {
            return Err(invalid(format!(
                "alignment 2^{} exceeds the maximum of 2^{}",
                info.align, MAX_ALIGN
            )));
        }

        Ok(Source {
            path: path.to_path_buf(),
            data,
            info,
        })
    }

    fn write_container<W: Write>(
        &self,
        out: &mut W,
        dest: Option<&Path>,
        layout: &ContainerLayout,
        sources: &[Source],
    ) -> Result<()> {
        write_header(out, layout.variant(), &layout.descriptors()).map_err(|e| match e {
            Error::Io(source) => write_error(dest, 0, source),
            other => other,
        })?;

        let mut position = layout.header_size();
        for (entry, source) in layout.entries().iter().zip(sources) {
            cancel::check(self.cancel.as_ref())?;

            write_zeros(out, entry.padding).map_err(|e| write_error(dest, position, e))?;
            position += entry.padding;

            out.write_all(&source.data)
                .map_err(|e| write_error(dest, position, e))?;
            position += entry.descriptor.size;

            tracing::debug!(
                arch = %entry.descriptor.arch,
                source = %source.path.display(),
                "wrote slice"
            );
        }

        out.flush().map_err(|e| write_error(dest, position, e))?;
        Ok(())
    }
}

/// Build a universal binary at `output` from `inputs` with default settings.
pub fn package<Q: AsRef<Path> + Sync>(
    output: impl AsRef<Path>,
    inputs: &[Q],
) -> Result<ContainerLayout> {
    Packager::default().package(output, inputs)
}

fn check_duplicates(sources: &[Source]) -> Result<()> {
    for (i, second) in sources.iter().enumerate() {
        if let Some(first) = sources[..i]
            .iter()
            .find(|first| first.info.arch.same_arch(&second.info.arch))
        {
            return Err(duplicate(first.info.arch, &first.path, &second.path));
        }
    }
    Ok(())
}

fn duplicate(arch: ArchitectureInfo, first: &Path, second: &Path) -> Error {
    Error::DuplicateArchitecture {
        arch,
        first: first.to_path_buf(),
        second: second.to_path_buf(),
    }
}

fn write_zeros<W: Write>(out: &mut W, mut count: u64) -> io::Result<()> {
    while count > 0 {
        let n = count.min(ZEROS.len() as u64) as usize;
        out.write_all(&ZEROS[..n])?;
        count -= n as u64;
    }
    Ok(())
}

fn write_error(dest: Option<&Path>, offset: u64, source: io::Error) -> Error {
    match dest {
        Some(path) => Error::WriteFailure {
            path: path.to_path_buf(),
            offset,
            source,
        },
        None => Error::Io(source),
    }
}
