//! Output files that only appear at their destination once fully written.

use crate::error::IoResultExt;
use crate::{Error, Result};
use std::fs::{File, Permissions};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

/// A temporary file next to `dest`, renamed onto it by [`AtomicFile::commit`].
///
/// Dropping it uncommitted removes the temporary file.
pub(crate) struct AtomicFile {
    dest: PathBuf,
    tmp: Option<NamedTempFile>,
}

impl AtomicFile {
    pub fn create(dest: &Path) -> Result<Self> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = builder().tempfile_in(dir).write_context(dest, 0)?;
        Ok(Self {
            dest: dest.to_path_buf(),
            tmp: Some(tmp),
        })
    }

    pub fn file(&mut self) -> Result<&mut File> {
        match self.tmp.as_mut() {
            Some(tmp) => Ok(tmp.as_file_mut()),
            None => Err(Error::WriteFailure {
                path: self.dest.clone(),
                offset: 0,
                source: std::io::Error::other("output already committed"),
            }),
        }
    }

    pub fn set_permissions(&self, permissions: Permissions) -> Result<()> {
        if let Some(tmp) = &self.tmp {
            tmp.as_file()
                .set_permissions(permissions)
                .write_context(&self.dest, 0)?;
        }
        Ok(())
    }

    /// Flush to disk and move the file into place.
    pub fn commit(mut self) -> Result<()> {
        let Some(tmp) = self.tmp.take() else {
            return Ok(());
        };
        tmp.as_file().sync_all().write_context(&self.dest, 0)?;
        tmp.persist(&self.dest)
            .map_err(|e| e.error)
            .write_context(&self.dest, 0)?;
        Ok(())
    }
}

/// Temp files get the mode `File::create` would use (0o666 less the umask)
/// rather than tempfile's private 0o600.
fn builder() -> Builder<'static, 'static> {
    let mut builder = Builder::new();
    builder.prefix(".macholibre");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o666));
    }
    builder
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.tmp.is_some() {
            tracing::warn!(dest = %self.dest.display(), "discarding incomplete output");
        }
    }
}
