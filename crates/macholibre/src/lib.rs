//! Read, split and build universal (fat) Mach-O binaries.
//!
//! ```no_run
//! use macholibre::{extract_to_dir, is_universal, package};
//! use std::fs::File;
//!
//! let mut file = File::open("ls")?;
//! if is_universal(&mut file) {
//!     let slices = extract_to_dir("ls", "slices")?;
//!     let paths: Vec<_> = slices.iter().map(|s| s.path.clone()).collect();
//!     package("ls.repacked", &paths)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cancel;
pub mod error;
pub mod fat;
pub mod macho;

pub use cancel::CancelToken;
pub use error::Error;
pub use fat::{
    extract, extract_readers, extract_to_dir, is_universal, package, parse_header, write_header,
    ArchitectureInfo, ContainerLayout, ExtractedReader, ExtractedSlice, Extractor, FatFile,
    MagicVariant, Packager, SliceDescriptor,
};
pub use macho::{GoblinParser, ThinInfo, ThinParser};

pub type Result<T> = std::result::Result<T, Error>;
