//! Universal (fat) binary codec.
//!
//! - [`detect`] tells universal binaries apart from everything else
//! - [`header`] reads and writes the fat header and architecture table
//! - [`extract`] copies slices out into files or memory
//! - [`layout`] and [`package`] build new universal binaries

pub mod arch;
pub mod detect;
pub mod extract;
pub mod file;
pub mod header;
pub mod layout;
mod output;
pub mod package;

pub use arch::{ArchitectureInfo, SliceDescriptor};
pub use detect::{detect, is_universal};
pub use extract::{
    extract, extract_readers, extract_to_dir, DirNamer, ExtractedReader, ExtractedSlice, Extractor,
};
pub use file::FatFile;
pub use header::{encode_header, parse_header, write_header, FatHeader, MagicVariant};
pub use layout::{ContainerLayout, LayoutEntry, PlannedSlice};
pub use package::{package, Packager};
