//! Thin Mach-O inspection using goblin.
//!
//! Packaging only needs two facts about each input: which architecture it
//! targets and which alignment its slice should get inside a universal
//! binary. [`ThinParser`] is the seam for that, with [`GoblinParser`] as the
//! real implementation.

use crate::fat::ArchitectureInfo;
use goblin::mach::header::MH_OBJECT;
use goblin::mach::{Mach, MachO};
use thiserror::Error;

/// Smallest alignment exponent handed out for a slice.
pub const MIN_ALIGN: u32 = 2;

/// Largest alignment exponent handed out for a slice (32 KiB).
pub const MAX_ALIGN: u32 = 15;

const ARM_DEFAULT_ALIGN: u32 = 14;
const DEFAULT_ALIGN: u32 = 12;

/// What packaging needs to know about a thin binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinInfo {
    pub arch: ArchitectureInfo,
    /// Recommended alignment exponent for the slice
    pub align: u32,
}

/// Why a buffer is not a usable thin binary.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ThinParseError(pub String);

/// Reads architecture and alignment from a single-architecture binary.
pub trait ThinParser: Sync {
    fn parse(&self, data: &[u8]) -> Result<ThinInfo, ThinParseError>;
}

/// [`ThinParser`] backed by goblin's Mach-O parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoblinParser;

impl ThinParser for GoblinParser {
    fn parse(&self, data: &[u8]) -> Result<ThinInfo, ThinParseError> {
        let mach = Mach::parse(data)
            .map_err(|e| ThinParseError(format!("Failed to parse: {}", e)))?;

        match mach {
            Mach::Binary(macho) => {
                let arch = ArchitectureInfo::new(
                    macho.header.cputype as u32,
                    macho.header.cpusubtype as u32,
                );
                let align = recommended_align(&macho, &arch);
                tracing::debug!(%arch, align, "parsed thin binary");
                Ok(ThinInfo { arch, align })
            }
            Mach::Fat(_) => Err(ThinParseError(
                "input is already a universal binary".into(),
            )),
        }
    }
}

/// Alignment a slice of this binary should get.
///
/// Object files use their largest section alignment. Linked images use the
/// smallest alignment implied by their segments' load addresses.
fn recommended_align(macho: &MachO, arch: &ArchitectureInfo) -> u32 {
    if macho.header.filetype == MH_OBJECT {
        let mut align = 0;
        for segment in macho.segments.iter() {
            if let Ok(sections) = segment.sections() {
                for (section, _) in sections {
                    align = align.max(section.align);
                }
            }
        }
        return align.clamp(MIN_ALIGN, MAX_ALIGN);
    }

    macho
        .segments
        .iter()
        .map(|segment| guess_align(segment.vmaddr))
        .min()
        .unwrap_or_else(|| default_align(arch))
}

/// Alignment exponent implied by a load address.
fn guess_align(vmaddr: u64) -> u32 {
    if vmaddr == 0 {
        return MAX_ALIGN;
    }
    vmaddr.trailing_zeros().clamp(MIN_ALIGN, MAX_ALIGN)
}

fn default_align(arch: &ArchitectureInfo) -> u32 {
    if arch.is_arm() {
        ARM_DEFAULT_ALIGN
    } else {
        DEFAULT_ALIGN
    }
}
