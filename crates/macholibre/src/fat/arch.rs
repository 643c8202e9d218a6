//! Architecture identifiers and per-slice descriptors.

use goblin::mach::cputype::{get_arch_from_flag, get_arch_name_from_types};
use std::fmt;

/// Capability bits stored in the high byte of a CPU subtype.
pub const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

/// Flag marking 64-bit CPU types.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// An instruction set and variant pair, as stored in Mach-O headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchitectureInfo {
    pub cpu_type: u32,
    pub cpu_subtype: u32,
}

impl ArchitectureInfo {
    pub fn new(cpu_type: u32, cpu_subtype: u32) -> Self {
        Self {
            cpu_type,
            cpu_subtype,
        }
    }

    /// Resolve an architecture flag such as `x86_64` or `arm64e`.
    pub fn from_name(name: &str) -> Option<Self> {
        get_arch_from_flag(name).map(|(cpu_type, cpu_subtype)| Self::new(cpu_type, cpu_subtype))
    }

    /// The subtype without its capability bits.
    pub fn subtype_without_caps(&self) -> u32 {
        self.cpu_subtype & !CPU_SUBTYPE_MASK
    }

    /// True if both describe the same architecture, ignoring capability bits.
    pub fn same_arch(&self, other: &ArchitectureInfo) -> bool {
        self.cpu_type == other.cpu_type
            && self.subtype_without_caps() == other.subtype_without_caps()
    }

    /// Human readable name, e.g. `x86_64`.
    ///
    /// Unknown pairs are rendered as `cpu<type>-<subtype>`.
    pub fn name(&self) -> String {
        get_arch_name_from_types(self.cpu_type, self.subtype_without_caps())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("cpu{}-{}", self.cpu_type, self.subtype_without_caps()))
    }

    pub fn is_arm(&self) -> bool {
        self.cpu_type & !CPU_ARCH_ABI64 == CPU_TYPE_ARM
    }
}

impl fmt::Display for ArchitectureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Location and alignment of one architecture slice inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceDescriptor {
    pub arch: ArchitectureInfo,
    /// Byte offset of the slice from the start of the container
    pub offset: u64,
    /// Slice length in bytes
    pub size: u64,
    /// The slice starts at a multiple of `2^align`
    pub align: u32,
}

impl SliceDescriptor {
    /// One past the last byte of the slice, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    /// True if `offset` is a multiple of `2^align`.
    pub fn is_aligned(&self) -> bool {
        match 1u64.checked_shl(self.align) {
            Some(alignment) => self.offset % alignment == 0,
            None => self.offset == 0,
        }
    }
}
