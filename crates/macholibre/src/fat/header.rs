//! Fat header and architecture table codec.
//!
//! On disk every field is big-endian:
//!
//! ```text
//! fat_header     magic:u32 nfat_arch:u32
//! fat_arch       cputype:u32 cpusubtype:u32 offset:u32 size:u32 align:u32
//! fat_arch_64    cputype:u32 cpusubtype:u32 offset:u64 size:u64 align:u32 reserved:u32
//! ```

use super::arch::{ArchitectureInfo, SliceDescriptor};
use crate::{Error, Result};
use std::io::{self, Read, Write};

/// Magic of a fat header with 32-bit `fat_arch` entries.
pub const FAT_MAGIC: u32 = 0xcafe_babe;

/// Magic of a fat header with 64-bit `fat_arch_64` entries.
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Size of `magic` + `nfat_arch`.
pub const FAT_HEADER_SIZE: u64 = 8;

const FAT_ARCH_SIZE: usize = 20;
const FAT_ARCH_64_SIZE: usize = 32;

/// Which of the two table layouts a container uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicVariant {
    Fat32,
    Fat64,
}

impl MagicVariant {
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            FAT_MAGIC => Some(Self::Fat32),
            FAT_MAGIC_64 => Some(Self::Fat64),
            _ => None,
        }
    }

    pub fn magic(self) -> u32 {
        match self {
            Self::Fat32 => FAT_MAGIC,
            Self::Fat64 => FAT_MAGIC_64,
        }
    }

    /// Size of one table entry.
    pub fn entry_size(self) -> usize {
        match self {
            Self::Fat32 => FAT_ARCH_SIZE,
            Self::Fat64 => FAT_ARCH_64_SIZE,
        }
    }

    /// Size of the header plus a table of `count` entries.
    pub fn header_size(self, count: u32) -> u64 {
        FAT_HEADER_SIZE + u64::from(count) * self.entry_size() as u64
    }
}

/// A parsed fat header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatHeader {
    pub variant: MagicVariant,
    pub slices: Vec<SliceDescriptor>,
}

impl FatHeader {
    /// Bytes occupied by the header and its table.
    pub fn size(&self) -> u64 {
        self.variant.header_size(self.slices.len() as u32)
    }
}

/// Parse a fat header from the current position of `reader`.
///
/// Slice ranges are not checked against the stream length.
///
/// # Errors
///
/// - [`Error::InvalidMagic`] if neither fat magic is present
/// - [`Error::ZeroSliceCount`] if the header declares no slices
/// - [`Error::TruncatedHeader`] if the table ends early
pub fn parse_header<R: Read>(reader: &mut R) -> Result<FatHeader> {
    let mut word = [0u8; 4];
    let magic = match reader.read_exact(&mut word) {
        Ok(()) => u32::from_be_bytes(word),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::InvalidMagic(u32::from_be_bytes(word)))
        }
        Err(e) => return Err(e.into()),
    };
    let variant = MagicVariant::from_magic(magic).ok_or(Error::InvalidMagic(magic))?;

    reader
        .read_exact(&mut word)
        .map_err(|e| truncated(e, 0, FAT_HEADER_SIZE))?;
    let count = u32::from_be_bytes(word);
    if count == 0 {
        return Err(Error::ZeroSliceCount);
    }

    let needed = variant.header_size(count);
    let mut entry = [0u8; FAT_ARCH_64_SIZE];
    let entry = &mut entry[..variant.entry_size()];

    // The count is untrusted, so the table grows as entries are actually read.
    let mut slices = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        reader
            .read_exact(entry)
            .map_err(|e| truncated(e, count, needed))?;
        slices.push(decode_entry(variant, entry));
    }

    Ok(FatHeader { variant, slices })
}

fn truncated(e: io::Error, slices: u32, needed: u64) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::TruncatedHeader { slices, needed }
    } else {
        Error::Io(e)
    }
}

fn decode_entry(variant: MagicVariant, entry: &[u8]) -> SliceDescriptor {
    let u32_at = |at: usize| {
        u32::from_be_bytes([entry[at], entry[at + 1], entry[at + 2], entry[at + 3]])
    };
    let u64_at = |at: usize| (u64::from(u32_at(at)) << 32) | u64::from(u32_at(at + 4));

    let arch = ArchitectureInfo::new(u32_at(0), u32_at(4));
    match variant {
        MagicVariant::Fat32 => SliceDescriptor {
            arch,
            offset: u64::from(u32_at(8)),
            size: u64::from(u32_at(12)),
            align: u32_at(16),
        },
        // reserved word at 28 is ignored
        MagicVariant::Fat64 => SliceDescriptor {
            arch,
            offset: u64_at(8),
            size: u64_at(16),
            align: u32_at(24),
        },
    }
}

/// Serialize a fat header and table.
///
/// Descriptors are written in the order given; ordering and overlap are the
/// caller's concern.
pub fn encode_header(variant: MagicVariant, slices: &[SliceDescriptor]) -> Result<Vec<u8>> {
    let count = u32::try_from(slices.len()).map_err(|_| invalid_input("too many slices"))?;
    let mut out = Vec::with_capacity(variant.header_size(count) as usize);
    out.extend_from_slice(&variant.magic().to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    for slice in slices {
        out.extend_from_slice(&slice.arch.cpu_type.to_be_bytes());
        out.extend_from_slice(&slice.arch.cpu_subtype.to_be_bytes());
        match variant {
            MagicVariant::Fat32 => {
                out.extend_from_slice(&narrow(slice.offset, "offset")?.to_be_bytes());
                out.extend_from_slice(&narrow(slice.size, "size")?.to_be_bytes());
                out.extend_from_slice(&slice.align.to_be_bytes());
            }
            MagicVariant::Fat64 => {
                out.extend_from_slice(&slice.offset.to_be_bytes());
                out.extend_from_slice(&slice.size.to_be_bytes());
                out.extend_from_slice(&slice.align.to_be_bytes());
                out.extend_from_slice(&0u32.to_be_bytes());
            }
        }
    }

    Ok(out)
}

/// Write a fat header and table to `writer`.
pub fn write_header<W: Write>(
    writer: &mut W,
    variant: MagicVariant,
    slices: &[SliceDescriptor],
) -> Result<()> {
    let bytes = encode_header(variant, slices)?;
    writer.write_all(&bytes)?;
    Ok(())
}

fn narrow(value: u64, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| invalid_input(&format!("{field} {value:#x} does not fit a 32-bit fat_arch")))
}

fn invalid_input(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::arch::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};
    use std::io::Cursor;

    fn two_slices() -> Vec<SliceDescriptor> {
        vec![
            SliceDescriptor {
                arch: ArchitectureInfo::new(CPU_TYPE_X86_64, 3),
                offset: 0x4000,
                size: 0x11c60,
                align: 14,
            },
            SliceDescriptor {
                arch: ArchitectureInfo::new(CPU_TYPE_ARM64, 0x8000_0002),
                offset: 0x18000,
                size: 0x15aa0,
                align: 14,
            },
        ]
    }

    #[test]
    fn test_fat32_layout() {
        let bytes = encode_header(MagicVariant::Fat32, &two_slices()).unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(
            &bytes[..28],
            &[
                0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 2, // header
                0x01, 0, 0, 0x07, 0, 0, 0, 0x03, // x86_64 / ALL
                0, 0, 0x40, 0, 0, 0x01, 0x1c, 0x60, 0, 0, 0, 0x0e,
            ]
        );

        let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.variant, MagicVariant::Fat32);
        assert_eq!(header.slices, two_slices());
        assert_eq!(header.size(), 48);
    }

    #[test]
    fn test_fat64_reserved_field() {
        let mut slices = two_slices();
        slices[1].offset = 0x1_0000_0000;
        let mut bytes = encode_header(MagicVariant::Fat64, &slices).unwrap();
        assert_eq!(bytes.len(), 8 + 2 * 32);
        assert_eq!(&bytes[36..40], &[0, 0, 0, 0]);

        // garbage in the reserved word must not matter on read
        bytes[39] = 0xff;
        let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.variant, MagicVariant::Fat64);
        assert_eq!(header.slices, slices);
    }

    #[test]
    fn test_write_header_round_trip() {
        let mut out = Vec::new();
        write_header(&mut out, MagicVariant::Fat32, &two_slices()).unwrap();
        assert_eq!(out, encode_header(MagicVariant::Fat32, &two_slices()).unwrap());

        let header = parse_header(&mut Cursor::new(&out)).unwrap();
        assert_eq!(header.slices, two_slices());
    }

    #[test]
    fn test_write_header_reports_short_writer() {
        let mut buf = [0u8; 16];
        let mut out = Cursor::new(&mut buf[..]);
        assert!(matches!(
            write_header(&mut out, MagicVariant::Fat32, &two_slices()),
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WriteZero
        ));
    }

    #[test]
    fn test_fat32_rejects_wide_fields() {
        let mut slices = two_slices();
        slices[0].size = u64::from(u32::MAX) + 1;
        assert!(matches!(
            encode_header(MagicVariant::Fat32, &slices),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let thin = [0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 1];
        assert!(matches!(
            parse_header(&mut Cursor::new(&thin)),
            Err(Error::InvalidMagic(0xcffa_edfe))
        ));
        assert!(matches!(
            parse_header(&mut Cursor::new(&[0xca, 0xfe])),
            Err(Error::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_zero_slices() {
        let bytes = [0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 0];
        assert!(matches!(
            parse_header(&mut Cursor::new(&bytes)),
            Err(Error::ZeroSliceCount)
        ));
    }

    #[test]
    fn test_truncated_table() {
        let bytes = encode_header(MagicVariant::Fat32, &two_slices()).unwrap();
        let err = parse_header(&mut Cursor::new(&bytes[..40])).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedHeader {
                slices: 2,
                needed: 48
            }
        ));

        let err = parse_header(&mut Cursor::new(&bytes[..6])).unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader { slices: 0, .. }));
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        let bytes = [0xca, 0xfe, 0xba, 0xbe, 0xff, 0xff, 0xff, 0xff];
        let err = parse_header(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader { slices: u32::MAX, .. }));
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(MagicVariant::Fat32.header_size(2), 48);
        assert_eq!(MagicVariant::Fat64.header_size(2), 72);
        assert_eq!(MagicVariant::from_magic(0xcafebabf), Some(MagicVariant::Fat64));
        assert_eq!(MagicVariant::from_magic(0xfeedfacf), None);
    }
}
