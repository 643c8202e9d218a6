//! Slice layout for new universal binaries.
//!
//! Slices are placed in the order given. Each one starts at the first
//! multiple of `2^align` at or after the end of the previous slice (or the
//! end of the header table for the first), and the gap is zero padding.

use super::arch::{ArchitectureInfo, SliceDescriptor};
use super::header::MagicVariant;
use crate::{Error, Result};

/// One slice to be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSlice {
    pub arch: ArchitectureInfo,
    pub align: u32,
    pub size: u64,
}

/// A placed slice and the zero bytes written in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    pub descriptor: SliceDescriptor,
    pub padding: u64,
}

/// Computed placement of every slice in a universal binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    variant: MagicVariant,
    header_size: u64,
    entries: Vec<LayoutEntry>,
    total_size: u64,
}

impl ContainerLayout {
    /// Lay out `slices` in order.
    ///
    /// The 32-bit table is used unless an offset or size does not fit in 32
    /// bits, or `force_fat64` is set.
    ///
    /// # Errors
    ///
    /// - [`Error::NoInputSlices`] if `slices` is empty
    /// - [`Error::LayoutOverflow`] if offsets overflow 64 bits
    pub fn plan(slices: &[PlannedSlice], force_fat64: bool) -> Result<Self> {
        if slices.is_empty() {
            return Err(Error::NoInputSlices);
        }

        if !force_fat64 {
            let layout = Self::place(MagicVariant::Fat32, slices)?;
            if layout.fits_fat32() {
                return Ok(layout);
            }
            tracing::debug!("slice offsets exceed 32 bits, using 64-bit fat table");
        }
        Self::place(MagicVariant::Fat64, slices)
    }

    fn place(variant: MagicVariant, slices: &[PlannedSlice]) -> Result<Self> {
        let count = u32::try_from(slices.len()).map_err(|_| Error::LayoutOverflow)?;
        let header_size = variant.header_size(count);

        let mut cursor = header_size;
        let mut entries = Vec::with_capacity(slices.len());
        for slice in slices {
            let offset = align_up(cursor, slice.align).ok_or(Error::LayoutOverflow)?;
            let descriptor = SliceDescriptor {
                arch: slice.arch,
                offset,
                size: slice.size,
                align: slice.align,
            };
            entries.push(LayoutEntry {
                descriptor,
                padding: offset - cursor,
            });
            cursor = descriptor.end().ok_or(Error::LayoutOverflow)?;
        }

        Ok(Self {
            variant,
            header_size,
            entries,
            total_size: cursor,
        })
    }

    fn fits_fat32(&self) -> bool {
        let max = u64::from(u32::MAX);
        self.entries
            .iter()
            .all(|e| e.descriptor.offset <= max && e.descriptor.size <= max)
    }

    pub fn variant(&self) -> MagicVariant {
        self.variant
    }

    /// Bytes taken by the header and table.
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn descriptors(&self) -> Vec<SliceDescriptor> {
        self.entries.iter().map(|e| e.descriptor).collect()
    }

    /// Size of the finished container.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// Round `value` up to a multiple of `2^align`.
pub fn align_up(value: u64, align: u32) -> Option<u64> {
    let alignment = 1u64.checked_shl(align)?;
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::arch::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};

    const GIB: u64 = 1 << 30;

    fn slice(cpu_type: u32, subtype: u32, align: u32, size: u64) -> PlannedSlice {
        PlannedSlice {
            arch: ArchitectureInfo::new(cpu_type, subtype),
            align,
            size,
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), Some(0));
        assert_eq!(align_up(1, 4), Some(16));
        assert_eq!(align_up(16, 4), Some(16));
        assert_eq!(align_up(17, 4), Some(32));
        assert_eq!(align_up(100, 14), Some(0x4000));
        assert_eq!(align_up(5, 0), Some(5));
        assert_eq!(align_up(u64::MAX, 4), None);
        assert_eq!(align_up(1, 64), None);
    }

    #[test]
    fn test_ls_layout() {
        let layout = ContainerLayout::plan(
            &[
                slice(CPU_TYPE_X86_64, 3, 14, 0x11c60),
                slice(CPU_TYPE_ARM64, 0x8000_0002, 14, 0x15aa0),
            ],
            false,
        )
        .unwrap();

        assert_eq!(layout.variant(), MagicVariant::Fat32);
        assert_eq!(layout.header_size(), 48);
        let d = layout.descriptors();
        assert_eq!((d[0].offset, d[0].size), (0x4000, 0x11c60));
        assert_eq!((d[1].offset, d[1].size), (0x18000, 0x15aa0));
        assert_eq!(layout.entries()[0].padding, 0x4000 - 48);
        assert_eq!(layout.entries()[1].padding, 0x18000 - 0x15c60);
        assert_eq!(layout.total_size(), 0x18000 + 0x15aa0);
    }

    #[test]
    fn test_mixed_alignment_keeps_input_order() {
        let layout = ContainerLayout::plan(
            &[
                slice(CPU_TYPE_ARM64, 0, 14, 0x100),
                slice(CPU_TYPE_X86_64, 3, 12, 0x100),
                slice(7, 3, 2, 0x3),
            ],
            false,
        )
        .unwrap();

        let offsets: Vec<u64> = layout.descriptors().iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0x4000, 0x5000, 0x5100]);
        for pair in layout.descriptors().windows(2) {
            assert!(pair[0].end().unwrap() <= pair[1].offset);
        }
        assert!(layout.descriptors().iter().all(SliceDescriptor::is_aligned));
    }

    #[test]
    fn test_large_offsets_switch_to_fat64() {
        let layout = ContainerLayout::plan(
            &[
                slice(CPU_TYPE_X86_64, 3, 14, 3 * GIB),
                slice(CPU_TYPE_ARM64, 0, 14, 3 * GIB),
                slice(CPU_TYPE_ARM64, 2, 14, 3 * GIB),
            ],
            false,
        )
        .unwrap();

        assert_eq!(layout.variant(), MagicVariant::Fat64);
        assert_eq!(layout.header_size(), 8 + 3 * 32);
        let d = layout.descriptors();
        assert!(d[2].offset > u64::from(u32::MAX));
        assert!(d.iter().all(SliceDescriptor::is_aligned));
        for pair in d.windows(2) {
            assert!(pair[0].end().unwrap() <= pair[1].offset);
        }
    }

    #[test]
    fn test_large_total_with_narrow_fields_stays_fat32() {
        let layout = ContainerLayout::plan(
            &[
                slice(CPU_TYPE_X86_64, 3, 14, 3 * GIB),
                slice(CPU_TYPE_ARM64, 0, 14, 3 * GIB),
            ],
            false,
        )
        .unwrap();
        assert_eq!(layout.variant(), MagicVariant::Fat32);
    }

    #[test]
    fn test_forced_fat64() {
        let layout =
            ContainerLayout::plan(&[slice(CPU_TYPE_ARM64, 0, 14, 0x10)], true).unwrap();
        assert_eq!(layout.variant(), MagicVariant::Fat64);
        assert_eq!(layout.descriptors()[0].offset, 0x4000);
    }

    #[test]
    fn test_empty_and_overflow() {
        assert!(matches!(
            ContainerLayout::plan(&[], false),
            Err(Error::NoInputSlices)
        ));
        assert!(matches!(
            ContainerLayout::plan(
                &[
                    slice(CPU_TYPE_X86_64, 3, 14, u64::MAX - 0x100),
                    slice(CPU_TYPE_ARM64, 0, 14, 1),
                ],
                false
            ),
            Err(Error::LayoutOverflow)
        ));
    }
}
