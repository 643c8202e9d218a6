//! Synthetic Mach-O fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_SUBTYPE_X86_64_ALL: u32 = 3;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_SUBTYPE_ARM64_ALL: u32 = 0;
/// arm64e with the pointer-authentication ABI capability bit set
pub const CPU_SUBTYPE_ARM64E_PTRAUTH: u32 = 0x8000_0002;

const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_EXECUTE: u32 = 2;
const LC_SEGMENT_64: u32 = 0x19;

/// A little-endian 64-bit executable of exactly `len` bytes.
///
/// Segment addresses mirror a typical arm64-era executable, so the slice
/// alignment recommended for it is 2^14.
pub fn thin_macho(cputype: u32, cpusubtype: u32, len: usize) -> Vec<u8> {
    let segments: [(&str, u64); 3] = [
        ("__PAGEZERO", 0),
        ("__TEXT", 0x1_0000_0000),
        ("__LINKEDIT", 0x1_0000_4000),
    ];

    let mut cmds = Vec::new();
    for (name, vmaddr) in segments {
        let mut segname = [0u8; 16];
        segname[..name.len()].copy_from_slice(name.as_bytes());
        cmds.extend_from_slice(&LC_SEGMENT_64.to_le_bytes());
        cmds.extend_from_slice(&72u32.to_le_bytes());
        cmds.extend_from_slice(&segname);
        cmds.extend_from_slice(&vmaddr.to_le_bytes());
        cmds.extend_from_slice(&0x4000u64.to_le_bytes()); // vmsize
        cmds.extend_from_slice(&0u64.to_le_bytes()); // fileoff
        cmds.extend_from_slice(&0u64.to_le_bytes()); // filesize
        cmds.extend_from_slice(&[0u8; 16]); // maxprot, initprot, nsects, flags
    }

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&MH_MAGIC_64.to_le_bytes());
    out.extend_from_slice(&cputype.to_le_bytes());
    out.extend_from_slice(&cpusubtype.to_le_bytes());
    out.extend_from_slice(&MH_EXECUTE.to_le_bytes());
    out.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    out.extend_from_slice(&(cmds.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]); // flags, reserved
    out.extend_from_slice(&cmds);
    assert!(out.len() <= len, "fixture too small for its load commands");

    // deterministic, architecture-specific body
    let seed = (cputype ^ cpusubtype) as u8;
    let body = (out.len()..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed));
    out.extend(body);
    out
}

pub fn write_thin(dir: &Path, name: &str, cputype: u32, cpusubtype: u32, len: usize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, thin_macho(cputype, cpusubtype, len)).unwrap();
    path
}

/// Big-endian 32-bit fat container with slices placed at the given offsets.
pub fn fat_container(slices: &[(u32, u32, u64, &[u8], u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());
    for (cputype, cpusubtype, offset, data, align) in slices {
        out.extend_from_slice(&cputype.to_be_bytes());
        out.extend_from_slice(&cpusubtype.to_be_bytes());
        out.extend_from_slice(&(*offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(&align.to_be_bytes());
    }
    for (_, _, offset, data, _) in slices {
        out.resize(*offset as usize, 0);
        out.extend_from_slice(data);
    }
    out
}

/// The two-slice container the `ls` fixture is modelled on:
/// x86_64 at 0x4000 (0x11c60 bytes) and arm64e at 0x18000 (0x15aa0 bytes).
pub fn ls_universal() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let amd64 = thin_macho(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, 0x11c60);
    let arm64e = thin_macho(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E_PTRAUTH, 0x15aa0);
    let fat = fat_container(&[
        (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, 0x4000, amd64.as_slice(), 14),
        (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E_PTRAUTH, 0x18000, arm64e.as_slice(), 14),
    ]);
    (fat, amd64, arm64e)
}
