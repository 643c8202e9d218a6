//! Universal binary detection.

use super::header::MagicVariant;
use std::io::{self, Read, Seek, SeekFrom};

/// Classify a stream by its leading four bytes.
///
/// Returns `Ok(None)` for streams shorter than four bytes or whose magic is
/// not a fat magic. The stream position is restored before returning, also
/// when reading fails.
pub fn detect<R: Read + Seek>(reader: &mut R) -> io::Result<Option<MagicVariant>> {
    let start = reader.stream_position()?;

    let mut magic = [0u8; 4];
    let read = read_prefix(reader, &mut magic);
    let restored = reader.seek(SeekFrom::Start(start));

    let filled = read?;
    restored?;

    if filled < magic.len() {
        return Ok(None);
    }
    Ok(MagicVariant::from_magic(u32::from_be_bytes(magic)))
}

/// True if the stream starts with either fat magic.
///
/// Any I/O failure is reported as "not universal".
pub fn is_universal<R: Read + Seek>(reader: &mut R) -> bool {
    matches!(detect(reader), Ok(Some(_)))
}

/// Fill as much of `buf` as the stream allows.
fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
