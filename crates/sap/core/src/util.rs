//! Stream helpers shared by both codecs

use std::io::{self, Read};

/// Bytes needed to pad `len` to the next 4-byte boundary
pub(crate) const fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Fill `buf` completely, or report a clean end of stream
///
/// Returns `Ok(false)` if the stream ended before the first byte. Ending
/// anywhere after that is an `UnexpectedEof` error.
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Discard `len` bytes
pub(crate) fn skip<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<()> {
    let mut scratch = [0u8; 4];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        reader.read_exact(&mut scratch[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(2), 2);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(5), 3);
    }

    #[test]
    fn test_read_exact_or_eof() {
        let mut buf = [0u8; 2];

        let mut empty: &[u8] = &[];
        assert!(!read_exact_or_eof(&mut empty, &mut buf).unwrap());

        let mut short: &[u8] = &[0x01];
        let err = read_exact_or_eof(&mut short, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut full: &[u8] = &[0x01, 0x02, 0x03];
        assert!(read_exact_or_eof(&mut full, &mut buf).unwrap());
        assert_eq!(buf, [0x01, 0x02]);
        assert_eq!(full, &[0x03]);
    }
}
