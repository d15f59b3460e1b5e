//! Length-prefixed binary framings.
//!
//! Fixed framing:   `[u16 key len][u32 value len][key][value]`
//! Newline framing: `[u16 key len][key][value]['\n']`
//!
//! All integers are big-endian.

use crate::error::{Result, TapError};

/// Fixed frame header size (key length + value length).
pub const FIXED_HEADER_SIZE: usize = 2 + 4;

/// Newline frame header size (key length).
pub const NEWLINE_HEADER_SIZE: usize = 2;

/// Newline frame terminator.
pub const NEWLINE: u8 = b'\n';

/// A decoded key/value pair borrowed from a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Encode a fixed frame.
///
/// Returns `None` when the key does not fit in 16 bits or the value does
/// not fit in 32 bits; such pairs are dropped rather than truncated.
pub fn encode_fixed(key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    let key_len = u16::try_from(key.len()).ok()?;
    let value_len = u32::try_from(value.len()).ok()?;

    let mut frame = Vec::with_capacity(FIXED_HEADER_SIZE + key.len() + value.len());
    frame.extend_from_slice(&key_len.to_be_bytes());
    frame.extend_from_slice(&value_len.to_be_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    Some(frame)
}

/// Decode one fixed frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, so consecutive
/// frames can be read from a single buffer.
pub fn decode_fixed(buf: &[u8]) -> Result<(Frame<'_>, usize)> {
    if buf.len() < FIXED_HEADER_SIZE {
        return Err(TapError::InvalidFrame(format!(
            "fixed frame header needs {} bytes, got {}",
            FIXED_HEADER_SIZE,
            buf.len()
        )));
    }

    let key_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let value_len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;

    let key_end = FIXED_HEADER_SIZE + key_len;
    let total = key_end + value_len;
    if buf.len() < total {
        return Err(TapError::InvalidFrame(format!(
            "fixed frame declares {} bytes, got {}",
            total,
            buf.len()
        )));
    }

    Ok((
        Frame {
            key: &buf[FIXED_HEADER_SIZE..key_end],
            value: &buf[key_end..total],
        },
        total,
    ))
}

/// Encode a newline-terminated frame.
///
/// Neither key nor value may contain `'\n'`; bytes are written as-is.
/// Returns `None` when the key does not fit in 16 bits.
pub fn encode_newline(key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    let key_len = u16::try_from(key.len()).ok()?;
    debug_assert!(
        !value.contains(&NEWLINE),
        "newline framing cannot carry a value containing '\\n'"
    );

    let mut frame = Vec::with_capacity(NEWLINE_HEADER_SIZE + key.len() + value.len() + 1);
    frame.extend_from_slice(&key_len.to_be_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    frame.push(NEWLINE);
    Some(frame)
}

/// Decode one newline frame from the front of `buf`.
///
/// The key is located by its length prefix, the value runs up to the
/// first terminator after the key.
pub fn decode_newline(buf: &[u8]) -> Result<(Frame<'_>, usize)> {
    if buf.len() < NEWLINE_HEADER_SIZE {
        return Err(TapError::InvalidFrame(format!(
            "newline frame header needs {} bytes, got {}",
            NEWLINE_HEADER_SIZE,
            buf.len()
        )));
    }

    let key_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let key_end = NEWLINE_HEADER_SIZE + key_len;
    if buf.len() < key_end {
        return Err(TapError::InvalidFrame(format!(
            "newline frame key declares {} bytes, got {}",
            key_len,
            buf.len() - NEWLINE_HEADER_SIZE
        )));
    }

    let terminator = buf[key_end..]
        .iter()
        .position(|b| *b == NEWLINE)
        .ok_or_else(|| TapError::InvalidFrame("newline frame is not terminated".into()))?;
    let value_end = key_end + terminator;

    Ok((
        Frame {
            key: &buf[NEWLINE_HEADER_SIZE..key_end],
            value: &buf[key_end..value_end],
        },
        value_end + 1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_layout() {
        let frame = encode_fixed(b"ab", b"xyz").unwrap();
        assert_eq!(frame, vec![0, 2, 0, 0, 0, 3, b'a', b'b', b'x', b'y', b'z']);
    }

    #[test]
    fn test_fixed_consecutive_frames() {
        let mut buf = encode_fixed(b"k1", b"v1").unwrap();
        buf.extend(encode_fixed(b"", b"").unwrap());
        buf.extend(encode_fixed(b"k3", b"value-3").unwrap());

        let (first, used) = decode_fixed(&buf).unwrap();
        assert_eq!(first.key, b"k1");
        assert_eq!(first.value, b"v1");

        let (second, used2) = decode_fixed(&buf[used..]).unwrap();
        assert!(second.key.is_empty() && second.value.is_empty());

        let (third, used3) = decode_fixed(&buf[used + used2..]).unwrap();
        assert_eq!(third.value, b"value-3");
        assert_eq!(used + used2 + used3, buf.len());
    }

    #[test]
    fn test_fixed_rejects_oversized_key() {
        let key = vec![7u8; u16::MAX as usize + 1];
        assert!(encode_fixed(&key, b"v").is_none());

        let key = vec![7u8; u16::MAX as usize];
        let frame = encode_fixed(&key, b"v").unwrap();
        let (decoded, _) = decode_fixed(&frame).unwrap();
        assert_eq!(decoded.key.len(), u16::MAX as usize);
    }

    #[test]
    fn test_fixed_truncated_frame() {
        let frame = encode_fixed(b"key", b"value").unwrap();
        assert!(matches!(
            decode_fixed(&frame[..frame.len() - 1]),
            Err(TapError::InvalidFrame(_))
        ));
        assert!(decode_fixed(&frame[..3]).is_err());
    }

    #[test]
    fn test_newline_layout() {
        let frame = encode_newline(b"k", b"v").unwrap();
        assert_eq!(frame, vec![0, 1, b'k', b'v', b'\n']);
    }

    #[test]
    fn test_newline_key_may_hold_terminator_byte() {
        // Key of length 10 puts 0x0A in the length prefix.
        let key = b"0123456789";
        let frame = encode_newline(key, b"val").unwrap();
        let (decoded, used) = decode_newline(&frame).unwrap();
        assert_eq!(decoded.key, key);
        assert_eq!(decoded.value, b"val");
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_newline_unterminated() {
        let frame = encode_newline(b"k", b"v").unwrap();
        assert!(decode_newline(&frame[..frame.len() - 1]).is_err());
    }
}
