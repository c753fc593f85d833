//! COBS (Consistent Overhead Byte Stuffing) framing for the transceiver link
//!
//! Encodes data so 0x00 never appears in payload, allowing it as frame delimiter.
//! `CobsStream` splits a serial byte stream back into decoded messages.

use crate::constants::ADAPTER_MAX_MESSAGE;
use bytes::BytesMut;
use std::fmt;

pub const DELIMITER: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CobsError {
    FrameTooLarge(usize),
    InvalidEncoding,
}

impl fmt::Display for CobsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge(size) => {
                write!(f, "Frame too large: {} bytes (max {})", size, ADAPTER_MAX_MESSAGE)
            }
            Self::InvalidEncoding => write!(f, "Invalid COBS encoding"),
        }
    }
}

impl std::error::Error for CobsError {}

/// Encode data using COBS into provided buffer
///
/// Clears output buffer, encodes data with trailing 0x00 delimiter.
/// Returns number of bytes written.
pub fn encode_into(data: &[u8], output: &mut Vec<u8>) -> Result<usize, CobsError> {
    if data.len() > ADAPTER_MAX_MESSAGE - 2 {
        return Err(CobsError::FrameTooLarge(data.len()));
    }

    output.clear();
    output.reserve(data.len() + (data.len() / 254) + 2);

    let mut code_index = 0;
    output.push(0);
    let mut code: u8 = 1;

    for &byte in data {
        if byte == 0 {
            output[code_index] = code;
            code_index = output.len();
            output.push(0);
            code = 1;
        } else {
            output.push(byte);
            code += 1;
            if code == 255 {
                output[code_index] = code;
                code_index = output.len();
                output.push(0);
                code = 1;
            }
        }
    }

    output[code_index] = code;
    output.push(DELIMITER);
    Ok(output.len())
}

/// Decode COBS-encoded data into BytesMut
///
/// Input should NOT include trailing delimiter.
/// Extends the buffer (does not clear). Returns number of bytes written.
pub fn decode_into(encoded: &[u8], output: &mut BytesMut) -> Result<usize, CobsError> {
    let start_len = output.len();
    let mut i = 0;

    while i < encoded.len() {
        let code = encoded[i] as usize;
        if code == 0 {
            return Err(CobsError::InvalidEncoding);
        }

        i += 1;
        let copy_len = code - 1;

        if i + copy_len > encoded.len() {
            return Err(CobsError::InvalidEncoding);
        }

        output.extend_from_slice(&encoded[i..i + copy_len]);
        i += copy_len;

        if code < 255 && i < encoded.len() {
            output.extend_from_slice(&[0]);
        }
    }

    Ok(output.len() - start_len)
}

/// Splits a byte stream on the delimiter and decodes each message
pub struct CobsStream {
    buffer: Vec<u8>,
    /// Set while skipping an overlong message up to its delimiter
    overflowed: bool,
}

impl CobsStream {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(ADAPTER_MAX_MESSAGE),
            overflowed: false,
        }
    }

    /// Feed bytes; calls `on_message` with each decoded message or error
    pub fn feed(&mut self, data: &[u8], mut on_message: impl FnMut(Result<BytesMut, CobsError>)) {
        for &byte in data {
            if byte != DELIMITER {
                if self.buffer.len() >= ADAPTER_MAX_MESSAGE {
                    self.buffer.clear();
                    self.overflowed = true;
                }
                if !self.overflowed {
                    self.buffer.push(byte);
                }
                continue;
            }

            if self.overflowed {
                self.overflowed = false;
                on_message(Err(CobsError::FrameTooLarge(ADAPTER_MAX_MESSAGE + 1)));
                continue;
            }
            if self.buffer.is_empty() {
                continue;
            }

            let mut decoded = BytesMut::with_capacity(self.buffer.len());
            let result = decode_into(&self.buffer, &mut decoded).map(|_| decoded);
            self.buffer.clear();
            on_message(result);
        }
    }
}

impl Default for CobsStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_zeros_in_encoded() {
        let data = vec![0x00, 0x01, 0x00, 0x02, 0x00];
        let mut encoded = Vec::new();
        encode_into(&data, &mut encoded).unwrap();
        for &byte in &encoded[..encoded.len() - 1] {
            assert_ne!(byte, 0x00);
        }
        assert_eq!(encoded.last(), Some(&DELIMITER));
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let mut encoded = Vec::new();
        let data = vec![1u8; ADAPTER_MAX_MESSAGE];
        assert_eq!(
            encode_into(&data, &mut encoded),
            Err(CobsError::FrameTooLarge(ADAPTER_MAX_MESSAGE))
        );
    }

    #[test]
    fn test_decode_rejects_zero_code() {
        let mut out = BytesMut::new();
        assert_eq!(decode_into(&[0x01, 0x00], &mut out), Err(CobsError::InvalidEncoding));
        assert_eq!(decode_into(&[0x05, 0x01], &mut out), Err(CobsError::InvalidEncoding));
    }

    #[test]
    fn test_stream_splits_messages_across_reads() {
        let mut wire = Vec::new();
        let mut encoded = Vec::new();
        encode_into(&[0x81, 0x00], &mut encoded).unwrap();
        wire.extend_from_slice(&encoded);
        encode_into(&[0x82, 0x01, 0x02], &mut encoded).unwrap();
        wire.extend_from_slice(&encoded);

        let mut stream = CobsStream::new();
        let mut messages = Vec::new();
        let (first, second) = wire.split_at(3);
        stream.feed(first, |m| messages.push(m.unwrap()));
        stream.feed(second, |m| messages.push(m.unwrap()));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_ref(), &[0x81, 0x00]);
        assert_eq!(messages[1].as_ref(), &[0x82, 0x01, 0x02]);
    }

    #[test]
    fn test_stream_skips_overlong_message() {
        let mut wire = vec![0x01; ADAPTER_MAX_MESSAGE + 10];
        wire.push(DELIMITER);
        let mut encoded = Vec::new();
        encode_into(&[0x83], &mut encoded).unwrap();
        wire.extend_from_slice(&encoded);

        let mut stream = CobsStream::new();
        let mut ok = Vec::new();
        let mut errors = 0;
        stream.feed(&wire, |m| match m {
            Ok(m) => ok.push(m),
            Err(_) => errors += 1,
        });

        assert_eq!(errors, 1);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].as_ref(), &[0x83]);
    }
}
