//! Z85b binary-to-text codec.
//!
//! Base-85 over the closed ZeroMQ Z85 alphabet (see rfc.zeromq.org/spec/32)
//! with little-endian digit order, used for binary payloads embedded in
//! text. The standard pad-and-truncate rule lifts the spec's 4-byte-multiple
//! restriction: encoding pads the input with zero bytes to a 4-byte
//! boundary and truncates the output by the same count, so every input
//! length round-trips exactly (each 4-byte group costs 5 characters, a
//! partial group of n bytes costs n + 1).
//!
//! Decoding rejects bytes outside the alphabet and any 5-character word
//! whose value exceeds 2^32 - 1.

/// The base-85 symbol table.
const ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

/// Maps a symbol back to its value; 0xFF marks bytes outside the alphabet.
const fn build_reverse() -> [u8; 256] {
    let mut map = [0xFFu8; 256];
    let mut index = 0;
    while index < 85 {
        map[ALPHABET[index] as usize] = index as u8;
        index += 1;
    }
    map
}

const REVERSE: [u8; 256] = build_reverse();

const POWERS: [u64; 5] = [1, 85, 85 * 85, 85 * 85 * 85, 85u64 * 85 * 85 * 85];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Z85DecodeError {
    #[error("invalid byte 0x{byte:02x} at position {position}")]
    InvalidByte { byte: u8, position: usize },
    #[error("encoded word \"{word}\" => {value} exceeds the range of a u32")]
    WordOverflow { word: String, value: u64 },
}

/// Encodes raw bytes into Z85b text.
pub fn encode(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let padding = (4 - raw.len() % 4) % 4;
    let mut encoded = String::with_capacity((raw.len() + padding) / 4 * 5);
    let mut chunks = raw.chunks_exact(4);
    for chunk in &mut chunks {
        push_word(&mut encoded, u32::from_le_bytes(chunk.try_into().unwrap()));
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut last = [0u8; 4];
        last[..remainder.len()].copy_from_slice(remainder);
        push_word(&mut encoded, u32::from_le_bytes(last));
    }
    // drop as many characters as we padded bytes
    encoded.truncate(encoded.len() - padding);
    encoded
}

fn push_word(out: &mut String, word: u32) {
    for power in POWERS {
        out.push(ALPHABET[((word as u64 / power) % 85) as usize] as char);
    }
}

/// Decodes Z85b text back into raw bytes.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, Z85DecodeError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let mut decoded = Vec::with_capacity(encoded.len() / 5 * 4 + 4);
    let mut padding = 0usize;
    for (group_at, group) in encoded.chunks(5).enumerate() {
        let mut value: u64 = 0;
        for (offset, &byte) in group.iter().enumerate() {
            let digit = REVERSE[byte as usize];
            if digit == 0xFF {
                return Err(Z85DecodeError::InvalidByte {
                    byte,
                    position: group_at * 5 + offset,
                });
            }
            value += digit as u64 * POWERS[offset];
        }
        if value > u32::MAX as u64 {
            return Err(Z85DecodeError::WordOverflow {
                word: String::from_utf8_lossy(group).into_owned(),
                value,
            });
        }
        if group.len() < 5 {
            // a partial group of n + 1 characters carries n bytes
            padding = 5 - group.len();
        }
        decoded.extend_from_slice(&(value as u32).to_le_bytes());
    }
    decoded.truncate(decoded.len() - padding);
    Ok(decoded)
}
