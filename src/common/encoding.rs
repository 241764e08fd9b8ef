//! Packing of floating-point sensor values into bit-string payloads.
//!
//! Beacon contents are the IEEE-754 single precision representation of each
//! value written out as 32 `'0'`/`'1'` characters, most significant bit first.
//! The bit string length is what the PHY charges for, so a payload of `n`
//! values costs exactly `32 * n` payload bits.

/// Width of one encoded value in bits.
pub const FLOAT_BITS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The bit string length is not a multiple of the value width.
    InvalidLength { length: usize, width: usize },
    /// A character other than '0' or '1' was found.
    InvalidCharacter { index: usize, found: char },
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidLength { length, width } => {
                write!(f, "bit string length {} is not a multiple of {}", length, width)
            }
            EncodingError::InvalidCharacter { index, found } => {
                write!(f, "invalid character {:?} at bit {}", found, index)
            }
        }
    }
}

impl std::error::Error for EncodingError {}

pub fn encode_float(value: f32) -> String {
    format!("{:032b}", value.to_bits())
}

pub fn encode_floats(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * FLOAT_BITS);
    for value in values {
        out.push_str(&encode_float(*value));
    }
    out
}

/// Decode a bit string produced by `encode_floats`.
///
/// # Returns
///
/// The decoded values, or an `EncodingError` if the string is not a whole
/// number of 32-bit words of '0'/'1' characters. A malformed payload means the
/// sender encoded it wrong, so this is reported instead of being patched up.
pub fn decode_floats(bits: &str) -> Result<Vec<f32>, EncodingError> {
    if bits.len() % FLOAT_BITS != 0 {
        return Err(EncodingError::InvalidLength {
            length: bits.len(),
            width: FLOAT_BITS,
        });
    }

    let mut values = Vec::with_capacity(bits.len() / FLOAT_BITS);
    let mut word: u32 = 0;
    for (index, c) in bits.chars().enumerate() {
        let bit = match c {
            '0' => 0,
            '1' => 1,
            other => return Err(EncodingError::InvalidCharacter { index, found: other }),
        };
        word = (word << 1) | bit;
        if (index + 1) % FLOAT_BITS == 0 {
            values.push(f32::from_bits(word));
            word = 0;
        }
    }
    Ok(values)
}
