//! Reversible value obfuscation
//!
//! A stateless text transform that deters casual inspection of stored
//! values. This is not cryptography: the shift cipher is trivially
//! reversible by anyone who cares to look.
//!
//! ## Wire format
//!
//! Current format: a two-character confirmation token (one random
//! letter + the decimal secret, shifted once) followed by the
//! percent-encoded plaintext, with the whole string shifted once more.
//! Decoding unshifts everything after the first character and checks
//! for the deterministic token tail; a mismatch means the value was
//! written by the pre-percent-encoding format and is decoded as a bare
//! shifted string instead. Both paths must stay supported: stored
//! values never migrate in place.

use rand::Rng;

/// Count of Unicode scalar values (code points minus the surrogate gap).
const SCALAR_COUNT: u32 = 0x110000 - 0x800;
/// Start of the UTF-16 surrogate range, which no Rust `char` can hold.
const SURROGATE_START: u32 = 0xD800;
/// Width of the surrogate gap.
const SURROGATE_GAP: u32 = 0x800;

/// Error produced when an obfuscated value cannot be decoded.
#[derive(Debug)]
pub enum CodecError {
    /// Input was empty; even a legacy value carries at least one character.
    Empty,
    /// A percent escape was malformed (current-format payloads only).
    BadEscape(String),
    /// Percent-decoded bytes were not valid UTF-8.
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Empty => write!(f, "cannot deobfuscate an empty string"),
            CodecError::BadEscape(seq) => write!(f, "malformed percent escape: {}", seq),
            CodecError::Utf8(e) => write!(f, "decoded payload is not UTF-8: {}", e),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::string::FromUtf8Error> for CodecError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        CodecError::Utf8(e)
    }
}

/// Obfuscation seam: stores accept any codec pair, `ShiftCodec` is the
/// default. Implementations must satisfy
/// `deobfuscate(obfuscate(s, k), k) == s` for every string `s` and
/// secret `k`.
pub trait Codec: Send + Sync {
    fn obfuscate(&self, plain: &str, secret: u32) -> String;
    fn deobfuscate(&self, stored: &str, secret: u32) -> Result<String, CodecError>;
}

/// Default codec: shift cipher over percent-encoded text with a
/// key-confirmation token and a legacy decode fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftCodec;

impl Codec for ShiftCodec {
    fn obfuscate(&self, plain: &str, secret: u32) -> String {
        let confirm = confirm_token(secret);
        let encoded = format!("{}{}", confirm, percent_encode(plain));
        encoded.chars().map(|c| shift_forward(c, secret)).collect()
    }

    /// Unshift everything after the leading marker character. If the
    /// result opens with the deterministic confirmation tail the value
    /// is current-format: strip the tail and percent-decode. Otherwise
    /// the whole string (marker included) is legacy shifted plaintext.
    fn deobfuscate(&self, stored: &str, secret: u32) -> Result<String, CodecError> {
        let mut chars = stored.chars();
        let first = chars.next().ok_or(CodecError::Empty)?;
        let tail: String = chars.map(|c| shift_back(c, secret)).collect();

        let confirm_tail: String = secret
            .to_string()
            .chars()
            .map(|c| shift_forward(c, secret))
            .collect();

        if let Some(payload) = tail.strip_prefix(confirm_tail.as_str()) {
            return percent_decode(payload);
        }
        Ok(format!("{}{}", shift_back(first, secret), tail))
    }
}

/// One random ASCII letter plus the decimal secret, shifted once.
/// The letter randomizes output so equal plaintexts do not collide
/// textually; the secret digits are the deterministic part the decoder
/// checks for.
fn confirm_token(secret: u32) -> String {
    let mut rng = rand::thread_rng();
    let base = if rng.gen_bool(0.5) { b'a' } else { b'A' };
    let letter = (base + rng.gen_range(0..26)) as char;
    format!("{}{}", letter, secret)
        .chars()
        .map(|c| shift_forward(c, secret))
        .collect()
}

// The shift operates on Unicode scalar values with the surrogate gap
// removed, so it is a total bijection for every secret. For ASCII
// payloads this matches a plain code-point shift exactly.

fn scalar_index(c: char) -> u32 {
    let v = c as u32;
    if v < SURROGATE_START {
        v
    } else {
        v - SURROGATE_GAP
    }
}

fn scalar_at(index: u32) -> char {
    let v = if index < SURROGATE_START {
        index
    } else {
        index + SURROGATE_GAP
    };
    char::from_u32(v).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn shift_forward(c: char, secret: u32) -> char {
    scalar_at((scalar_index(c) + secret % SCALAR_COUNT) % SCALAR_COUNT)
}

fn shift_back(c: char, secret: u32) -> char {
    scalar_at((scalar_index(c) + SCALAR_COUNT - secret % SCALAR_COUNT) % SCALAR_COUNT)
}

// ============================================================================
// Percent-encoding (encodeURIComponent-compatible)
// ============================================================================

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn percent_decode(input: &str) -> Result<String, CodecError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    let seq: String = input[i..].chars().take(3).collect();
                    return Err(CodecError::BadEscape(seq));
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8(out)?)
}
