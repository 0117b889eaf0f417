//! Text encoding detection and decoding for uploaded datasets.
//!
//! Byte-order marks are checked before statistical detection. ASCII is reported
//! as `utf-8`; Latin-1 and Mac Roman guesses are reported as `cp932`.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, SHIFT_JIS, UTF_16BE, UTF_16LE, UTF_8};

use crate::{Error, Result};

/// UTF-8 with signature.
pub const UTF8_SIG: &str = "utf-8-sig";
/// Plain UTF-8.
pub const UTF8: &str = "utf-8";
/// UTF-16, endianness taken from the byte-order mark.
pub const UTF16: &str = "utf-16";
/// UTF-32, endianness taken from the byte-order mark.
pub const UTF32: &str = "utf-32";
/// Windows code page 932 (Shift-JIS extended).
pub const CP932: &str = "cp932";

const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_UTF16_LE: &[u8] = &[0xFF, 0xFE];
const BOM_UTF16_BE: &[u8] = &[0xFE, 0xFF];
const BOM_UTF32_LE: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const BOM_UTF32_BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

/// Detect the text encoding of `bytes`.
///
/// # Examples
///
/// ```rust
/// use trueno_ml::storage::detect_encoding;
///
/// assert_eq!(detect_encoding(b"\xef\xbb\xbfa,b\n1,2\n"), "utf-8-sig");
/// assert_eq!(detect_encoding(b"\xff\xfea\x00"), "utf-16");
/// assert_eq!(detect_encoding(b"a,b\n1,2\n"), "utf-8");
/// ```
#[must_use]
pub fn detect_encoding(bytes: &[u8]) -> String {
    if bytes.starts_with(BOM_UTF8) {
        return UTF8_SIG.to_string();
    }
    // UTF-16 is checked first, so a UTF-32 LE mark reads as UTF-16.
    if bytes.starts_with(BOM_UTF16_LE) || bytes.starts_with(BOM_UTF16_BE) {
        return UTF16.to_string();
    }
    if bytes.starts_with(BOM_UTF32_BE) || bytes.starts_with(BOM_UTF32_LE) {
        return UTF32.to_string();
    }

    normalize_encoding_name(&guess_encoding(bytes))
}

/// Map raw detector output onto the names this crate decodes with.
#[must_use]
pub fn normalize_encoding_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "ascii" | "us-ascii" => UTF8.to_string(),
        "windows-1252" | "iso-8859-1" | "latin-1" | "latin1" | "macintosh" | "macroman"
        | "mac-roman" => CP932.to_string(),
        _ => lower,
    }
}

fn guess_encoding(bytes: &[u8]) -> String {
    if bytes.is_ascii() {
        return "ascii".to_string();
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF8.to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true).name().to_string()
}

/// Decode `bytes` as `encoding` (a name returned by [`detect_encoding`] or any
/// WHATWG label).
///
/// # Errors
///
/// Returns [`Error::DataAccess`] if the encoding is unknown or the bytes are
/// malformed for it.
pub fn decode(bytes: &[u8], encoding: &str) -> Result<String> {
    match encoding.to_ascii_lowercase().as_str() {
        UTF8_SIG | UTF8 | "ascii" => {
            decode_with(UTF_8, bytes.strip_prefix(BOM_UTF8).unwrap_or(bytes), encoding)
        }
        UTF16 => {
            if let Some(rest) = bytes.strip_prefix(BOM_UTF16_BE) {
                decode_with(UTF_16BE, rest, encoding)
            } else {
                decode_with(UTF_16LE, bytes.strip_prefix(BOM_UTF16_LE).unwrap_or(bytes), encoding)
            }
        }
        UTF32 => decode_utf32(bytes),
        CP932 | "windows-31j" | "shift_jis" | "sjis" => decode_with(SHIFT_JIS, bytes, encoding),
        other => {
            let codec = Encoding::for_label(other.as_bytes()).ok_or_else(|| {
                Error::DataAccess(format!("Unsupported text encoding '{encoding}'"))
            })?;
            decode_with(codec, bytes, encoding)
        }
    }
}

fn decode_with(codec: &'static Encoding, bytes: &[u8], label: &str) -> Result<String> {
    codec
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| Error::DataAccess(format!("Input is not valid {label} text")))
}

fn decode_utf32(bytes: &[u8]) -> Result<String> {
    let (little_endian, body) = if let Some(rest) = bytes.strip_prefix(BOM_UTF32_LE) {
        (true, rest)
    } else if let Some(rest) = bytes.strip_prefix(BOM_UTF32_BE) {
        (false, rest)
    } else {
        (true, bytes)
    };

    if body.len() % 4 != 0 {
        return Err(Error::DataAccess(
            "UTF-32 input length is not a multiple of 4".to_string(),
        ));
    }

    body.chunks_exact(4)
        .map(|unit| {
            let raw = [unit[0], unit[1], unit[2], unit[3]];
            let code = if little_endian {
                u32::from_le_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            };
            char::from_u32(code).ok_or_else(|| {
                Error::DataAccess(format!("Invalid UTF-32 code point {code:#x}"))
            })
        })
        .collect()
}
