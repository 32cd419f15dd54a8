//! Scalar value tokens.
//!
//! Every token starts with a one-character format tag. `<` marks a hex
//! encoded body (two hex digits per byte, bytes read as UTF-8); any other
//! tag means the rest of the token is the value verbatim.
//!
//! Decoding never fails. A pair that is not valid hex is parsed from its
//! leading hex digits, and a pair with no hex digit at all decodes to
//! U+FFFD. Servers are trusted to encode correctly, so garbage in yields
//! garbage out rather than an error.

use std::fmt::Write;

pub const ENCODED_MARKER: char = '<';
pub const LITERAL_MARKER: char = '>';

const REPLACEMENT: &str = "\u{FFFD}";

pub fn decode(token: &str) -> String {
    let mut chars = token.chars();

    let Some(tag) = chars.next() else {
        return String::new();
    };

    if tag == ENCODED_MARKER {
        decode_hex(chars.as_str())
    } else {
        chars.as_str().to_string()
    }
}

pub fn encode_hex(value: &str) -> String {
    let mut out = String::with_capacity(1 + value.len() * 2);
    out.push(ENCODED_MARKER);

    for byte in value.as_bytes() {
        let _ = write!(out, "{byte:02x}");
    }

    out
}

pub fn encode_literal(value: &str) -> String {
    format!("{LITERAL_MARKER}{value}")
}

fn decode_hex(body: &str) -> String {
    let mut bytes = Vec::with_capacity(body.len() / 2);

    for pair in body.as_bytes().chunks(2) {
        match parse_hex_prefix(pair) {
            Some(byte) => bytes.push(byte),
            None => bytes.extend_from_slice(REPLACEMENT.as_bytes()),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

fn parse_hex_prefix(pair: &[u8]) -> Option<u8> {
    let mut value: Option<u8> = None;

    for &digit in pair {
        let Some(nibble) = char::from(digit).to_digit(16) else {
            break;
        };
        value = Some(value.unwrap_or(0) * 16 + nibble as u8);
    }

    value
}
