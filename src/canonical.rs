//! Canonical encoding of vocabulary documents
//!
//! Produces a deterministic byte string for a document so that two
//! semantically identical documents (any property order, any whitespace)
//! hash to the same digest:
//! - object keys sorted by byte order, no insignificant whitespace
//! - arrays keep their order
//! - strings escaped with a single fixed rule set
//! - integers in decimal; floats in shortest round-trip form, always with
//!   a fraction or exponent so `1` and `1.0` stay distinct

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::vocab::VocabularyObject;

/// Largest integer magnitude exchanged losslessly between JSON implementations
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Canonical bytes of a document with their SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub bytes: Vec<u8>,
    pub digest: [u8; 32],
}

impl Canonical {
    /// `SHA-256=<base64>` as carried by the Digest header
    pub fn digest_header(&self) -> String {
        format!("SHA-256={}", BASE64.encode(self.digest))
    }

    /// Lowercase hex digest, used for logging and job bookkeeping
    pub fn digest_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Canonicalize a vocabulary document.
///
/// # Errors
/// `Canonicalization` if a value has no canonical form (integers outside
/// the interoperable range).
pub fn canonicalize(object: &VocabularyObject) -> Result<Canonical> {
    canonicalize_value(&object.to_json())
}

/// Canonicalize an arbitrary JSON value.
pub fn canonicalize_value(value: &Value) -> Result<Canonical> {
    let mut bytes = Vec::with_capacity(256);
    write_value(value, &mut bytes)?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(&bytes));
    Ok(Canonical { bytes, digest })
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push(b'{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(value, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> Result<()> {
    if let Some(u) = n.as_u64() {
        if u > MAX_SAFE_INTEGER {
            return Err(unsupported_number(n));
        }
        out.extend_from_slice(u.to_string().as_bytes());
    } else if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > MAX_SAFE_INTEGER {
            return Err(unsupported_number(n));
        }
        out.extend_from_slice(i.to_string().as_bytes());
    } else {
        let f = n.as_f64().ok_or_else(|| unsupported_number(n))?;
        if !f.is_finite() {
            return Err(unsupported_number(n));
        }
        // Debug formatting is the shortest representation that round-trips
        // and always keeps a fraction or exponent.
        out.extend_from_slice(format!("{:?}", f).as_bytes());
    }
    Ok(())
}

fn unsupported_number(n: &Number) -> AppError {
    AppError::Canonicalization(format!("unsupported numeric value: {}", n))
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}
