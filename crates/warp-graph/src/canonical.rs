// SPDX-License-Identifier: Apache-2.0
//! Deterministic CBOR encoder/decoder for content addressing.
//!
//! Every content-addressed artifact in the engine (patch blobs, state
//! serializations, BTR bodies, seek-cache entries) goes through this codec.
//! Enforced canonical form:
//!
//! - Definite lengths only (no break/indefinite)
//! - No tags
//! - Canonical integer widths (shortest)
//! - Floats encoded with the smallest width that round-trips (f32, else f64)
//! - Map keys sorted: text keys lexicographically by UTF-8 bytes, any
//!   non-text keys after them by encoded bytes; no duplicates
//! - `encode(decode(x)) == encode(x)` byte-for-byte
//!
//! The decoder is strict: it rejects every deviation the encoder cannot
//! produce, so any bytes that decode are already in canonical form.

// Width-dispatched CBOR heads truncate intentionally: write_major has already
// matched on the value's range before any narrowing cast.
#![allow(clippy::cast_possible_truncation)]

use ciborium::value::Value;
use thiserror::Error;

/// Errors raised by the canonical codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended mid-value.
    #[error("incomplete input")]
    Incomplete,
    /// Bytes remained after the top-level value.
    #[error("trailing bytes after value")]
    Trailing,
    /// Tags are not part of the canonical subset.
    #[error("tags not allowed")]
    Tag,
    /// Indefinite lengths are not part of the canonical subset.
    #[error("indefinite length not allowed")]
    Indefinite,
    /// An integer was encoded wider than necessary.
    #[error("non-canonical integer width")]
    NonCanonicalInt,
    /// A float was encoded wider than necessary.
    #[error("non-canonical float width")]
    NonCanonicalFloat,
    /// An integer is outside the range CBOR major types 0/1 can carry.
    #[error("integer out of encodable range")]
    IntRange,
    /// Map keys were not in canonical order.
    #[error("map keys not in canonical order")]
    MapKeyOrder,
    /// A map carried the same key twice.
    #[error("duplicate map key")]
    MapKeyDuplicate,
    /// Malformed input that fits no other category.
    #[error("decode error: {0}")]
    Decode(String),
}

type Result<T> = std::result::Result<T, CodecError>;

/// Encodes `val` into canonical CBOR bytes.
///
/// Input maps may carry keys in any order; the encoder normalizes recursively
/// (sorted keys at every depth, sequences preserved).
pub fn encode_value(val: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    enc_value(val, &mut out)?;
    Ok(out)
}

/// Decodes canonical CBOR bytes into a [`Value`].
///
/// Rejects any non-canonical encoding, so `encode_value(&decode_value(b)?)`
/// reproduces `b` exactly.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut idx = 0usize;
    let v = dec_value(bytes, &mut idx)?;
    if idx != bytes.len() {
        return Err(CodecError::Trailing);
    }
    Ok(v)
}

// --- Encoder --------------------------------------------------------------

// Sort position of a map key: text keys first, ordered by their UTF-8 bytes
// (plain lexicographic order), then any non-text keys by encoded bytes.
fn key_rank(key: &Value, encoded: &[u8]) -> (u8, Vec<u8>) {
    match key {
        Value::Text(s) => (0, s.as_bytes().to_vec()),
        _ => (1, encoded.to_vec()),
    }
}

fn enc_value(v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Bool(b) => out.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => out.push(0xf6),
        Value::Integer(n) => enc_int(i128::from(*n), out)?,
        Value::Float(f) => enc_float(*f, out),
        Value::Text(s) => {
            write_major(3, s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            write_major(2, b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            write_major(4, items.len() as u64, out);
            for it in items {
                enc_value(it, out)?;
            }
        }
        Value::Map(map) => {
            let mut entries: Vec<((u8, Vec<u8>), Vec<u8>, &Value)> = Vec::with_capacity(map.len());
            for (k, val) in map {
                let mut kb = Vec::new();
                enc_value(k, &mut kb)?;
                entries.push((key_rank(k, &kb), kb, val));
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for win in entries.windows(2) {
                if win[0].1 == win[1].1 {
                    return Err(CodecError::MapKeyDuplicate);
                }
            }
            write_major(5, entries.len() as u64, out);
            for (_rank, kb, val) in entries {
                out.extend_from_slice(&kb);
                enc_value(val, out)?;
            }
        }
        Value::Tag(_, _) => return Err(CodecError::Tag),
        other => return Err(CodecError::Decode(format!("unsupported value: {other:?}"))),
    }
    Ok(())
}

fn enc_int(n: i128, out: &mut Vec<u8>) -> Result<()> {
    if n >= 0 {
        let m = u64::try_from(n).map_err(|_| CodecError::IntRange)?;
        write_major(0, m, out);
    } else {
        // CBOR negative: major 1 carries -1 - n.
        let m = u64::try_from(-1 - n).map_err(|_| CodecError::IntRange)?;
        write_major(1, m, out);
    }
    Ok(())
}

fn enc_float(f: f64, out: &mut Vec<u8>) {
    if f.is_nan() {
        // Canonical NaN: the f64 quiet NaN payload.
        out.push(0xfb);
        out.extend_from_slice(&f64::NAN.to_be_bytes());
        return;
    }
    let narrowed = f as f32;
    if f64::from(narrowed) == f {
        out.push(0xfa);
        out.extend_from_slice(&narrowed.to_be_bytes());
    } else {
        out.push(0xfb);
        out.extend_from_slice(&f.to_be_bytes());
    }
}

fn write_major(major: u8, n: u64, out: &mut Vec<u8>) {
    debug_assert!(major <= 7);
    match n {
        0..=23 => out.push((major << 5) | n as u8),
        24..=0xff => {
            out.push((major << 5) | 24);
            out.push(n as u8);
        }
        0x100..=0xffff => {
            out.push((major << 5) | 25);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push((major << 5) | 26);
            out.extend_from_slice(&(n as u32).to_be_bytes());
        }
        _ => {
            out.push((major << 5) | 27);
            out.extend_from_slice(&n.to_be_bytes());
        }
    }
}

// --- Decoder --------------------------------------------------------------

fn dec_value(bytes: &[u8], idx: &mut usize) -> Result<Value> {
    let Some(&b0) = bytes.get(*idx) else {
        return Err(CodecError::Incomplete);
    };
    *idx += 1;
    let major = b0 >> 5;
    let ai = b0 & 0x1f;

    if major == 6 {
        return Err(CodecError::Tag);
    }
    if ai == 31 {
        return Err(CodecError::Indefinite);
    }

    let n = match ai {
        0..=23 => u64::from(ai),
        24 => take_u(bytes, idx, 1)?,
        25 => take_u(bytes, idx, 2)?,
        26 => take_u(bytes, idx, 4)?,
        27 => take_u(bytes, idx, 8)?,
        _ => return Err(CodecError::Decode("invalid additional info".into())),
    };

    match major {
        0 => {
            check_min_int(ai, n)?;
            Ok(Value::Integer(n.into()))
        }
        1 => {
            check_min_int(ai, n)?;
            let v = -1i128 - i128::from(n);
            ciborium::value::Integer::try_from(v)
                .map(Value::Integer)
                .map_err(|_| CodecError::IntRange)
        }
        2 => {
            let chunk = take_slice(bytes, idx, n)?;
            Ok(Value::Bytes(chunk.to_vec()))
        }
        3 => {
            let chunk = take_slice(bytes, idx, n)?;
            let s = std::str::from_utf8(chunk)
                .map_err(|e| CodecError::Decode(e.to_string()))?
                .to_owned();
            Ok(Value::Text(s))
        }
        4 => {
            let len = usize::try_from(n).map_err(|_| CodecError::Incomplete)?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(dec_value(bytes, idx)?);
            }
            Ok(Value::Array(items))
        }
        5 => {
            let len = usize::try_from(n).map_err(|_| CodecError::Incomplete)?;
            let mut entries: Vec<(Value, Value)> = Vec::new();
            let mut prev_rank: Option<(u8, Vec<u8>)> = None;
            for _ in 0..len {
                let key_start = *idx;
                let key = dec_value(bytes, idx)?;
                let key_bytes = &bytes[key_start..*idx];
                let rank = key_rank(&key, key_bytes);
                if let Some(prev) = &prev_rank {
                    match prev.cmp(&rank) {
                        std::cmp::Ordering::Less => {}
                        std::cmp::Ordering::Equal => return Err(CodecError::MapKeyDuplicate),
                        std::cmp::Ordering::Greater => return Err(CodecError::MapKeyOrder),
                    }
                }
                prev_rank = Some(rank);
                let val = dec_value(bytes, idx)?;
                entries.push((key, val));
            }
            Ok(Value::Map(entries))
        }
        7 => match ai {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Err(CodecError::Decode("undefined not supported".into())),
            24 => Err(CodecError::Decode("simple value not supported".into())),
            25 => Err(CodecError::NonCanonicalFloat),
            26 => {
                let f = f64::from(f32::from_bits(n as u32));
                // Canonical NaN is the f64 encoding; every finite or
                // infinite value that fits f32 exactly is canonical here.
                if f.is_nan() {
                    return Err(CodecError::NonCanonicalFloat);
                }
                Ok(Value::Float(f))
            }
            27 => {
                let f = f64::from_bits(n);
                if !f.is_nan() && f64::from(f as f32) == f {
                    return Err(CodecError::NonCanonicalFloat);
                }
                Ok(Value::Float(f))
            }
            _ => Err(CodecError::Decode("unknown simple/float".into())),
        },
        _ => Err(CodecError::Decode("unknown major".into())),
    }
}

fn take_u(bytes: &[u8], idx: &mut usize, len: usize) -> Result<u64> {
    let end = idx.checked_add(len).ok_or(CodecError::Incomplete)?;
    if end > bytes.len() {
        return Err(CodecError::Incomplete);
    }
    let mut buf = [0u8; 8];
    buf[8 - len..].copy_from_slice(&bytes[*idx..end]);
    *idx = end;
    Ok(u64::from_be_bytes(buf))
}

fn take_slice<'a>(bytes: &'a [u8], idx: &mut usize, n: u64) -> Result<&'a [u8]> {
    let len = usize::try_from(n).map_err(|_| CodecError::Incomplete)?;
    let end = idx.checked_add(len).ok_or(CodecError::Incomplete)?;
    if end > bytes.len() {
        return Err(CodecError::Incomplete);
    }
    let chunk = &bytes[*idx..end];
    *idx = end;
    Ok(chunk)
}

fn check_min_int(ai: u8, n: u64) -> Result<()> {
    let min_ok = match ai {
        0..=23 => true,
        24 => n >= 24,
        25 => n > 0xff,
        26 => n > 0xffff,
        27 => n > 0xffff_ffff,
        _ => false,
    };
    if min_ok {
        Ok(())
    } else {
        Err(CodecError::NonCanonicalInt)
    }
}

// --- Convenience constructors --------------------------------------------

/// Builds a text-keyed map value from `(key, value)` pairs.
///
/// Order of the input does not matter; the encoder normalizes.
#[must_use]
pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_owned()), v))
            .collect(),
    )
}

/// Looks up a text key in a map value.
#[must_use]
pub fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let Value::Map(entries) = value else {
        return None;
    };
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(s) if s == key => Some(v),
        _ => None,
    })
}
