// SPDX-License-Identifier: Apache-2.0
//! Shared helpers for reading canonical [`Value`] trees.
//!
//! Wire objects (patches, states, BTRs, seek-cache entries) are hand-mapped
//! to and from `ciborium` values so field names and shapes stay under the
//! crate's control. These helpers centralize the "expect this shape" checks.

use ciborium::value::Value;

use crate::canonical::{map_get, CodecError};

pub(crate) fn bad(what: &str) -> CodecError {
    CodecError::Decode(format!("malformed wire object: {what}"))
}

pub(crate) fn get<'a>(value: &'a Value, key: &str) -> Result<&'a Value, CodecError> {
    map_get(value, key).ok_or_else(|| bad(&format!("missing field {key:?}")))
}

pub(crate) fn get_text<'a>(value: &'a Value, key: &str) -> Result<&'a str, CodecError> {
    match get(value, key)? {
        Value::Text(s) => Ok(s),
        _ => Err(bad(&format!("field {key:?} must be text"))),
    }
}

pub(crate) fn get_u64(value: &Value, key: &str) -> Result<u64, CodecError> {
    match get(value, key)? {
        Value::Integer(n) => {
            u64::try_from(i128::from(*n)).map_err(|_| bad(&format!("field {key:?} out of range")))
        }
        _ => Err(bad(&format!("field {key:?} must be an integer"))),
    }
}

pub(crate) fn get_array<'a>(value: &'a Value, key: &str) -> Result<&'a [Value], CodecError> {
    match get(value, key)? {
        Value::Array(items) => Ok(items),
        _ => Err(bad(&format!("field {key:?} must be an array"))),
    }
}

pub(crate) fn get_map_entries<'a>(
    value: &'a Value,
    key: &str,
) -> Result<&'a [(Value, Value)], CodecError> {
    match get(value, key)? {
        Value::Map(entries) => Ok(entries),
        _ => Err(bad(&format!("field {key:?} must be a map"))),
    }
}

pub(crate) fn as_text<'a>(value: &'a Value, what: &str) -> Result<&'a str, CodecError> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(bad(&format!("{what} must be text"))),
    }
}

pub(crate) fn as_u64(value: &Value, what: &str) -> Result<u64, CodecError> {
    match value {
        Value::Integer(n) => {
            u64::try_from(i128::from(*n)).map_err(|_| bad(&format!("{what} out of range")))
        }
        _ => Err(bad(&format!("{what} must be an integer"))),
    }
}

pub(crate) fn get_bytes<'a>(value: &'a Value, key: &str) -> Result<&'a [u8], CodecError> {
    match get(value, key)? {
        Value::Bytes(b) => Ok(b),
        _ => Err(bad(&format!("field {key:?} must be bytes"))),
    }
}
