//! Helpers that narrow a decode result to one concrete shape.
//!
//! Each helper takes the `Result` of a decode call directly, so decode
//! errors pass through untouched and only a root of the wrong type
//! produces a new error:
//!
//! ```
//! use unpickle::{extract, value_from_slice};
//!
//! let n = extract::i64(value_from_slice(b"I42\n.")).unwrap();
//! assert_eq!(n, 42);
//! ```
//!
//! The numeric helpers coerce between the integer representations where
//! that is lossless; nothing else is converted.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::error::{Error, ErrorCode, Result};
use crate::value::{HashableValue, Value};

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T> {
    Err(Error::Syntax(ErrorCode::TypeMismatch(expected, value.type_name().to_owned())))
}

/// Narrows to a boolean.
pub fn boolean(result: Result<Value>) -> Result<bool> {
    match result? {
        Value::Bool(b) => Ok(b),
        other => mismatch("bool", &other),
    }
}

/// Narrows to a machine integer.  A big integer that fits is converted.
pub fn i64(result: Result<Value>) -> Result<i64> {
    match result? {
        Value::I64(i) => Ok(i),
        Value::Int(bi) => match bi.to_i64() {
            Some(i) => Ok(i),
            None => mismatch("int in i64 range", &Value::Int(bi)),
        },
        other => mismatch("int", &other),
    }
}

/// Narrows to a big integer.  A machine integer is widened.
pub fn big_int(result: Result<Value>) -> Result<BigInt> {
    match result? {
        Value::Int(bi) => Ok(bi),
        Value::I64(i) => Ok(BigInt::from(i)),
        other => mismatch("long", &other),
    }
}

/// Narrows to a float.  A machine integer is converted.
pub fn f64(result: Result<Value>) -> Result<f64> {
    match result? {
        Value::F64(f) => Ok(f),
        Value::I64(i) => Ok(i as f64),
        other => mismatch("float", &other),
    }
}

/// Narrows to a string.
pub fn string(result: Result<Value>) -> Result<String> {
    match result? {
        Value::String(s) => Ok(s),
        other => mismatch("str", &other),
    }
}

/// Narrows to a byte buffer.
pub fn bytes(result: Result<Value>) -> Result<Vec<u8>> {
    match result? {
        Value::Bytes(b) => Ok(b),
        other => mismatch("bytearray", &other),
    }
}

/// Narrows to a list or tuple.
pub fn list(result: Result<Value>) -> Result<Vec<Value>> {
    match result? {
        Value::List(items) => Ok(items.borrow().clone()),
        other => mismatch("list", &other),
    }
}

/// Narrows to a dict, in insertion order.
pub fn dict(result: Result<Value>) -> Result<IndexMap<HashableValue, Value>> {
    match result? {
        Value::Dict(entries) => Ok(entries.borrow().clone()),
        other => mismatch("dict", &other),
    }
}

/// Narrows to a set.
pub fn set(result: Result<Value>) -> Result<BTreeSet<HashableValue>> {
    match result? {
        Value::Set(items) => Ok(items.borrow().clone()),
        other => mismatch("set", &other),
    }
}
