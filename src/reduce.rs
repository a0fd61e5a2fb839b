//! The REDUCE whitelist.
//!
//! REDUCE applies a class reference to an argument tuple.  Reconstructing
//! arbitrary Python classes would mean running Python code, so only the
//! handful of builtins whose reconstruction is pure data manipulation are
//! registered here; every other callable is refused with
//! `ErrorCode::Unreducible`.

use std::collections::BTreeSet;

use crate::error::ErrorCode;
use crate::value::Value;

type Handler = fn(Vec<Value>) -> Result<Value, ErrorCode>;

/// The callables REDUCE is allowed to apply, under both the Python 2 and
/// Python 3 module spellings.
static REGISTRY: &[(&str, &str, Handler)] = &[
    ("__builtin__", "set", build_set),
    ("__builtin__", "frozenset", build_set),
    ("__builtin__", "bytearray", build_bytearray),
    ("builtins", "set", build_set),
    ("builtins", "frozenset", build_set),
    ("builtins", "bytearray", build_bytearray),
];

pub fn apply(module: &str, name: &str, args: Vec<Value>) -> Result<Value, ErrorCode> {
    for &(mod_, name_, handler) in REGISTRY {
        if mod_ == module && name_ == name {
            return handler(args);
        }
    }
    Err(ErrorCode::Unreducible(format!("{}.{}", module, name)))
}

/// `set(iterable)` and `frozenset(iterable)`: a one-tuple holding a
/// sequence of hashable items.  Frozenness is not preserved.
fn build_set(mut args: Vec<Value>) -> Result<Value, ErrorCode> {
    let arity = args.len();
    match args.pop() {
        Some(Value::List(items)) if arity == 1 => {
            let mut set = BTreeSet::new();
            for item in items.borrow().iter() {
                match item.clone().to_hashable() {
                    Some(item) => { set.insert(item); }
                    None => return Err(ErrorCode::ValueNotHashable),
                }
            }
            Ok(Value::set(set))
        }
        Some(other) if arity == 1 =>
            Err(ErrorCode::InvalidStackTop("sequence of set items",
                                           other.type_name().into())),
        _ => Err(ErrorCode::InvalidStackTop("1-tuple of set() arguments",
                                            format!("{}-tuple", arity))),
    }
}

/// `bytearray(text, encoding)`: the encoder spells the buffer as a latin-1
/// string, so the code points map back to bytes one to one.
fn build_bytearray(mut args: Vec<Value>) -> Result<Value, ErrorCode> {
    let arity = args.len();
    let encoding = args.pop();
    let text = args.pop();
    match (text, encoding) {
        (Some(Value::String(text)), Some(Value::String(encoding))) if arity == 2 => {
            if encoding != "latin-1" {
                return Err(ErrorCode::InvalidLiteral(encoding.into_bytes()));
            }
            if let Some(ch) = text.chars().find(|&ch| ch as u32 > 0xff) {
                let escape = format!("\\u{:04x}", ch as u32);
                return Err(ErrorCode::InvalidLiteral(escape.into_bytes()));
            }
            Ok(Value::Bytes(text.chars().map(|ch| ch as u8).collect()))
        }
        (Some(text), Some(encoding)) if arity == 2 =>
            Err(ErrorCode::InvalidStackTop("bytearray text and encoding",
                                           format!("{}, {}", text.type_name(),
                                                   encoding.type_name()))),
        _ => Err(ErrorCode::InvalidStackTop("2-tuple of bytearray() arguments",
                                            format!("{}-tuple", arity))),
    }
}
