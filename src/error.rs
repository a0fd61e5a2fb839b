// Copyright (c) 2015-2024 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Error objects and codes

use std::error;
use std::fmt;
use std::io;
use std::result;

use serde::de;

/// The detailed cause of a failure.
#[derive(Clone, PartialEq, Debug)]
pub enum ErrorCode {
    /// Opcode byte outside the recognized set
    Unsupported(char),
    /// EOF while parsing an opcode or its argument
    EOFWhileParsing,
    /// Stack underflowed
    StackUnderflow,
    /// Length prefix found negative
    NegativeLength,
    /// String decoding as UTF-8 failed
    StringNotUTF8,
    /// Wrong stack top type for opcode
    InvalidStackTop(&'static str, String),
    /// Value not hashable, but used as dict key or set item
    ValueNotHashable,
    /// A memo key was fetched before it was stored
    MissingMemo(u32),
    /// Invalid literal found
    InvalidLiteral(Vec<u8>),
    /// STOP executed with marks left on the stack
    UnmatchedMark,
    /// PERSID/BINPERSID found; persistent IDs cannot be resolved here
    UnsupportedPersistentId,
    /// REDUCE applied to a callable outside the whitelist
    Unreducible(String),
    /// A decode result was narrowed to the wrong type
    TypeMismatch(&'static str, String),
    /// Structure deserialization error (e.g., unknown variant)
    Structure(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ErrorCode::Unsupported(ch) => write!(fmt, "unsupported opcode {:?}", ch),
            ErrorCode::EOFWhileParsing => write!(fmt, "EOF while parsing"),
            ErrorCode::StackUnderflow => write!(fmt, "pickle stack underflow"),
            ErrorCode::NegativeLength => write!(fmt, "negative length prefix"),
            ErrorCode::StringNotUTF8 => write!(fmt, "string is not UTF-8 encoded"),
            ErrorCode::InvalidStackTop(what, ref it) =>
                write!(fmt, "invalid stack top, expected {}, got {}", what, it),
            ErrorCode::ValueNotHashable => write!(fmt, "dict key or set item not hashable"),
            ErrorCode::MissingMemo(n) => write!(fmt, "missing memo with id {}", n),
            ErrorCode::InvalidLiteral(ref l) =>
                write!(fmt, "literal is invalid: {}", String::from_utf8_lossy(l)),
            ErrorCode::UnmatchedMark => write!(fmt, "mark was not consumed before STOP"),
            ErrorCode::UnsupportedPersistentId =>
                write!(fmt, "persistent IDs are not supported"),
            ErrorCode::Unreducible(ref what) => write!(fmt, "cannot reduce via {}", what),
            ErrorCode::TypeMismatch(what, ref it) =>
                write!(fmt, "wrong root type, expected {}, got {}", what, it),
            ErrorCode::Structure(ref s) => fmt.write_str(s),
        }
    }
}

/// This type represents all possible errors that can occur when decoding a
/// pickle stream.
#[derive(Debug)]
pub enum Error {
    /// Some IO error occurred on the underlying byte source.
    Io(io::Error),
    /// The pickle machine failed; carries the opcode byte being executed
    /// and the byte offset at which decoding failed.
    Eval(ErrorCode, u8, usize),
    /// A failure outside the machine, e.g. while narrowing the root value.
    Syntax(ErrorCode),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref error) => error.fmt(fmt),
            Error::Eval(ref code, opcode, offset) =>
                write!(fmt, "eval error at offset {} (opcode {:?}): {}",
                       offset, opcode as char, code),
            Error::Syntax(ref code) => write!(fmt, "decoding error: {}", code),
        }
    }
}

impl error::Error for Error {}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}
