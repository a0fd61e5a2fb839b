// Copyright (c) 2015-2024 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Deserialization for Python's pickle format
//!
//! # Pickle format
//!
//! Please see the [Python docs](http://docs.python.org/library/pickle) for
//! details on the Pickle format.
//!
//! This crate reads pickle protocols 0, 1 and 2 — everything Python 2 can
//! produce, and the compatibility protocols of Python 3.  It is a decoder
//! only; there is no way to write pickles with it.
//!
//! # Supported types
//!
//! Pickle is very powerful.  It is capable of serializing pretty arbitrary
//! graphs of Python objects, with most custom classes being serialized out
//! of the box.  This crate only reconstructs Python's built-in types, which
//! map cleanly onto a language-neutral value:
//!
//! * None
//! * Booleans
//! * Integers (machine-sized, or bigints from num for longs)
//! * Floats
//! * Strings
//! * Byte buffers (from pickled `bytearray`s)
//! * Lists and tuples (the distinction is not kept)
//! * Sets and frozensets (ditto)
//! * Dictionaries, in insertion order
//!
//! Decoded containers preserve the reference sharing of the stream: a list
//! that the pickler memoized and referenced twice comes out as one shared
//! list, and mutating it through one handle is visible through the other.
//!
//! Reconstructing other classes would mean executing Python code.  The
//! interpreter instead whitelists the builtin `set`, `frozenset` and
//! `bytearray` constructors and refuses any other REDUCE with an error.
//!
//! # Unsupported features
//!
//! - Pickle protocols 3 and higher (bytes objects, framing, out-of-band
//!   buffers).
//! - Recursive objects using the `PERSID` and `EXT` type opcodes.
//! - Class instances and `BUILD` state application.
//!
//! # Exported API
//!
//! The `value_from_*` functions decode a stream into the [`Value`] exposed
//! by this library, which supports all the types above (notably long
//! integers and sets, which serde's generic types don't handle).  The
//! generic `from_*` functions go one step further and map the decoded value
//! onto any serde-deserializable Rust type.  The [`extract`] module narrows
//! a decode result to one concrete shape when the expected root type is
//! known up front.
//!
//! ```
//! let value = unpickle::value_from_slice(b"(lp0\nI1\naI2\naI3\na.").unwrap();
//! let items = unpickle::extract::list(Ok(value)).unwrap();
//! assert_eq!(items.len(), 3);
//! ```

pub use crate::de::{
    from_iter, from_reader, from_slice, value_from_iter, value_from_reader, value_from_slice,
};
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::value::{ClassRef, HashableValue, Value};
pub use crate::value_impls::from_value;

mod consts;
pub mod de;
pub mod error;
pub mod extract;
mod reduce;
pub mod value;
mod value_impls;

#[cfg(test)]
#[path = "../test/mod.rs"]
mod test;
