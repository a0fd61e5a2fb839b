//! # Pickle deserialization
//!
//! Note: Pickles are not a declarative format, but a program for a stack-based
//! VM.  Each value that is decoded is simply put on the stack, and some
//! operations pop items from the stack and construct new data with them.
//!
//! The interpreter below runs one such program until its STOP opcode and
//! hands back the value STOP pops.  Containers live behind shared handles
//! (see `value`), so a memo fetch aliases the stored container instead of
//! copying it, and the in-place mutation opcodes are visible through every
//! alias, as they are in Python.

use std::cell::RefCell;
use std::char;
use std::collections::BTreeMap;
use std::io;
use std::rc::Rc;
use std::str;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};
use serde::de;

use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};
use crate::reduce;
use crate::value::{ClassRef, HashableValue, Value};
use crate::value_impls::from_value;

/// Wraps the byte source, tracking the offset for error reporting.
struct ByteReader<Iter: Iterator<Item = io::Result<u8>>> {
    rdr: Iter,
    pos: usize,
}

impl<Iter: Iterator<Item = io::Result<u8>>> Iterator for ByteReader<Iter> {
    type Item = io::Result<u8>;
    fn next(&mut self) -> Option<io::Result<u8>> {
        self.pos += 1;
        self.rdr.next()
    }
}

impl<Iter: Iterator<Item = io::Result<u8>>> ByteReader<Iter> {
    fn new(rdr: Iter) -> ByteReader<Iter> {
        ByteReader { rdr, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }
}

/// The pickle virtual machine: stack, memo and dispatch loop.
struct PickleMachine<Iter: Iterator<Item = io::Result<u8>>> {
    rdr: ByteReader<Iter>,
    stack: Vec<Value>,
    memo: BTreeMap<u32, Value>,
    op: u8,
}

impl<Iter> PickleMachine<Iter>
where
    Iter: Iterator<Item = io::Result<u8>>,
{
    fn new(rdr: Iter) -> PickleMachine<Iter> {
        PickleMachine {
            rdr: ByteReader::new(rdr),
            stack: Vec::with_capacity(128),
            memo: BTreeMap::new(),
            op: 0,
        }
    }

    fn parse(&mut self) -> Result<Value> {
        loop {
            self.op = self.read_byte()?;
            match self.op {
                // Specials
                STOP => {
                    let value = self.pop()?;
                    if matches!(value, Value::Mark)
                        || self.stack.iter().any(|v| matches!(v, Value::Mark))
                    {
                        return self.error(ErrorCode::UnmatchedMark);
                    }
                    return Ok(value);
                }
                MARK => self.stack.push(Value::Mark),
                POP => { self.pop()?; }
                POP_MARK => { self.pop_mark()?; }
                DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }
                PROTO => {
                    // Advisory only; opcodes are recognized inline.
                    self.read_byte()?;
                }

                // Memo ops
                PUT => {
                    let key = self.read_decimal_key()?;
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                BINPUT => {
                    let key = self.read_byte()? as u32;
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                LONG_BINPUT => {
                    let bytes = self.read_bytes(4)?;
                    let key = LittleEndian::read_u32(&bytes);
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                GET => {
                    let key = self.read_decimal_key()?;
                    self.push_memo(key)?;
                }
                BINGET => {
                    let key = self.read_byte()? as u32;
                    self.push_memo(key)?;
                }
                LONG_BINGET => {
                    let bytes = self.read_bytes(4)?;
                    let key = LittleEndian::read_u32(&bytes);
                    self.push_memo(key)?;
                }

                // Singletons
                NONE => self.stack.push(Value::None),
                NEWFALSE => self.stack.push(Value::Bool(false)),
                NEWTRUE => self.stack.push(Value::Bool(true)),

                // ASCII-formatted numbers
                INT => {
                    let line = self.read_line()?;
                    // Protocol 0 way of spelling false/true
                    if line == b"00" {
                        self.stack.push(Value::Bool(false));
                    } else if line == b"01" {
                        self.stack.push(Value::Bool(true));
                    } else {
                        match str::from_utf8(&line).unwrap_or("").parse::<i64>() {
                            Ok(i) => self.stack.push(Value::I64(i)),
                            Err(_) => return self.error(ErrorCode::InvalidLiteral(line)),
                        }
                    }
                }
                LONG => {
                    let mut line = self.read_line()?;
                    // Remove "L" suffix.
                    if line.last() == Some(&b'L') {
                        line.pop();
                    }
                    match BigInt::parse_bytes(&line, 10) {
                        Some(i) => self.stack.push(Value::Int(i)),
                        None => return self.error(ErrorCode::InvalidLiteral(line)),
                    }
                }
                FLOAT => {
                    let line = self.read_line()?;
                    match str::from_utf8(&line).unwrap_or("").parse::<f64>() {
                        Ok(f) => self.stack.push(Value::F64(f)),
                        Err(_) => return self.error(ErrorCode::InvalidLiteral(line)),
                    }
                }

                // Until-EOL strings
                STRING => {
                    let line = self.read_line()?;
                    let string = self.decode_escaped_string(&line)?;
                    self.stack.push(string);
                }
                UNICODE => {
                    let line = self.read_line()?;
                    let string = self.decode_escaped_unicode(&line)?;
                    self.stack.push(string);
                }

                // Binary-coded numbers
                BINFLOAT => {
                    let bytes = self.read_bytes(8)?;
                    self.stack.push(Value::F64(BigEndian::read_f64(&bytes)));
                }
                BININT => {
                    let bytes = self.read_bytes(4)?;
                    self.stack.push(Value::I64(LittleEndian::read_i32(&bytes) as i64));
                }
                BININT1 => {
                    let byte = self.read_byte()?;
                    self.stack.push(Value::I64(byte as i64));
                }
                BININT2 => {
                    let bytes = self.read_bytes(2)?;
                    self.stack.push(Value::I64(LittleEndian::read_u16(&bytes) as i64));
                }

                // Length-prefixed longs
                LONG1 => {
                    let bytes = self.read_u8_prefixed_bytes()?;
                    let long = decode_long(bytes);
                    self.stack.push(long);
                }
                LONG4 => {
                    let bytes = self.read_i32_prefixed_bytes()?;
                    let long = decode_long(bytes);
                    self.stack.push(long);
                }

                // Length-prefixed strings
                SHORT_BINSTRING => {
                    let string = self.read_u8_prefixed_bytes()?;
                    self.stack.push(decode_string(string));
                }
                BINSTRING => {
                    let string = self.read_i32_prefixed_bytes()?;
                    self.stack.push(decode_string(string));
                }
                BINUNICODE => {
                    let string = self.read_u32_prefixed_bytes()?;
                    let decoded = self.decode_unicode(string)?;
                    self.stack.push(decoded);
                }

                // Containers
                EMPTY_TUPLE => self.stack.push(Value::list(vec![])),
                TUPLE1 => {
                    let item = self.pop()?;
                    self.stack.push(Value::list(vec![item]));
                }
                TUPLE2 => {
                    let item2 = self.pop()?;
                    let item1 = self.pop()?;
                    self.stack.push(Value::list(vec![item1, item2]));
                }
                TUPLE3 => {
                    let item3 = self.pop()?;
                    let item2 = self.pop()?;
                    let item1 = self.pop()?;
                    self.stack.push(Value::list(vec![item1, item2, item3]));
                }
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::list(items));
                }
                EMPTY_LIST => self.stack.push(Value::list(vec![])),
                LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::list(items));
                }
                APPEND => {
                    let value = self.pop()?;
                    let list = self.top_list()?;
                    list.borrow_mut().push(value);
                }
                APPENDS => {
                    let items = self.pop_mark()?;
                    let list = self.top_list()?;
                    list.borrow_mut().extend(items);
                }
                EMPTY_DICT => self.stack.push(Value::dict(IndexMap::new())),
                DICT => {
                    let items = self.pop_mark()?;
                    let mut dict = IndexMap::with_capacity(items.len() / 2);
                    self.insert_pairs(&mut dict, items)?;
                    self.stack.push(Value::dict(dict));
                }
                SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let dict = self.top_dict()?;
                    let key = self.make_hashable(key)?;
                    dict.borrow_mut().insert(key, value);
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let dict = self.top_dict()?;
                    let mut dict = dict.borrow_mut();
                    self.insert_pairs(&mut dict, items)?;
                }

                // Class references and the reduction whitelist
                GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    let global = self.make_global(module, name)?;
                    self.stack.push(global);
                }
                REDUCE => {
                    let args = self.pop()?;
                    let reduced = match self.pop()? {
                        Value::Global(class) => match args {
                            Value::List(items) => {
                                let args = items.borrow().clone();
                                reduce::apply(&class.module, &class.name, args)
                            }
                            other => Err(ErrorCode::InvalidStackTop(
                                "argument tuple",
                                other.type_name().to_owned(),
                            )),
                        },
                        other => Err(ErrorCode::Unreducible(other.type_name().to_owned())),
                    };
                    match reduced {
                        Ok(value) => self.stack.push(value),
                        Err(code) => return self.error(code),
                    }
                }
                BUILD => {
                    // State application is only meaningful right after a
                    // whitelisted reduction, where the reconstructed object
                    // already carries its state.
                    self.pop()?;
                    match *self.top()? {
                        Value::Set(_) | Value::Bytes(_) => {}
                        _ => return self.error(ErrorCode::Unsupported(BUILD as char)),
                    }
                }

                // Persistent IDs cannot be resolved without the pickler's
                // object store.
                PERSID => {
                    self.read_line()?;
                    return self.error(ErrorCode::UnsupportedPersistentId);
                }
                BINPERSID => {
                    self.pop()?;
                    return self.error(ErrorCode::UnsupportedPersistentId);
                }

                code => return self.error(ErrorCode::Unsupported(code as char)),
            }
        }
    }

    fn pop(&mut self) -> Result<Value> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => self.error(ErrorCode::StackUnderflow),
        }
    }

    fn top(&mut self) -> Result<&mut Value> {
        if self.stack.is_empty() {
            return self.error(ErrorCode::StackUnderflow);
        }
        Ok(self.stack.last_mut().unwrap())
    }

    /// Pops everything above the topmost mark, which is consumed as well.
    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        match self.stack.iter().rposition(|v| matches!(v, Value::Mark)) {
            Some(at) => {
                let items = self.stack.split_off(at + 1);
                self.stack.pop();
                Ok(items)
            }
            None => self.error(ErrorCode::StackUnderflow),
        }
    }

    fn top_list(&mut self) -> Result<Rc<RefCell<Vec<Value>>>> {
        match *self.top()? {
            Value::List(ref list) => Ok(list.clone()),
            ref other => {
                let found = other.type_name().to_owned();
                self.error(ErrorCode::InvalidStackTop("list", found))
            }
        }
    }

    fn top_dict(&mut self) -> Result<Rc<RefCell<IndexMap<HashableValue, Value>>>> {
        match *self.top()? {
            Value::Dict(ref dict) => Ok(dict.clone()),
            ref other => {
                let found = other.type_name().to_owned();
                self.error(ErrorCode::InvalidStackTop("dict", found))
            }
        }
    }

    fn push_memo(&mut self, key: u32) -> Result<()> {
        match self.memo.get(&key) {
            Some(value) => {
                let value = value.clone();
                self.stack.push(value);
                Ok(())
            }
            None => self.error(ErrorCode::MissingMemo(key)),
        }
    }

    fn insert_pairs(
        &self,
        dict: &mut IndexMap<HashableValue, Value>,
        items: Vec<Value>,
    ) -> Result<()> {
        if items.len() % 2 != 0 {
            return self.error(ErrorCode::InvalidStackTop(
                "key-value pairs",
                format!("{} stacked items", items.len()),
            ));
        }
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            dict.insert(self.make_hashable(key)?, value);
        }
        Ok(())
    }

    fn make_hashable(&self, value: Value) -> Result<HashableValue> {
        match value.to_hashable() {
            Some(value) => Ok(value),
            None => self.error(ErrorCode::ValueNotHashable),
        }
    }

    fn make_global(&self, module: Vec<u8>, name: Vec<u8>) -> Result<Value> {
        match (String::from_utf8(module), String::from_utf8(name)) {
            (Ok(module), Ok(name)) =>
                Ok(Value::Global(Box::new(ClassRef { module, name }))),
            _ => self.error(ErrorCode::StringNotUTF8),
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        match self.rdr.next() {
            Some(Ok(byte)) => Ok(byte),
            Some(Err(err)) => Err(Error::Io(err)),
            None => self.error(ErrorCode::EOFWhileParsing),
        }
    }

    /// Reads bytes up to and excluding the next newline, which is consumed.
    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(16);
        loop {
            match self.read_byte()? {
                b'\n' => return Ok(result),
                byte => result.push(byte),
            }
        }
    }

    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        (0..n).map(|_| self.read_byte()).collect()
    }

    fn read_u8_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let lenbyte = self.read_byte()?;
        self.read_bytes(lenbyte as u64)
    }

    fn read_i32_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let lenbytes = self.read_bytes(4)?;
        match LittleEndian::read_i32(&lenbytes) {
            0 => Ok(vec![]),
            l if l < 0 => self.error(ErrorCode::NegativeLength),
            l => self.read_bytes(l as u64),
        }
    }

    fn read_u32_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let lenbytes = self.read_bytes(4)?;
        self.read_bytes(LittleEndian::read_u32(&lenbytes) as u64)
    }

    /// Reads a `\n`-terminated decimal memo key.
    fn read_decimal_key(&mut self) -> Result<u32> {
        let line = self.read_line()?;
        match str::from_utf8(&line).unwrap_or("").parse::<u32>() {
            Ok(key) => Ok(key),
            Err(_) => self.error(ErrorCode::InvalidLiteral(line)),
        }
    }

    /// Decodes the quoted, escaped string of the STRING opcode.
    fn decode_escaped_string(&self, s: &[u8]) -> Result<Value> {
        if s.len() < 2 || s[0] != s[s.len() - 1] || (s[0] != b'"' && s[0] != b'\'') {
            return self.error(ErrorCode::InvalidLiteral(s.into()));
        }
        let s = &s[1..s.len() - 1];
        let mut result = String::with_capacity(s.len());
        let mut run = Vec::with_capacity(s.len());
        let mut iter = s.iter();
        while let Some(&b) = iter.next() {
            match b {
                b'\\' => match iter.next() {
                    Some(&b'\\') => run.push(b'\\'),
                    Some(&b'\'') => run.push(b'\''),
                    Some(&b'"') => run.push(b'"'),
                    Some(&b'a') => run.push(b'\x07'),
                    Some(&b'b') => run.push(b'\x08'),
                    Some(&b't') => run.push(b'\x09'),
                    Some(&b'n') => run.push(b'\x0a'),
                    Some(&b'v') => run.push(b'\x0b'),
                    Some(&b'f') => run.push(b'\x0c'),
                    Some(&b'r') => run.push(b'\x0d'),
                    Some(&b'x') => {
                        let accum = self.parse_hex_escape(&mut iter, 2, s)?;
                        run.push(accum as u8);
                    }
                    Some(&b'u') => {
                        let accum = self.parse_hex_escape(&mut iter, 4, s)?;
                        flush_raw_run(&mut result, &mut run);
                        match char::from_u32(accum) {
                            Some(ch) => result.push(ch),
                            None => return self.error(ErrorCode::InvalidLiteral(s.into())),
                        }
                    }
                    _ => return self.error(ErrorCode::InvalidLiteral(s.into())),
                },
                _ => run.push(b),
            }
        }
        flush_raw_run(&mut result, &mut run);
        Ok(Value::String(result))
    }

    /// Decodes the raw-unicode-escape encoded line of the UNICODE opcode:
    /// only the \uXXXX and \UXXXXXXXX escapes exist, and the encoder
    /// escapes every backslash, so a bare one is malformed.
    fn decode_escaped_unicode(&self, s: &[u8]) -> Result<Value> {
        let mut result = String::with_capacity(s.len());
        let mut run = Vec::with_capacity(s.len());
        let mut iter = s.iter();
        while let Some(&b) = iter.next() {
            if b == b'\\' {
                let nescape = match iter.next() {
                    Some(&b'u') => 4,
                    Some(&b'U') => 8,
                    _ => return self.error(ErrorCode::InvalidLiteral(s.into())),
                };
                let accum = self.parse_hex_escape(&mut iter, nescape, s)?;
                flush_raw_run(&mut result, &mut run);
                match char::from_u32(accum) {
                    Some(ch) => result.push(ch),
                    None => return self.error(ErrorCode::InvalidLiteral(s.into())),
                }
            } else {
                run.push(b);
            }
        }
        flush_raw_run(&mut result, &mut run);
        Ok(Value::String(result))
    }

    fn parse_hex_escape<'a, I>(&self, iter: &mut I, nhex: u32, context: &[u8]) -> Result<u32>
    where
        I: Iterator<Item = &'a u8>,
    {
        let mut accum = 0;
        for _ in 0..nhex {
            accum *= 16;
            match iter.next().and_then(|&ch| (ch as char).to_digit(16)) {
                Some(v) => accum += v,
                None => return self.error(ErrorCode::InvalidLiteral(context.into())),
            }
        }
        Ok(accum)
    }

    fn decode_unicode(&self, string: Vec<u8>) -> Result<Value> {
        match String::from_utf8(string) {
            Ok(v) => Ok(Value::String(v)),
            Err(_) => self.error(ErrorCode::StringNotUTF8),
        }
    }

    fn error<T>(&self, reason: ErrorCode) -> Result<T> {
        Err(Error::Eval(reason, self.op, self.rdr.pos()))
    }
}

/// Appends an unescaped byte run to the result.  Runs are usually UTF-8;
/// pre-Unicode encoders spell Latin-1 text as bare high bytes, so fall
/// back to one char per byte when the run does not validate.
fn flush_raw_run(result: &mut String, run: &mut Vec<u8>) {
    if run.is_empty() {
        return;
    }
    match str::from_utf8(run) {
        Ok(s) => result.push_str(s),
        Err(_) => result.extend(run.iter().map(|&b| b as char)),
    }
    run.clear();
}

/// Decodes a protocol-2 string payload, with the same Latin-1 fallback as
/// unescaped line runs.
fn decode_string(string: Vec<u8>) -> Value {
    match String::from_utf8(string) {
        Ok(s) => Value::String(s),
        Err(err) => Value::String(err.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

/// Decodes a little-endian two's-complement integer of arbitrary width.
fn decode_long(bytes: Vec<u8>) -> Value {
    // BigInt::from_bytes_le doesn't like a sign bit in the bytes, therefore
    // we have to extract that ourselves and do the two's complement.
    let negative = !bytes.is_empty() && (bytes[bytes.len() - 1] & 0x80 != 0);
    let mut val = BigInt::from_bytes_le(Sign::Plus, &bytes);
    if negative {
        val -= BigInt::from(1) << (bytes.len() * 8);
    }
    Value::Int(val)
}

/// Decodes a value directly from an iterator.
///
/// Exactly one pickled object is consumed; bytes after its STOP opcode are
/// left in the iterator.
pub fn value_from_iter<I>(iter: I) -> Result<Value>
where
    I: Iterator<Item = io::Result<u8>>,
{
    PickleMachine::new(iter).parse()
}

/// Decodes a value from a `std::io::Read`.
pub fn value_from_reader<R: io::Read>(rdr: R) -> Result<Value> {
    value_from_iter(rdr.bytes())
}

/// Decodes a value from a byte slice `&[u8]`.
pub fn value_from_slice(v: &[u8]) -> Result<Value> {
    value_from_iter(v.iter().map(|byte| Ok(*byte)))
}

/// Decodes a value directly from an iterator into any serde-supported type.
pub fn from_iter<I, T>(iter: I) -> Result<T>
where
    I: Iterator<Item = io::Result<u8>>,
    T: de::DeserializeOwned,
{
    from_value(value_from_iter(iter)?)
}

/// Decodes a value from a `std::io::Read` into any serde-supported type.
pub fn from_reader<R: io::Read, T: de::DeserializeOwned>(rdr: R) -> Result<T> {
    from_value(value_from_reader(rdr)?)
}

/// Decodes a value from a byte slice into any serde-supported type.
pub fn from_slice<T: de::DeserializeOwned>(v: &[u8]) -> Result<T> {
    from_value(value_from_slice(v)?)
}
