//! Python values, as decoded from a pickle stream

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

/// The `(module, name)` identity of a callable pushed by the GLOBAL opcode.
///
/// A class reference is only ever consumed as the callable of REDUCE; it
/// never appears in a decoded root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRef {
    pub module: String,
    pub name: String,
}

/// A decoded value.
///
/// Containers are handles to shared cells: cloning a `Value` clones the
/// handle, not the contents.  The in-place container opcodes (APPEND,
/// APPENDS, SETITEM, SETITEMS) mutate through the handle, so a memo fetch
/// of a container observes later mutations exactly like a Python reference
/// would.
#[derive(Clone)]
pub enum Value {
    /// None
    None,
    /// Boolean
    Bool(bool),
    /// Normal-sized integer
    I64(i64),
    /// Big integer
    Int(BigInt),
    /// Float
    F64(f64),
    /// Unicode string
    String(String),
    /// Bytestring, from the bytearray reduction
    Bytes(Vec<u8>),
    /// List or tuple (the distinction is not preserved)
    List(Rc<RefCell<Vec<Value>>>),
    /// Dictionary, in insertion order
    Dict(Rc<RefCell<IndexMap<HashableValue, Value>>>),
    /// Set or frozenset (the distinction is not preserved)
    Set(Rc<RefCell<BTreeSet<HashableValue>>>),
    /// Class reference, only valid as the callable of REDUCE
    Global(Box<ClassRef>),
    /// Interpreter-only stack sentinel; never part of a decoded root
    Mark,
}

/// A value usable as a dict key or set item.
#[derive(Clone, Debug)]
pub enum HashableValue {
    /// None
    None,
    /// Boolean
    Bool(bool),
    /// Normal-sized integer
    I64(i64),
    /// Big integer
    Int(BigInt),
    /// Float
    F64(f64),
    /// Unicode string
    String(String),
}

impl Value {
    /// Makes a list value from its items.
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Makes a dict value from its entries.
    pub fn dict(entries: IndexMap<HashableValue, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    /// Makes a set value from its items.
    pub fn set(items: BTreeSet<HashableValue>) -> Value {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    /// Converts the value into a hashable value, if possible.
    pub fn to_hashable(self) -> Option<HashableValue> {
        match self {
            Value::None => Some(HashableValue::None),
            Value::Bool(b) => Some(HashableValue::Bool(b)),
            Value::I64(i) => Some(HashableValue::I64(i)),
            Value::Int(i) => Some(HashableValue::Int(i)),
            Value::F64(f) => Some(HashableValue::F64(f)),
            Value::String(s) => Some(HashableValue::String(s)),
            _ => None,
        }
    }

    /// Python-flavored name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match *self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::I64(_) | Value::Int(_) => "int",
            Value::F64(_) => "float",
            Value::String(_) => "str",
            Value::Bytes(_) => "bytearray",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Global(_) => "type",
            Value::Mark => "mark",
        }
    }
}

impl HashableValue {
    /// Converts the value into its non-hashable equivalent.
    pub fn to_value(self) -> Value {
        match self {
            HashableValue::None => Value::None,
            HashableValue::Bool(b) => Value::Bool(b),
            HashableValue::I64(i) => Value::I64(i),
            HashableValue::Int(i) => Value::Int(i),
            HashableValue::F64(f) => Value::F64(f),
            HashableValue::String(s) => Value::String(s),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use self::Value::*;
        match (self, other) {
            (None, None) | (Mark, Mark) => true,
            (Bool(a), Bool(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Dict(a), Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Set(a), Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Global(a), Global(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::None => fmt.write_str("None"),
            Value::Bool(b) => fmt.write_str(if b { "True" } else { "False" }),
            Value::I64(i) => write!(fmt, "{}", i),
            Value::Int(ref i) => write!(fmt, "{}", i),
            Value::F64(f) => write!(fmt, "{:?}", f),
            Value::String(ref s) => write!(fmt, "{:?}", s),
            Value::Bytes(ref b) => {
                fmt.write_str("bytearray(b\"")?;
                for &byte in b {
                    write!(fmt, "{}", std::ascii::escape_default(byte))?;
                }
                fmt.write_str("\")")
            }
            Value::List(ref items) => {
                let items = items.borrow();
                fmt.debug_list().entries(items.iter()).finish()
            }
            Value::Dict(ref entries) => {
                let entries = entries.borrow();
                fmt.debug_map().entries(entries.iter()).finish()
            }
            Value::Set(ref items) => {
                let items = items.borrow();
                fmt.debug_set().entries(items.iter()).finish()
            }
            Value::Global(ref class) =>
                write!(fmt, "<class '{}.{}'>", class.module, class.name),
            Value::Mark => fmt.write_str("<mark>"),
        }
    }
}

impl PartialEq for HashableValue {
    fn eq(&self, other: &HashableValue) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HashableValue {}

impl PartialOrd for HashableValue {
    fn partial_cmp(&self, other: &HashableValue) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Implement a consistent total ordering for HashableValues so that they
/// can be added to dictionaries and sets.
///
/// Numbers compare numerically across variants, the way Python treats
/// `True == 1 == 1.0`; otherwise None sorts before numbers, which sort
/// before strings.  Integer-float comparisons are exact, so that equality
/// stays transitive and in agreement with the hashes below.
impl Ord for HashableValue {
    fn cmp(&self, other: &HashableValue) -> Ordering {
        use self::HashableValue::*;
        match *self {
            None => match *other {
                None => Ordering::Equal,
                _ => Ordering::Less,
            },
            Bool(b) => match *other {
                None => Ordering::Greater,
                Bool(b2) => b.cmp(&b2),
                I64(i) => (b as i64).cmp(&i),
                Int(ref bi) => BigInt::from(b as i64).cmp(bi),
                F64(f) => cmp_i64_f64(b as i64, f),
                String(_) => Ordering::Less,
            },
            I64(i) => match *other {
                None => Ordering::Greater,
                Bool(b) => i.cmp(&(b as i64)),
                I64(i2) => i.cmp(&i2),
                Int(ref bi) => BigInt::from(i).cmp(bi),
                F64(f) => cmp_i64_f64(i, f),
                String(_) => Ordering::Less,
            },
            Int(ref bi) => match *other {
                None => Ordering::Greater,
                Bool(b) => bi.cmp(&BigInt::from(b as i64)),
                I64(i) => bi.cmp(&BigInt::from(i)),
                Int(ref bi2) => bi.cmp(bi2),
                F64(f) => cmp_big_f64(bi, f),
                String(_) => Ordering::Less,
            },
            F64(f) => match *other {
                None => Ordering::Greater,
                Bool(b) => cmp_i64_f64(b as i64, f).reverse(),
                I64(i) => cmp_i64_f64(i, f).reverse(),
                Int(ref bi) => cmp_big_f64(bi, f).reverse(),
                F64(f2) => cmp_f64(f, f2),
                String(_) => Ordering::Less,
            },
            String(ref s) => match *other {
                String(ref s2) => s.cmp(s2),
                _ => Ordering::Greater,
            },
        }
    }
}

/// Total order on floats; negative zero counts as zero, NaNs sort by bits.
fn cmp_f64(f: f64, g: f64) -> Ordering {
    fn canon(x: f64) -> f64 {
        if x == 0.0 { 0.0 } else { x }
    }
    canon(f).total_cmp(&canon(g))
}

/// Compares an integer with a float without rounding the integer.
fn cmp_i64_f64(i: i64, f: f64) -> Ordering {
    if f.is_finite() && f.fract() == 0.0 {
        if f < i64::MIN as f64 {
            Ordering::Greater
        } else if f >= -(i64::MIN as f64) {
            Ordering::Less
        } else {
            i.cmp(&(f as i64))
        }
    } else {
        // A non-integral or non-finite float never equals an integer, and
        // the rounding in the cast cannot flip the comparison past it.
        (i as f64).total_cmp(&f)
    }
}

fn cmp_big_f64(bi: &BigInt, f: f64) -> Ordering {
    match BigInt::from_f64(f) {
        // exact when f has no fractional part
        Some(ref whole) if f.fract() == 0.0 => bi.cmp(whole),
        _ => match big_to_f64(bi).total_cmp(&f) {
            // the conversion saturated to f's infinity; the integer is finite
            Ordering::Equal if f == f64::INFINITY => Ordering::Less,
            Ordering::Equal if f == f64::NEG_INFINITY => Ordering::Greater,
            ord => ord,
        },
    }
}

/// Hashing must agree with the cross-variant equality above: numerically
/// equal `Bool`/`I64`/`Int`/`F64` values have to hash identically.  Numbers
/// are therefore hashed through a canonical form: an `i64` when they fit,
/// the two's-complement bytes of the exact big integer otherwise, and the
/// raw bits for floats with a fractional part.
impl Hash for HashableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match *self {
            HashableValue::None => state.write_u8(b'n'),
            HashableValue::Bool(b) => hash_int(b as i64, state),
            HashableValue::I64(i) => hash_int(i, state),
            HashableValue::Int(ref bi) => match bi.to_i64() {
                Some(i) => hash_int(i, state),
                None => hash_big(bi, state),
            },
            HashableValue::F64(f) => {
                if f.is_finite() && f.fract() == 0.0 {
                    if f >= i64::MIN as f64 && f < -(i64::MIN as f64) {
                        hash_int(f as i64, state);
                    } else if let Some(bi) = BigInt::from_f64(f) {
                        hash_big(&bi, state);
                    } else {
                        state.write_u8(b'f');
                        state.write_u64(f.to_bits());
                    }
                } else {
                    state.write_u8(b'f');
                    state.write_u64(f.to_bits());
                }
            }
            HashableValue::String(ref s) => {
                state.write_u8(b's');
                s.hash(state);
            }
        }
    }
}

fn hash_int<H: Hasher>(i: i64, state: &mut H) {
    state.write_u8(b'i');
    state.write_i64(i);
}

fn hash_big<H: Hasher>(bi: &BigInt, state: &mut H) {
    state.write_u8(b'b');
    bi.to_signed_bytes_le().hash(state);
}

/// `to_f64` for BigInt rounds, saturating to infinity, so it is usable for
/// ordering against floats.
fn big_to_f64(bi: &BigInt) -> f64 {
    bi.to_f64().unwrap_or(f64::NAN)
}
