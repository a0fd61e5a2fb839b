// Copyright (c) 2015-2024 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Bridges decoded values into serde's data model, so that a pickle stream
//! can land directly in ordinary Rust types via `from_value`/`from_slice`.

use std::fmt;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

use crate::error::{Error, Result};
use crate::value::{HashableValue, Value};

impl<'de> de::Deserializer<'de> for Value {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::None => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::I64(i) => visitor.visit_i64(i),
            Value::Int(bi) => {
                if let Some(i) = bi.to_i64() {
                    visitor.visit_i64(i)
                } else if let Some(u) = bi.to_u64() {
                    visitor.visit_u64(u)
                } else {
                    Err(de::Error::custom(format!("integer is too large: {}", bi)))
                }
            }
            Value::F64(f) => visitor.visit_f64(f),
            Value::String(s) => visitor.visit_string(s),
            Value::Bytes(b) => visitor.visit_byte_buf(b),
            Value::List(items) => {
                let items = items.borrow().clone();
                SeqDeserializer::new(items.into_iter()).deserialize_any(visitor)
            }
            Value::Set(items) => {
                let items: Vec<_> =
                    items.borrow().iter().cloned().map(HashableValue::to_value).collect();
                SeqDeserializer::new(items.into_iter()).deserialize_any(visitor)
            }
            Value::Dict(entries) => {
                let entries = entries.borrow().clone();
                let iter = entries.into_iter().map(|(k, v)| (k.to_value(), v));
                MapDeserializer::new(iter).deserialize_any(visitor)
            }
            Value::Global(class) => Err(de::Error::custom(format!(
                "cannot deserialize from class reference {}.{}",
                class.module, class.name
            ))),
            Value::Mark => Err(de::Error::custom("cannot deserialize from stack mark")),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::None => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple tuple_struct
        map struct enum identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de, Error> for Value {
    type Deserializer = Value;

    fn into_deserializer(self) -> Value {
        self
    }
}

impl<'de> de::Deserialize<'de> for Value {
    fn deserialize<D>(deser: D) -> std::result::Result<Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str("any value a pickle stream can hold")
            }

            fn visit_bool<E>(self, value: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> std::result::Result<Value, E> {
                Ok(Value::I64(value))
            }

            fn visit_u64<E>(self, value: u64) -> std::result::Result<Value, E> {
                if value < 0x8000_0000_0000_0000 {
                    Ok(Value::I64(value as i64))
                } else {
                    Ok(Value::Int(BigInt::from(value)))
                }
            }

            fn visit_f64<E>(self, value: f64) -> std::result::Result<Value, E> {
                Ok(Value::F64(value))
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Value, E> {
                Ok(Value::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> std::result::Result<Value, E> {
                Ok(Value::String(value))
            }

            fn visit_bytes<E>(self, value: &[u8]) -> std::result::Result<Value, E> {
                Ok(Value::Bytes(value.to_vec()))
            }

            fn visit_byte_buf<E>(self, value: Vec<u8>) -> std::result::Result<Value, E> {
                Ok(Value::Bytes(value))
            }

            fn visit_unit<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            fn visit_none<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            fn visit_some<D>(self, deser: D) -> std::result::Result<Value, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                de::Deserialize::deserialize(deser)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::list(items))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries = IndexMap::new();
                while let Some((key, value)) = map.next_entry::<Value, Value>()? {
                    match key.to_hashable() {
                        Some(key) => { entries.insert(key, value); }
                        None => return Err(de::Error::custom("map key is not hashable")),
                    }
                }
                Ok(Value::dict(entries))
            }
        }

        deser.deserialize_any(ValueVisitor)
    }
}

/// Deserializes a decoded value into any serde-supported type.
pub fn from_value<'de, T: de::Deserialize<'de>>(value: Value) -> Result<T> {
    T::deserialize(value)
}
