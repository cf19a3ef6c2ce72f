//! # Value Codec
//!
//! Purpose: Map application values to the text stored in the key-value store
//! and back again.
//!
//! ## Design Principles
//! 1. **Primitives Stay Readable**: Strings, numbers and booleans are stored as
//!    their plain text so other systems can read them without a JSON parser.
//! 2. **Composites as JSON**: Arrays and objects use compact JSON.
//! 3. **Loud Writes**: A value that cannot be encoded is an error for the caller,
//!    including NaN and infinite floats anywhere inside it.
//! 4. **Tolerant Reads**: Decoding never fails; text that is not JSON comes back
//!    unchanged, because keys may have been written by another system. Integer
//!    text too wide for 64 bits also stays text instead of rounding.
//!
//! ## Wire Mapping
//!
//! ```text
//! encode                          decode
//! null          -> ""             None / ""        -> null
//! "alice"       -> alice          alice            -> "alice"
//! 42 / 1.5      -> 42 / 1.5       42               -> 42
//! true          -> true           true             -> true
//! [1,2] / {...} -> JSON text      [1,2]            -> [1,2]
//! ```

use std::fmt;

use serde::ser::{self, Serialize};
use serde_json::Value;

use crate::error::{RkvError, RkvResult};

/// Stateless encoder/decoder between application values and wire text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    decode_responses: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Codec {
            decode_responses: true,
        }
    }
}

impl Codec {
    /// Creates a codec.
    ///
    /// With `decode_responses` set, payloads that are not valid UTF-8 are
    /// decoded lossily. Without it they are returned as an array of byte
    /// values so nothing is lost.
    pub fn new(decode_responses: bool) -> Self {
        Codec { decode_responses }
    }

    /// Returns whether lossy text decoding is enabled.
    pub fn decode_responses(&self) -> bool {
        self.decode_responses
    }

    /// Encodes any serializable value into its wire text.
    ///
    /// # Errors
    /// Returns `RkvError::Serialization` when `serde_json` rejects the value
    /// (for example a map with non-string keys) or when it holds a NaN or
    /// infinite float, which JSON cannot represent.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> RkvResult<String> {
        value
            .serialize(FiniteCheck)
            .map_err(|err| RkvError::Serialization(err.to_string()))?;
        let value =
            serde_json::to_value(value).map_err(|err| RkvError::Serialization(err.to_string()))?;
        self.encode_value(&value)
    }

    /// Encodes an already-built JSON value.
    pub fn encode_value(&self, value: &Value) -> RkvResult<String> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            composite => serde_json::to_string(composite)
                .map_err(|err| RkvError::Serialization(err.to_string())),
        }
    }

    /// Decodes a raw reply payload.
    ///
    /// `None` and empty payloads decode to `null`.
    pub fn decode(&self, raw: Option<&[u8]>) -> Value {
        let bytes = match raw {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Value::Null,
        };

        match std::str::from_utf8(bytes) {
            Ok(text) => self.decode_str(text),
            Err(_) if self.decode_responses => self.decode_str(&String::from_utf8_lossy(bytes)),
            Err(_) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        }
    }

    /// Decodes text that is already known to be valid UTF-8.
    pub fn decode_str(&self, text: &str) -> Value {
        if text.is_empty() {
            return Value::Null;
        }
        match serde_json::from_str(text) {
            Ok(Value::Number(number)) if number.is_f64() && is_integer_literal(text.trim()) => {
                Value::String(text.to_string())
            }
            Ok(value) => value,
            Err(_) => Value::String(text.to_string()),
        }
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Non-finite float detection
// ---------------------------------------------------------------------------

/// Serializer that builds nothing and only fails on NaN or infinity.
///
/// `serde_json` writes such floats as `null`, which would silently turn a
/// write into a delete.
#[derive(Clone, Copy)]
struct FiniteCheck;

#[derive(Debug)]
struct NonFinite(String);

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        NonFinite(msg.to_string())
    }
}

type Checked = Result<(), NonFinite>;

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = FiniteCheck;
    type SerializeTuple = FiniteCheck;
    type SerializeTupleStruct = FiniteCheck;
    type SerializeTupleVariant = FiniteCheck;
    type SerializeMap = FiniteCheck;
    type SerializeStruct = FiniteCheck;
    type SerializeStructVariant = FiniteCheck;

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }
    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }
    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }

    fn serialize_f32(self, value: f32) -> Checked {
        self.serialize_f64(f64::from(value))
    }

    fn serialize_f64(self, value: f64) -> Checked {
        if value.is_finite() {
            Ok(())
        } else {
            Err(NonFinite(format!("{value} has no JSON representation")))
        }
    }

    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }
    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Checked {
        key.serialize(FiniteCheck)
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}
