//! Typed values and their escaped wire form.
//!
//! The server stores values as bytes tagged with a type name. On the wire a
//! value travels as an escaped string (see [`escape`]) next to its type tag,
//! both inside request arguments (`--value-type <tag>`) and inside response
//! fields (`"value"` / `"type"`).
//!
//! # Type tags
//!
//! | tag | [`Value`] variant | payload |
//! |-----|-------------------|---------|
//! | *(empty)* | `Bytes` | raw bytes |
//! | `string` | `String` | UTF-8 text |
//! | `int8` .. `int64`, `int` | `Int8` .. `Int64`, `Int` | big-endian two's complement |
//! | `uint8` .. `uint64`, `uint` | `Uint8` .. `Uint64`, `Uint` | big-endian |
//! | `float32`, `float64` | `Float32`, `Float64` | decimal text |
//! | `bool` | `Bool` | `true` / `false` |
//! | `complex64`, `complex128` | `Complex64`, `Complex128` | `(re+imi)` text |
//! | `json-<kind>` | `Json` | JSON text |
//!
//! `int` and `uint` are 32 bits wide on the wire.
//!
//! # Example
//! ```rust
//! use treestore_client::value::Value;
//!
//! let (escaped, tag) = Value::Int16(10).encode();
//! assert_eq!(escaped, "\\00\\0A");
//! assert_eq!(tag, "int16");
//!
//! let decoded = Value::decode(&escaped, &tag).unwrap();
//! assert_eq!(decoded, Value::Int16(10));
//! ```
use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Marker byte that introduces a two-digit hex escape.
pub const ESCAPE: u8 = b'\\';

/// Prefix of the tags carrying JSON-serialized values.
pub const JSON_TAG_PREFIX: &str = "json-";

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("invalid {type_tag} value: {reason}")]
    InvalidEncoding { type_tag: String, reason: String },

    #[error("unrecognized value type {0}")]
    UnrecognizedType(String),

    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ValueError {
    fn invalid(type_tag: &str, reason: impl fmt::Display) -> Self {
        ValueError::InvalidEncoding {
            type_tag: type_tag.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Escapes `bytes` into a control-character-free string.
///
/// Bytes below `0x20`, the escape byte itself, and bytes that are not part of
/// a valid UTF-8 sequence become `\XX` (uppercase hex). Everything else is
/// copied verbatim.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if ch < ' ' || ch == ESCAPE as char {
                push_escaped(&mut out, ch as u8);
            } else {
                out.push(ch);
            }
        }
        for &b in chunk.invalid() {
            push_escaped(&mut out, b);
        }
    }
    out
}

pub(crate) fn push_escaped(out: &mut String, b: u8) {
    out.push(ESCAPE as char);
    out.push(HEX_DIGITS[(b >> 4) as usize] as char);
    out.push(HEX_DIGITS[(b & 0x0F) as usize] as char);
}

/// Reverses [`escape`].
///
/// An escape byte not followed by two hex digits is kept as-is.
pub fn unescape(escaped: &str) -> Vec<u8> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        if b == ESCAPE {
            if let Some(decoded) = bytes.get(pos + 1..pos + 3).and_then(hex_pair) {
                out.push(decoded);
                pos += 3;
                continue;
            }
        }
        out.push(b);
        pos += 1;
    }
    out
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    Some((hi << 4 | lo) as u8)
}

/// Complex number carried by the `complex64` / `complex128` tags.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// A value as stored by the server, one variant per wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    String(String),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int(i32),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uint(u32),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
    Json(serde_json::Value),
}

impl Value {
    /// Serializes any `Serialize` type into a [`Value::Json`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ValueError> {
        Ok(Value::Json(serde_json::to_value(value)?))
    }

    /// Deserializes a [`Value::Json`] into `T`.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, ValueError> {
        match self {
            Value::Json(json) => Ok(T::deserialize(json)?),
            other => Err(ValueError::invalid(
                &other.type_tag(),
                "value does not hold json",
            )),
        }
    }

    /// The tag sent next to this value on the wire.
    pub fn type_tag(&self) -> Cow<'static, str> {
        let tag = match self {
            Value::Bytes(_) => "",
            Value::String(_) => "string",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Int(_) => "int",
            Value::Uint8(_) => "uint8",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Uint(_) => "uint",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Bool(_) => "bool",
            Value::Complex64(_) => "complex64",
            Value::Complex128(_) => "complex128",
            Value::Json(json) => return Cow::Owned(format!("{JSON_TAG_PREFIX}{}", json_kind(json))),
        };
        Cow::Borrowed(tag)
    }

    /// Encodes into the escaped wire string and its type tag.
    pub fn encode(&self) -> (String, Cow<'static, str>) {
        let escaped = match self {
            Value::Bytes(bytes) => escape(bytes),
            Value::String(s) => escape(s.as_bytes()),
            Value::Int8(v) => escape(&v.to_be_bytes()),
            Value::Int16(v) => escape(&v.to_be_bytes()),
            Value::Int32(v) | Value::Int(v) => escape(&v.to_be_bytes()),
            Value::Int64(v) => escape(&v.to_be_bytes()),
            Value::Uint8(v) => escape(&v.to_be_bytes()),
            Value::Uint16(v) => escape(&v.to_be_bytes()),
            Value::Uint32(v) | Value::Uint(v) => escape(&v.to_be_bytes()),
            Value::Uint64(v) => escape(&v.to_be_bytes()),
            Value::Float32(v) => escape(format_float(*v).as_bytes()),
            Value::Float64(v) => escape(format_float(*v).as_bytes()),
            Value::Bool(v) => escape(v.to_string().as_bytes()),
            Value::Complex64(c) => escape(format_complex(*c).as_bytes()),
            Value::Complex128(c) => escape(format_complex(*c).as_bytes()),
            Value::Json(json) => escape(json.to_string().as_bytes()),
        };
        (escaped, self.type_tag())
    }

    /// Decodes an escaped wire string according to `type_tag`.
    pub fn decode(escaped: &str, type_tag: &str) -> Result<Self, ValueError> {
        let raw = unescape(escaped);

        let value = match type_tag {
            "" => Value::Bytes(raw),
            "string" => {
                Value::String(String::from_utf8(raw).map_err(|e| ValueError::invalid(type_tag, e))?)
            }
            "int8" => Value::Int8(i8::from_be_bytes(fixed(&raw, type_tag)?)),
            "int16" => Value::Int16(i16::from_be_bytes(fixed(&raw, type_tag)?)),
            "int32" => Value::Int32(i32::from_be_bytes(fixed(&raw, type_tag)?)),
            "int64" => Value::Int64(i64::from_be_bytes(fixed(&raw, type_tag)?)),
            "int" => Value::Int(i32::from_be_bytes(fixed(&raw, type_tag)?)),
            "uint8" => Value::Uint8(u8::from_be_bytes(fixed(&raw, type_tag)?)),
            "uint16" => Value::Uint16(u16::from_be_bytes(fixed(&raw, type_tag)?)),
            "uint32" => Value::Uint32(u32::from_be_bytes(fixed(&raw, type_tag)?)),
            "uint64" => Value::Uint64(u64::from_be_bytes(fixed(&raw, type_tag)?)),
            "uint" => Value::Uint(u32::from_be_bytes(fixed(&raw, type_tag)?)),
            "float32" => Value::Float32(parse_text(&raw, type_tag)?),
            "float64" => Value::Float64(parse_text(&raw, type_tag)?),
            "bool" => {
                let text = text(&raw, type_tag)?;
                Value::Bool(
                    parse_bool(text)
                        .ok_or_else(|| ValueError::invalid(type_tag, format!("'{text}'")))?,
                )
            }
            "complex64" => Value::Complex64(parse_complex_text(&raw, type_tag)?),
            "complex128" => Value::Complex128(parse_complex_text(&raw, type_tag)?),
            tag if tag.starts_with(JSON_TAG_PREFIX) => {
                Value::Json(serde_json::from_slice(&raw).map_err(|e| ValueError::invalid(tag, e))?)
            }
            other => return Err(ValueError::UnrecognizedType(other.to_string())),
        };
        Ok(value)
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn fixed<const N: usize>(raw: &[u8], type_tag: &str) -> Result<[u8; N], ValueError> {
    raw.try_into().map_err(|_| {
        ValueError::invalid(type_tag, format!("expected {N} bytes, got {}", raw.len()))
    })
}

fn text<'a>(raw: &'a [u8], type_tag: &str) -> Result<&'a str, ValueError> {
    std::str::from_utf8(raw).map_err(|e| ValueError::invalid(type_tag, e))
}

fn parse_text<F: FromStr>(raw: &[u8], type_tag: &str) -> Result<F, ValueError> {
    let text = text(raw, type_tag)?;
    text.parse()
        .map_err(|_| ValueError::invalid(type_tag, format!("'{text}'")))
}

fn parse_complex_text<F: WireFloat>(raw: &[u8], type_tag: &str) -> Result<Complex<F>, ValueError> {
    let text = text(raw, type_tag)?;
    parse_complex(text).ok_or_else(|| ValueError::invalid(type_tag, format!("'{text}'")))
}

/// Accepts the spellings `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

trait WireFloat: Copy + Default + fmt::Display + FromStr {
    fn is_nan(self) -> bool;
    fn is_infinite(self) -> bool;
    fn is_sign_negative(self) -> bool;
}

macro_rules! wire_float {
    ($($t:ty),*) => {
        $(impl WireFloat for $t {
            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }

            fn is_infinite(self) -> bool {
                <$t>::is_infinite(self)
            }

            fn is_sign_negative(self) -> bool {
                <$t>::is_sign_negative(self)
            }
        })*
    };
}

wire_float!(f32, f64);

fn format_float<F: WireFloat>(v: F) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let inf = if v.is_sign_negative() { "-Inf" } else { "+Inf" };
        inf.to_string()
    } else {
        v.to_string()
    }
}

fn format_complex<F: WireFloat>(c: Complex<F>) -> String {
    let im = if c.im.is_nan() {
        "+NaN".to_string()
    } else {
        let im = format_float(c.im);
        if im.starts_with(['+', '-']) { im } else { format!("+{im}") }
    };
    format!("({}{im}i)", format_float(c.re))
}

/// Parses `(re+imi)`, `re+imi`, `re` or `imi`, parentheses optional.
fn parse_complex<F: WireFloat>(text: &str) -> Option<Complex<F>> {
    let body = text
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(text);

    let Some(body) = body.strip_suffix('i') else {
        return Some(Complex::new(body.parse().ok()?, F::default()));
    };

    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'));

    match split {
        Some(i) => Some(Complex::new(body[..i].parse().ok()?, parse_imaginary(&body[i..])?)),
        None => Some(Complex::new(F::default(), parse_imaginary(body)?)),
    }
}

fn parse_imaginary<F: FromStr>(text: &str) -> Option<F> {
    match text {
        "" | "+" => "1".parse().ok(),
        "-" => "-1".parse().ok(),
        text => text.parse().ok(),
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from!(
    Vec<u8> => Bytes,
    String => String,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    Complex<f32> => Complex64,
    Complex<f64> => Complex128,
    serde_json::Value => Json,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
