//! # Object Bridge
//!
//! Moves structured values between the host and the target's object runtime.
//!
//! Values travel as JSON wrapped in `{"root": ...}`. Anything JSON cannot
//! express natively is carried as a tagged string:
//!
//! ```text
//! __burrow_magic_key__|<Tag>|<payload>
//! ```
//!
//! | tag      | payload                                   | value                 |
//! |----------|-------------------------------------------|-----------------------|
//! | `Data`   | standard base64                           | [`Value::Data`]       |
//! | `Date`   | epoch seconds, 9 fractional digits        | [`Value::Date`]       |
//! | `Null`   | empty                                     | [`Value::Null`]       |
//! | `Number` | decimal text, `nan`, `inf`, `-inf`        | numbers JSON can't hold |
//! | `Bool`   | `true` / `false`                          | [`Value::Bool`]       |
//! | `Dict`   | JSON object                               | map used as a map key |
//! | `Array`  | JSON array                                | array used as a map key |
//! | `String` | raw text                                  | a string that itself starts with the marker |
//!
//! Map keys are always JSON strings, so every non-string key is written in
//! tagged form. On the target side a snippet rebuilds native objects from the
//! JSON (and the reverse snippet produces it); see [`to_target`] and
//! [`from_target`].

pub mod snippet;

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number};
use tracing::debug;

pub use snippet::{
    SnippetReply, SnippetTemplate, CLASS_DESCRIPTION, FROM_NATIVE_TO_JSON, OBJECT_CLASS, TO_NATIVE_FROM_JSON,
};

use crate::client::Client;
use crate::error::{BurrowError, Result};
use crate::symbols::Symbol;

/// Prefix of every tagged string.
pub const MAGIC_KEY: &str = "__burrow_magic_key__";

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A host-side structured value
#[derive(Debug, Clone)]
pub enum Value
{
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer within the `i64` range.
    Integer(i64),
    /// Double-precision float, including non-finite values.
    Float(f64),
    /// Number kept as decimal text, for values outside `i64`/`f64` precision.
    BigNumber(String),
    /// Text.
    String(String),
    /// Binary blob.
    Data(Vec<u8>),
    /// Timestamp with nanosecond precision.
    Date(DateTime<Utc>),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// Map with arbitrary keys. Order is not significant.
    Map(Vec<(Value, Value)>),
}

impl PartialEq for Value
{
    fn eq(&self, other: &Self) -> bool
    {
        match (self.narrowed(), other.narrowed()) {
            (None, None) => {}
            (left, right) => return left.as_ref().unwrap_or(self) == right.as_ref().unwrap_or(other),
        }
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::BigNumber(a), Self::BigNumber(b)) | (Self::String(a), Self::String(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(key, value)| b.iter().any(|(k, v)| k == key && v == value))
            }
            _ => false,
        }
    }
}

impl Value
{
    /// A `BigNumber` whose text is exactly an `Integer` or `Float`, as that variant.
    fn narrowed(&self) -> Option<Value>
    {
        match self {
            Self::BigNumber(text) => match parse_number(text) {
                Ok(number @ (Self::Integer(_) | Self::Float(_))) => Some(number),
                _ => None,
            },
            _ => None,
        }
    }

    /// Look up `key` in a map value.
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value>
    {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, value)| value),
            _ => None,
        }
    }

    /// Look up a string key in a map value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Value>
    {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, Self::String(text) if text == key))
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str
    {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::BigNumber(_) => "number",
            Self::String(_) => "string",
            Self::Data(_) => "data",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for Value
{
    fn from(value: bool) -> Self
    {
        Self::Bool(value)
    }
}

impl From<i64> for Value
{
    fn from(value: i64) -> Self
    {
        Self::Integer(value)
    }
}

impl From<i32> for Value
{
    fn from(value: i32) -> Self
    {
        Self::Integer(i64::from(value))
    }
}

impl From<u64> for Value
{
    fn from(value: u64) -> Self
    {
        i64::try_from(value).map_or_else(|_| Self::BigNumber(value.to_string()), Self::Integer)
    }
}

impl From<f64> for Value
{
    fn from(value: f64) -> Self
    {
        Self::Float(value)
    }
}

impl From<&str> for Value
{
    fn from(value: &str) -> Self
    {
        Self::String(value.to_string())
    }
}

impl From<String> for Value
{
    fn from(value: String) -> Self
    {
        Self::String(value)
    }
}

impl From<&[u8]> for Value
{
    fn from(value: &[u8]) -> Self
    {
        Self::Data(value.to_vec())
    }
}

impl From<Vec<u8>> for Value
{
    fn from(value: Vec<u8>) -> Self
    {
        Self::Data(value)
    }
}

impl From<DateTime<Utc>> for Value
{
    fn from(value: DateTime<Utc>) -> Self
    {
        Self::Date(value)
    }
}

impl From<Vec<Value>> for Value
{
    fn from(value: Vec<Value>) -> Self
    {
        Self::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value
{
    fn from(value: Option<T>) -> Self
    {
        value.map_or(Self::Null, Into::into)
    }
}

/// Tag of a magic-encoded string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicTag
{
    /// Base64 blob.
    Data,
    /// Timestamp.
    Date,
    /// Explicit null.
    Null,
    /// Decimal number.
    Number,
    /// Boolean.
    Bool,
    /// Map in key position.
    Dict,
    /// Array in key position.
    Array,
    /// Escaped user string.
    String,
}

impl MagicTag
{
    /// Wire name of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::Data => "Data",
            Self::Date => "Date",
            Self::Null => "Null",
            Self::Number => "Number",
            Self::Bool => "Bool",
            Self::Dict => "Dict",
            Self::Array => "Array",
            Self::String => "String",
        }
    }

    fn parse(tag: &str) -> Result<Self>
    {
        match tag {
            "Data" => Ok(Self::Data),
            "Date" => Ok(Self::Date),
            "Null" => Ok(Self::Null),
            "Number" => Ok(Self::Number),
            "Bool" => Ok(Self::Bool),
            "Dict" => Ok(Self::Dict),
            "Array" => Ok(Self::Array),
            "String" => Ok(Self::String),
            other => Err(BurrowError::Serialization(format!("unknown magic tag {other:?}"))),
        }
    }
}

impl fmt::Display for MagicTag
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

fn magic(tag: MagicTag, payload: &str) -> String
{
    format!("{MAGIC_KEY}|{tag}|{payload}")
}

/// Encode `value` as the `{"root": ...}` JSON document.
///
/// ## Errors
///
/// `Serialization` if JSON encoding fails.
pub fn encode(value: &Value) -> Result<String>
{
    let mut wrapper = Map::new();
    wrapper.insert("root".to_string(), to_json(value)?);
    serde_json::to_string(&serde_json::Value::Object(wrapper)).map_err(|err| BurrowError::Serialization(err.to_string()))
}

/// Decode a `{"root": ...}` JSON document.
///
/// ## Errors
///
/// `Serialization` for malformed JSON, a missing root, unknown tags or bad
/// payloads.
pub fn decode(json: &str) -> Result<Value>
{
    let document: serde_json::Value =
        serde_json::from_str(json).map_err(|err| BurrowError::Serialization(format!("malformed bridge JSON: {err}")))?;
    decode_document(&document)
}

fn decode_document(document: &serde_json::Value) -> Result<Value>
{
    if let Some(error) = document.get("error").and_then(serde_json::Value::as_str) {
        return Err(BurrowError::Serialization(format!("target reported: {error}")));
    }
    let root = document
        .get("root")
        .ok_or_else(|| BurrowError::Serialization("bridge JSON has no root".to_string()))?;
    from_json(root)
}

/// Convert a value to its JSON form, tagging what JSON cannot hold.
///
/// ## Errors
///
/// `Serialization` if a nested key cannot be encoded.
pub fn to_json(value: &Value) -> Result<serde_json::Value>
{
    let json = match value {
        Value::Null => serde_json::Value::String(magic(MagicTag::Null, "")),
        Value::Bool(flag) => serde_json::Value::Bool(*flag),
        Value::Integer(number) => serde_json::Value::Number(Number::from(*number)),
        Value::Float(number) => match Number::from_f64(*number) {
            Some(finite) => serde_json::Value::Number(finite),
            None => serde_json::Value::String(magic(MagicTag::Number, &format_float(*number))),
        },
        Value::BigNumber(text) => {
            if !is_decimal(text) {
                return Err(BurrowError::Serialization(format!("{text:?} is not a decimal number")));
            }
            serde_json::Value::String(magic(MagicTag::Number, text))
        }
        Value::String(text) => serde_json::Value::String(escape_string(text)),
        Value::Data(bytes) => serde_json::Value::String(magic(MagicTag::Data, &STANDARD.encode(bytes))),
        Value::Date(date) => serde_json::Value::String(magic(MagicTag::Date, &format_date(date))),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect::<Result<_>>()?),
        Value::Map(entries) => {
            let mut object = Map::new();
            for (key, item) in entries {
                let key = encode_key(key)?;
                if object.insert(key.clone(), to_json(item)?).is_some() {
                    return Err(BurrowError::Serialization(format!("duplicate map key {key:?}")));
                }
            }
            serde_json::Value::Object(object)
        }
    };
    Ok(json)
}

fn encode_key(key: &Value) -> Result<String>
{
    let json_text = |json: serde_json::Value| {
        serde_json::to_string(&json).map_err(|err| BurrowError::Serialization(err.to_string()))
    };
    let encoded = match key {
        Value::String(text) => escape_string(text),
        Value::Null => magic(MagicTag::Null, ""),
        Value::Bool(flag) => magic(MagicTag::Bool, if *flag { "true" } else { "false" }),
        Value::Integer(number) => magic(MagicTag::Number, &number.to_string()),
        Value::Float(number) => magic(MagicTag::Number, &format_float(*number)),
        Value::BigNumber(text) => {
            if !is_decimal(text) {
                return Err(BurrowError::Serialization(format!("{text:?} is not a decimal number")));
            }
            magic(MagicTag::Number, text)
        }
        Value::Data(bytes) => magic(MagicTag::Data, &STANDARD.encode(bytes)),
        Value::Date(date) => magic(MagicTag::Date, &format_date(date)),
        Value::Array(_) => magic(MagicTag::Array, &json_text(to_json(key)?)?),
        Value::Map(_) => magic(MagicTag::Dict, &json_text(to_json(key)?)?),
    };
    Ok(encoded)
}

fn escape_string(text: &str) -> String
{
    if text.starts_with(MAGIC_KEY) {
        magic(MagicTag::String, text)
    } else {
        text.to_string()
    }
}

/// Convert JSON produced by the bridge back into a value.
///
/// ## Errors
///
/// `Serialization` for unknown tags or malformed payloads.
pub fn from_json(json: &serde_json::Value) -> Result<Value>
{
    let value = match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(flag) => Value::Bool(*flag),
        serde_json::Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Value::Integer(integer)
            } else if let Some(unsigned) = number.as_u64() {
                Value::BigNumber(unsigned.to_string())
            } else {
                Value::Float(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(text) => decode_string(text)?,
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect::<Result<_>>()?),
        serde_json::Value::Object(object) => {
            let mut entries = Vec::with_capacity(object.len());
            for (key, item) in object {
                entries.push((decode_string(key)?, from_json(item)?));
            }
            Value::Map(entries)
        }
    };
    Ok(value)
}

fn decode_string(text: &str) -> Result<Value>
{
    let Some(rest) = text.strip_prefix(MAGIC_KEY) else {
        return Ok(Value::String(text.to_string()));
    };
    let (tag, payload) = rest
        .strip_prefix('|')
        .and_then(|rest| rest.split_once('|'))
        .ok_or_else(|| BurrowError::Serialization(format!("malformed magic string {text:?}")))?;

    match MagicTag::parse(tag)? {
        MagicTag::Null => Ok(Value::Null),
        MagicTag::String => Ok(Value::String(payload.to_string())),
        MagicTag::Bool => match payload {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(BurrowError::Serialization(format!("bad Bool payload {other:?}"))),
        },
        MagicTag::Data => STANDARD
            .decode(payload)
            .map(Value::Data)
            .map_err(|err| BurrowError::Serialization(format!("bad Data payload: {err}"))),
        MagicTag::Date => parse_date(payload).map(Value::Date),
        MagicTag::Number => parse_number(payload),
        MagicTag::Dict | MagicTag::Array => {
            let nested: serde_json::Value = serde_json::from_str(payload)
                .map_err(|err| BurrowError::Serialization(format!("bad {tag} payload: {err}")))?;
            let value = from_json(&nested)?;
            match (tag, &value) {
                ("Dict", Value::Map(_)) | ("Array", Value::Array(_)) => Ok(value),
                _ => Err(BurrowError::Serialization(format!("{tag} payload holds a {}", value.kind()))),
            }
        }
    }
}

fn format_float(number: f64) -> String
{
    if number.is_nan() {
        "nan".to_string()
    } else if number == f64::INFINITY {
        "inf".to_string()
    } else if number == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{number:?}")
    }
}

fn parse_number(text: &str) -> Result<Value>
{
    match text.to_ascii_lowercase().as_str() {
        "nan" => return Ok(Value::Float(f64::NAN)),
        "inf" | "infinity" | "+inf" => return Ok(Value::Float(f64::INFINITY)),
        "-inf" | "-infinity" => return Ok(Value::Float(f64::NEG_INFINITY)),
        _ => {}
    }
    if !is_decimal(text) {
        return Err(BurrowError::Serialization(format!("bad Number payload {text:?}")));
    }
    if let Ok(integer) = text.parse::<i64>() {
        return Ok(Value::Integer(integer));
    }
    if let Ok(float) = text.parse::<f64>() {
        if format!("{float:?}") == text {
            return Ok(Value::Float(float));
        }
    }
    Ok(Value::BigNumber(text.to_string()))
}

/// `[-]digits[.digits][e[+-]digits]`
fn is_decimal(text: &str) -> bool
{
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(split) => (&unsigned[..split], Some(&unsigned[split + 1..])),
        None => (unsigned, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    let mantissa_ok = !whole.is_empty() && digits(whole) && digits(fraction) && !mantissa.ends_with('.');
    let exponent_ok = exponent.map_or(true, |exponent| {
        let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        !exponent.is_empty() && digits(exponent)
    });
    mantissa_ok && exponent_ok
}

fn format_date(date: &DateTime<Utc>) -> String
{
    let seconds = date.timestamp();
    let nanos = date.timestamp_subsec_nanos();
    if seconds < 0 && nanos > 0 {
        // -1.25 is stored as seconds = -2, nanos = 0.75e9
        format!("-{}.{:09}", -(seconds + 1), NANOS_PER_SECOND - nanos)
    } else {
        format!("{seconds}.{nanos:09}")
    }
}

fn parse_date(text: &str) -> Result<DateTime<Utc>>
{
    let bad = || BurrowError::Serialization(format!("bad Date payload {text:?}"));
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let exact = !whole.is_empty()
        && whole.bytes().all(|byte| byte.is_ascii_digit())
        && fraction.bytes().all(|byte| byte.is_ascii_digit());

    let (seconds, nanos) = if exact {
        let whole: i64 = whole.parse().map_err(|_| bad())?;
        let mut digits: String = fraction.chars().take(9).collect();
        while digits.len() < 9 {
            digits.push('0');
        }
        let nanos: u32 = digits.parse().map_err(|_| bad())?;
        match (negative, nanos) {
            (false, _) => (whole, nanos),
            (true, 0) => (-whole, 0),
            (true, _) => (-whole - 1, NANOS_PER_SECOND - nanos),
        }
    } else {
        let float: f64 = text.parse().map_err(|_| bad())?;
        if !float.is_finite() {
            return Err(bad());
        }
        let floor = float.floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = (((float - floor) * 1e9).round() as u32).min(NANOS_PER_SECOND - 1);
        #[allow(clippy::cast_possible_truncation)]
        let seconds = floor as i64;
        (seconds, nanos)
    };

    DateTime::from_timestamp(seconds, nanos).ok_or_else(bad)
}

/// Quote `text` as an Objective-C string literal body.
pub(crate) fn objc_string_literal(text: &str) -> String
{
    let mut escaped = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Build the native equivalent of `value` inside the target and return a
/// reference to it.
///
/// ## Errors
///
/// `Serialization` when the value cannot be encoded or the target fails to
/// rebuild it.
pub fn to_target(client: &mut Client, value: &Value) -> Result<Symbol>
{
    let json = encode(value)?;
    let literal = objc_string_literal(&json);
    debug!("Sending {} value ({} bytes of JSON) to the target", value.kind(), json.len());
    client
        .evaluate_template(&TO_NATIVE_FROM_JSON, &[("__json_object_dump__", &literal)])
        .map_err(|err| match err {
            BurrowError::Eval(reason) => BurrowError::Serialization(format!("target could not rebuild value: {reason}")),
            other => other,
        })
}

/// Convert the native object graph rooted at `object` into a host value.
///
/// ## Errors
///
/// `Serialization` when the target meets an object with no mapping or
/// returns malformed JSON.
pub fn from_target(client: &mut Client, object: Symbol) -> Result<Value>
{
    client.check_symbol(object)?;
    let address = object.to_string();
    let document: serde_json::Value = client
        .evaluate_template_json(&FROM_NATIVE_TO_JSON, &[("__object_address__", &address)])
        .map_err(|err| match err {
            BurrowError::Eval(reason) => BurrowError::Serialization(format!("target could not encode {address}: {reason}")),
            other => other,
        })?;
    decode_document(&document)
}

#[cfg(test)]
mod tests
{
    use chrono::TimeZone;

    use super::*;

    fn root(value: &Value) -> serde_json::Value
    {
        let json: serde_json::Value = serde_json::from_str(&encode(value).unwrap()).unwrap();
        json["root"].clone()
    }

    #[test]
    fn test_wire_forms()
    {
        assert_eq!(root(&Value::Data(vec![0, 1, 2])), format!("{MAGIC_KEY}|Data|AAEC"));
        assert_eq!(root(&Value::Null), format!("{MAGIC_KEY}|Null|"));
        assert_eq!(root(&Value::Float(f64::NAN)), format!("{MAGIC_KEY}|Number|nan"));
        assert_eq!(root(&Value::BigNumber("18446744073709551616".into())), format!("{MAGIC_KEY}|Number|18446744073709551616"));
        assert_eq!(root(&Value::Integer(-3)), -3);
        assert_eq!(root(&Value::Bool(true)), true);
        assert_eq!(root(&Value::from("plain")), "plain");
    }

    #[test]
    fn test_date_payload_has_nine_digits()
    {
        let date = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(format_date(&date), "1700000000.123456789");
        assert_eq!(parse_date("1700000000.123456789").unwrap(), date);

        let before_epoch = Utc.timestamp_opt(-2, 750_000_000).unwrap();
        assert_eq!(format_date(&before_epoch), "-1.250000000");
        assert_eq!(parse_date("-1.250000000").unwrap(), before_epoch);

        let half = Utc.timestamp_opt(-1, 500_000_000).unwrap();
        assert_eq!(format_date(&half), "-0.500000000");
        assert_eq!(parse_date("-0.500000000").unwrap(), half);

        assert_eq!(parse_date("1.5").unwrap(), Utc.timestamp_opt(1, 500_000_000).unwrap());
        assert_eq!(parse_date("1e3").unwrap(), Utc.timestamp_opt(1000, 0).unwrap());
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_number_payloads()
    {
        assert_eq!(parse_number("42").unwrap(), Value::Integer(42));
        assert_eq!(parse_number("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse_number("inf").unwrap(), Value::Float(f64::INFINITY));
        assert_eq!(parse_number("nan").unwrap(), Value::Float(f64::NAN));
        assert_eq!(
            parse_number("3.14159265358979323846264338327950288").unwrap(),
            Value::BigNumber("3.14159265358979323846264338327950288".to_string())
        );
        assert!(parse_number("12abc").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn test_is_decimal()
    {
        for good in ["0", "-1", "1.5", "1e10", "-2.5E-3"] {
            assert!(is_decimal(good), "{good}");
        }
        for bad in ["", "-", ".5", "1.", "1e", "0x10", "1.2.3"] {
            assert!(!is_decimal(bad), "{bad}");
        }
    }

    #[test]
    fn test_marker_strings_are_escaped()
    {
        let tricky = format!("{MAGIC_KEY}|Data|AAEC");
        let value = Value::String(tricky.clone());
        assert_eq!(root(&value), format!("{MAGIC_KEY}|String|{tricky}"));
        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_bad_input()
    {
        assert!(decode(&format!(r#"{{"root": "{MAGIC_KEY}|Blob|x"}}"#)).is_err());
        assert!(decode(&format!(r#"{{"root": "{MAGIC_KEY}|Data|!!!"}}"#)).is_err());
        assert!(decode(&format!(r#"{{"root": "{MAGIC_KEY}"}}"#)).is_err());
        assert!(decode(r#"{"value": 1}"#).is_err());
        assert!(decode(r#"{"error": "NSProxy has no mapping"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_small_big_numbers_survive_the_wire()
    {
        for value in [Value::BigNumber("5".into()), Value::BigNumber("-1.5".into()), Value::BigNumber("1e3".into())] {
            assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
        }
        assert_eq!(Value::BigNumber("5".into()), Value::Integer(5));
        assert_eq!(Value::Float(1.5), Value::BigNumber("1.5".into()));
        assert_ne!(Value::BigNumber("5".into()), Value::BigNumber("6".into()));
        assert_ne!(Value::BigNumber("5".into()), Value::from("5"));
    }

    #[test]
    fn test_large_unsigned_decodes_as_big_number()
    {
        assert_eq!(decode(r#"{"root": 18446744073709551615}"#).unwrap(), Value::BigNumber(u64::MAX.to_string()));
        assert_eq!(Value::from(u64::MAX), Value::BigNumber(u64::MAX.to_string()));
        assert_eq!(Value::from(7u64), Value::Integer(7));
    }

    #[test]
    fn test_map_equality_ignores_order()
    {
        let a = Value::Map(vec![(Value::from("a"), Value::Integer(1)), (Value::Integer(2), Value::Null)]);
        let b = Value::Map(vec![(Value::Integer(2), Value::Null), (Value::from("a"), Value::Integer(1))]);
        assert_eq!(a, b);
        assert_eq!(a.get_str("a"), Some(&Value::Integer(1)));
        assert_eq!(a.get(&Value::Integer(2)), Some(&Value::Null));
    }

    #[test]
    fn test_objc_literal_escaping()
    {
        assert_eq!(objc_string_literal(r#"{"a":"b\"c"}"#), r#"{\"a\":\"b\\\"c\"}"#);
    }
}
