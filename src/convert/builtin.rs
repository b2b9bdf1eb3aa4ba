//! Built-in conversions: string parsing, numbers, collections and maps.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use super::Converter;
use crate::error::{DiError, DiResult};
use crate::types::TypeSpec;
use crate::value::Value;

/// Returns `None` when no built-in conversion applies.
pub(super) fn convert(
    converter: &Converter,
    value: &Value,
    target: &TypeSpec,
) -> Option<DiResult<Value>> {
    match (value, target) {
        (Value::Str(text), t) if !t.is_container() => from_string(text, t),
        (Value::Int(_) | Value::UInt(_) | Value::Float(_), t) if t.is_numeric() => {
            Some(to_number(value, t))
        }
        (Value::List(items) | Value::Set(items) | Value::Array(items), t) => match t {
            TypeSpec::List(element) => Some(
                convert_items(converter, items, element).map(Value::List),
            ),
            TypeSpec::Array(element) => Some(
                convert_items(converter, items, element).map(Value::Array),
            ),
            TypeSpec::Set(element) => Some(convert_items(converter, items, element).map(|v| {
                let mut unique = Vec::with_capacity(v.len());
                for item in v {
                    Value::push_unique(&mut unique, item);
                }
                Value::Set(unique)
            })),
            _ => None,
        },
        (Value::Map(entries), TypeSpec::Map(key_type, value_type)) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match converter.convert(k, key_type) {
                    Ok(key) => key,
                    Err(e) => return Some(Err(e)),
                };
                let value = match converter.convert(v, value_type) {
                    Ok(value) => value,
                    Err(e) => return Some(Err(e)),
                };
                Value::insert_entry(&mut out, key, value);
            }
            Some(Ok(Value::Map(out)))
        }
        (Value::Map(entries), TypeSpec::Properties) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match converter.convert(k, &TypeSpec::String) {
                    Ok(key) => key,
                    Err(e) => return Some(Err(e)),
                };
                Value::insert_entry(&mut out, key, v.clone());
            }
            Some(Ok(Value::Map(out)))
        }
        _ => None,
    }
}

fn convert_items(
    converter: &Converter,
    items: &[Value],
    element: &TypeSpec,
) -> DiResult<Vec<Value>> {
    items
        .iter()
        .map(|item| converter.convert(item, element))
        .collect()
}

fn from_string(text: &str, target: &TypeSpec) -> Option<DiResult<Value>> {
    let fail = |reason: String| DiError::conversion(text, target, Some(reason));
    let result = match target {
        TypeSpec::Bool => parse_bool(text).map(Value::Bool),
        t if t.is_integer() => text
            .parse::<i128>()
            .map_err(|e| fail(e.to_string()))
            .and_then(|n| integer_value(n, t).ok_or_else(|| fail("out of range".into()))),
        TypeSpec::F32 => text
            .parse::<f32>()
            .map(|f| Value::Float(f64::from(f)))
            .map_err(|e| fail(e.to_string())),
        TypeSpec::F64 => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(e.to_string())),
        TypeSpec::Char => parse_char(text).map(Value::Char),
        TypeSpec::String => Ok(Value::Str(text.to_string())),
        TypeSpec::Duration => humantime::parse_duration(text)
            .map(Value::Duration)
            .map_err(|e| fail(e.to_string())),
        TypeSpec::Path => Ok(Value::Path(PathBuf::from(text))),
        TypeSpec::IpAddr => text
            .parse::<IpAddr>()
            .map(Value::Ip)
            .map_err(|e| fail(e.to_string())),
        TypeSpec::SocketAddr => text
            .parse::<SocketAddr>()
            .map(Value::Socket)
            .map_err(|e| fail(e.to_string())),
        TypeSpec::Regex => regex::Regex::new(text)
            .map(Value::Regex)
            .map_err(|e| fail(e.to_string())),
        TypeSpec::Locale => Ok(parse_locale(text)),
        TypeSpec::Properties => Ok(parse_properties(text)),
        TypeSpec::Enum { name, variants } => {
            if variants.iter().any(|v| v == text) {
                Ok(Value::Enum {
                    type_name: name.clone(),
                    variant: text.to_string(),
                })
            } else {
                Err(fail(format!("expected one of [{}]", variants.join(", "))))
            }
        }
        _ => return None,
    };
    Some(result)
}

/// Parses boolean text: `yes`/`true`/`on` and `no`/`false`/`off`, case-insensitive.
pub fn parse_bool(text: &str) -> DiResult<bool> {
    match text.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" => Ok(true),
        "no" | "false" | "off" => Ok(false),
        _ => Err(DiError::conversion(
            text,
            TypeSpec::Bool,
            Some("expected yes/no, true/false or on/off".into()),
        )),
    }
}

/// Parses a single character or a `\uXXXX` escape.
pub fn parse_char(text: &str) -> DiResult<char> {
    let mut chars = text.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(c);
    }
    if let Some(hex) = text.strip_prefix("\\u") {
        if hex.len() == 4 {
            if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                return Ok(c);
            }
        }
    }
    Err(DiError::conversion(
        text,
        TypeSpec::Char,
        Some("expected a single character or \\uXXXX".into()),
    ))
}

fn parse_locale(text: &str) -> Value {
    let mut parts = text.splitn(3, '_').map(str::to_string);
    let language = parts.next().unwrap_or_default();
    let country = parts.next().unwrap_or_default();
    let variant = parts.next().unwrap_or_default();
    Value::Locale(language, country, variant)
}

/// Parses `key=value` / `key: value` lines into a map value.
///
/// Blank lines and lines starting with `#` or `!` are ignored; a trailing
/// backslash continues the value on the next line.
pub fn parse_properties(text: &str) -> Value {
    let mut entries = Vec::new();
    let mut pending = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
        {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);
        push_property(&mut entries, &pending);
        pending.clear();
    }
    if !pending.is_empty() {
        push_property(&mut entries, &pending);
    }
    Value::Map(entries)
}

fn push_property(entries: &mut Vec<(Value, Value)>, line: &str) {
    let split = line.find(['=', ':']);
    let (key, value) = match split {
        Some(i) => (line[..i].trim(), line[i + 1..].trim()),
        None => (line, ""),
    };
    Value::insert_entry(entries, Value::str(key), Value::str(value));
}

fn integer_value(n: i128, target: &TypeSpec) -> Option<Value> {
    let (min, max) = target.integer_range()?;
    if n < min || n > max {
        return None;
    }
    let unsigned = matches!(
        target,
        TypeSpec::U8 | TypeSpec::U16 | TypeSpec::U32 | TypeSpec::U64
    );
    if unsigned {
        u64::try_from(n).ok().map(Value::UInt)
    } else {
        i64::try_from(n).ok().map(Value::Int)
    }
}

fn to_number(value: &Value, target: &TypeSpec) -> DiResult<Value> {
    let fail = || DiError::conversion(value, target, Some("out of range".into()));
    if target.is_float() {
        let f = match value {
            Value::Int(i) => *i as f64,
            Value::UInt(u) => *u as f64,
            Value::Float(f) => *f,
            _ => return Err(DiError::conversion(value, target, None)),
        };
        return Ok(match target {
            TypeSpec::F32 => Value::Float(f64::from(f as f32)),
            _ => Value::Float(f),
        });
    }
    let n = match value {
        Value::Int(i) => i128::from(*i),
        Value::UInt(u) => i128::from(*u),
        Value::Float(f) if f.is_finite() => f.trunc() as i128,
        _ => return Err(fail()),
    };
    integer_value(n, target).ok_or_else(fail)
}
