//! Target type descriptors used by the value converter.
//!
//! Metadata names types as text (`"i32"`, `"list<string>"`, `"map<string, i64>"`,
//! `"u8[]"`, `"Greeter"`); [`TypeSpec`] is the parsed form. Names that are not
//! built in are kept as [`TypeSpec::Named`] and resolved against the classes and
//! interfaces the construction backend knows about.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DiError;

/// A conversion target type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeSpec {
    /// Accepts any value unchanged
    Any,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    String,
    Duration,
    Path,
    IpAddr,
    SocketAddr,
    Regex,
    /// Locale tag split on `_` into language, country and variant
    Locale,
    /// String keyed property map
    Properties,
    /// Closed set of variant names
    Enum { name: String, variants: Vec<String> },
    List(Box<TypeSpec>),
    Set(Box<TypeSpec>),
    Array(Box<TypeSpec>),
    Map(Box<TypeSpec>, Box<TypeSpec>),
    /// A backend class or interface name
    Named(String),
}

impl TypeSpec {
    pub fn list(element: TypeSpec) -> Self {
        TypeSpec::List(Box::new(element))
    }

    pub fn set(element: TypeSpec) -> Self {
        TypeSpec::Set(Box::new(element))
    }

    pub fn array(element: TypeSpec) -> Self {
        TypeSpec::Array(Box::new(element))
    }

    pub fn map(key: TypeSpec, value: TypeSpec) -> Self {
        TypeSpec::Map(Box::new(key), Box::new(value))
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeSpec::Named(name.into())
    }

    /// Builds an enumeration type from its variant names.
    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeSpec::Enum {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Array, collection and map targets are always re-checked element by element.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            TypeSpec::List(_) | TypeSpec::Set(_) | TypeSpec::Array(_) | TypeSpec::Map(..)
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeSpec::I8
                | TypeSpec::I16
                | TypeSpec::I32
                | TypeSpec::I64
                | TypeSpec::U8
                | TypeSpec::U16
                | TypeSpec::U32
                | TypeSpec::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeSpec::F32 | TypeSpec::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Inclusive range for integer targets.
    pub(crate) fn integer_range(&self) -> Option<(i128, i128)> {
        let range = match self {
            TypeSpec::I8 => (i8::MIN as i128, i8::MAX as i128),
            TypeSpec::I16 => (i16::MIN as i128, i16::MAX as i128),
            TypeSpec::I32 => (i32::MIN as i128, i32::MAX as i128),
            TypeSpec::I64 => (i64::MIN as i128, i64::MAX as i128),
            TypeSpec::U8 => (0, u8::MAX as i128),
            TypeSpec::U16 => (0, u16::MAX as i128),
            TypeSpec::U32 => (0, u32::MAX as i128),
            TypeSpec::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    fn from_simple_name(name: &str) -> Option<Self> {
        let spec = match name {
            "any" | "object" => TypeSpec::Any,
            "bool" | "boolean" => TypeSpec::Bool,
            "i8" | "byte" => TypeSpec::I8,
            "i16" | "short" => TypeSpec::I16,
            "i32" | "int" => TypeSpec::I32,
            "i64" | "long" => TypeSpec::I64,
            "u8" => TypeSpec::U8,
            "u16" => TypeSpec::U16,
            "u32" => TypeSpec::U32,
            "u64" => TypeSpec::U64,
            "f32" | "float" => TypeSpec::F32,
            "f64" | "double" => TypeSpec::F64,
            "char" => TypeSpec::Char,
            "string" | "String" | "str" => TypeSpec::String,
            "duration" => TypeSpec::Duration,
            "path" => TypeSpec::Path,
            "ip" | "ipaddr" => TypeSpec::IpAddr,
            "socket" | "socketaddr" => TypeSpec::SocketAddr,
            "regex" => TypeSpec::Regex,
            "locale" => TypeSpec::Locale,
            "properties" | "props" => TypeSpec::Properties,
            _ => return None,
        };
        Some(spec)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Any => f.write_str("any"),
            TypeSpec::Bool => f.write_str("bool"),
            TypeSpec::I8 => f.write_str("i8"),
            TypeSpec::I16 => f.write_str("i16"),
            TypeSpec::I32 => f.write_str("i32"),
            TypeSpec::I64 => f.write_str("i64"),
            TypeSpec::U8 => f.write_str("u8"),
            TypeSpec::U16 => f.write_str("u16"),
            TypeSpec::U32 => f.write_str("u32"),
            TypeSpec::U64 => f.write_str("u64"),
            TypeSpec::F32 => f.write_str("f32"),
            TypeSpec::F64 => f.write_str("f64"),
            TypeSpec::Char => f.write_str("char"),
            TypeSpec::String => f.write_str("string"),
            TypeSpec::Duration => f.write_str("duration"),
            TypeSpec::Path => f.write_str("path"),
            TypeSpec::IpAddr => f.write_str("ipaddr"),
            TypeSpec::SocketAddr => f.write_str("socketaddr"),
            TypeSpec::Regex => f.write_str("regex"),
            TypeSpec::Locale => f.write_str("locale"),
            TypeSpec::Properties => f.write_str("properties"),
            TypeSpec::Enum { name, variants } => write!(f, "enum {}({})", name, variants.join("|")),
            TypeSpec::List(e) => write!(f, "list<{e}>"),
            TypeSpec::Set(e) => write!(f, "set<{e}>"),
            TypeSpec::Array(e) => write!(f, "{e}[]"),
            TypeSpec::Map(k, v) => write!(f, "map<{k}, {v}>"),
            TypeSpec::Named(n) => f.write_str(n),
        }
    }
}

impl FromStr for TypeSpec {
    type Err = DiError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { input: text, pos: 0 };
        let spec = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != text.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(spec)
    }
}

impl TryFrom<String> for TypeSpec {
    type Error = DiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeSpec> for String {
    fn from(value: TypeSpec) -> Self {
        value.to_string()
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> DiError {
        DiError::definition(format!(
            "invalid type '{}' at offset {}: {}",
            self.input, self.pos, reason
        ))
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&'a str, DiError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '$' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected a type name"));
        }
        Ok(&self.input[start..self.pos])
    }

    fn parse_type(&mut self) -> Result<TypeSpec, DiError> {
        let name = self.ident()?;
        let mut spec = if self.eat('<') {
            let first = self.parse_type()?;
            let generic = match name {
                "list" | "vec" | "List" | "Vec" => TypeSpec::list(first),
                "set" | "Set" => TypeSpec::set(first),
                "map" | "Map" => {
                    if !self.eat(',') {
                        return Err(self.error("map requires key and value types"));
                    }
                    let second = self.parse_type()?;
                    TypeSpec::map(first, second)
                }
                other => {
                    return Err(self.error(&format!("'{other}' does not take type arguments")))
                }
            };
            if !self.eat('>') {
                return Err(self.error("expected '>'"));
            }
            generic
        } else {
            match name {
                "list" | "vec" => TypeSpec::list(TypeSpec::Any),
                "set" => TypeSpec::set(TypeSpec::Any),
                "map" => TypeSpec::map(TypeSpec::Any, TypeSpec::Any),
                other => TypeSpec::from_simple_name(other)
                    .unwrap_or_else(|| TypeSpec::Named(other.to_string())),
            }
        };
        while self.eat('[') {
            if !self.eat(']') {
                return Err(self.error("expected ']'"));
            }
            spec = TypeSpec::array(spec);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generic_types() {
        let spec: TypeSpec = "map<string, list<i32>>".parse().unwrap();
        assert_eq!(
            spec,
            TypeSpec::map(TypeSpec::String, TypeSpec::list(TypeSpec::I32))
        );
        assert_eq!(spec.to_string(), "map<string, list<i32>>");
    }

    #[test]
    fn parses_arrays_and_named_types() {
        assert_eq!(
            "u8[]".parse::<TypeSpec>().unwrap(),
            TypeSpec::array(TypeSpec::U8)
        );
        assert_eq!(
            "Greeter[][]".parse::<TypeSpec>().unwrap(),
            TypeSpec::array(TypeSpec::array(TypeSpec::named("Greeter")))
        );
        assert_eq!("int".parse::<TypeSpec>().unwrap(), TypeSpec::I32);
    }

    #[test]
    fn rejects_malformed_types() {
        assert!("list<i32".parse::<TypeSpec>().is_err());
        assert!("map<string>".parse::<TypeSpec>().is_err());
        assert!("i32<u8>".parse::<TypeSpec>().is_err());
        assert!("".parse::<TypeSpec>().is_err());
        assert!("a b".parse::<TypeSpec>().is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let spec: TypeSpec = serde_json::from_str("\"set<char>\"").unwrap();
        assert_eq!(spec, TypeSpec::set(TypeSpec::Char));
        assert_eq!(serde_json::to_string(&spec).unwrap(), "\"set<char>\"");
    }
}
