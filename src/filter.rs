//! LDAP-style provider filters.
//!
//! Dependency trackers select providers with filters such as
//! `(&(objectClass=Greeter)(|(lang=en)(lang=fr)))`. Supported operators are
//! `&`, `|`, `!`, equality, presence (`attr=*`), substring (`attr=a*b`),
//! `>=` and `<=`. Attribute names match case-insensitively; a multi-valued
//! property matches when any of its elements matches.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{DiError, DiResult};
use crate::value::{Properties, Value};

/// Interface names a provider is published under.
pub const OBJECT_CLASS: &str = "objectClass";
/// Registry-assigned provider id.
pub const SERVICE_ID: &str = "service.id";
/// Provider ranking; higher wins, default 0.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Name of the component a container published.
pub const COMPONENT_NAME: &str = "component.name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
    /// Literal parts around each `*`; an empty first/last part anchors nothing
    Substring(String, Vec<String>),
    GreaterEq(String, String),
    LessEq(String, String),
}

impl Filter {
    pub fn parse(text: &str) -> DiResult<Filter> {
        text.parse()
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equal(attribute.into(), value.into())
    }

    /// Matches providers published under `interface`.
    pub fn interface(interface: impl Into<String>) -> Self {
        Filter::Equal(OBJECT_CLASS.to_string(), interface.into())
    }

    /// Combined filter for a reference declaration.
    ///
    /// With nothing to constrain, the result matches every provider that has
    /// an `objectClass`.
    pub fn for_reference(
        interface: Option<&str>,
        component_name: Option<&str>,
        extra: Option<&str>,
    ) -> DiResult<Filter> {
        let mut parts = Vec::new();
        if let Some(interface) = interface {
            parts.push(Filter::interface(interface));
        }
        if let Some(name) = component_name {
            parts.push(Filter::equal(COMPONENT_NAME, name));
        }
        if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
            parts.push(extra.parse()?);
        }
        Ok(match parts.len() {
            0 => Filter::Present(OBJECT_CLASS.to_string()),
            1 => parts.remove(0),
            _ => Filter::And(parts),
        })
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Filter::Not(filter) => !filter.matches(properties),
            Filter::Present(attr) => lookup(properties, attr).is_some(),
            Filter::Equal(attr, operand) => lookup(properties, attr)
                .map(|v| any_value(v, &|v| compare(v, operand) == Some(Ordering::Equal)))
                .unwrap_or(false),
            Filter::GreaterEq(attr, operand) => lookup(properties, attr)
                .map(|v| {
                    any_value(v, &|v| {
                        matches!(compare(v, operand), Some(Ordering::Greater | Ordering::Equal))
                    })
                })
                .unwrap_or(false),
            Filter::LessEq(attr, operand) => lookup(properties, attr)
                .map(|v| {
                    any_value(v, &|v| {
                        matches!(compare(v, operand), Some(Ordering::Less | Ordering::Equal))
                    })
                })
                .unwrap_or(false),
            Filter::Substring(attr, parts) => lookup(properties, attr)
                .map(|v| any_value(v, &|v| v.as_str().map(|s| substring_match(s, parts)).unwrap_or(false)))
                .unwrap_or(false),
        }
    }
}

fn lookup<'a>(properties: &'a Properties, attribute: &str) -> Option<&'a Value> {
    properties.get(attribute).or_else(|| {
        properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v)
    })
}

fn any_value(value: &Value, check: &dyn Fn(&Value) -> bool) -> bool {
    match value.as_slice() {
        Some(items) => items.iter().any(check),
        None => check(value),
    }
}

fn compare(value: &Value, operand: &str) -> Option<Ordering> {
    let operand = operand.trim();
    match value {
        Value::Str(s) => Some(s.as_str().cmp(operand)),
        Value::Int(i) => operand.parse::<i64>().ok().map(|o| i.cmp(&o)),
        Value::UInt(u) => operand.parse::<u64>().ok().map(|o| u.cmp(&o)),
        Value::Float(f) => operand.parse::<f64>().ok().and_then(|o| f.partial_cmp(&o)),
        Value::Bool(b) => operand
            .to_ascii_lowercase()
            .parse::<bool>()
            .ok()
            .map(|o| b.cmp(&o)),
        Value::Char(c) => {
            let mut chars = operand.chars();
            match (chars.next(), chars.next()) {
                (Some(o), None) => Some(c.cmp(&o)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return true;
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

fn escape(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            write!(f, "\\{c}")?;
        } else {
            write!(f, "{c}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                let op = if matches!(self, Filter::And(_)) { '&' } else { '|' };
                write!(f, "({op}")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Present(attr) => write!(f, "({attr}=*)"),
            Filter::Equal(attr, value) => {
                write!(f, "({attr}=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::GreaterEq(attr, value) => {
                write!(f, "({attr}>=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::LessEq(attr, value) => {
                write!(f, "({attr}<=")?;
                escape(value, f)?;
                f.write_str(")")
            }
            Filter::Substring(attr, parts) => {
                write!(f, "({attr}=")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    escape(part, f)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = DiError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let wrapped;
        let source = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            &wrapped
        };
        let mut parser = FilterParser {
            text,
            chars: source.chars().collect(),
            pos: 0,
        };
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(filter)
    }
}

struct FilterParser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl FilterParser<'_> {
    fn error(&self, reason: &str) -> DiError {
        DiError::InvalidFilter {
            filter: self.text.to_string(),
            reason: format!("{reason} at offset {}", self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> DiResult<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn filter(&mut self) -> DiResult<Filter> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> DiResult<Vec<Filter>> {
        let mut filters = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            filters.push(self.filter()?);
        }
        Ok(filters)
    }

    fn item(&mut self) -> DiResult<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attribute: String = self.chars[start..self.pos].iter().collect();
        let attribute = attribute.trim().to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute"));
        }
        let op = match (self.peek(), self.chars.get(self.pos + 1).copied()) {
            (Some('='), _) => {
                self.pos += 1;
                '='
            }
            (Some(c @ ('<' | '>' | '~')), Some('=')) => {
                self.pos += 2;
                c
            }
            _ => return Err(self.error("expected operator")),
        };
        let parts = self.value()?;
        Ok(match op {
            '>' => Filter::GreaterEq(attribute, join_literal(parts, self)?),
            '<' => Filter::LessEq(attribute, join_literal(parts, self)?),
            '~' => Filter::Equal(attribute, join_literal(parts, self)?),
            _ if parts.len() == 2 && parts[0].is_empty() && parts[1].is_empty() => {
                Filter::Present(attribute)
            }
            _ if parts.len() == 1 => {
                let mut parts = parts;
                Filter::Equal(attribute, parts.remove(0))
            }
            _ => Filter::Substring(attribute, parts),
        })
    }

    /// Reads a value up to the closing paren, split on unescaped `*`.
    fn value(&mut self) -> DiResult<Vec<String>> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    parts.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(parts)
    }
}

fn join_literal(parts: Vec<String>, parser: &FilterParser<'_>) -> DiResult<String> {
    if parts.len() == 1 {
        Ok(parts.into_iter().next().unwrap_or_default())
    } else {
        Err(parser.error("wildcards are only allowed with '='"))
    }
}
