//! Objective-C type encodings and property attribute strings.
//!
//! The runtime describes every ivar, property and method argument with a
//! compact type encoding (`i`, `^v`, `{CGPoint=dd}`, `@"NSString"`, ...).
//! [`decode_type`] turns one into a C-style type name and
//! [`PropertyAttributes::parse`] splits a property attribute string.

use std::fmt;

use crate::error::{BurrowError, Result};

const SIMPLE_TYPES: &[(char, &str)] = &[
    ('c', "char"),
    ('i', "int"),
    ('s', "short"),
    ('l', "long"),
    ('q', "long long"),
    ('C', "unsigned char"),
    ('I', "unsigned int"),
    ('S', "unsigned short"),
    ('L', "unsigned long"),
    ('Q', "unsigned long long"),
    ('f', "float"),
    ('d', "double"),
    ('D', "long double"),
    ('B', "BOOL"),
    ('v', "void"),
    ('*', "char *"),
    ('#', "Class"),
    (':', "SEL"),
    ('?', "<unknown-type>"),
];

const SPECIFIERS: &[(char, &str)] = &[
    ('r', "const"),
    ('n', "in"),
    ('N', "inout"),
    ('o', "out"),
    ('O', "bycopy"),
    ('R', "byref"),
    ('V', "oneway"),
    ('A', "_Atomic"),
];

fn specifier(code: char) -> Option<&'static str>
{
    SPECIFIERS.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

fn simple_type(code: char) -> Option<&'static str>
{
    SIMPLE_TYPES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Decode a complete type encoding into a C-style type name.
///
/// ## Errors
///
/// `Serialization` when the encoding is malformed or has trailing text.
pub fn decode_type(encoding: &str) -> Result<String>
{
    let (decoded, rest) = decode_type_with_tail(encoding)?;
    if !rest.is_empty() {
        return Err(malformed(encoding, &format!("unexpected trailing {rest:?}")));
    }
    Ok(decoded)
}

/// Decode the first type of `encoding`, returning it with the unparsed rest.
///
/// ## Errors
///
/// `Serialization` when the leading type is malformed.
pub fn decode_type_with_tail(encoding: &str) -> Result<(String, &str)>
{
    let mut parser = Parser { source: encoding, rest: encoding };
    let decoded = parser.decode(false)?;
    Ok((decoded, parser.rest))
}

/// Storage width of a scalar or pointer encoding; `None` for aggregates,
/// bitfields and anything else without a fixed word-sized width.
#[must_use]
pub fn encoding_size(encoding: &str) -> Option<usize>
{
    match base_code(encoding)? {
        'c' | 'C' | 'B' => Some(1),
        's' | 'S' => Some(2),
        'i' | 'I' | 'l' | 'L' | 'f' => Some(4),
        'q' | 'Q' | 'd' | '@' | '#' | ':' | '*' | '^' => Some(8),
        _ => None,
    }
}

/// First type code of `encoding` after any qualifiers.
pub(crate) fn base_code(encoding: &str) -> Option<char>
{
    encoding.chars().find(|code| specifier(*code).is_none())
}

fn malformed(encoding: &str, reason: &str) -> BurrowError
{
    BurrowError::Serialization(format!("malformed type encoding {encoding:?}: {reason}"))
}

struct Parser<'a>
{
    source: &'a str,
    rest: &'a str,
}

impl<'a> Parser<'a>
{
    fn peek(&self) -> Option<char>
    {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char>
    {
        let code = self.peek()?;
        self.rest = &self.rest[code.len_utf8()..];
        Some(code)
    }

    fn eat(&mut self, expected: char) -> bool
    {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()>
    {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn error(&self, reason: &str) -> BurrowError
    {
        malformed(self.source, reason)
    }

    fn number(&mut self) -> Option<u64>
    {
        let digits = self.rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(self.rest.len());
        let (number, rest) = self.rest.split_at(digits);
        self.rest = rest;
        number.parse().ok()
    }

    fn quoted(&mut self) -> Result<&'a str>
    {
        self.expect('"')?;
        let end = self.rest.find('"').ok_or_else(|| self.error("unterminated name"))?;
        let (name, rest) = self.rest.split_at(end);
        self.rest = &rest[1..];
        Ok(name)
    }

    /// Decode one type. `brief` renders named aggregates without their body.
    fn decode(&mut self, brief: bool) -> Result<String>
    {
        let mut qualifiers = Vec::new();
        while let Some(name) = self.peek().and_then(specifier) {
            qualifiers.push(name);
            self.bump();
        }

        let code = self.bump().ok_or_else(|| self.error("unexpected end"))?;
        let base = match code {
            '^' => format!("{} *", self.decode(true)?),
            '@' => match self.peek() {
                Some('"') => {
                    let name = self.quoted()?;
                    if name.starts_with('<') {
                        format!("id{name}")
                    } else {
                        format!("{name} *")
                    }
                }
                Some('?') => {
                    self.bump();
                    "id /* block */".to_string()
                }
                _ => "id".to_string(),
            },
            '{' => self.aggregate('}', "struct", brief)?,
            '(' => self.aggregate(')', "union", brief)?,
            '[' => {
                let count = self.number().ok_or_else(|| self.error("array without length"))?;
                let element = self.decode(true)?;
                self.expect(']')?;
                format!("{element}[{count}]")
            }
            'b' => {
                let bits = self.number().ok_or_else(|| self.error("bitfield without width"))?;
                format!("unsigned int : {bits}")
            }
            other => simple_type(other)
                .ok_or_else(|| self.error(&format!("unknown type code '{other}'")))?
                .to_string(),
        };

        if qualifiers.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{} {base}", qualifiers.join(" ")))
        }
    }

    fn aggregate(&mut self, close: char, keyword: &str, brief: bool) -> Result<String>
    {
        let name_end = self
            .rest
            .find(|c: char| c == '=' || c == close)
            .ok_or_else(|| self.error(&format!("unterminated {keyword}")))?;
        let (name, rest) = self.rest.split_at(name_end);
        self.rest = rest;

        let mut fields = Vec::new();
        if self.eat('=') {
            while !self.eat(close) {
                if self.rest.is_empty() {
                    return Err(self.error(&format!("unterminated {keyword}")));
                }
                let field_name = if self.peek() == Some('"') { Some(self.quoted()?) } else { None };
                fields.push((field_name, self.decode(true)?));
            }
        } else {
            self.expect(close)?;
        }

        let anonymous = name.is_empty() || name == "?";
        let head = if anonymous { keyword.to_string() } else { format!("{keyword} {name}") };
        if fields.is_empty() || (brief && !anonymous) {
            return Ok(head);
        }
        let body: String = fields
            .iter()
            .enumerate()
            .map(|(index, (field_name, field_type))| match field_name {
                Some(field_name) => format!("{field_type} {field_name}; "),
                None => format!("{field_type} x{index}; "),
            })
            .collect();
        Ok(format!("{head} {{ {body}}}"))
    }
}

/// A decoded property attribute string such as `T@"NSString",C,N,V_name`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyAttributes
{
    /// C-style type name.
    pub type_name: String,
    /// Raw type encoding.
    pub type_encoding: String,
    /// Declaration attributes in source form (`readonly`, `getter=isOn`, ...).
    pub attributes: Vec<String>,
    /// Backing ivar, when the property is synthesized.
    pub ivar: Option<String>,
}

impl PropertyAttributes
{
    /// Parse a runtime attribute string.
    ///
    /// ## Errors
    ///
    /// `Serialization` when the type encoding is missing or malformed.
    pub fn parse(raw: &str) -> Result<Self>
    {
        let mut parsed = Self::default();
        for part in raw.split(',').filter(|part| !part.is_empty()) {
            let split = part.chars().next().map_or(0, char::len_utf8);
            let (code, value) = part.split_at(split);
            match code {
                "T" => {
                    parsed.type_encoding = value.to_string();
                    parsed.type_name = decode_type(value)?;
                }
                "R" => parsed.attributes.push("readonly".to_string()),
                "C" => parsed.attributes.push("copy".to_string()),
                "&" => parsed.attributes.push("strong".to_string()),
                "N" => parsed.attributes.push("nonatomic".to_string()),
                "W" => parsed.attributes.push("weak".to_string()),
                "D" => parsed.attributes.push("dynamic".to_string()),
                "P" => parsed.attributes.push("<garbage-collected>".to_string()),
                "G" => parsed.attributes.push(format!("getter={value}")),
                "S" => parsed.attributes.push(format!("setter={value}")),
                "t" => parsed.attributes.push(format!("encoding={value}")),
                "V" => parsed.ivar = Some(value.to_string()),
                _ => parsed.attributes.push(part.to_string()),
            }
        }
        if parsed.type_encoding.is_empty() {
            return Err(BurrowError::Serialization(format!("property attributes {raw:?} carry no type")));
        }
        Ok(parsed)
    }
}

impl fmt::Display for PropertyAttributes
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.attributes.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "({}) {}", self.attributes.join(", "), self.type_name)
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_decode_scalars_and_pointers()
    {
        assert_eq!(decode_type("i").unwrap(), "int");
        assert_eq!(decode_type("Q").unwrap(), "unsigned long long");
        assert_eq!(decode_type("^v").unwrap(), "void *");
        assert_eq!(decode_type("r*").unwrap(), "const char *");
        assert_eq!(decode_type("^^i").unwrap(), "int * *");
        assert_eq!(decode_type("Vv").unwrap(), "oneway void");
    }

    #[test]
    fn test_decode_objects()
    {
        assert_eq!(decode_type("@").unwrap(), "id");
        assert_eq!(decode_type("@\"NSString\"").unwrap(), "NSString *");
        assert_eq!(decode_type("@\"<NSCopying>\"").unwrap(), "id<NSCopying>");
        assert_eq!(decode_type("@?").unwrap(), "id /* block */");
        assert_eq!(decode_type("#").unwrap(), "Class");
    }

    #[test]
    fn test_decode_aggregates()
    {
        assert_eq!(decode_type("{CGPoint=dd}").unwrap(), "struct CGPoint { double x0; double x1; }");
        assert_eq!(
            decode_type("{CGRect={CGPoint=dd}{CGSize=dd}}").unwrap(),
            "struct CGRect { struct CGPoint x0; struct CGSize x1; }"
        );
        assert_eq!(decode_type("^{CGPoint=dd}").unwrap(), "struct CGPoint *");
        assert_eq!(decode_type("{?=\"x\"i\"y\"i}").unwrap(), "struct { int x; int y; }");
        assert_eq!(decode_type("(?=iq)").unwrap(), "union { int x0; long long x1; }");
        assert_eq!(decode_type("{opaque}").unwrap(), "struct opaque");
        assert_eq!(decode_type("[4i]").unwrap(), "int[4]");
        assert_eq!(decode_type("b3").unwrap(), "unsigned int : 3");
    }

    #[test]
    fn test_decode_rejects_malformed()
    {
        assert!(decode_type("").is_err());
        assert!(decode_type("{CGPoint=dd").is_err());
        assert!(decode_type("[i]").is_err());
        assert!(decode_type("ii").is_err());
        assert!(decode_type("%").is_err());
    }

    #[test]
    fn test_decode_with_tail()
    {
        let (first, rest) = decode_type_with_tail("@16:8").unwrap();
        assert_eq!(first, "id");
        assert_eq!(rest, "16:8");
    }

    #[test]
    fn test_encoding_size()
    {
        assert_eq!(encoding_size("c"), Some(1));
        assert_eq!(encoding_size("s"), Some(2));
        assert_eq!(encoding_size("f"), Some(4));
        assert_eq!(encoding_size("r^v"), Some(8));
        assert_eq!(encoding_size("@\"NSArray\""), Some(8));
        assert_eq!(encoding_size("{CGPoint=dd}"), None);
        assert_eq!(encoding_size("b1"), None);
    }

    #[test]
    fn test_property_attributes()
    {
        let name = PropertyAttributes::parse("T@\"NSString\",C,N,V_name").unwrap();
        assert_eq!(name.type_name, "NSString *");
        assert_eq!(name.attributes, vec!["copy", "nonatomic"]);
        assert_eq!(name.ivar.as_deref(), Some("_name"));
        assert_eq!(name.to_string(), "(copy, nonatomic) NSString *");

        let enabled = PropertyAttributes::parse("TB,R,N,GisEnabled").unwrap();
        assert_eq!(enabled.type_name, "BOOL");
        assert_eq!(enabled.attributes, vec!["readonly", "nonatomic", "getter=isEnabled"]);
        assert_eq!(enabled.ivar, None);

        assert!(PropertyAttributes::parse("R,N").is_err());
    }
}
