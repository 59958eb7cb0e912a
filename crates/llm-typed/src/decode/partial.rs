//! Tolerant JSON parsing for incomplete input.
//!
//! [`parse_partial`] accepts any prefix of a valid JSON document and
//! returns the structure seen so far, marking every node that the end of
//! input cut short. It rejects input that no continuation could make
//! valid, so a syntax error is reported as soon as it is seen.
//!
//! A string or number is only complete once a character after it has
//! been seen. `"Al` and `3` at the end of the buffer are incomplete
//! because more characters may follow.

use serde_json::{Number, Value};

/// A JSON value parsed from a possibly incomplete document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PartialJson {
    Null,
    Bool(bool),
    Number {
        raw: String,
        complete: bool,
    },
    String {
        value: String,
        complete: bool,
    },
    Array {
        items: Vec<PartialJson>,
        complete: bool,
    },
    /// Entries appear once their key is complete and their value has
    /// started.
    Object {
        entries: Vec<(String, PartialJson)>,
        complete: bool,
    },
}

impl PartialJson {
    pub(crate) fn is_complete(&self) -> bool {
        match self {
            Self::Null | Self::Bool(_) => true,
            Self::Number { complete, .. }
            | Self::String { complete, .. }
            | Self::Array { complete, .. }
            | Self::Object { complete, .. } => *complete,
        }
    }

    /// Lifts a fully parsed value.
    pub(crate) fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number {
                raw: n.to_string(),
                complete: true,
            },
            Value::String(s) => Self::String {
                value: s.clone(),
                complete: true,
            },
            Value::Array(items) => Self::Array {
                items: items.iter().map(Self::from_value).collect(),
                complete: true,
            },
            Value::Object(map) => Self::Object {
                entries: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_value(v)))
                    .collect(),
                complete: true,
            },
        }
    }

    /// The node as a plain JSON value, with incomplete parts as they
    /// stand.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number { raw, .. } => raw
                .parse::<Number>()
                .map_or_else(|_| Value::String(raw.clone()), Value::Number),
            Self::String { value, .. } => Value::String(value.clone()),
            Self::Array { items, .. } => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Object { entries, .. } => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

/// A syntax error no continuation of the input can repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxError {
    pub(crate) message: String,
    pub(crate) offset: usize,
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

/// Parses a prefix of a JSON document.
///
/// Returns `Ok(None)` when no value has started yet, or when the input
/// stops inside a literal such as `tr`.
pub(crate) fn parse_partial(input: &str) -> Result<Option<PartialJson>, SyntaxError> {
    let mut parser = Parser {
        src: input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if value.as_ref().is_some_and(PartialJson::is_complete) && !parser.at_end() {
        return Err(parser.error("trailing characters after value"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn unexpected(&self) -> SyntaxError {
        let found = self.src[self.pos..].chars().next().unwrap_or(' ');
        self.error(format!("unexpected character `{found}`"))
    }

    fn value(&mut self) -> Result<Option<PartialJson>, SyntaxError> {
        self.skip_ws();
        match self.peek() {
            None => Ok(None),
            Some(b'{') => self.object().map(Some),
            Some(b'[') => self.array().map(Some),
            Some(b'"') => self.string().map(Some),
            Some(b't') => self.literal("true", PartialJson::Bool(true)),
            Some(b'f') => self.literal("false", PartialJson::Bool(false)),
            Some(b'n') => self.literal("null", PartialJson::Null),
            Some(b'-' | b'0'..=b'9') => self.number().map(Some),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn literal(
        &mut self,
        word: &str,
        value: PartialJson,
    ) -> Result<Option<PartialJson>, SyntaxError> {
        let rest = &self.src[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            Ok(Some(value))
        } else if word.starts_with(rest) {
            self.pos = self.bytes.len();
            Ok(None)
        } else {
            Err(self.error(format!("invalid literal, expected `{word}`")))
        }
    }

    fn number(&mut self) -> Result<PartialJson, SyntaxError> {
        let start = self.pos;
        while let Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') = self.peek() {
            self.pos += 1;
        }
        let raw = self.src[start..self.pos].to_owned();
        if self.at_end() {
            return Ok(PartialJson::Number {
                raw,
                complete: false,
            });
        }
        if raw.parse::<Number>().is_err() {
            return Err(SyntaxError {
                message: format!("invalid number `{raw}`"),
                offset: start,
            });
        }
        Ok(PartialJson::Number {
            raw,
            complete: true,
        })
    }

    fn string(&mut self) -> Result<PartialJson, SyntaxError> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            let run_start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'"' || b == b'\\' {
                    break;
                }
                self.pos += 1;
            }
            value.push_str(&self.src[run_start..self.pos]);

            match self.peek() {
                None => {
                    return Ok(PartialJson::String {
                        value,
                        complete: false,
                    });
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(PartialJson::String {
                        value,
                        complete: true,
                    });
                }
                Some(_) => match self.escape()? {
                    Some(c) => value.push(c),
                    // Cut inside an escape: hold it back until the rest
                    // arrives.
                    None => {
                        return Ok(PartialJson::String {
                            value,
                            complete: false,
                        });
                    }
                },
            }
        }
    }

    /// Decodes one escape sequence starting at the backslash. Returns
    /// `None` if the input ends before the sequence does.
    fn escape(&mut self) -> Result<Option<char>, SyntaxError> {
        self.pos += 1;
        let Some(b) = self.peek() else {
            return Ok(None);
        };
        self.pos += 1;
        let c = match b {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => return self.unicode_escape(),
            _ => {
                self.pos -= 1;
                return Err(self.error("invalid escape sequence"));
            }
        };
        Ok(Some(c))
    }

    fn hex4(&mut self) -> Result<Option<u16>, SyntaxError> {
        let mut code: u16 = 0;
        for _ in 0..4 {
            let Some(b) = self.peek() else {
                return Ok(None);
            };
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ => return Err(self.error("invalid unicode escape")),
            };
            code = code * 16 + u16::from(digit);
            self.pos += 1;
        }
        Ok(Some(code))
    }

    fn unicode_escape(&mut self) -> Result<Option<char>, SyntaxError> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return match char::from_u32(u32::from(high)) {
                Some(c) => Ok(Some(c)),
                None => Err(self.error("lone low surrogate in unicode escape")),
            };
        }

        // A high surrogate must be followed by `\uDC00`..`\uDFFF`.
        for expected in [b'\\', b'u'] {
            match self.peek() {
                None => return Ok(None),
                Some(b) if b == expected => self.pos += 1,
                Some(_) => return Err(self.error("unpaired surrogate in unicode escape")),
            }
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(self.error("invalid low surrogate in unicode escape"));
        }
        let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
        Ok(char::from_u32(code))
    }

    fn array(&mut self) -> Result<PartialJson, SyntaxError> {
        self.pos += 1;
        let mut items = Vec::new();
        let incomplete = |items| PartialJson::Array {
            items,
            complete: false,
        };

        self.skip_ws();
        match self.peek() {
            None => return Ok(incomplete(items)),
            Some(b']') => {
                self.pos += 1;
                return Ok(PartialJson::Array {
                    items,
                    complete: true,
                });
            }
            Some(_) => {}
        }

        loop {
            let Some(item) = self.value()? else {
                return Ok(incomplete(items));
            };
            items.push(item);
            self.skip_ws();
            match self.peek() {
                None => return Ok(incomplete(items)),
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some(b']') {
                        return Err(self.error("trailing comma in array"));
                    }
                }
                Some(b']') => {
                    self.pos += 1;
                    return Ok(PartialJson::Array {
                        items,
                        complete: true,
                    });
                }
                Some(_) => return Err(self.error("expected `,` or `]`")),
            }
        }
    }

    fn object(&mut self) -> Result<PartialJson, SyntaxError> {
        self.pos += 1;
        let mut entries = Vec::new();
        let incomplete = |entries| PartialJson::Object {
            entries,
            complete: false,
        };

        self.skip_ws();
        match self.peek() {
            None => return Ok(incomplete(entries)),
            Some(b'}') => {
                self.pos += 1;
                return Ok(PartialJson::Object {
                    entries,
                    complete: true,
                });
            }
            Some(_) => {}
        }

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(incomplete(entries)),
                Some(b'"') => {}
                Some(_) => return Err(self.error("expected string key")),
            }
            let PartialJson::String {
                value: key,
                complete: true,
            } = self.string()?
            else {
                return Ok(incomplete(entries));
            };

            self.skip_ws();
            match self.peek() {
                None => return Ok(incomplete(entries)),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.error("expected `:` after key")),
            }

            let Some(value) = self.value()? else {
                return Ok(incomplete(entries));
            };
            entries.push((key, value));

            self.skip_ws();
            match self.peek() {
                None => return Ok(incomplete(entries)),
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some(b'}') {
                        return Err(self.error("trailing comma in object"));
                    }
                }
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(PartialJson::Object {
                        entries,
                        complete: true,
                    });
                }
                Some(_) => return Err(self.error("expected `,` or `}`")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(input: &str) -> PartialJson {
        parse_partial(input).unwrap().unwrap()
    }

    #[test]
    fn test_empty_and_whitespace_have_no_value() {
        assert_eq!(parse_partial("").unwrap(), None);
        assert_eq!(parse_partial("  \n").unwrap(), None);
    }

    #[test]
    fn test_partial_literal_has_no_value() {
        assert_eq!(parse_partial("tr").unwrap(), None);
        assert_eq!(parse("true"), PartialJson::Bool(true));
        assert!(parse_partial("trap").is_err());
    }

    #[test]
    fn test_unterminated_string_is_incomplete() {
        assert_eq!(
            parse(r#""Al"#),
            PartialJson::String {
                value: "Al".into(),
                complete: false
            }
        );
    }

    #[test]
    fn test_number_at_end_is_incomplete() {
        assert_eq!(
            parse("3"),
            PartialJson::Number {
                raw: "3".into(),
                complete: false
            }
        );
        assert!(parse("[30]").is_complete());
    }

    #[test]
    fn test_object_prefixes() {
        let p = parse(r#"{"na"#);
        assert_eq!(
            p,
            PartialJson::Object {
                entries: vec![],
                complete: false
            }
        );

        let p = parse(r#"{"name":"Alice","age":3"#);
        let PartialJson::Object { entries, complete } = p else {
            panic!("expected object");
        };
        assert!(!complete);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].1.is_complete());
        assert!(!entries[1].1.is_complete());
    }

    #[test]
    fn test_key_without_value_is_omitted() {
        let PartialJson::Object { entries, .. } = parse(r#"{"a":1,"b":"#) else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_partial_unicode_escape_is_buffered() {
        assert_eq!(
            parse(r#""caf\u00"#),
            PartialJson::String {
                value: "caf".into(),
                complete: false
            }
        );
        assert_eq!(
            parse(r#""café""#),
            PartialJson::String {
                value: "café".into(),
                complete: true
            }
        );
    }

    #[test]
    fn test_surrogate_pair_combined() {
        assert_eq!(
            parse(r#""\ud83d"#),
            PartialJson::String {
                value: String::new(),
                complete: false
            }
        );
        assert_eq!(
            parse(r#""😀""#),
            PartialJson::String {
                value: "😀".into(),
                complete: true
            }
        );
    }

    #[test]
    fn test_syntax_errors_are_reported() {
        for bad in [r#"{"a" 1}"#, "[1,]", "{,", "[1 2]", r#""\q""#, "-x", "{} x", "@"] {
            assert!(parse_partial(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_to_value_and_from_value() {
        let v = json!({"a": [1, 2.5, "x"], "b": null, "c": true});
        let p = PartialJson::from_value(&v);
        assert!(p.is_complete());
        assert_eq!(p.to_value(), v);
    }

    #[test]
    fn test_multibyte_content_split_points() {
        let doc = r#"{"city":"Zürich","note":"naïve \"q\""}"#;
        for (i, _) in doc.char_indices() {
            assert!(parse_partial(&doc[..i]).is_ok(), "prefix {i}");
        }
        assert!(parse(doc).is_complete());
    }
}
