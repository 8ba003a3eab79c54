use super::TemplateError;
use std::fmt::{self, Display, Formatter};

/// A value handed to a template placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatValue {
    Integer(i64),
    Text(String),
}

impl FormatValue {
    fn kind(&self) -> &'static str {
        match self {
            FormatValue::Integer(_) => "integer",
            FormatValue::Text(_) => "text",
        }
    }
}

impl Display for FormatValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Integer(value) => write!(f, "{value}"),
            FormatValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for FormatValue {
    fn from(value: i64) -> Self {
        FormatValue::Integer(value)
    }
}

impl From<&str> for FormatValue {
    fn from(value: &str) -> Self {
        FormatValue::Text(value.to_string())
    }
}

impl From<String> for FormatValue {
    fn from(value: String) -> Self {
        FormatValue::Text(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// `%d`
    Integer,
    /// `%s`
    Text,
    /// `%v`
    Any,
}

impl Verb {
    fn symbol(self) -> char {
        match self {
            Verb::Integer => 'd',
            Verb::Text => 's',
            Verb::Any => 'v',
        }
    }

    fn accepts(self, value: &FormatValue) -> bool {
        match (self, value) {
            (Verb::Any, _) => true,
            (Verb::Integer, FormatValue::Integer(_)) => true,
            (Verb::Text, FormatValue::Text(_)) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Verb),
}

/// Positional format string: `%d`, `%s`, `%v` placeholders and `%%` escapes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatString {
    segments: Vec<Segment>,
    placeholders: usize,
}

impl FormatString {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut placeholders = 0;
        let mut chars = text.char_indices();

        while let Some((position, ch)) = chars.next() {
            if ch != '%' {
                literal.push(ch);
                continue;
            }

            let verb = match chars.next() {
                Some((_, '%')) => {
                    literal.push('%');
                    continue;
                }
                Some((_, 'd')) => Verb::Integer,
                Some((_, 's')) => Verb::Text,
                Some((_, 'v')) => Verb::Any,
                Some((_, other)) => {
                    return Err(TemplateError::UnknownVerb {
                        verb: other,
                        position,
                    })
                }
                None => return Err(TemplateError::DanglingPercent),
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(verb));
            placeholders += 1;
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            segments,
            placeholders,
        })
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    pub fn render(&self, args: &[FormatValue]) -> Result<String, TemplateError> {
        if args.len() != self.placeholders {
            return Err(TemplateError::ArgumentCount {
                expected: self.placeholders,
                actual: args.len(),
            });
        }

        let mut out = String::new();
        let mut next = args.iter().enumerate();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(verb) => {
                    // Count was checked above.
                    let Some((index, value)) = next.next() else {
                        break;
                    };
                    if !verb.accepts(value) {
                        return Err(TemplateError::VerbMismatch {
                            index,
                            verb: verb.symbol(),
                            found: value.kind(),
                        });
                    }
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}
