//! Glob-style topic patterns.

use regex::Regex;

use crate::BusError;

/// Compiled topic pattern.
///
/// Supports `*` (any run of characters, including none), `?` (exactly one
/// character), `[...]` character classes with ranges and `[!...]` negation,
/// and `\` to escape the next character.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    regex: Regex,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Result<Self, BusError> {
        let translated = translate(pattern)?;
        let regex = Regex::new(&translated).map_err(|e| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn translate(pattern: &str) -> Result<String, BusError> {
    let invalid = |reason: &str| BusError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                let mut first = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '!' | '^' if first => class.push('^'),
                        '\\' => {
                            let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                            class.push('\\');
                            class.push(escaped);
                        }
                        '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(inner);
                        }
                        other => class.push(other),
                    }
                    first = false;
                }
                if !closed {
                    return Err(invalid("unterminated character class"));
                }
                class.push(']');
                out.push_str(&class);
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Ok(out)
}
