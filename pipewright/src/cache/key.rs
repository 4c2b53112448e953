//! Cache key templates.
//!
//! A key is a literal string with optional `$NAME` / `${NAME}` variable
//! references. Keys are validated when the definition is loaded and expanded
//! once per run against the trigger's variables.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of a cache key in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Key used when a template expands to nothing.
pub const FALLBACK_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed, validated cache key template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKeyTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl CacheKeyTemplate {
    /// Parses and validates a key template.
    ///
    /// # Errors
    ///
    /// Returns the reason the key is malformed.
    pub fn parse(raw: &str) -> Result<Self, String> {
        check_key_text(raw)?;

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let name = match chars.peek() {
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err("unterminated `${` variable reference".to_string());
                    }
                    name
                }
                Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                    let mut name = String::new();
                    while let Some(c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || *c == '_' {
                            name.push(*c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    name
                }
                _ => return Err("`$` must be followed by a variable name".to_string()),
            };

            if !is_variable_name(&name) {
                return Err(format!("'{name}' is not a valid variable name"));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(name));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Returns the template text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the names of referenced variables in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Returns true if both templates always expand to the same key.
    ///
    /// `$NAME` and `${NAME}` are the same reference. Bind known variables
    /// with [`bind`](Self::bind) first to compare the keys they produce.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.segments == other.segments
    }

    /// Substitutes every variable `lookup` resolves, leaving the others as
    /// references. Substituted values get the same `/` to `-` rewrite as
    /// [`expand`](Self::expand).
    #[must_use]
    pub fn bind<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> Self {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => push_literal(&mut segments, text),
                Segment::Variable(name) => match lookup(name) {
                    Some(value) => push_literal(&mut segments, &value.replace('/', "-")),
                    None => segments.push(Segment::Variable(name.clone())),
                },
            }
        }

        let raw = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Variable(name) => format!("${{{name}}}"),
            })
            .collect();
        Self { raw, segments }
    }

    /// Returns true if the template references no variables.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.variables().next().is_none()
    }

    /// Expands the template.
    ///
    /// Missing variables expand to an empty string, `/` produced by
    /// expansion becomes `-`, and an empty result becomes [`FALLBACK_KEY`].
    #[must_use]
    pub fn expand(&self, vars: &BTreeMap<String, String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    if let Some(value) = vars.get(name) {
                        out.push_str(&value.replace('/', "-"));
                    }
                }
            }
        }

        let out = out.trim().to_string();
        if out.is_empty() || out == "." || out == ".." {
            return FALLBACK_KEY.to_string();
        }
        if out.len() > MAX_KEY_LEN {
            let mut end = MAX_KEY_LEN;
            while !out.is_char_boundary(end) {
                end -= 1;
            }
            return out[..end].to_string();
        }
        out
    }
}

impl fmt::Display for CacheKeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for CacheKeyTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Literal(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_string()));
    }
}

fn check_key_text(raw: &str) -> Result<(), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("key is empty".to_string());
    }
    if trimmed == "." || trimmed == ".." {
        return Err("key cannot be `.` or `..`".to_string());
    }
    if raw.contains('/') {
        return Err("key cannot contain `/`".to_string());
    }
    if raw.to_ascii_lowercase().contains("%2f") {
        return Err("key cannot contain an encoded `/`".to_string());
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(format!("key is longer than {MAX_KEY_LEN} bytes"));
    }
    Ok(())
}

/// Returns true if `name` is a valid variable name (`[A-Za-z_][A-Za-z0-9_]*`).
#[must_use]
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
