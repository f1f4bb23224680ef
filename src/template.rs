//! Purpose: Expand `{identifier}` placeholders inside configuration text.
//! Exports: `TemplateContext`, `render`, `placeholders`.
//! Role: Explicit substitution step applied before a document is parsed or written.
//! Invariants: `{{` and `}}` render as literal braces.
//! Invariants: Unknown identifiers are errors; nothing is silently left behind.
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};

pub const KNOWN_IDENTIFIERS: &[&str] = &[
    "host",
    "tls_verify",
    "requirements_format",
    "os_name",
    "os_version",
    "python_version",
    "cuda_version",
    "cpu_family",
    "cpu_model",
    "recommendation_type",
    "runtime_environment_name",
];

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

enum Token<'a> {
    Literal(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>, Error> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(['{', '}']) {
        if idx > 0 {
            tokens.push(Token::Literal(&rest[..idx]));
        }
        let tail = &rest[idx..];
        if tail.starts_with("{{") {
            tokens.push(Token::Brace('{'));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            tokens.push(Token::Brace('}'));
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("unmatched '}' in template")
                .with_hint("Use '}}' for a literal brace."));
        } else {
            let Some(end) = tail.find('}') else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("unterminated placeholder in template")
                    .with_hint("Close placeholders with '}' or use '{{' for a literal brace."));
            };
            let name = &tail[1..end];
            if !is_identifier(name) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid placeholder {{{name}}}"))
                    .with_hint("Placeholder names use letters, digits, and '_'."));
            }
            tokens.push(Token::Placeholder(name));
            rest = &tail[end + 1..];
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    Ok(tokens)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub fn render(text: &str, context: &TemplateContext) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    for token in tokenize(text)? {
        match token {
            Token::Literal(literal) => out.push_str(literal),
            Token::Brace(brace) => out.push(brace),
            Token::Placeholder(name) => {
                let value = context.get(name).ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("no value for placeholder {{{name}}}"))
                        .with_hint(format!("Known placeholders: {}.", KNOWN_IDENTIFIERS.join(", ")))
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Identifiers referenced by `text`, in order of first appearance.
///
/// Malformed text yields no placeholders; `render` reports the syntax error.
pub fn placeholders(text: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(text) else {
        return Vec::new();
    };
    let mut seen = Vec::<String>::new();
    for token in tokens {
        if let Token::Placeholder(name) = token {
            if !seen.iter().any(|existing| existing == name) {
                seen.push(name.to_string());
            }
        }
    }
    seen
}
