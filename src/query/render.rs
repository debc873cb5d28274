use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::catalog::QueryTemplate;
use crate::query::params::ParameterSet;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

// Values allowed to be written into the statement text (the backtick table path).
static IDENTIFIER_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("identifier pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Template missing parameter: '{0}'")]
    MissingParameter(String),

    #[error("Parameter '{0}' is not a safe identifier and cannot be placed outside a string literal")]
    UnsafeIdentifier(String),

    #[error("Malformed template text: {0}")]
    Malformed(String),
}

/// A named value bound to the statement instead of being spliced into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: String,
}

/// A template rendered against one parameter set.
///
/// `sql` is what the warehouse receives: model-controlled values appear only as
/// `@name` references into `parameters`. `audit_sql` is the same statement with
/// every bound value shown as an escaped string literal, for people to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedQuery {
    pub template_name: String,
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
    pub audit_sql: String,
    pub values: ParameterSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
    Literal { quote: char, body: &'a str },
    QuotedIdentifier(&'a str),
    Comment,
}

/// Splits template text into the pieces the renderer treats differently.
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Segment<'_>>, RenderError> {
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                push_text(&mut segments, &sql[text_start..i]);
                let end = closing_quote(bytes, i + 1, quote).ok_or_else(|| {
                    RenderError::Malformed(format!("unterminated string literal at byte {}", i))
                })?;
                segments.push(Segment::Literal {
                    quote: quote as char,
                    body: &sql[i + 1..end],
                });
                i = end + 1;
                text_start = i;
            }
            b'`' => {
                push_text(&mut segments, &sql[text_start..i]);
                let end = sql[i + 1..].find('`').map(|n| i + 1 + n).ok_or_else(|| {
                    RenderError::Malformed(format!("unterminated quoted identifier at byte {}", i))
                })?;
                segments.push(Segment::QuotedIdentifier(&sql[i + 1..end]));
                i = end + 1;
                text_start = i;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                push_text(&mut segments, &sql[text_start..i]);
                i = sql[i..].find('\n').map(|n| i + n).unwrap_or(bytes.len());
                segments.push(Segment::Comment);
                text_start = i;
            }
            b'{' => match placeholder_at(&sql[i..]) {
                Some((name, len)) => {
                    push_text(&mut segments, &sql[text_start..i]);
                    segments.push(Segment::Placeholder(name));
                    i += len;
                    text_start = i;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
    push_text(&mut segments, &sql[text_start..]);

    Ok(segments)
}

fn push_text<'a>(segments: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
}

fn closing_quote(bytes: &[u8], from: usize, quote: u8) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b if b == quote => return Some(j),
            _ => j += 1,
        }
    }
    None
}

// `{name}` at the start of `text`; returns the name and the token length.
fn placeholder_at(text: &str) -> Option<(&str, usize)> {
    let rest = text.strip_prefix('{')?;
    let len = rest
        .char_indices()
        .take_while(|(n, c)| c.is_ascii_alphabetic() || *c == '_' || (*n > 0 && c.is_ascii_digit()))
        .count();
    if len == 0 || rest[len..].chars().next() != Some('}') {
        return None;
    }
    Some((&rest[..len], len + 2))
}

/// Distinct placeholder names in order of first appearance, ignoring comments.
pub fn placeholders(sql: &str) -> Result<Vec<String>, RenderError> {
    let mut names: Vec<String> = Vec::new();
    let mut note = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for segment in tokenize(sql)? {
        match segment {
            Segment::Placeholder(name) => note(name),
            Segment::Literal { body, .. } | Segment::QuotedIdentifier(body) => {
                for caps in PLACEHOLDER.captures_iter(body) {
                    note(&caps[1]);
                }
            }
            Segment::Text(_) | Segment::Comment => {}
        }
    }

    Ok(names)
}

/// Renders `template` with `params`.
///
/// Placeholders inside string literals become bound parameters. Placeholders
/// anywhere else are written into the text and must hold identifier-safe values.
/// Keys in `params` that the template never mentions are ignored.
pub fn render(template: &QueryTemplate, params: &ParameterSet) -> Result<RenderedQuery, RenderError> {
    let mut out = Output::default();
    let mut bindings = Bindings::default();

    for segment in tokenize(&template.sql)? {
        match segment {
            Segment::Text(text) => out.push(text, text),
            Segment::Placeholder(key) => {
                let value = inline_value(key, params)?;
                out.push(value, value);
            }
            Segment::QuotedIdentifier(body) => {
                let identifier = format!("`{}`", substitute_identifier(body, params)?);
                out.push(&identifier, &identifier);
            }
            Segment::Literal { quote, body } => {
                let Some(first) = PLACEHOLDER.captures(body) else {
                    let literal = format!("{quote}{body}{quote}");
                    out.push(&literal, &literal);
                    continue;
                };
                let exact = first.get(0).map(|m| m.as_str()) == Some(body);
                let value = substitute_literal(body, params)?;
                let name = bindings.bind(&first[1], exact, &value);
                out.push(&format!("@{}", name), &quote_literal(&value));
            }
            Segment::Comment => out.drop_comment(),
        }
    }

    Ok(RenderedQuery {
        template_name: template.name.clone(),
        sql: out.sql.trim().to_string(),
        parameters: bindings.into_inner(),
        audit_sql: out.audit.trim().to_string(),
        values: params.clone(),
    })
}

fn inline_value<'p>(key: &str, params: &'p ParameterSet) -> Result<&'p str, RenderError> {
    let value = params
        .get(key)
        .ok_or_else(|| RenderError::MissingParameter(key.to_string()))?;
    if !IDENTIFIER_SAFE.is_match(value) {
        return Err(RenderError::UnsafeIdentifier(key.to_string()));
    }
    Ok(value)
}

fn substitute_identifier(body: &str, params: &ParameterSet) -> Result<String, RenderError> {
    let mut result = String::with_capacity(body.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        result.push_str(&body[last..whole.start()]);
        result.push_str(inline_value(&caps[1], params)?);
        last = whole.end();
    }
    result.push_str(&body[last..]);
    Ok(result)
}

// The runtime value of a literal body: static parts unescaped, placeholders raw.
fn substitute_literal(body: &str, params: &ParameterSet) -> Result<String, RenderError> {
    let mut result = String::with_capacity(body.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        result.push_str(&unescape(&body[last..whole.start()]));
        let key = &caps[1];
        let value = params
            .get(key)
            .ok_or_else(|| RenderError::MissingParameter(key.to_string()))?;
        result.push_str(value);
        last = whole.end();
    }
    result.push_str(&unescape(&body[last..]));
    Ok(result)
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some(other @ ('\'' | '"' | '\\')) => result.push(other),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

pub(crate) fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

#[derive(Default)]
struct Output {
    sql: String,
    audit: String,
    skip_newline: bool,
}

impl Output {
    fn push(&mut self, sql: &str, audit: &str) {
        let (mut sql, mut audit) = (sql, audit);
        if std::mem::take(&mut self.skip_newline) {
            sql = strip_newline(sql);
            audit = strip_newline(audit);
        }
        self.sql.push_str(sql);
        self.audit.push_str(audit);
    }

    // Removes the comment's indentation; a line that held only a comment goes entirely.
    fn drop_comment(&mut self) {
        for buf in [&mut self.sql, &mut self.audit] {
            let kept = buf.trim_end_matches([' ', '\t']).len();
            buf.truncate(kept);
        }
        self.skip_newline = self.sql.is_empty() || self.sql.ends_with('\n');
    }
}

fn strip_newline(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

#[derive(Default)]
struct Bindings(Vec<QueryParameter>);

impl Bindings {
    // `'{key}'` binds as `@key`; any other literal gets a numbered name derived from its first key.
    fn bind(&mut self, key: &str, exact: bool, value: &str) -> String {
        if exact {
            match self.find(key) {
                Some(existing) if existing.value == value => return key.to_string(),
                Some(_) => {}
                None => return self.push(key.to_string(), value),
            }
        }

        let mut n = 1;
        loop {
            let name = format!("{}_{}", key, n);
            match self.find(&name) {
                Some(existing) if existing.value == value => return name,
                Some(_) => n += 1,
                None => return self.push(name, value),
            }
        }
    }

    fn find(&self, name: &str) -> Option<&QueryParameter> {
        self.0.iter().find(|p| p.name == name)
    }

    fn push(&mut self, name: String, value: &str) -> String {
        self.0.push(QueryParameter {
            name: name.clone(),
            value: value.to_string(),
        });
        name
    }

    fn into_inner(self) -> Vec<QueryParameter> {
        self.0
    }
}
