// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming JSON scanner.
//!
//! Looks up values by key path directly in the raw payload bytes without building a
//! document tree. Only the bytes on the way to the requested value are inspected, and
//! sibling values are skipped by bracket matching. The scanner is deliberately lenient:
//! it validates structure only as far as it needs to find the value.
//!
//! Key paths are dot separated (`foo.bar`). Segments can be quoted to contain dots or
//! whitespace (`"a.b".c`), a backslash escapes the next character, and a bare `[n]`
//! segment indexes into an array.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Object,
    Array,
    Boolean,
    Null,
}

/// A value found in a payload. For strings `raw` is the still-escaped content between
/// the quotes; for everything else it is the exact JSON text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<'a> {
    pub raw: &'a [u8],
    pub kind: ValueType,
}

impl Value<'_> {
    /// Appends the value as JSON text, re-quoting strings.
    pub fn write_json(&self, out: &mut Vec<u8>) {
        if self.kind == ValueType::String {
            out.push(b'"');
            out.extend_from_slice(self.raw);
            out.push(b'"');
        } else {
            out.extend_from_slice(self.raw);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("key path not found")]
    NotFound,

    #[error("malformed JSON near offset {0}")]
    Malformed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("unterminated quote in key path {0:?}")]
    UnterminatedQuote(String),

    #[error("empty segment in key path {0:?}")]
    EmptySegment(String),

    #[error("dangling escape in key path {0:?}")]
    DanglingEscape(String),

    #[error("expected a single key path, got {0:?}")]
    MultiplePaths(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    #[must_use]
    pub fn root() -> Self {
        KeyPath::default()
    }

    /// Parses a single key path. Whitespace is only allowed inside quotes.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut paths = split_paths(path)?;
        match paths.len() {
            0 => Ok(KeyPath::root()),
            1 => Ok(paths.remove(0)),
            _ => Err(PathError::MultiplePaths(path.to_string())),
        }
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Name used when the extracted value is re-wrapped into an object: the last
    /// segment of the path.
    #[must_use]
    pub fn name(&self) -> String {
        match self.segments.last() {
            Some(Segment::Key(k)) => k.clone(),
            Some(Segment::Index(i)) => i.to_string(),
            None => String::new(),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(k) if k.contains(['.', ' ', '"']) => write!(f, "{:?}", k)?,
                Segment::Key(k) => f.write_str(k)?,
                Segment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct PathBuilder {
    segments: Vec<Segment>,
    current: String,
    quoted: bool,
    touched: bool,
}

impl PathBuilder {
    fn end_segment(&mut self, source: &str) -> Result<(), PathError> {
        if !self.touched {
            return Err(PathError::EmptySegment(source.to_string()));
        }
        let text = std::mem::take(&mut self.current);
        let segment = match parse_index(&text) {
            Some(n) if !self.quoted => Segment::Index(n),
            _ => Segment::Key(text),
        };
        self.segments.push(segment);
        self.quoted = false;
        self.touched = false;
        Ok(())
    }

    fn finish(&mut self, source: &str) -> Result<Option<KeyPath>, PathError> {
        if !self.touched && self.segments.is_empty() {
            return Ok(None);
        }
        self.end_segment(source)?;
        Ok(Some(KeyPath {
            segments: std::mem::take(&mut self.segments),
        }))
    }
}

fn parse_index(text: &str) -> Option<usize> {
    text.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Splits a list of key paths separated by whitespace or commas.
pub fn split_paths(list: &str) -> Result<Vec<KeyPath>, PathError> {
    let mut paths = Vec::new();
    let mut builder = PathBuilder::default();
    let mut in_quote = false;
    let mut chars = list.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| PathError::DanglingEscape(list.to_string()))?;
                builder.current.push(escaped);
                builder.quoted = true;
                builder.touched = true;
            }
            '"' => {
                in_quote = !in_quote;
                builder.quoted = true;
                builder.touched = true;
            }
            _ if in_quote => builder.current.push(c),
            '.' => builder.end_segment(list)?,
            c if c.is_whitespace() || c == ',' => {
                if let Some(path) = builder.finish(list)? {
                    paths.push(path);
                }
            }
            _ => {
                builder.current.push(c);
                builder.touched = true;
            }
        }
    }
    if in_quote {
        return Err(PathError::UnterminatedQuote(list.to_string()));
    }
    if let Some(path) = builder.finish(list)? {
        paths.push(path);
    }
    Ok(paths)
}

/// Finds the value at `path`.
pub fn get<'a>(data: &'a [u8], path: &KeyPath) -> Result<Value<'a>, ScanError> {
    let (start, end, kind) = search(data, path)?;
    Ok(make_value(data, start, end, kind))
}

/// Calls `f` for every element of the array at `path`, in order. A path that resolves
/// to something other than an array is reported as [`ScanError::NotFound`].
pub fn array_each<'a, F>(data: &'a [u8], path: &KeyPath, mut f: F) -> Result<(), ScanError>
where
    F: FnMut(Value<'a>),
{
    let (start, _, kind) = search(data, path)?;
    if kind != ValueType::Array {
        return Err(ScanError::NotFound);
    }
    each_element(data, start, |s, e, k| {
        f(make_value(data, s, e, k));
        true
    })
}

fn make_value(data: &[u8], start: usize, end: usize, kind: ValueType) -> Value<'_> {
    let raw = if kind == ValueType::String {
        &data[start + 1..end - 1]
    } else {
        &data[start..end]
    };
    Value { raw, kind }
}

fn search(data: &[u8], path: &KeyPath) -> Result<(usize, usize, ValueType), ScanError> {
    let mut i = skip_ws(data, 0);
    for segment in path.segments() {
        i = match segment {
            Segment::Key(key) => {
                if data.get(i) != Some(&b'{') {
                    return Err(ScanError::NotFound);
                }
                find_key(data, i, key)?.ok_or(ScanError::NotFound)?
            }
            Segment::Index(n) => {
                if data.get(i) != Some(&b'[') {
                    return Err(ScanError::NotFound);
                }
                find_index(data, i, *n)?.ok_or(ScanError::NotFound)?
            }
        };
    }
    let (end, kind) = value_end(data, i)?;
    Ok((i, end, kind))
}

fn skip_ws(data: &[u8], mut i: usize) -> usize {
    while matches!(data.get(i), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        i += 1;
    }
    i
}

/// `i` points at an opening quote; returns the offset just past the closing quote.
fn string_end(data: &[u8], i: usize) -> Result<usize, ScanError> {
    let mut j = i + 1;
    while j < data.len() {
        match data[j] {
            b'\\' => j += 2,
            b'"' => return Ok(j + 1),
            _ => j += 1,
        }
    }
    Err(ScanError::Malformed(i))
}

fn block_end(data: &[u8], i: usize, open: u8, close: u8) -> Result<usize, ScanError> {
    let mut depth = 0usize;
    let mut j = i;
    while j < data.len() {
        match data[j] {
            b'"' => {
                j = string_end(data, j)?;
                continue;
            }
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(j + 1);
                }
            }
            _ => {}
        }
        j += 1;
    }
    Err(ScanError::Malformed(i))
}

fn literal_end(data: &[u8], i: usize, literal: &[u8]) -> Result<usize, ScanError> {
    match data.get(i..i + literal.len()) {
        Some(bytes) if bytes == literal => Ok(i + literal.len()),
        _ => Err(ScanError::Malformed(i)),
    }
}

fn value_end(data: &[u8], i: usize) -> Result<(usize, ValueType), ScanError> {
    match data.get(i) {
        Some(b'"') => Ok((string_end(data, i)?, ValueType::String)),
        Some(b'{') => Ok((block_end(data, i, b'{', b'}')?, ValueType::Object)),
        Some(b'[') => Ok((block_end(data, i, b'[', b']')?, ValueType::Array)),
        Some(b't') => Ok((literal_end(data, i, b"true")?, ValueType::Boolean)),
        Some(b'f') => Ok((literal_end(data, i, b"false")?, ValueType::Boolean)),
        Some(b'n') => Ok((literal_end(data, i, b"null")?, ValueType::Null)),
        Some(b'-' | b'0'..=b'9') => {
            let mut j = i + 1;
            while matches!(
                data.get(j),
                Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
            ) {
                j += 1;
            }
            Ok((j, ValueType::Number))
        }
        _ => Err(ScanError::Malformed(i)),
    }
}

fn key_matches(raw: &[u8], quoted: &[u8], key: &str) -> bool {
    if !raw.contains(&b'\\') {
        return raw == key.as_bytes();
    }
    serde_json::from_slice::<String>(quoted).is_ok_and(|k| k == key)
}

/// `start` points at `{`. Returns the offset of the value stored under `key`.
fn find_key(data: &[u8], start: usize, key: &str) -> Result<Option<usize>, ScanError> {
    let mut i = skip_ws(data, start + 1);
    if data.get(i) == Some(&b'}') {
        return Ok(None);
    }
    loop {
        if data.get(i) != Some(&b'"') {
            return Err(ScanError::Malformed(i));
        }
        let key_end = string_end(data, i)?;
        let matched = key_matches(&data[i + 1..key_end - 1], &data[i..key_end], key);

        i = skip_ws(data, key_end);
        if data.get(i) != Some(&b':') {
            return Err(ScanError::Malformed(i));
        }
        i = skip_ws(data, i + 1);
        if matched {
            return Ok(Some(i));
        }

        let (value_end, _) = value_end(data, i)?;
        i = skip_ws(data, value_end);
        match data.get(i) {
            Some(b',') => i = skip_ws(data, i + 1),
            Some(b'}') => return Ok(None),
            _ => return Err(ScanError::Malformed(i)),
        }
    }
}

/// `start` points at `[`. Calls `f(start, end, kind)` for each element until it
/// returns false.
fn each_element<F>(data: &[u8], start: usize, mut f: F) -> Result<(), ScanError>
where
    F: FnMut(usize, usize, ValueType) -> bool,
{
    let mut i = skip_ws(data, start + 1);
    if data.get(i) == Some(&b']') {
        return Ok(());
    }
    loop {
        let (end, kind) = value_end(data, i)?;
        if !f(i, end, kind) {
            return Ok(());
        }
        i = skip_ws(data, end);
        match data.get(i) {
            Some(b',') => i = skip_ws(data, i + 1),
            Some(b']') => return Ok(()),
            _ => return Err(ScanError::Malformed(i)),
        }
    }
}

fn find_index(data: &[u8], start: usize, n: usize) -> Result<Option<usize>, ScanError> {
    let mut found = None;
    let mut position = 0;
    each_element(data, start, |s, _, _| {
        if position == n {
            found = Some(s);
            return false;
        }
        position += 1;
        true
    })?;
    Ok(found)
}
