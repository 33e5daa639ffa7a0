//! Path engine: typed partial reads and writes into JSON documents.
//!
//! Grammar:
//!
//! ```text
//! path    := key ( '.' key | '[' index ']' | '[' quoted ']' )*
//! key     := one or more characters other than '.', '[', ']', quotes
//! index   := decimal digits
//! quoted  := '\'' chars '\'' | '"' chars '"'      (backslash escapes the quote)
//! ```
//!
//! `hero.weapons[1].type` and `party.members['scott'].height` are both valid.
//!
//! Reads never allocate containers. Writes return a new document and leave
//! the input untouched; missing map keys are created on the way down, while
//! list indices must already exist.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value as Json};

use crate::error::{SliceError, SliceResult};
use crate::value::{json_shape, Value, ValueKind};

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Container to create when this segment must step into a missing node.
    fn empty_container(&self) -> Json {
        match self {
            Segment::Key(_) => Json::Object(Map::new()),
            Segment::Index(_) => Json::Array(Vec::new()),
        }
    }
}

/// A parsed path descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    source: String,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a descriptor with no segment limit.
    pub fn parse(source: &str) -> SliceResult<Self> {
        Self::parse_bounded(source, usize::MAX)
    }

    /// Parse a descriptor, rejecting it if it has more than `max_segments`.
    pub fn parse_bounded(source: &str, max_segments: usize) -> SliceResult<Self> {
        let segments = Parser::new(source).run()?;
        if segments.len() > max_segments {
            return Err(malformed(source, &format!("more than {} segments", max_segments)));
        }
        Ok(Self { source: source.to_string(), segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Path {
    type Err = SliceError;

    fn from_str(s: &str) -> SliceResult<Self> {
        Path::parse(s)
    }
}

fn malformed(source: &str, reason: &str) -> SliceError {
    SliceError::invalid(format!("malformed path `{}`: {}", source, reason))
}

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, chars: source.char_indices().peekable() }
    }

    fn run(mut self) -> SliceResult<Vec<Segment>> {
        let mut segments = vec![Segment::Key(self.key()?)];
        while let Some((_, c)) = self.chars.next() {
            match c {
                '.' => segments.push(Segment::Key(self.key()?)),
                '[' => {
                    segments.push(self.bracket()?);
                    self.expect(']')?;
                }
                other => {
                    return Err(malformed(self.source, &format!("unexpected `{}`", other)));
                }
            }
        }
        Ok(segments)
    }

    fn key(&mut self) -> SliceResult<String> {
        let mut key = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if matches!(c, '.' | '[' | ']' | '\'' | '"') {
                break;
            }
            key.push(c);
            self.chars.next();
        }
        if key.is_empty() {
            return Err(malformed(self.source, "empty key"));
        }
        Ok(key)
    }

    fn bracket(&mut self) -> SliceResult<Segment> {
        match self.chars.peek().map(|&(_, c)| c) {
            Some(quote @ ('\'' | '"')) => {
                self.chars.next();
                self.quoted(quote).map(Segment::Key)
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    self.chars.next();
                }
                digits
                    .parse::<usize>()
                    .map(Segment::Index)
                    .map_err(|_| malformed(self.source, "index too large"))
            }
            _ => Err(malformed(self.source, "expected index or quoted key after `[`")),
        }
    }

    fn quoted(&mut self, quote: char) -> SliceResult<String> {
        let mut key = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => key.push(escaped),
                    None => break,
                },
                c if c == quote => return Ok(key),
                c => key.push(c),
            }
        }
        Err(malformed(self.source, "unterminated quoted key"))
    }

    fn expect(&mut self, want: char) -> SliceResult<()> {
        match self.chars.next() {
            Some((_, c)) if c == want => Ok(()),
            Some((_, c)) => Err(malformed(self.source, &format!("expected `{}`, found `{}`", want, c))),
            None => Err(malformed(self.source, &format!("expected `{}`", want))),
        }
    }
}

/// Parse payload bytes into a document. Empty payloads are the empty document.
pub fn parse_document(payload: &[u8]) -> SliceResult<Json> {
    if payload.is_empty() {
        return Ok(Json::Null);
    }
    serde_json::from_slice(payload).map_err(|e| SliceError::MalformedDocument { reason: e.to_string() })
}

/// Serialize a document back into payload bytes. Map keys come out sorted, so
/// equal documents always produce the same bytes (and the same CID).
pub fn encode_document(doc: &Json) -> SliceResult<Vec<u8>> {
    serde_json::to_vec(doc).map_err(|e| SliceError::MalformedDocument { reason: e.to_string() })
}

/// Resolve `path` in `doc` and interpret the node as `kind`.
pub fn read(doc: &Json, path: &Path, kind: ValueKind) -> SliceResult<Value> {
    let mut node = doc;
    for segment in &path.segments {
        let next = match (segment, node) {
            (Segment::Key(key), Json::Object(map)) => map.get(key),
            (Segment::Index(index), Json::Array(list)) => list.get(*index),
            _ => None,
        };
        node = next.ok_or_else(|| SliceError::PathNotFound { path: path.source.clone() })?;
    }
    Value::from_json(node, kind, &path.source)
}

/// Return a copy of `doc` with `value` stored at `path`.
///
/// The previous occupant of `path`, if any, is replaced regardless of its
/// type. A `null` root or intermediate node is treated as absent.
pub fn write(doc: &Json, path: &Path, value: &Value) -> SliceResult<Json> {
    let mut root = doc.clone();
    let (last, parents) = path
        .segments
        .split_last()
        .ok_or_else(|| malformed(&path.source, "empty path"))?;

    let first = parents.first().unwrap_or(last);
    if root.is_null() {
        root = first.empty_container();
    }

    let mut node = &mut root;
    for (depth, segment) in parents.iter().enumerate() {
        let next = &path.segments[depth + 1];
        node = step_mut(node, segment, path)?;
        if node.is_null() {
            *node = next.empty_container();
        }
    }

    let found = json_shape(node);
    match last {
        Segment::Key(key) => {
            let map = node.as_object_mut().ok_or_else(|| not_a(path, "map", found))?;
            map.insert(key.clone(), value.to_json());
        }
        Segment::Index(index) => {
            let list = node.as_array_mut().ok_or_else(|| not_a(path, "list", found))?;
            let len = list.len();
            let slot = list.get_mut(*index).ok_or_else(|| SliceError::IndexOutOfRange {
                path: path.source.clone(),
                index: *index,
                len,
            })?;
            *slot = value.to_json();
        }
    }
    Ok(root)
}

/// Descend one segment for writing, creating a missing map entry.
fn step_mut<'a>(node: &'a mut Json, segment: &Segment, path: &Path) -> SliceResult<&'a mut Json> {
    match segment {
        Segment::Key(key) => {
            let found = json_shape(node);
            let map = node.as_object_mut().ok_or_else(|| not_a(path, "map", found))?;
            Ok(map.entry(key.clone()).or_insert(Json::Null))
        }
        Segment::Index(index) => {
            let found = json_shape(node);
            let list = node.as_array_mut().ok_or_else(|| not_a(path, "list", found))?;
            let len = list.len();
            list.get_mut(*index).ok_or_else(|| SliceError::IndexOutOfRange {
                path: path.source.clone(),
                index: *index,
                len,
            })
        }
    }
}

fn not_a(path: &Path, expected: &str, found: &str) -> SliceError {
    SliceError::TypeMismatch {
        path: path.source.clone(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
