//! Path expression classification
//!
//! Grammar handled directly:
//! - `$` root
//! - `.name`, `['name']`, `["name"]` property segments
//! - `[*]` wildcard over array elements
//!
//! Anything else that is still plausible JSONPath (recursive descent `..`,
//! `.*`, indexes, slices, unions, filters, function calls) is classified as
//! advanced and left to an external evaluator.

use std::fmt;

use crate::errors::{QueryError, QueryResult};

/// How a path expression will be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Literal segments and `[*]` wildcards
    SimpleWildcard,
    /// RFC 9535 syntax beyond literal navigation
    AdvancedRfc9535,
    /// Literal segments only
    BasicPath,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::SimpleWildcard => "simple_wildcard",
            PathKind::AdvancedRfc9535 => "advanced_rfc9535",
            PathKind::BasicPath => "basic_path",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One navigation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member, matched case-insensitively
    Property(String),
    /// Every element of an array
    Wildcard,
}

impl PathSegment {
    /// Case-insensitive property match
    pub fn matches_name(&self, name: &str) -> bool {
        match self {
            PathSegment::Property(p) => {
                p.eq_ignore_ascii_case(name)
                    || (!p.is_ascii() && p.to_lowercase() == name.to_lowercase())
            }
            PathSegment::Wildcard => false,
        }
    }
}

/// A path expression classified once, at executor construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPath {
    expression: String,
    kind: PathKind,
    segments: Vec<PathSegment>,
}

impl ClassifiedPath {
    /// Classifies `expression`.
    ///
    /// Advanced paths keep no segments; they are only ever handed over whole.
    pub fn classify(expression: &str) -> QueryResult<Self> {
        let mut scanner = Scanner::new(expression);
        let segments = scanner.scan()?;

        let kind = match segments {
            None => PathKind::AdvancedRfc9535,
            Some(ref segs) if segs.contains(&PathSegment::Wildcard) => PathKind::SimpleWildcard,
            Some(_) => PathKind::BasicPath,
        };

        Ok(Self {
            expression: expression.to_string(),
            kind,
            segments: segments.unwrap_or_default(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_advanced(&self) -> bool {
        self.kind == PathKind::AdvancedRfc9535
    }

    /// True when a wildcard appears before the last segment.
    ///
    /// Such paths fan out into several collections and cannot be streamed as
    /// one array.
    pub fn wildcard_before_terminal(&self) -> bool {
        match self.segments.split_last() {
            Some((_, init)) => init.contains(&PathSegment::Wildcard),
            None => false,
        }
    }

    /// True when the last segment is a wildcard
    pub fn has_terminal_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(PathSegment::Wildcard))
    }

    /// Whether direct token navigation can reach the target collection
    pub fn is_direct(&self) -> bool {
        !self.is_advanced() && !self.wildcard_before_terminal()
    }
}

impl fmt::Display for ClassifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.kind)
    }
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn error(&self, reason: impl Into<String>) -> QueryError {
        QueryError::invalid_path(self.input, reason)
    }

    /// Returns `None` as soon as advanced syntax is seen
    fn scan(&mut self) -> QueryResult<Option<Vec<PathSegment>>> {
        if !self.input.starts_with('$') {
            return Err(self.error("path must start with '$'"));
        }
        self.pos = 1;

        let mut segments = Vec::new();
        while !self.rest().is_empty() {
            if self.rest().starts_with("..") {
                return Ok(None);
            }
            match self.rest().chars().next() {
                Some('.') => {
                    self.pos += 1;
                    match self.dot_segment()? {
                        Some(segment) => segments.push(segment),
                        None => return Ok(None),
                    }
                }
                Some('[') => {
                    self.pos += 1;
                    match self.bracket_segment()? {
                        Some(segment) => segments.push(segment),
                        None => return Ok(None),
                    }
                }
                Some(c) => {
                    return Err(self.error(format!(
                        "unexpected character '{}' at offset {}",
                        c, self.pos
                    )))
                }
                None => break,
            }
        }
        Ok(Some(segments))
    }

    fn dot_segment(&mut self) -> QueryResult<Option<PathSegment>> {
        let rest = self.rest();
        if rest.starts_with('*') {
            return Ok(None);
        }

        let end = rest.find(|c: char| matches!(c, '.' | '[' | ']')).unwrap_or(rest.len());
        let name = &rest[..end];
        if name.is_empty() {
            return Err(self.error(format!("empty property segment at offset {}", self.pos)));
        }
        if name.contains(|c: char| matches!(c, '(' | ')' | '?' | '@')) {
            return Ok(None);
        }

        self.pos += end;
        Ok(Some(PathSegment::Property(name.to_string())))
    }

    fn bracket_segment(&mut self) -> QueryResult<Option<PathSegment>> {
        let rest = self.rest();
        let quote = match rest.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return self.unquoted_bracket(),
            None => return Err(self.error("unterminated bracket")),
        };

        let body = &rest[1..];
        let close = match body.find(quote) {
            Some(i) => i,
            None => return Err(self.error("unterminated quoted name")),
        };
        let name = &body[..close];
        let after = &body[close + 1..];

        if !after.starts_with(']') {
            // e.g. a union of names: ['a','b']
            return if after.contains(']') {
                Ok(None)
            } else {
                Err(self.error("unterminated bracket"))
            };
        }
        if name.is_empty() {
            return Err(self.error("empty property name"));
        }

        self.pos += 1 + close + 1 + 1;
        Ok(Some(PathSegment::Property(name.to_string())))
    }

    fn unquoted_bracket(&mut self) -> QueryResult<Option<PathSegment>> {
        let rest = self.rest();
        let close = match rest.find(']') {
            Some(i) => i,
            None => return Err(self.error("unterminated bracket")),
        };
        let content = rest[..close].trim();
        if content.is_empty() {
            return Err(self.error("empty bracket segment"));
        }
        if content == "*" {
            self.pos += close + 1;
            return Ok(Some(PathSegment::Wildcard));
        }
        // index, slice, filter or union
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(names: &[&str]) -> Vec<PathSegment> {
        names
            .iter()
            .map(|n| {
                if *n == "*" {
                    PathSegment::Wildcard
                } else {
                    PathSegment::Property(n.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_basic_paths() {
        let path = ClassifiedPath::classify("$.store.books").unwrap();
        assert_eq!(path.kind(), PathKind::BasicPath);
        assert_eq!(path.segments(), props(&["store", "books"]).as_slice());

        let root = ClassifiedPath::classify("$").unwrap();
        assert_eq!(root.kind(), PathKind::BasicPath);
        assert!(root.segments().is_empty());

        let quoted = ClassifiedPath::classify("$['first name'][\"x.y\"]").unwrap();
        assert_eq!(quoted.segments(), props(&["first name", "x.y"]).as_slice());
    }

    #[test]
    fn test_simple_wildcards() {
        let path = ClassifiedPath::classify("$.data[*]").unwrap();
        assert_eq!(path.kind(), PathKind::SimpleWildcard);
        assert!(path.has_terminal_wildcard());
        assert!(!path.wildcard_before_terminal());
        assert!(path.is_direct());

        let nested = ClassifiedPath::classify("$.a[*].b[*]").unwrap();
        assert_eq!(nested.kind(), PathKind::SimpleWildcard);
        assert!(nested.wildcard_before_terminal());
        assert!(!nested.is_direct());
    }

    #[test]
    fn test_advanced_paths() {
        for expr in [
            "$..price",
            "$.store.*",
            "$.items[0]",
            "$.items[1:3]",
            "$.items[?(@.price < 10)]",
            "$.items[?@.price < 10]",
            "$['a','b']",
            "$.length()",
        ] {
            let path = ClassifiedPath::classify(expr).unwrap();
            assert_eq!(path.kind(), PathKind::AdvancedRfc9535, "{}", expr);
            assert!(path.segments().is_empty());
        }
    }

    #[test]
    fn test_invalid_paths() {
        for expr in ["data", "", "$.", "$.a.", "$[", "$['a", "$[]", "$.a]"] {
            let err = ClassifiedPath::classify(expr).unwrap_err();
            assert_eq!(err.code(), "AERO_INVALID_PATH", "{}", expr);
        }
    }

    #[test]
    fn test_case_insensitive_segment() {
        let segment = PathSegment::Property("Data".into());
        assert!(segment.matches_name("data"));
        assert!(segment.matches_name("DATA"));
        assert!(!segment.matches_name("datum"));
        assert!(!PathSegment::Wildcard.matches_name("data"));
    }
}
