//! Canonical node paths
//!
//! Paths are written in dot/bracket notation (`user.addresses[0].city`) and map
//! one-to-one onto JSON pointers (`/user/addresses/0/city`). A segment made only
//! of digits (without a leading zero) is an array index in both notations, so
//! `a.2` and `a[2]` name the same node and both print as `a[2]`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::{NodeError, NodeResult};

/// Segment of a node path
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object property access: .fieldName
    Property(String),
    /// Array index access: [0], [1], etc.
    Index(usize),
}

impl PathSegment {
    /// Build a segment from raw text, turning canonical integers into indices
    fn from_raw(raw: &str) -> Self {
        match parse_index(raw) {
            Some(idx) => PathSegment::Index(idx),
            None => PathSegment::Property(raw.to_string()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Property(name) => f.write_str(name),
            PathSegment::Index(idx) => write!(f, "{}", idx),
        }
    }
}

fn parse_index(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    raw.parse().ok()
}

/// Location of a node measured from the tree root
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath {
    segments: Vec<PathSegment>,
}

impl NodePath {
    /// Create a root path (empty)
    pub fn root() -> Self {
        Self { segments: vec![] }
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Check if this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the depth (number of segments)
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Get the last segment
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Push a property segment
    pub fn push_property(&self, name: &str) -> Self {
        self.child(PathSegment::from_raw(name))
    }

    /// Push an array index segment
    pub fn push_index(&self, idx: usize) -> Self {
        self.child(PathSegment::Index(idx))
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut new = self.clone();
        new.segments.push(segment);
        new
    }

    /// Get the parent path, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut new = self.clone();
        new.segments.pop();
        Some(new)
    }

    /// All strict ancestors, nearest first, ending with the root
    pub fn ancestors(&self) -> Vec<NodePath> {
        let mut out = Vec::with_capacity(self.depth());
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out
    }

    /// True when `other` equals this path or lies below it
    pub fn contains(&self, other: &NodePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True when either path contains the other
    pub fn overlaps(&self, other: &NodePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Parse dot/bracket notation: `a.b[2].c`
    pub fn parse(s: &str) -> NodeResult<Self> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars().peekable();
        // true right after '.', which must be followed by a property name
        let mut expect_name = false;

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if current.is_empty() {
                        let after_index = matches!(segments.last(), Some(PathSegment::Index(_)))
                            && !expect_name;
                        if !after_index {
                            return Err(NodeError::invalid_path(s, "empty property segment"));
                        }
                    } else {
                        segments.push(PathSegment::from_raw(&current));
                        current.clear();
                    }
                    expect_name = true;
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(PathSegment::from_raw(&current));
                        current.clear();
                    } else if expect_name {
                        return Err(NodeError::invalid_path(s, "empty property segment"));
                    }
                    let mut index_str = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        index_str.push(c);
                    }
                    if !closed {
                        return Err(NodeError::invalid_path(s, "unclosed '['"));
                    }
                    let idx = parse_index(&index_str).ok_or_else(|| {
                        NodeError::invalid_path(s, format!("'{}' is not an array index", index_str))
                    })?;
                    segments.push(PathSegment::Index(idx));
                    if let Some(&next) = chars.peek() {
                        if next != '.' && next != '[' {
                            return Err(NodeError::invalid_path(
                                s,
                                "expected '.' or '[' after ']'",
                            ));
                        }
                    }
                    expect_name = false;
                }
                ']' => return Err(NodeError::invalid_path(s, "unexpected ']'")),
                _ => {
                    current.push(ch);
                    expect_name = false;
                }
            }
        }

        if !current.is_empty() {
            segments.push(PathSegment::from_raw(&current));
        } else if expect_name {
            return Err(NodeError::invalid_path(s, "trailing '.'"));
        }

        Ok(Self { segments })
    }

    /// Parse a JSON pointer (`/a/b/2/c`, optionally prefixed with `#`)
    pub fn from_pointer(pointer: &str) -> NodeResult<Self> {
        let body = pointer.strip_prefix('#').unwrap_or(pointer);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = body.strip_prefix('/') else {
            return Err(NodeError::invalid_path(pointer, "pointer must start with '/'"));
        };
        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(NodeError::invalid_path(pointer, "empty pointer segment"));
            }
            let unescaped = raw.replace("~1", "/").replace("~0", "~");
            segments.push(PathSegment::from_raw(&unescaped));
        }
        Ok(Self { segments })
    }

    /// Render as a JSON pointer; the root is the empty string
    pub fn to_pointer(&self) -> String {
        self.segments
            .iter()
            .map(|seg| match seg {
                PathSegment::Property(name) => {
                    format!("/{}", name.replace('~', "~0").replace('/', "~1"))
                }
                PathSegment::Index(idx) => format!("/{}", idx),
            })
            .collect()
    }

    /// Resolve a dependency reference against this path.
    ///
    /// - `""` / `"."` is this path
    /// - `/a/b` or `#/a/b` is an absolute pointer
    /// - `./x` descends from this path
    /// - `../x` starts at the parent (a sibling), each extra `../` climbs one level
    /// - anything else is an absolute dot/bracket path
    pub fn resolve(&self, reference: &str) -> NodeResult<NodePath> {
        let reference = reference.trim();
        if reference.is_empty() || reference == "." {
            return Ok(self.clone());
        }
        if reference.starts_with('/') || reference.starts_with("#/") {
            return Self::from_pointer(reference);
        }
        if let Some(rest) = reference.strip_prefix("./") {
            return Ok(self.join(&Self::parse(rest)?));
        }
        if reference == ".." || reference.starts_with("../") {
            let mut base = self.clone();
            let mut rest = reference;
            loop {
                if rest == ".." {
                    rest = "";
                } else if let Some(r) = rest.strip_prefix("../") {
                    rest = r;
                } else {
                    break;
                }
                base = base.parent().ok_or_else(|| {
                    NodeError::invalid_path(reference, "climbs above the root")
                })?;
            }
            return Ok(base.join(&Self::parse(rest)?));
        }
        Self::parse(reference)
    }

    /// Append all segments of `other`
    pub fn join(&self, other: &NodePath) -> NodePath {
        let mut new = self.clone();
        new.segments.extend(other.segments.iter().cloned());
        new
    }
}

impl fmt::Display for NodePath {
    /// Dot-notation string: "user.address.city" or "items[0].name"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Property(name) if i == 0 => f.write_str(name)?,
                PathSegment::Property(name) => write!(f, ".{}", name)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Serialized as the canonical dot/bracket string
impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodePath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Convert a dot/bracket path string to a JSON pointer
pub fn path_to_pointer(path: &str) -> NodeResult<String> {
    Ok(NodePath::parse(path)?.to_pointer())
}

/// Convert a JSON pointer to a canonical dot/bracket path string
pub fn pointer_to_path(pointer: &str) -> NodeResult<String> {
    Ok(NodePath::from_pointer(pointer)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_building() {
        let path = NodePath::root()
            .push_property("user")
            .push_property("addresses")
            .push_index(0)
            .push_property("city");

        assert_eq!(path.to_string(), "user.addresses[0].city");
        assert_eq!(path.depth(), 4);
    }

    #[test]
    fn test_parse_normalizes_numeric_segments() {
        let dotted = NodePath::parse("items.2.name").unwrap();
        let bracketed = NodePath::parse("items[2].name").unwrap();
        assert_eq!(dotted, bracketed);
        assert_eq!(dotted.to_string(), "items[2].name");
    }

    #[test]
    fn test_leading_zero_stays_property() {
        let path = NodePath::parse("codes.007").unwrap();
        assert_eq!(path.last(), Some(&PathSegment::Property("007".to_string())));
    }

    #[test]
    fn test_pointer_round_trip() {
        for raw in ["", "a", "a.b[2].c", "list[0][1]", "x[10].y.z", "weird~name.slash/key"] {
            let path = NodePath::parse(raw).unwrap();
            let pointer = path.to_pointer();
            let back = NodePath::from_pointer(&pointer).unwrap();
            assert_eq!(back.to_string(), raw, "round trip through {}", pointer);
        }
    }

    #[test]
    fn test_pointer_escaping() {
        let path = NodePath::parse("a/b.c~d").unwrap();
        assert_eq!(path.to_pointer(), "/a~1b/c~0d");
        assert_eq!(pointer_to_path("/a~1b/c~0d").unwrap(), "a/b.c~d");
        assert_eq!(path_to_pointer("a.b[2].c").unwrap(), "/a/b/2/c");
    }

    #[test]
    fn test_invalid_paths() {
        for raw in ["a..b", ".a", "a.", "a[", "a[x]", "a]", "a[0]b", "a.[0]"] {
            let err = NodePath::parse(raw).unwrap_err();
            assert_eq!(err.code(), "NODE_NOT_FOUND", "{}", raw);
        }
        assert!(NodePath::from_pointer("a/b").is_err());
        assert!(NodePath::from_pointer("/a//b").is_err());
    }

    #[test]
    fn test_resolve_relative_references() {
        let base = NodePath::parse("order.lines[1].qty").unwrap();
        assert_eq!(base.resolve("../price").unwrap().to_string(), "order.lines[1].price");
        assert_eq!(base.resolve("../../").unwrap().to_string(), "order.lines");
        assert_eq!(base.resolve("/order/currency").unwrap().to_string(), "order.currency");
        assert_eq!(base.resolve("order.discount").unwrap().to_string(), "order.discount");
        assert_eq!(base.resolve(".").unwrap(), base);
        assert!(NodePath::root().resolve("../x").is_err());
    }

    #[test]
    fn test_ancestors_include_root() {
        let path = NodePath::parse("a.b[0]").unwrap();
        let ancestors: Vec<String> = path.ancestors().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["a.b", "a", ""]);
        assert!(NodePath::root().ancestors().is_empty());
    }

    #[test]
    fn test_contains_and_overlaps() {
        let a = NodePath::parse("a").unwrap();
        let ab = NodePath::parse("a.b").unwrap();
        let ac = NodePath::parse("a.c").unwrap();
        assert!(a.contains(&ab));
        assert!(!ab.contains(&a));
        assert!(ab.overlaps(&a));
        assert!(!ab.overlaps(&ac));
    }
}
