//! Textual addressing of nodes and their interface operators.
//!
//! Grammar: `/` separates node names and marks a path absolute when
//! leading; `..` steps up to the parent; an optional `|name` suffix
//! addresses an interface operator on the terminal node. `:` is the service
//! delimiter, reserved for out-of-scope service addressing and therefore
//! rejected everywhere in scene paths.
//!
//! Paths normalize at construction: `.` segments are erased (except for the
//! lone self path `.`), `..` folds away a preceding name, empty segments
//! collapse, and an absolute path that would climb above the root is
//! rejected. A successfully constructed Path is always valid and immutable.
//!
//! Examples: `/a/./b/../c` normalizes to `/a/c`; `foo/|bar` is the interop
//! `bar` on the node `foo`; `|bar` is an interop on the anchor node itself;
//! `/..` does not construct.

use std::fmt;
use std::str::FromStr;

/// The parent step, kept verbatim in relative paths that climb out of
/// their anchor.
pub const STEP_UP: &str = "..";

const STEP_IN_PLACE: &str = ".";
const NODE_DELIMITER: char = '/';
const INTEROP_DELIMITER: char = '|';
const SERVICE_DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("\"{0}\": the service delimiter ':' is reserved and not allowed in scene paths")]
    ServiceDelimiter(String),
    #[error("\"{0}\": empty interop names are not allowed")]
    EmptyInterop(String),
    #[error("\"{0}\": an interop name must not contain path control characters")]
    MalformedInterop(String),
    #[error("\"{0}\": absolute path cannot be resolved above the root")]
    AboveRoot(String),
    #[error("cannot join the absolute path \"{0}\" onto another path")]
    JoinAbsolute(String),
    #[error("names may not be empty")]
    EmptyName,
    #[error("the name \"{0}\" is reserved")]
    ReservedName(String),
    #[error("the name \"{0}\" contains a path control character")]
    MalformedName(String),
    #[error("node \"{0}\" not found")]
    NodeNotFound(String),
    #[error("node \"{0}\" has no parent")]
    NoParent(String),
}

/// An immutable, normalized scene path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    absolute: bool,
    /// Normalized node steps; `..` may only appear as a leading run of a
    /// relative path.
    segments: Vec<String>,
    interop: Option<String>,
}

impl Path {
    /// The empty (relative) path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The absolute root path `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
            interop: None,
        }
    }

    /// Parses and normalizes a path string.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.contains(SERVICE_DELIMITER) {
            return Err(PathError::ServiceDelimiter(text.to_string()));
        }

        // split off the interop suffix first
        let (node_part, interop) = match text.find(INTEROP_DELIMITER) {
            None => (text, None),
            Some(at) => {
                let name = &text[at + 1..];
                if name.is_empty() {
                    return Err(PathError::EmptyInterop(text.to_string()));
                }
                if name.contains(NODE_DELIMITER) || name.contains(INTEROP_DELIMITER) {
                    return Err(PathError::MalformedInterop(text.to_string()));
                }
                (&text[..at], Some(name.to_string()))
            }
        };

        let absolute = node_part.starts_with(NODE_DELIMITER);
        let raw: Vec<&str> = node_part
            .split(NODE_DELIMITER)
            .filter(|segment| !segment.is_empty())
            .collect();

        let mut segments: Vec<String> = Vec::with_capacity(raw.len());
        for segment in &raw {
            if *segment == STEP_IN_PLACE {
                // `.` survives only as the lone self path
                if raw.len() > 1 || absolute || interop.is_some() {
                    continue;
                }
                segments.push(segment.to_string());
            } else if *segment == STEP_UP {
                match segments.last() {
                    None => {
                        if absolute {
                            return Err(PathError::AboveRoot(text.to_string()));
                        }
                        segments.push(STEP_UP.to_string());
                    }
                    Some(last) if last == STEP_UP => segments.push(STEP_UP.to_string()),
                    Some(last) if last == STEP_IN_PLACE => {
                        segments.pop();
                        segments.push(STEP_UP.to_string());
                    }
                    Some(_) => {
                        segments.pop();
                    }
                }
            } else {
                segments.push(segment.to_string());
            }
        }

        Ok(Self {
            absolute,
            segments,
            interop,
        })
    }

    /// Validates a single node or interop name: non-empty, not a step
    /// token, free of path control characters.
    pub fn check_name(name: &str) -> Result<(), PathError> {
        if name.is_empty() {
            return Err(PathError::EmptyName);
        }
        if name == STEP_IN_PLACE || name == STEP_UP {
            return Err(PathError::ReservedName(name.to_string()));
        }
        if name.contains(NODE_DELIMITER)
            || name.contains(INTEROP_DELIMITER)
            || name.contains(SERVICE_DELIMITER)
        {
            return Err(PathError::MalformedName(name.to_string()));
        }
        Ok(())
    }

    /// Whether the path has no node steps and no interop. The absolute root
    /// `/` is not empty.
    pub fn is_empty(&self) -> bool {
        !self.absolute && self.segments.is_empty() && self.interop.is_none()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_relative(&self) -> bool {
        !self.absolute
    }

    /// Whether the terminal token addresses a node (rather than an interop).
    pub fn is_node_path(&self) -> bool {
        !self.is_empty() && self.interop.is_none()
    }

    /// Whether the terminal token addresses an interface operator.
    pub fn is_interop_path(&self) -> bool {
        self.interop.is_some()
    }

    /// The normalized node steps, `..` included.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of node steps.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn interop(&self) -> Option<&str> {
        self.interop.as_deref()
    }

    /// This path without its interop suffix.
    pub fn node_path(&self) -> Path {
        Path {
            absolute: self.absolute,
            segments: self.segments.clone(),
            interop: None,
        }
    }

    /// Concatenates a relative path (renormalizing `..` across the seam).
    /// Drops this path's interop; keeps the other's.
    pub fn join(&self, other: &Path) -> Result<Path, PathError> {
        if other.is_absolute() {
            return Err(PathError::JoinAbsolute(other.to_string()));
        }
        let mut segments = self.segments.clone();
        for segment in &other.segments {
            if segment == STEP_UP {
                match segments.last() {
                    None => {
                        if self.absolute {
                            return Err(PathError::AboveRoot(other.to_string()));
                        }
                        segments.push(STEP_UP.to_string());
                    }
                    Some(last) if last == STEP_UP => segments.push(STEP_UP.to_string()),
                    Some(_) => {
                        segments.pop();
                    }
                }
            } else if segment != STEP_IN_PLACE {
                segments.push(segment.clone());
            }
        }
        Ok(Path {
            absolute: self.absolute,
            segments,
            interop: other.interop.clone(),
        })
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "{NODE_DELIMITER}")?;
        }
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(f, "{NODE_DELIMITER}")?;
            }
            write!(f, "{segment}")?;
        }
        if let Some(interop) = &self.interop {
            // keep the node/interop seam visible after a trailing name
            if !self.segments.is_empty() {
                write!(f, "{NODE_DELIMITER}")?;
            }
            write!(f, "{INTEROP_DELIMITER}{interop}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn normalization_collapses_dots() {
        assert_eq!(parse("/a/./b/../c").to_string(), "/a/c");
        assert_eq!(parse("a//b").to_string(), "a/b");
        assert_eq!(parse("a/b/..").to_string(), "a");
        assert_eq!(parse("./a").to_string(), "a");
    }

    #[test]
    fn absolute_paths_cannot_climb_above_root() {
        assert!(matches!(
            Path::parse("/..").unwrap_err(),
            PathError::AboveRoot(_)
        ));
        assert!(matches!(
            Path::parse("/a/../..").unwrap_err(),
            PathError::AboveRoot(_)
        ));
    }

    #[test]
    fn relative_paths_keep_leading_parent_steps() {
        let path = parse("../../a");
        assert_eq!(path.segments(), ["..", "..", "a"]);
        assert_eq!(path.to_string(), "../../a");
        // folding only applies to named segments
        assert_eq!(parse("a/../..").to_string(), "..");
    }

    #[test]
    fn lone_self_path_survives() {
        let path = parse(".");
        assert_eq!(path.segments(), ["."]);
        assert!(path.is_node_path());
        assert_eq!(parse("./.").to_string(), "");
    }

    #[test]
    fn interop_paths() {
        let path = parse("foo/|bar");
        assert!(path.is_interop_path());
        assert!(!path.is_node_path());
        assert_eq!(path.interop(), Some("bar"));
        assert_eq!(path.segments(), ["foo"]);
        assert_eq!(path.node_path().to_string(), "foo");
        assert_eq!(path.to_string(), "foo/|bar");

        // an interop on the anchor itself
        let this = parse("|click");
        assert_eq!(this.interop(), Some("click"));
        assert_eq!(this.len(), 0);

        // and on the root
        let root = parse("/|size");
        assert!(root.is_absolute());
        assert_eq!(root.interop(), Some("size"));
    }

    #[test]
    fn malformed_interops_are_rejected() {
        assert!(matches!(
            Path::parse("a|").unwrap_err(),
            PathError::EmptyInterop(_)
        ));
        assert!(matches!(
            Path::parse("a|b|c").unwrap_err(),
            PathError::MalformedInterop(_)
        ));
        assert!(matches!(
            Path::parse("a|b/c").unwrap_err(),
            PathError::MalformedInterop(_)
        ));
    }

    #[test]
    fn service_delimiter_is_rejected() {
        assert!(matches!(
            Path::parse("svc:whatever").unwrap_err(),
            PathError::ServiceDelimiter(_)
        ));
        assert!(matches!(
            Path::parse("/a/b:c").unwrap_err(),
            PathError::ServiceDelimiter(_)
        ));
    }

    #[test]
    fn root_path() {
        let root = parse("/");
        assert!(root.is_absolute());
        assert!(!root.is_empty());
        assert_eq!(root.len(), 0);
        assert!(root.is_node_path()); // the root is itself a node
        assert_eq!(root, Path::root());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn empty_path() {
        let empty = parse("");
        assert!(empty.is_empty());
        assert!(empty.is_relative());
        assert!(!empty.is_node_path());
    }

    #[test]
    fn join_paths() {
        let base = parse("/a/b|ignored");
        let joined = base.join(&parse("../c|target")).unwrap();
        assert_eq!(joined.to_string(), "/a/c/|target");

        assert!(matches!(
            base.join(&parse("/abs")).unwrap_err(),
            PathError::JoinAbsolute(_)
        ));
        assert!(matches!(
            parse("/a").join(&parse("../..")).unwrap_err(),
            PathError::AboveRoot(_)
        ));
    }

    #[test]
    fn name_validation() {
        assert!(Path::check_name("button").is_ok());
        assert!(Path::check_name("widget.opacity").is_ok());
        assert_eq!(Path::check_name("").unwrap_err(), PathError::EmptyName);
        assert_eq!(
            Path::check_name("..").unwrap_err(),
            PathError::ReservedName("..".to_string())
        );
        assert!(matches!(
            Path::check_name("a/b").unwrap_err(),
            PathError::MalformedName(_)
        ));
        assert!(matches!(
            Path::check_name("a:b").unwrap_err(),
            PathError::MalformedName(_)
        ));
    }
}
