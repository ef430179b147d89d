// ============================================================================
// Data Node Paths
// ============================================================================
//
// Paths address nodes inside a module's configuration tree:
//
//   /module:container/list[key='value']/leaf
//
// The first segment carries the owning module's name as a prefix. List
// entries are selected with one or more key predicates. Parsing is strict:
// malformed input is rejected with InvalidPath before any tree is touched.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::{ConfError, Result};

/// One step of a path: a node name plus optional list-key predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    /// Key predicates in canonical string form, ordered by key name.
    pub keys: BTreeMap<String, String>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn with_keys(name: impl Into<String>, keys: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            write!(f, "[{}='{}']", k, v)?;
        }
        Ok(())
    }
}

/// A parsed, validated data node path.
///
/// Paths are ordered by their canonical string form so that diffs and
/// dispatch iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    module: String,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a path string.
    ///
    /// # Errors
    /// Returns `InvalidPath` when the input does not start with '/', lacks a
    /// module prefix, contains empty segments, or has malformed predicates.
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input
            .strip_prefix('/')
            .ok_or_else(|| ConfError::InvalidPath(format!("path must start with '/': '{}'", input)))?;

        if rest.is_empty() {
            return Err(ConfError::InvalidPath("empty path".to_string()));
        }

        let raw_segments = split_segments(rest)?;
        if raw_segments.is_empty() {
            return Err(ConfError::InvalidPath("empty path".to_string()));
        }

        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut module = None;

        for (i, raw) in raw_segments.iter().enumerate() {
            let (name_part, keys) = parse_predicates(raw)?;
            let name = if i == 0 {
                let (prefix, local) = name_part.split_once(':').ok_or_else(|| {
                    ConfError::InvalidPath(format!(
                        "first segment must carry a module prefix: '{}'",
                        input
                    ))
                })?;
                if prefix.is_empty() || local.is_empty() {
                    return Err(ConfError::InvalidPath(format!(
                        "empty module prefix or node name: '{}'",
                        input
                    )));
                }
                module = Some(prefix.to_string());
                local.to_string()
            } else {
                if name_part.is_empty() {
                    return Err(ConfError::InvalidPath(format!("empty segment in '{}'", input)));
                }
                if name_part.contains(':') {
                    return Err(ConfError::InvalidPath(format!(
                        "module prefix allowed only on the first segment: '{}'",
                        input
                    )));
                }
                name_part.to_string()
            };
            segments.push(Segment::with_keys(name, keys));
        }

        Ok(Self {
            // set above for i == 0
            module: module.unwrap(),
            segments,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> &Segment {
        // a Path always has at least one segment
        self.segments.last().unwrap()
    }

    /// Parent path, or None for a top-level node.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Path {
            module: self.module.clone(),
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a child segment.
    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path {
            module: self.module.clone(),
            segments,
        }
    }

    /// True when `self` addresses `other` or a node inside its subtree.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.module == other.module
            && self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i == 0 {
                write!(f, "/{}:{}", self.module, seg)?;
            } else {
                write!(f, "/{}", seg)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = ConfError;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// Split on '/' while respecting quoted predicate values.
fn split_segments(input: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in input.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '/' if !in_quote => {
                if current.is_empty() {
                    return Err(ConfError::InvalidPath(format!("empty segment in '{}'", input)));
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if in_quote {
        return Err(ConfError::InvalidPath(format!("unterminated quote in '{}'", input)));
    }
    if current.is_empty() {
        return Err(ConfError::InvalidPath(format!("trailing '/' in '/{}'", input)));
    }
    segments.push(current);
    Ok(segments)
}

/// Parse `name[k1='v1'][k2='v2']` into the bare name and its predicates.
fn parse_predicates(raw: &str) -> Result<(String, BTreeMap<String, String>)> {
    let Some(bracket) = raw.find('[') else {
        return Ok((raw.to_string(), BTreeMap::new()));
    };

    let name = raw[..bracket].to_string();
    let mut keys = BTreeMap::new();
    let mut rest = &raw[bracket..];

    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .ok_or_else(|| ConfError::InvalidPath(format!("malformed predicate in '{}'", raw)))?;
        let end = inner
            .find(']')
            .ok_or_else(|| ConfError::InvalidPath(format!("unclosed predicate in '{}'", raw)))?;
        let body = &inner[..end];

        let (key, quoted) = body
            .split_once('=')
            .ok_or_else(|| ConfError::InvalidPath(format!("predicate without '=' in '{}'", raw)))?;
        let value = quoted
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .ok_or_else(|| {
                ConfError::InvalidPath(format!("predicate value must be quoted in '{}'", raw))
            })?;
        if key.is_empty() {
            return Err(ConfError::InvalidPath(format!("empty predicate key in '{}'", raw)));
        }
        if keys.insert(key.to_string(), value.to_string()).is_some() {
            return Err(ConfError::InvalidPath(format!(
                "duplicate predicate key '{}' in '{}'",
                key, raw
            )));
        }
        rest = &inner[end + 1..];
    }

    Ok((name, keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_leaf() {
        let p = Path::parse("/ietf-interfaces:interfaces/enabled").unwrap();
        assert_eq!(p.module(), "ietf-interfaces");
        assert_eq!(p.depth(), 2);
        assert_eq!(p.segments()[0].name, "interfaces");
        assert_eq!(p.segments()[1].name, "enabled");
    }

    #[test]
    fn test_parse_list_entry_keys() {
        let p = Path::parse("/m:ifaces/iface[name='eth0']/mtu").unwrap();
        let seg = &p.segments()[1];
        assert_eq!(seg.name, "iface");
        assert_eq!(seg.keys.get("name").map(String::as_str), Some("eth0"));
    }

    #[test]
    fn test_parse_multiple_keys() {
        let p = Path::parse("/m:routes/route[dst='10.0.0.0/8'][metric='5']").unwrap();
        let seg = p.last();
        assert_eq!(seg.keys.len(), 2);
        // quoted slash must not split the segment
        assert_eq!(seg.keys.get("dst").map(String::as_str), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_roundtrip_display() {
        for s in [
            "/m:a/b/c",
            "/m:list[name='x']/leaf",
            "/m:l[a='1'][b='2']",
        ] {
            assert_eq!(Path::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_reject_malformed() {
        for s in [
            "",
            "no-slash",
            "/",
            "/noprefix/x",
            "/m:a//b",
            "/m:a/b/",
            "/m:a/x:b",
            "/m:l[k=v]",
            "/m:l[k='v'",
            "/m:l[k='v]",
            "/m:l[='v']",
            "/m:l[k='a'][k='b']",
        ] {
            assert!(Path::parse(s).is_err(), "expected parse failure for '{}'", s);
        }
    }

    #[test]
    fn test_parent_and_starts_with() {
        let p = Path::parse("/m:a/b[k='1']/c").unwrap();
        let parent = p.parent().unwrap();
        assert_eq!(parent.to_string(), "/m:a/b[k='1']");
        assert!(p.starts_with(&parent));
        assert!(!parent.starts_with(&p));
        assert!(p.parent().unwrap().parent().unwrap().parent().is_none());
    }
}
