//! Dot/bracket path parsing and JSON navigation shared by the resolver and the
//! output storage contract (`tasks.X.output.arr[1].name` style addressing).

use serde_json::Value;
use snafu::prelude::*;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("malformed path segment '{segment}' in path '{path}'"))]
    MalformedSegment { path: String, segment: String },

    #[snafu(display("path '{path}' navigates through a non-container at '{segment}'"))]
    NotAContainer { path: String, segment: String },

    #[snafu(display("missing segment '{segment}' in path '{path}'"))]
    MissingSegment { path: String, segment: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One step of a navigation path: a named field, optionally followed by an
/// array index (`name[3]`), or a bare array index (`[3]`) at the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: Option<String>,
    pub index: Option<usize>,
}

impl Segment {
    /// A human-readable label for error messages.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.key, self.index) {
            (Some(k), Some(i)) => format!("{k}[{i}]"),
            (Some(k), None) => k.clone(),
            (None, Some(i)) => format!("[{i}]"),
            (None, None) => String::new(),
        }
    }
}

/// Parse a single path component, e.g. `output[0]` or `tasks`, without
/// splitting on `.`. Used by the resolver to inspect one expression segment
/// at a time (the segment may still carry a bracket index).
pub fn parse_root_only(part: &str) -> Result<Segment> {
    parse_segment(part, part)
}

/// Parse a dot-separated path like `arr[1].name` or `name[0]` into segments.
///
/// An empty path parses to an empty segment list (navigation is a no-op).
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(Vec::new());
    }

    path.split('.')
        .map(|part| parse_segment(path, part))
        .collect()
}

fn parse_segment(full_path: &str, part: &str) -> Result<Segment> {
    match part.find('[') {
        None => Ok(Segment {
            key: Some(part.to_string()),
            index: None,
        }),
        Some(bracket_pos) => {
            if !part.ends_with(']') {
                return MalformedSegmentSnafu {
                    path: full_path.to_string(),
                    segment: part.to_string(),
                }
                .fail();
            }
            let key = &part[..bracket_pos];
            let index_str = &part[bracket_pos + 1..part.len() - 1];
            let index: usize = index_str.parse().map_err(|_| {
                MalformedSegmentSnafu {
                    path: full_path.to_string(),
                    segment: part.to_string(),
                }
                .build()
            })?;
            Ok(Segment {
                key: if key.is_empty() {
                    None
                } else {
                    Some(key.to_string())
                },
                index: Some(index),
            })
        }
    }
}

/// Walk `segments` over `root`, returning the leaf value or a navigation error.
pub fn navigate<'a>(root: &'a Value, path: &str, segments: &[Segment]) -> Result<&'a Value> {
    let mut current = root;
    for segment in segments {
        if let Some(key) = &segment.key {
            current = current
                .as_object()
                .and_then(|obj| obj.get(key))
                .ok_or_else(|| {
                    MissingSegmentSnafu {
                        path: path.to_string(),
                        segment: segment.label(),
                    }
                    .build()
                })?;
        }
        if let Some(index) = segment.index {
            current = current
                .as_array()
                .ok_or_else(|| {
                    NotAContainerSnafu {
                        path: path.to_string(),
                        segment: segment.label(),
                    }
                    .build()
                })?
                .get(index)
                .ok_or_else(|| {
                    MissingSegmentSnafu {
                        path: path.to_string(),
                        segment: segment.label(),
                    }
                    .build()
                })?;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_field() {
        let segs = parse("name").unwrap();
        assert_eq!(
            segs,
            vec![Segment {
                key: Some("name".to_string()),
                index: None
            }]
        );
    }

    #[test]
    fn parses_indexed_field() {
        let segs = parse("arr[1]").unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].key.as_deref(), Some("arr"));
        assert_eq!(segs[0].index, Some(1));
    }

    #[test]
    fn parses_multi_segment_path() {
        let segs = parse("a.b[2].c").unwrap();
        assert_eq!(segs.len(), 3);
    }

    #[test]
    fn rejects_malformed_bracket() {
        assert!(parse("arr[1").is_err());
    }

    #[test]
    fn navigates_nested_value() {
        let root = json!({"a": {"b": [1, 2, 3]}});
        let segs = parse("a.b[1]").unwrap();
        let value = navigate(&root, "a.b[1]", &segs).unwrap();
        assert_eq!(value, &json!(2));
    }

    #[test]
    fn missing_segment_is_an_error() {
        let root = json!({"a": {}});
        let segs = parse("a.missing").unwrap();
        let err = navigate(&root, "a.missing", &segs).unwrap_err();
        assert!(matches!(err, Error::MissingSegment { .. }));
    }
}
