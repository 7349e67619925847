//! JSON path field extraction
//!
//! Supports the dotted/indexed subset of JSON path used in payload
//! definitions: an optional `$` root, `.name` members, `['name']` or
//! `["name"]` quoted members, and `[n]` array indexes. For example
//! `$.device.readings[0].value` or `meta['serial no']`.

use serde_json::Value;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Member(String),
    Index(usize),
}

/// A parsed field path. Malformed paths never resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Option<Vec<PathSegment>>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        Self {
            raw: path.to_string(),
            segments: parse_segments(path.trim()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the path matched the supported grammar
    pub fn is_well_formed(&self) -> bool {
        self.segments.is_some()
    }

    pub fn segments(&self) -> Option<&[PathSegment]> {
        self.segments.as_deref()
    }

    /// Resolve against `value`, returning the scalar found there.
    ///
    /// Missing members, out-of-range indexes, malformed paths and paths
    /// that land on an object or array all yield `None`.
    pub fn extract<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let segments = self.segments.as_ref()?;
        let target = segments.iter().try_fold(value, |current, segment| match segment {
            PathSegment::Member(name) => current.as_object()?.get(name),
            PathSegment::Index(index) => current.as_array()?.get(*index),
        })?;

        match target {
            Value::Object(_) | Value::Array(_) => None,
            scalar => Some(scalar),
        }
    }
}

/// Convenience wrapper over [`FieldPath::parse`] and [`FieldPath::extract`]
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    FieldPath::parse(path).extract(value)
}

fn parse_segments(path: &str) -> Option<Vec<PathSegment>> {
    let mut rest = path.strip_prefix('$').unwrap_or(path);
    let mut segments = Vec::new();
    let mut first = !path.starts_with('$');

    while !rest.is_empty() {
        if let Some(after_bracket) = rest.strip_prefix('[') {
            let (segment, remaining) = parse_bracket(after_bracket)?;
            segments.push(segment);
            rest = remaining;
        } else {
            let member = match rest.strip_prefix('.') {
                Some(after_dot) => after_dot,
                None if first => rest,
                None => return None,
            };
            let end = member.find(['.', '[']).unwrap_or(member.len());
            let name = &member[..end];
            if name.is_empty() {
                return None;
            }
            segments.push(PathSegment::Member(name.to_string()));
            rest = &member[end..];
        }
        first = false;
    }

    Some(segments)
}

/// Parse the inside of `[...]`, returning the segment and the text after `]`
fn parse_bracket(input: &str) -> Option<(PathSegment, &str)> {
    let quote = input.chars().next().filter(|c| *c == '\'' || *c == '"');

    match quote {
        Some(quote) => {
            let body = &input[1..];
            let close = body.find(quote)?;
            let remaining = body[close + 1..].strip_prefix(']')?;
            Some((PathSegment::Member(body[..close].to_string()), remaining))
        }
        None => {
            let close = input.find(']')?;
            let index = input[..close].trim().parse::<usize>().ok()?;
            Some((PathSegment::Index(index), &input[close + 1..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "device": {
                "id": "pump-7",
                "readings": [ { "value": 21.5 }, { "value": 22.0 } ],
                "active": true,
                "serial no": "SN-1"
            },
            "count": 3,
            "empty": null
        })
    }

    #[test]
    fn test_dotted_members() {
        let doc = sample();
        assert_eq!(extract(&doc, "$.device.id"), Some(&json!("pump-7")));
        assert_eq!(extract(&doc, "device.id"), Some(&json!("pump-7")));
        assert_eq!(extract(&doc, "count"), Some(&json!(3)));
        assert_eq!(extract(&doc, "$.device.active"), Some(&json!(true)));
    }

    #[test]
    fn test_indexes_and_quoted_members() {
        let doc = sample();
        assert_eq!(
            extract(&doc, "$.device.readings[1].value"),
            Some(&json!(22.0))
        );
        assert_eq!(extract(&doc, "$['device']['serial no']"), Some(&json!("SN-1")));
        assert_eq!(extract(&doc, r#"device["id"]"#), Some(&json!("pump-7")));
    }

    #[test]
    fn test_null_scalar_is_returned() {
        let doc = sample();
        assert_eq!(extract(&doc, "$.empty"), Some(&Value::Null));
    }

    #[test]
    fn test_missing_segments_are_absent() {
        let doc = sample();
        assert_eq!(extract(&doc, "$.device.missing"), None);
        assert_eq!(extract(&doc, "$.device.readings[5].value"), None);
        assert_eq!(extract(&doc, "$.count.inner"), None);
    }

    #[test]
    fn test_non_scalar_targets_are_absent() {
        let doc = sample();
        assert_eq!(extract(&doc, "$.device"), None);
        assert_eq!(extract(&doc, "$.device.readings"), None);
        assert_eq!(extract(&doc, "$"), None);
    }

    #[test]
    fn test_malformed_paths_are_absent() {
        let doc = sample();
        for path in ["$..device", "device.", "$.device[", "$.device['id'", "$[x]", "$device"] {
            let parsed = FieldPath::parse(path);
            assert!(!parsed.is_well_formed(), "{path} should be malformed");
            assert_eq!(parsed.extract(&doc), None);
        }
    }

    #[test]
    fn test_segments() {
        let path = FieldPath::parse("$.a[2]['b c']");
        assert_eq!(
            path.segments(),
            Some(
                &[
                    PathSegment::Member("a".to_string()),
                    PathSegment::Index(2),
                    PathSegment::Member("b c".to_string()),
                ][..]
            )
        );
        assert_eq!(path.as_str(), "$.a[2]['b c']");
    }
}
