// ============================================================================
// Structural Paths
// ============================================================================
//
// A path addresses one location inside a JSON document: object keys joined
// with '.', array positions as "[i]". Keys containing '.', '[', ']' or '\'
// are escaped with a backslash so file names like "a.ts" survive the
// round-trip through a path string.
//
// ============================================================================

use serde_json::Value;

/// One step through a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Append an object key to a parent path, escaping special characters.
pub fn join_key(parent: &str, key: &str) -> String {
    let escaped = escape_key(key);
    if parent.is_empty() {
        escaped
    } else {
        format!("{parent}.{escaped}")
    }
}

/// Append an array index to a parent path.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

fn escape_key(key: &str) -> String {
    if !key.contains(['.', '[', ']', '\\']) {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if matches!(ch, '.' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Parse a path string back into segments. The empty path addresses the
/// document root.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut has_current = false;
    let mut chars = path.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_current = true;
                }
            }
            '.' => {
                if has_current {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    has_current = false;
                }
            }
            '[' => {
                if has_current {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    has_current = false;
                }
                let mut digits = String::new();
                for digit in chars.by_ref() {
                    if digit == ']' {
                        break;
                    }
                    digits.push(digit);
                }
                if let Ok(index) = digits.parse::<usize>() {
                    segments.push(PathSegment::Index(index));
                }
            }
            other => {
                current.push(other);
                has_current = true;
            }
        }
    }
    if has_current {
        segments.push(PathSegment::Key(current));
    }
    segments
}

/// First segment of a path as display text; empty for the root path.
pub fn root_segment(path: &str) -> String {
    match parse_path(path).into_iter().next() {
        Some(PathSegment::Key(key)) => key,
        Some(PathSegment::Index(index)) => format!("[{index}]"),
        None => String::new(),
    }
}

/// Segments as unescaped display text: keys verbatim, indexes as "[i]".
pub fn display_segments(path: &str) -> Vec<String> {
    parse_path(path)
        .into_iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => key,
            PathSegment::Index(index) => format!("[{index}]"),
        })
        .collect()
}

/// Human-readable form of a path: unescaped segments joined with '.'.
/// Selection patterns match against this form.
pub fn display_path(path: &str) -> String {
    display_segments(path).join(".")
}

/// Strip the first segment, returning the remainder as a path string.
/// Used when the kind prefix of a composed diff path has been consumed.
pub fn strip_root(path: &str) -> String {
    let segments = parse_path(path);
    rebuild(&segments[1.min(segments.len())..])
}

fn rebuild(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(key) => out = join_key(&out, key),
            PathSegment::Index(index) => out = join_index(&out, *index),
        }
    }
    out
}

/// Read the value at `segments`, if present.
pub fn get_at<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Write `value` at `segments`, materializing intermediate containers:
/// objects for key segments, arrays (null-padded) for index segments.
pub fn set_at(root: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for (position, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(segments[position + 1], PathSegment::Index(_));
        current = match segment {
            PathSegment::Key(key) => {
                let obj = ensure_object(current);
                obj.entry(key.clone())
                    .or_insert_with(|| empty_container(next_is_index))
            }
            PathSegment::Index(index) => {
                let arr = ensure_array(current);
                while arr.len() <= *index {
                    arr.push(Value::Null);
                }
                &mut arr[*index]
            }
        };
    }

    match last {
        PathSegment::Key(key) => {
            ensure_object(current).insert(key.clone(), value);
        }
        PathSegment::Index(index) => {
            let arr = ensure_array(current);
            if *index < arr.len() {
                arr[*index] = value;
            } else {
                while arr.len() < *index {
                    arr.push(Value::Null);
                }
                arr.push(value);
            }
        }
    }
}

/// Remove the value at `segments`. A missing target is a no-op; the root
/// path resets the document to null.
pub fn remove_at(root: &mut Value, segments: &[PathSegment]) {
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Null;
        return;
    };

    let mut current = root;
    for segment in parents {
        let next = match segment {
            PathSegment::Key(key) => current.as_object_mut().and_then(|obj| obj.get_mut(key)),
            PathSegment::Index(index) => {
                current.as_array_mut().and_then(|arr| arr.get_mut(*index))
            }
        };
        match next {
            Some(value) => current = value,
            None => return,
        }
    }

    match last {
        PathSegment::Key(key) => {
            if let Some(obj) = current.as_object_mut() {
                obj.remove(key);
            }
        }
        PathSegment::Index(index) => {
            if let Some(arr) = current.as_array_mut() {
                if *index < arr.len() {
                    arr.remove(*index);
                }
            }
        }
    }
}

/// Empty container to materialize for an intermediate segment:
/// an array when the next segment indexes, otherwise an object.
fn empty_container(next_is_index: bool) -> Value {
    if next_is_index {
        Value::Array(Vec::new())
    } else {
        Value::Object(serde_json::Map::new())
    }
}

fn ensure_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    value.as_object_mut().unwrap_or_else(|| unreachable!())
}

fn ensure_array(value: &mut Value) -> &mut Vec<Value> {
    if !value.is_array() {
        *value = Value::Array(Vec::new());
    }
    value.as_array_mut().unwrap_or_else(|| unreachable!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_and_parse_roundtrip() {
        let path = join_index(&join_key(&join_key("", "items"), "nested"), 3);
        assert_eq!(path, "items.nested[3]");
        assert_eq!(
            parse_path(&path),
            vec![
                PathSegment::Key("items".into()),
                PathSegment::Key("nested".into()),
                PathSegment::Index(3),
            ]
        );
    }

    #[test]
    fn test_dotted_keys_are_escaped() {
        let path = join_key("files", "a.ts");
        assert_eq!(path, "files.a\\.ts");
        assert_eq!(
            parse_path(&path),
            vec![
                PathSegment::Key("files".into()),
                PathSegment::Key("a.ts".into()),
            ]
        );
        assert_eq!(root_segment(&path), "files");
        assert_eq!(strip_root(&path), "a\\.ts");
    }

    #[test]
    fn test_set_creates_intermediate_containers() {
        let mut doc = json!({});
        set_at(
            &mut doc,
            &parse_path("a.b[1].c"),
            json!(42),
        );
        assert_eq!(doc, json!({"a": {"b": [null, {"c": 42}]}}));
    }

    #[test]
    fn test_remove_is_lenient() {
        let mut doc = json!({"a": {"b": 1}});
        remove_at(&mut doc, &parse_path("a.missing.deep"));
        assert_eq!(doc, json!({"a": {"b": 1}}));

        remove_at(&mut doc, &parse_path("a.b"));
        assert_eq!(doc, json!({"a": {}}));
    }

    #[test]
    fn test_get_at() {
        let doc = json!({"items": [{"name": "x"}, {"name": "y"}]});
        let value = get_at(&doc, &parse_path("items[1].name")).unwrap();
        assert_eq!(value, &json!("y"));
        assert!(get_at(&doc, &parse_path("items[9]")).is_none());
    }
}
