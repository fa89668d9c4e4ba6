//! Cache Key Module
//!
//! Deterministic fingerprints for (method, path, params) triples.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == HTTP Method ==
/// Request verbs understood by the resilience layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Responses to safe reads may be cached.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    /// Writes invalidate the cached GET of the resource they target.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Method::Post | Method::Put | Method::Patch | Method::Delete
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Key Generation ==
/// Builds the fingerprint `METHOD path?params` with params in canonical order.
///
/// Query-string pairs on `path` are folded into `params`, with explicit params
/// winning on a clash and repeated names collected into an array. Object keys
/// are sorted lexicographically at every nesting level; array order is
/// preserved.
pub fn fingerprint(method: Method, path: &str, params: &Value) -> String {
    let (path, query) = split_query(path);
    let pairs = query_pairs(query);

    let mut key = String::with_capacity(path.len() + 32);
    key.push_str(method.as_str());
    key.push(' ');
    key.push_str(&canonical_path(path));

    match params {
        Value::Null | Value::Object(_) => {
            let mut merged: Vec<(String, Value)> = pairs;
            if let Value::Object(map) = params {
                merged.retain(|(name, _)| !map.contains_key(name));
                merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if !merged.is_empty() {
                key.push('?');
                write_object(merged.iter().map(|(k, v)| (k.as_str(), v)), &mut key);
            }
        }
        other => {
            // Non-object params cannot absorb the query string; keep it sorted on the path.
            if !pairs.is_empty() {
                key.push('?');
                write_object(pairs.iter().map(|(k, v)| (k.as_str(), v)), &mut key);
            }
            key.push('?');
            write_canonical(other, &mut key);
        }
    }
    key
}

/// Normalizes a request path: leading slash, no empty segments, no trailing
/// slash. Any query string or fragment is dropped.
pub fn canonical_path(path: &str) -> String {
    let (path, _) = split_query(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Splits `path?query#fragment` into path and query.
fn split_query(path: &str) -> (&str, &str) {
    let path = path.split('#').next().unwrap_or_default();
    path.split_once('?').unwrap_or((path, ""))
}

/// Decodes `a=1&b=2&a=3` into `[("a", ["1", "3"]), ("b", "2")]`. Values stay
/// percent-encoded; a name without `=` maps to the empty string.
fn query_pairs(query: &str) -> Vec<(String, Value)> {
    let mut pairs: Vec<(String, Value)> = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = part.split_once('=').unwrap_or((part, ""));
        let value = Value::String(value.to_string());
        match pairs.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, Value::Array(values))) => values.push(value),
            Some((_, first)) => *first = Value::Array(vec![first.take(), value]),
            None => pairs.push((name.to_string(), value)),
        }
    }
    pairs
}

/// Writes an object with its entries sorted by name, whatever order they
/// arrive in.
pub(crate) fn write_object<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a Value)>,
    out: &mut String,
) {
    let mut entries: Vec<(&str, &Value)> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(k.to_string()).to_string());
        out.push(':');
        write_canonical(v, out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map.iter().map(|(k, v)| (k.as_str(), v)), out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_order_is_irrelevant() {
        let a = fingerprint(Method::Get, "/repos", &json!({"a": 1, "b": 2}));
        let b = fingerprint(Method::Get, "/repos", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = fingerprint(Method::Get, "/x", &json!({"f": {"z": 1, "y": [3, 1]}}));
        let b = fingerprint(Method::Get, "/x", &json!({"f": {"y": [3, 1], "z": 1}}));
        assert_eq!(a, b);
        assert_eq!(a, "GET /x?{\"f\":{\"y\":[3,1],\"z\":1}}");
    }

    #[test]
    fn test_array_order_matters() {
        let a = fingerprint(Method::Get, "/x", &json!({"ids": [1, 2]}));
        let b = fingerprint(Method::Get, "/x", &json!({"ids": [2, 1]}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_method_distinguishes_keys() {
        let params = json!({});
        assert_ne!(
            fingerprint(Method::Get, "/x", &params),
            fingerprint(Method::Head, "/x", &params)
        );
    }

    #[test]
    fn test_empty_params_have_no_suffix() {
        assert_eq!(fingerprint(Method::Get, "repos/", &Value::Null), "GET /repos");
        assert_eq!(fingerprint(Method::Get, "/repos", &json!({})), "GET /repos");
    }

    #[test]
    fn test_canonical_path() {
        assert_eq!(canonical_path("repos//octo/hello/"), "/repos/octo/hello");
        assert_eq!(canonical_path("/"), "/");
        assert_eq!(canonical_path("/search?q=1"), "/search");
        assert_eq!(canonical_path("/search#top"), "/search");
    }

    #[test]
    fn test_query_string_distinguishes_keys() {
        let a = fingerprint(Method::Get, "/search?q=1", &json!({}));
        let b = fingerprint(Method::Get, "/search?q=2", &json!({}));
        assert_ne!(a, b);
        assert_eq!(a, "GET /search?{\"q\":\"1\"}");
    }

    #[test]
    fn test_query_string_merges_with_params() {
        let inline = fingerprint(Method::Get, "/search?q=rust&page=2", &Value::Null);
        let reordered = fingerprint(Method::Get, "/search?page=2&q=rust", &Value::Null);
        let explicit = fingerprint(Method::Get, "/search", &json!({"page": "2", "q": "rust"}));
        assert_eq!(inline, reordered);
        assert_eq!(inline, explicit);

        // Explicit params take precedence over the query string.
        assert_eq!(
            fingerprint(Method::Get, "/search?page=9", &json!({"page": "2"})),
            fingerprint(Method::Get, "/search", &json!({"page": "2"}))
        );
    }

    #[test]
    fn test_repeated_query_names_collect_in_order() {
        assert_eq!(
            fingerprint(Method::Get, "/x?tag=b&tag=a&flag", &Value::Null),
            "GET /x?{\"flag\":\"\",\"tag\":[\"b\",\"a\"]}"
        );
    }

    #[test]
    fn test_method_classes() {
        assert!(Method::Get.is_cacheable());
        assert!(!Method::Post.is_cacheable());
        assert!(Method::Delete.is_mutation());
        assert!(!Method::Head.is_mutation());
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }
}
