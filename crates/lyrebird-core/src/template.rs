//! `${req.*}` interpolation over JSON response templates.
//!
//! A string value that is exactly one reference, like `"${req.amount}"`,
//! is replaced by the referenced value with its type intact. References
//! embedded in longer strings are spliced in as text and must resolve to
//! scalars. A reference that does not point into the request payload is
//! a hard render error.

use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};
use crate::predicate::resolve_path;

const REQUEST_NAMESPACE: &str = "req";

/// Expands every reference in `template` against the request payload.
pub fn interpolate(template: &Value, request: &Value) -> LyrebirdResult<Value> {
    match template {
        Value::String(s) => expand_str(s, request),
        Value::Array(items) => items
            .iter()
            .map(|item| interpolate(item, request))
            .collect::<LyrebirdResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), interpolate(value, request)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn expand_str(s: &str, request: &Value) -> LyrebirdResult<Value> {
    let Some(start) = s.find("${") else {
        return Ok(Value::String(s.to_string()));
    };

    // A lone reference keeps the referenced value's type.
    if start == 0 {
        if let Some(token) = s[2..].strip_suffix('}') {
            if !token.contains('}') && !token.contains("${") {
                return resolve_token(token, request).cloned();
            }
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated reference; keep the text as-is.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = &after[..end];
        push_scalar(&mut out, token, resolve_token(token, request)?)?;
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn resolve_token<'a>(token: &str, request: &'a Value) -> LyrebirdResult<&'a Value> {
    let path = if token == REQUEST_NAMESPACE {
        ""
    } else if let Some(path) = token.strip_prefix("req.") {
        path
    } else {
        return Err(LyrebirdError::UnresolvedReference(token.to_string()));
    };
    resolve_path(request, path)
        .ok_or_else(|| LyrebirdError::UnresolvedReference(token.to_string()))
}

fn push_scalar(out: &mut String, token: &str, value: &Value) -> LyrebirdResult<()> {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
        Value::Array(_) | Value::Object(_) => {
            return Err(LyrebirdError::InvalidArgument(format!(
                "reference ${{{token}}} is not a scalar and can't be spliced into text"
            )))
        }
    }
    Ok(())
}
