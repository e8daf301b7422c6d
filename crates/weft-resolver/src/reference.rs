//! `${context.<path>}` reference resolution.

use serde_json::Value;
use weft_workflow::WorkflowContext;

use crate::error::ResolveError;

const PREFIX: &str = "${context.";
const SUFFIX: &str = "}";

/// Anything references can be resolved against.
pub trait ReferenceSource {
  /// Look up a single stored key.
  fn lookup(&self, key: &str) -> Option<Value>;
}

impl ReferenceSource for WorkflowContext {
  fn lookup(&self, key: &str) -> Option<Value> {
    self.get(key)
  }
}

impl ReferenceSource for serde_json::Map<String, Value> {
  fn lookup(&self, key: &str) -> Option<Value> {
    self.get(key).cloned()
  }
}

/// Return the path of a `${context.<path>}` reference, or `None` if `s` is
/// not a reference.
pub fn parse_reference(s: &str) -> Option<&str> {
  s.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)
}

/// Resolve every reference inside `value`, recursing through arrays and
/// objects. Non-reference values are returned as they are.
pub fn resolve_value<S: ReferenceSource + ?Sized>(
  value: &Value,
  source: &S,
) -> Result<Value, ResolveError> {
  match value {
    Value::String(s) => match parse_reference(s) {
      Some(path) => lookup_path(path, s, source),
      None => Ok(value.clone()),
    },
    Value::Array(items) => items
      .iter()
      .map(|item| resolve_value(item, source))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => {
      let mut resolved = serde_json::Map::with_capacity(map.len());
      for (k, v) in map {
        resolved.insert(k.clone(), resolve_value(v, source)?);
      }
      Ok(Value::Object(resolved))
    }
    _ => Ok(value.clone()),
  }
}

/// Resolve a step's input map. Errors name the input that failed.
pub fn resolve_inputs<S: ReferenceSource + ?Sized>(
  inputs: &serde_json::Map<String, Value>,
  source: &S,
) -> Result<serde_json::Map<String, Value>, ResolveError> {
  let mut resolved = serde_json::Map::with_capacity(inputs.len());
  for (key, value) in inputs {
    let value = resolve_value(value, source).map_err(|e| ResolveError::Input {
      input: key.clone(),
      source: Box::new(e),
    })?;
    resolved.insert(key.clone(), value);
  }
  Ok(resolved)
}

fn lookup_path<S: ReferenceSource + ?Sized>(
  path: &str,
  reference: &str,
  source: &S,
) -> Result<Value, ResolveError> {
  if path.is_empty() {
    return Err(ResolveError::InvalidReference {
      reference: reference.to_string(),
    });
  }

  if let Some(value) = source.lookup(path) {
    return Ok(value);
  }

  // Longest stored prefix, then walk the rest
  let segments: Vec<&str> = path.split('.').collect();
  for split in (1..segments.len()).rev() {
    let key = segments[..split].join(".");
    if let Some(root) = source.lookup(&key) {
      return walk(&root, &segments[split..]).ok_or_else(|| ResolveError::MissingReference {
        key: path.to_string(),
      });
    }
  }

  Err(ResolveError::MissingReference {
    key: path.to_string(),
  })
}

fn walk(root: &Value, segments: &[&str]) -> Option<Value> {
  let mut current = root;
  for segment in segments {
    current = match current {
      Value::Object(map) => map.get(*segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current.clone())
}
