use thiserror::Error;

/// Errors that can occur while resolving context references.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The referenced key is not in the context.
  #[error("context variable not found: {key}")]
  MissingReference { key: String },

  /// The reference has an empty path.
  #[error("invalid reference: {reference}")]
  InvalidReference { reference: String },

  /// Resolution failed inside a named step input.
  #[error("failed to resolve input '{input}': {source}")]
  Input {
    input: String,
    #[source]
    source: Box<ResolveError>,
  },
}

impl ResolveError {
  /// The context key that could not be found, looking through input wrappers.
  pub fn missing_key(&self) -> Option<&str> {
    match self {
      Self::MissingReference { key } => Some(key),
      Self::InvalidReference { .. } => None,
      Self::Input { source, .. } => source.missing_key(),
    }
  }
}

/// Errors that can occur while evaluating a condition.
#[derive(Debug, Error)]
pub enum ConditionError {
  #[error("unknown operator: {operator}")]
  UnknownOperator { operator: String },

  #[error("cannot compare {value} as a number")]
  NotNumeric { value: String },

  #[error(transparent)]
  Resolve(#[from] ResolveError),
}
