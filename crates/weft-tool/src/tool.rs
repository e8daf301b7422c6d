use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Resolved inputs handed to a tool.
pub type ToolInputs = serde_json::Map<String, serde_json::Value>;

/// A callable operation.
///
/// Implementations should watch `cancel` for long-running work; the caller
/// also enforces its own deadline by dropping the future.
#[async_trait]
pub trait Tool: Send + Sync {
  fn name(&self) -> &str;

  fn description(&self) -> &str {
    ""
  }

  async fn invoke(
    &self,
    inputs: ToolInputs,
    cancel: CancellationToken,
  ) -> Result<serde_json::Value, ToolError>;
}

/// A tool backed by an async closure.
///
/// ```ignore
/// let triple = FnTool::new("triple", |inputs| async move {
///   let n = inputs.get("item").and_then(|v| v.as_i64()).unwrap_or(0);
///   Ok(serde_json::json!(n * 3))
/// });
/// ```
pub struct FnTool<F> {
  name: String,
  handler: F,
}

impl<F, Fut> FnTool<F>
where
  F: Fn(ToolInputs) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
  pub fn new(name: impl Into<String>, handler: F) -> Self {
    Self {
      name: name.into(),
      handler,
    }
  }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
  F: Fn(ToolInputs) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
  fn name(&self) -> &str {
    &self.name
  }

  async fn invoke(
    &self,
    inputs: ToolInputs,
    _cancel: CancellationToken,
  ) -> Result<serde_json::Value, ToolError> {
    (self.handler)(inputs).await
  }
}
