use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::tool::Tool;

/// Lookup of tools by name.
pub trait ToolRegistry: Send + Sync {
  fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;

  /// Registered tool names, sorted.
  fn names(&self) -> Vec<String>;
}

/// Registry holding tools in memory.
#[derive(Default)]
pub struct InMemoryToolRegistry {
  tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl InMemoryToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a tool under its own name, returning any tool it replaced.
  pub fn register(&self, tool: impl Tool + 'static) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = Arc::new(tool);
    let name = tool.name().to_string();
    self.tools.write().insert(name, tool)
  }

  /// Builder-style [`InMemoryToolRegistry::register`].
  pub fn with(self, tool: impl Tool + 'static) -> Self {
    self.register(tool);
    self
  }

  pub fn len(&self) -> usize {
    self.tools.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ToolRegistry for InMemoryToolRegistry {
  fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
    self.tools.read().get(name).cloned()
  }

  fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
    names.sort();
    names
  }
}
