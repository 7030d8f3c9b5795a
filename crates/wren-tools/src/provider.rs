use async_trait::async_trait;

use crate::{ToolCall, ToolContext, ToolOutput, ToolSchema};

/// A source of callable tools.  The dispatcher consults its providers in
/// order and uses the first one that claims a name.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Short label used in logs.
    fn provider_name(&self) -> &str;

    fn has_tool(&self, name: &str) -> bool;

    /// Schemas of every tool this provider can run right now.
    fn tool_schemas(&self) -> Vec<ToolSchema>;

    /// Run a tool this provider claims.  Failures are returned as error
    /// outputs, never raised.
    async fn call_tool(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}
