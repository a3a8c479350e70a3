//! `code` block execution is host-language-specific and out of scope here
//! (spec Non-goals: no bundled scripting engine). This trait is the seam
//! `vg-runtime` dispatches through; nothing in this workspace implements it.

use serde_json::Value;
use vg_error::VgError;

/// Executes the body of a `code` block against a connection's variable
/// environment, returning the block's `value` reply when `return` is set.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, language: &str, source: &str, origin: Option<&str>) -> Result<Option<Value>, VgError>;
}
