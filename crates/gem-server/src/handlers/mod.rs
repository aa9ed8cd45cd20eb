//! Domain handlers and the dispatch table.
//!
//! Handlers are async functions with the signature
//! `(input, HandlerContext) -> Result<HandlerOutcome>`. The engine resolves
//! them through a [`HandlerRegistry`] populated once at init by each domain
//! module's `register` function - no runtime reflection, no dynamic import.
//!
//! Naming convention: the tool `domain.method` maps to the function `method`
//! in the module `domain`; for multi-segment names the trailing segments are
//! joined with underscores (`integrations.google_drive.search` would be
//! `google_drive_search` in `integrations`).
//!
//! Handlers never write receipts - the engine owns the receipt. Everything a
//! handler did to the outside world goes into [`Effects`].

use futures::future::BoxFuture;
use gem_types::Effects;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderSecrets;
use crate::db::DatabasePool;
use crate::error::{GemError, Result};

pub mod comms;
pub mod inspections;
pub mod invoices;
pub mod jobs;
pub mod leads;
pub mod os;
pub mod quotes;

/// What a handler hands back to the engine.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The tool did its work; `result` must match the output schema.
    Success { result: Value, effects: Effects },
    /// The tool is registered but its environment is incomplete.
    NotConfigured {
        reason: String,
        required_env: Vec<String>,
        next_steps: Vec<String>,
    },
}

impl HandlerOutcome {
    pub fn success(result: Value, effects: Effects) -> Self {
        HandlerOutcome::Success { result, effects }
    }
}

/// Execution context passed to every handler.
///
/// Carries the shared resources plus the invocation metadata; handlers must
/// not reach around it to global state. Cloning is cheap (Arcs and short
/// strings), so each dispatch gets its own copy.
#[derive(Clone)]
pub struct HandlerContext {
    pub pool: Arc<DatabasePool>,
    pub secrets: ProviderSecrets,
    pub call_id: String,
    pub tool_name: String,
}

pub type HandlerFn = fn(Value, HandlerContext) -> BoxFuture<'static, Result<HandlerOutcome>>;

/// The `(name) → function` map the engine dispatches through.
#[derive(Default)]
pub struct HandlerRegistry {
    map: HashMap<&'static str, HandlerFn>,
}

impl HandlerRegistry {
    /// Build the full dispatch table from every domain module.
    pub fn with_all_domains() -> Self {
        let mut registry = HandlerRegistry::default();
        os::register(&mut registry);
        leads::register(&mut registry);
        inspections::register(&mut registry);
        quotes::register(&mut registry);
        jobs::register(&mut registry);
        invoices::register(&mut registry);
        comms::register(&mut registry);
        registry
    }

    pub fn insert(&mut self, name: &'static str, handler: HandlerFn) {
        if self.map.insert(name, handler).is_some() {
            // Two modules claiming one tool is a wiring bug, fail loudly at init
            panic!("handler registered twice for {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.map.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Input field helpers
// ═══════════════════════════════════════════════════════════════════════════════
// Inputs are schema-validated before dispatch, so these mostly guard against
// handler/catalogue drift rather than user error.

pub(crate) fn req_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GemError::InvalidInput(format!("missing string field {field:?}")))
}

pub(crate) fn opt_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

pub(crate) fn req_i64(input: &Value, field: &str) -> Result<i64> {
    input
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| GemError::InvalidInput(format!("missing integer field {field:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn test_every_catalogue_tool_has_a_handler() {
        let registry = Registry::load().unwrap();
        let handlers = HandlerRegistry::with_all_domains();
        for tool in registry.all() {
            assert!(
                handlers.get(&tool.name).is_some(),
                "no handler registered for {}",
                tool.name
            );
        }
        assert_eq!(handlers.len(), registry.len());
    }

    #[test]
    fn test_unknown_name_resolves_to_none() {
        let handlers = HandlerRegistry::with_all_domains();
        assert!(handlers.get("does.not_exist").is_none());
    }

    #[test]
    fn test_req_helpers() {
        let input = serde_json::json!({"name": "John", "amount_cents": 5});
        assert_eq!(req_str(&input, "name").unwrap(), "John");
        assert!(req_str(&input, "missing").is_err());
        assert_eq!(req_i64(&input, "amount_cents").unwrap(), 5);
        assert_eq!(opt_str(&input, "missing"), None);
    }
}
