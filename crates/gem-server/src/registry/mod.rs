// crates/gem-server/src/registry/mod.rs
// Tool catalogue: loaded once at startup, frozen for the process lifetime

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{GemError, Result};
use crate::validator;

/// The authoritative catalogue document, compiled into the binary.
const CATALOG: &str = include_str!("catalog.json");

/// Dedup discipline for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyMode {
    /// Always execute; no dedup.
    None,
    /// A prior receipt for the same call id or idempotency key is reused.
    SafeRetry,
    /// Dedup on a value inside the input payload, named by `key_field`.
    Keyed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Idempotency {
    pub mode: IdempotencyMode,
    #[serde(default)]
    pub key_field: Option<String>,
}

/// One tool definition from the catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDef {
    /// `domain.method` (or `domain.subdomain.method`)
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub idempotency: Idempotency,
    pub timeout_ms: u64,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Dotted result paths that must be populated on success.
    #[serde(default)]
    pub receipt_fields: Vec<String>,
}

/// Read-only tool catalogue.
///
/// Loaded once at startup; there is no mutation API. Catalogue changes
/// require a process restart.
#[derive(Debug)]
pub struct Registry {
    tools: Vec<ToolDef>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Load and verify the embedded catalogue. Any structural problem is a
    /// fatal startup error, not a runtime surprise.
    pub fn load() -> Result<Self> {
        Self::from_document(CATALOG)
    }

    /// Parse a catalogue document (separated from `load` for tests).
    pub fn from_document(doc: &str) -> Result<Self> {
        let tools: Vec<ToolDef> = serde_json::from_str(doc)
            .map_err(|e| GemError::Registry(format!("catalogue does not parse: {e}")))?;

        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            verify_tool(tool)?;
            if by_name.insert(tool.name.clone(), idx).is_some() {
                return Err(GemError::Registry(format!(
                    "duplicate tool name {:?}",
                    tool.name
                )));
            }
        }

        Ok(Registry { tools, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn all(&self) -> &[ToolDef] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn verify_tool(tool: &ToolDef) -> Result<()> {
    if tool.name.is_empty() || !tool.name.contains('.') {
        return Err(GemError::Registry(format!(
            "tool name {:?} must be domain.method",
            tool.name
        )));
    }
    if tool.timeout_ms == 0 {
        return Err(GemError::Registry(format!(
            "{}: timeout_ms must be positive",
            tool.name
        )));
    }

    match tool.idempotency.mode {
        IdempotencyMode::Keyed => {
            let Some(key_field) = tool.idempotency.key_field.as_deref() else {
                return Err(GemError::Registry(format!(
                    "{}: keyed idempotency requires key_field",
                    tool.name
                )));
            };
            // The key field must be a declared, required input field
            let declared = tool
                .input_schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.contains_key(key_field))
                .unwrap_or(false);
            if !declared {
                return Err(GemError::Registry(format!(
                    "{}: key_field {key_field:?} is not in input_schema",
                    tool.name
                )));
            }
        }
        IdempotencyMode::None | IdempotencyMode::SafeRetry => {
            if tool.idempotency.key_field.is_some() {
                return Err(GemError::Registry(format!(
                    "{}: key_field is only valid with keyed mode",
                    tool.name
                )));
            }
        }
    }

    validator::check_schema(&tool.input_schema)
        .map_err(|e| GemError::Registry(format!("{}: input_schema: {e}", tool.name)))?;
    validator::check_schema(&tool.output_schema)
        .map_err(|e| GemError::Registry(format!("{}: output_schema: {e}", tool.name)))?;

    Ok(())
}
