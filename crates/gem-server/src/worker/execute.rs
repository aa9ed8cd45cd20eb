// worker/execute.rs
// Execution pipeline for a claimed invocation
//
// resolve tool → idempotency → validate input → dispatch with deadline →
// check output → seal with exactly one receipt → terminal transition.
// Handler failures of every kind become failed receipts; only store errors
// propagate to the caller (the worker loop logs them and the sweeper
// eventually resolves the row).

use gem_types::{Effects, error_codes};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use super::idempotency::{self, IdempotencyVerdict};
use crate::config::ProviderSecrets;
use crate::db::{self, DatabasePool, Invocation, InvocationStatus};
use crate::error::{GemError, Result};
use crate::handlers::{HandlerContext, HandlerOutcome, HandlerRegistry};
use crate::registry::Registry;
use crate::validator;

/// Executes claimed invocations against the handler table.
pub struct Executor {
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    secrets: ProviderSecrets,
}

impl Executor {
    pub fn new(
        pool: Arc<DatabasePool>,
        registry: Arc<Registry>,
        handlers: Arc<HandlerRegistry>,
        secrets: ProviderSecrets,
    ) -> Self {
        Self {
            pool,
            registry,
            handlers,
            secrets,
        }
    }

    /// Run the full pipeline for one claimed (running) invocation.
    ///
    /// Returns Err only for store failures; every handler-side outcome is
    /// sealed into a receipt here.
    pub async fn execute(&self, invocation: &Invocation) -> Result<()> {
        let call_id = &invocation.call_id;
        tracing::debug!(%call_id, tool = %invocation.tool_name, "executing invocation");

        // 1. Resolve the tool definition
        let Some(tool) = self.registry.get(&invocation.tool_name) else {
            return self
                .seal_failed(
                    invocation,
                    error_codes::UNKNOWN_TOOL,
                    format!("tool {:?} is not in the registry", invocation.tool_name),
                    None,
                )
                .await;
        };

        // 2. Idempotency check
        match idempotency::check(&self.pool, tool, invocation).await {
            Ok(IdempotencyVerdict::Proceed) => {}
            Ok(IdempotencyVerdict::AlreadySealed(receipt)) => {
                // Receipt exists from an earlier attempt: only the row
                // transition is missing.
                let status = if receipt.status == "succeeded" {
                    InvocationStatus::Succeeded
                } else {
                    InvocationStatus::Failed
                };
                tracing::info!(%call_id, "receipt already sealed, finishing row to match");
                return self.finish_row(call_id, status, None).await;
            }
            Ok(IdempotencyVerdict::ReusePrior(prior)) => {
                tracing::info!(
                    %call_id,
                    prior_call = %prior.call_id,
                    "idempotency hit, copying prior verdict"
                );
                let result: Value = serde_json::from_str(&prior.result).unwrap_or(Value::Null);
                let effects = Effects {
                    idempotency_hit: true,
                    ..Default::default()
                };
                let (row_status, row_error) = match prior.status.as_str() {
                    "succeeded" => (InvocationStatus::Succeeded, None),
                    "not_configured" => {
                        (InvocationStatus::Failed, Some("not_configured".to_string()))
                    }
                    _ => (InvocationStatus::Failed, None),
                };
                return self
                    .seal(invocation, &prior.status, result, effects, row_status, row_error)
                    .await;
            }
            Err(GemError::InvalidInput(message)) => {
                return self
                    .seal_failed(invocation, error_codes::VALIDATION_ERROR, message, None)
                    .await;
            }
            Err(GemError::Json(e)) => {
                return self
                    .seal_failed(
                        invocation,
                        error_codes::VALIDATION_ERROR,
                        format!("input is not valid JSON: {e}"),
                        None,
                    )
                    .await;
            }
            Err(e) => return Err(e),
        }

        // 3. Re-validate input (defence in depth - the Router validated too)
        let input: Value = match serde_json::from_str(&invocation.input) {
            Ok(value) => value,
            Err(e) => {
                return self
                    .seal_failed(
                        invocation,
                        error_codes::VALIDATION_ERROR,
                        format!("input is not valid JSON: {e}"),
                        None,
                    )
                    .await;
            }
        };
        if let Err(ve) = validator::validate(&tool.input_schema, &input) {
            return self
                .seal_failed(
                    invocation,
                    error_codes::VALIDATION_ERROR,
                    ve.message.clone(),
                    Some(json!({"path": ve.path})),
                )
                .await;
        }

        // 4. Resolve the handler
        let Some(handler) = self.handlers.get(&tool.name) else {
            tracing::warn!(tool = %tool.name, "registered tool has no handler");
            let result = json!({
                "reason": format!("tool {} is registered but has no handler in this build", tool.name),
                "required_env": [],
                "next_steps": ["Deploy a worker build that includes this handler"],
            });
            return self
                .seal(
                    invocation,
                    "not_configured",
                    result,
                    Effects::default(),
                    InvocationStatus::Failed,
                    Some("not_configured".to_string()),
                )
                .await;
        };

        // 5. Dispatch, racing the handler against the tool deadline. The
        // engine owns the timeout; handlers are never trusted with it.
        let ctx = HandlerContext {
            pool: self.pool.clone(),
            secrets: self.secrets.clone(),
            call_id: call_id.clone(),
            tool_name: tool.name.clone(),
        };
        let deadline = Duration::from_millis(tool.timeout_ms);
        let outcome = tokio::time::timeout(deadline, handler(input, ctx)).await;

        match outcome {
            Err(_elapsed) => {
                tracing::warn!(%call_id, tool = %tool.name, timeout_ms = tool.timeout_ms, "handler timed out");
                self.seal_failed(
                    invocation,
                    error_codes::TIMEOUT,
                    format!("handler exceeded {} ms", tool.timeout_ms),
                    None,
                )
                .await
            }
            Ok(Err(e)) => {
                tracing::warn!(%call_id, tool = %tool.name, "handler error: {}", e);
                self.seal_failed(invocation, error_codes::HANDLER_ERROR, e.to_string(), None)
                    .await
            }
            Ok(Ok(HandlerOutcome::NotConfigured {
                reason,
                required_env,
                next_steps,
            })) => {
                let result = json!({
                    "reason": reason,
                    "required_env": required_env,
                    "next_steps": next_steps,
                });
                self.seal(
                    invocation,
                    "not_configured",
                    result,
                    Effects::default(),
                    InvocationStatus::Failed,
                    Some("not_configured".to_string()),
                )
                .await
            }
            Ok(Ok(HandlerOutcome::Success { result, effects })) => {
                // Output drift is surfaced, never downgraded: the handler is
                // authoritative for its verdict.
                if let Err(ve) = validator::validate(&tool.output_schema, &result) {
                    tracing::warn!(tool = %tool.name, "output schema drift: {}", ve);
                }
                for field in &tool.receipt_fields {
                    if lookup_path(&result, field).is_none() {
                        tracing::warn!(tool = %tool.name, %field, "receipt field missing from result");
                    }
                }
                self.seal(
                    invocation,
                    "succeeded",
                    result,
                    effects,
                    InvocationStatus::Succeeded,
                    None,
                )
                .await
            }
        }
    }

    /// Seal a failure verdict.
    async fn seal_failed(
        &self,
        invocation: &Invocation,
        error_code: &str,
        message: String,
        details: Option<Value>,
    ) -> Result<()> {
        let mut error = json!({"error_code": error_code, "message": message});
        if let Some(details) = details {
            error["details"] = details;
        }
        self.seal(
            invocation,
            "failed",
            json!({"error": error}),
            Effects::default(),
            InvocationStatus::Failed,
            Some(error_code.to_string()),
        )
        .await
    }

    /// Write exactly one receipt, then transition the queue row.
    ///
    /// Receipt first: if the transition write dies, the sweeper finds the
    /// receipt and finishes the row instead of double-sealing it.
    async fn seal(
        &self,
        invocation: &Invocation,
        receipt_status: &str,
        result: Value,
        effects: Effects,
        row_status: InvocationStatus,
        row_error: Option<String>,
    ) -> Result<()> {
        let call_id = invocation.call_id.clone();
        let tool_name = invocation.tool_name.clone();
        let receipt_status = receipt_status.to_string();
        let result_json = serde_json::to_string(&result)?;
        let effects_json = serde_json::to_string(&effects)?;

        self.pool
            .interact_with_retry(move |conn| {
                let inserted = db::insert_receipt_if_absent_sync(
                    conn,
                    &call_id,
                    &tool_name,
                    &receipt_status,
                    &result_json,
                    &effects_json,
                )?;
                if !inserted {
                    tracing::warn!(call_id = %call_id, "receipt already present, keeping the existing one");
                }
                db::finish_sync(conn, &call_id, row_status, row_error.as_deref())?;
                Ok(())
            })
            .await?;

        tracing::info!(
            call_id = %invocation.call_id,
            tool = %invocation.tool_name,
            status = receipt_status_label(row_status),
            "invocation sealed"
        );
        Ok(())
    }

    async fn finish_row(
        &self,
        call_id: &str,
        status: InvocationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let call_id = call_id.to_string();
        self.pool
            .interact_with_retry(move |conn| {
                db::finish_sync(conn, &call_id, status, error.as_deref())?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

fn receipt_status_label(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Succeeded => "succeeded",
        InvocationStatus::Failed => "failed",
        InvocationStatus::Queued => "queued",
        InvocationStatus::Running => "running",
    }
}

/// Resolve a dotted path (`a.b.c`) inside a result object.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_path() {
        let value = json!({"a": {"b": {"c": 1}}, "top": "x"});
        assert_eq!(lookup_path(&value, "top"), Some(&json!("x")));
        assert_eq!(lookup_path(&value, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup_path(&value, "a.missing"), None);
    }
}
