// worker/idempotency.rs
// Dedup enforcement, run by the worker before any handler executes

use std::sync::Arc;

use crate::db::{self, DatabasePool, Invocation, ReceiptRow};
use crate::error::{GemError, Result};
use crate::registry::{IdempotencyMode, ToolDef};

/// What the idempotency check decided.
#[derive(Debug)]
pub enum IdempotencyVerdict {
    /// No prior verdict applies; run the handler.
    Proceed,
    /// This exact call already has a receipt (a worker died between sealing
    /// and transitioning). Finish the row to match; write nothing.
    AlreadySealed(ReceiptRow),
    /// A prior verdict covers this call's dedup key. Seal the current call
    /// with a fresh receipt copying that verdict, marked as a hit.
    ReusePrior(ReceiptRow),
}

/// Check dedup state for a claimed invocation.
///
/// Ordering matters: this runs before input validation, so a keyed tool with
/// a missing key field must surface as a validation error, not a lookup
/// crash.
pub async fn check(
    pool: &Arc<DatabasePool>,
    tool: &ToolDef,
    invocation: &Invocation,
) -> Result<IdempotencyVerdict> {
    // Crash recovery applies to every mode: a receipt for this call_id means
    // the verdict is already sealed, whatever the queue row says.
    let call_id = invocation.call_id.clone();
    if let Some(existing) = pool
        .interact(move |conn| Ok(db::get_receipt_sync(conn, &call_id)?))
        .await?
    {
        return Ok(IdempotencyVerdict::AlreadySealed(existing));
    }

    match tool.idempotency.mode {
        IdempotencyMode::None => Ok(IdempotencyVerdict::Proceed),
        IdempotencyMode::SafeRetry => {
            // The queue's unique idempotency_key index already collapses
            // key duplicates at enqueue; this lookup is the second line of
            // defence for rows that predate the index.
            if let Some(key) = invocation.idempotency_key.clone() {
                let prior = pool
                    .interact(move |conn| Ok(db::find_by_idempotency_key_sync(conn, &key)?))
                    .await?;
                if let Some(receipt) = prior.filter(|r| r.call_id != invocation.call_id) {
                    return Ok(IdempotencyVerdict::ReusePrior(receipt));
                }
            }
            Ok(IdempotencyVerdict::Proceed)
        }
        IdempotencyMode::Keyed => {
            let key_field = tool.idempotency.key_field.as_deref().ok_or_else(|| {
                // Registry::load rejects this; guard against a hand-built registry
                GemError::Registry(format!("{}: keyed tool without key_field", tool.name))
            })?;

            let input: serde_json::Value = serde_json::from_str(&invocation.input)?;
            let Some(key_value) = input.get(key_field).and_then(|v| v.as_str()) else {
                return Err(GemError::InvalidInput(format!(
                    "{}: required field is missing",
                    key_field
                )));
            };

            let tool_name = tool.name.clone();
            let key_field = key_field.to_string();
            let key_value = key_value.to_string();
            let prior = pool
                .interact(move |conn| {
                    Ok(db::find_keyed_receipt_sync(
                        conn, &tool_name, &key_field, &key_value,
                    )?)
                })
                .await?;

            match prior {
                Some(receipt) => Ok(IdempotencyVerdict::ReusePrior(receipt)),
                None => Ok(IdempotencyVerdict::Proceed),
            }
        }
    }
}
