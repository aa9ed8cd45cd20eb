// crates/gem-types/src/lib.rs

//! Shared data contracts between the GEM server and its clients.
//!
//! This crate provides the wire model for:
//! - **Router requests/responses**: the `/brain/run` contract
//! - **Receipts**: the sealed, terminal record of an invocation
//! - **Effects**: the structured audit of handler side effects
//!
//! These types carry no server-side dependencies; everything here is plain
//! serde over JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===================================================
// ERROR CODES
// ===================================================

/// Receipt error codes (stored as strings in `result.error.error_code`)
pub mod error_codes {
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const TIMEOUT: &str = "timeout";
    pub const HANDLER_ERROR: &str = "handler_error";
    pub const WORKER_LOST: &str = "worker_lost";
    pub const DB_ERROR: &str = "db_error";
}

// ===================================================
// ROUTER REQUEST
// ===================================================

/// What the Router should do with the plan it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrainMode {
    /// Produce a plan and summarise it; enqueue nothing.
    Answer,
    /// Same as `Answer` but the plan is marked as awaiting approval.
    Plan,
    /// Validate, enqueue, return call ids immediately.
    Enqueue,
    /// Enqueue, then poll receipts until all present or the wait times out.
    EnqueueAndWait,
}

impl Default for BrainMode {
    fn default() -> Self {
        BrainMode::Answer
    }
}

/// Caller-supplied entity context, injected into planned inputs when the
/// target tool's schema declares the field and extraction left it empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

/// Caps and timeouts for a single Router run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainLimits {
    /// Cap on plan length; excess candidates are silently truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<usize>,
    /// Receipt-wait bound for `enqueue_and_wait` (milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
    /// Receipt poll interval (milliseconds, default 500).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

/// Body of `POST /brain/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainRequest {
    pub message: String,
    #[serde(default)]
    pub mode: BrainMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BrainLimits>,
}

// ===================================================
// PLAN ARTIFACT
// ===================================================

/// One candidate invocation produced by the planner.
///
/// Every planning backend (the rule matcher, or any fallback slotted in
/// behind it) must return exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool_name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Matcher confidence in [0.0, 1.0].
    pub confidence: f32,
}

// ===================================================
// RECEIPTS
// ===================================================

/// Terminal verdict of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Succeeded,
    Failed,
    NotConfigured,
}

/// The sealed record of one invocation, as returned to callers.
///
/// Wire contract:
/// - `succeeded`      → `result` matches the tool's output schema
/// - `failed`         → `result.error` carries `{error_code, message, ...}`
/// - `not_configured` → `result` carries `{reason, required_env, next_steps}`
///
/// When idempotency short-circuits execution, the receipt is freshly written
/// for the current call id with the prior verdict's `result` copied through
/// and `effects.idempotency_hit = true`. Exactly one receipt exists per
/// terminal call id, always.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptView {
    pub call_id: String,
    pub tool_name: String,
    pub status: ReceiptStatus,
    pub result: Value,
    pub effects: Effects,
    pub created_at: String,
}

// ===================================================
// EFFECTS
// ===================================================

/// One database write performed by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbWrite {
    pub table: String,
    /// "insert", "update", or "reuse" (keyed create hit an existing row)
    pub op: String,
    pub id: String,
}

/// One outbound message sent by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSent {
    pub channel: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// One file written by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWritten {
    pub path: String,
    pub bytes: u64,
}

/// One external service call performed by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCall {
    pub service: String,
    pub endpoint: String,
    pub ok: bool,
}

/// Structured audit of the side effects a handler performed.
///
/// Informational, not transactional: the engine records what handlers
/// report and does not reconcile the entries against actual writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Effects {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub db_writes: Vec<DbWrite>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages_sent: Vec<MessageSent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<FileWritten>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_calls: Vec<ExternalCall>,
    /// Set when idempotency reused a prior verdict instead of re-running.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotency_hit: bool,
}

impl Effects {
    /// Effects with a single db write entry (the common handler case).
    pub fn db_write(table: &str, op: &str, id: &str) -> Self {
        Effects {
            db_writes: vec![DbWrite {
                table: table.to_string(),
                op: op.to_string(),
                id: id.to_string(),
            }],
            ..Default::default()
        }
    }
}

// ===================================================
// ROUTER RESPONSE
// ===================================================

/// Body of the `/brain/run` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainResponse {
    pub ok: bool,
    pub run_id: String,
    /// Human-readable description of what the planner decided and why.
    pub decision: String,
    pub planned: Vec<PlannedCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enqueued: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<ReceiptView>,
    /// Call ids still in flight when the receipt wait timed out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

// ===================================================
// WEBHOOK INGRESS
// ===================================================

/// Acknowledgement for `POST /webhooks/{source}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    /// "queued", "ignored", or "duplicate"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

// ===================================================
// GENERIC API ENVELOPE
// ===================================================

/// Standard REST envelope for the remaining HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ============================================================================
    // BrainRequest tests
    // ============================================================================

    #[test]
    fn test_brain_request_defaults() {
        let req: BrainRequest = serde_json::from_str(r#"{"message": "health check"}"#).unwrap();
        assert_eq!(req.mode, BrainMode::Answer);
        assert!(req.context.is_none());
        assert!(req.limits.is_none());
    }

    #[test]
    fn test_brain_mode_wire_names() {
        let req: BrainRequest =
            serde_json::from_str(r#"{"message": "x", "mode": "enqueue_and_wait"}"#).unwrap();
        assert_eq!(req.mode, BrainMode::EnqueueAndWait);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"enqueue_and_wait\""));
    }

    #[test]
    fn test_limits_roundtrip() {
        let req: BrainRequest = serde_json::from_str(
            r#"{"message": "x", "mode": "enqueue", "limits": {"max_tool_calls": 3, "wait_timeout_ms": 2000}}"#,
        )
        .unwrap();
        let limits = req.limits.unwrap();
        assert_eq!(limits.max_tool_calls, Some(3));
        assert_eq!(limits.wait_timeout_ms, Some(2000));
        assert_eq!(limits.poll_interval_ms, None);
    }

    // ============================================================================
    // Receipt wire contract tests
    // ============================================================================

    #[test]
    fn test_receipt_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReceiptStatus::NotConfigured).unwrap(),
            "\"not_configured\""
        );
        assert_eq!(
            serde_json::from_str::<ReceiptStatus>("\"succeeded\"").unwrap(),
            ReceiptStatus::Succeeded
        );
    }

    #[test]
    fn test_effects_empty_serializes_compact() {
        let fx = Effects::default();
        let json = serde_json::to_value(&fx).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn test_effects_idempotency_hit_surfaces() {
        let fx = Effects {
            idempotency_hit: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&fx).unwrap();
        assert_eq!(json, json!({"idempotency_hit": true}));
    }

    #[test]
    fn test_effects_db_write_helper() {
        let fx = Effects::db_write("leads", "insert", "lead-1");
        assert_eq!(fx.db_writes.len(), 1);
        assert_eq!(fx.db_writes[0].table, "leads");
        assert_eq!(fx.db_writes[0].op, "insert");
    }

    // ============================================================================
    // Envelope tests
    // ============================================================================

    #[test]
    fn test_api_response_ok() {
        let resp = ApiResponse::ok(json!({"tools": 13}));
        assert!(resp.success);
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_api_response_err() {
        let resp: ApiResponse<()> = ApiResponse::err("bad request");
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("bad request"));
    }

    #[test]
    fn test_webhook_ack_shape() {
        let ack = WebhookAck {
            status: "duplicate".to_string(),
            call_id: None,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json, json!({"status": "duplicate"}));
    }
}
