// web/webhooks.rs
// Typed event ingress: external webhook deliveries become queued invocations
//
// Signature verification runs over the RAW body before any parsing. The
// dedup key `<source>-<event>-<external_id>` collapses duplicate deliveries
// on the queue's unique index.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gem_types::{ApiResponse, WebhookAck};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use uuid::Uuid;

use super::state::AppState;
use crate::db;
use crate::validator;

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried by deliveries.
const SIGNATURE_HEADER: &str = "x-signature";

/// Map a source + event type to a tool and its input.
///
/// The table is fixed: unknown events are acknowledged and ignored so the
/// sender stops retrying them.
fn map_event(source: &str, event: &str, data: &Value) -> Option<(&'static str, Value)> {
    match (source, event) {
        ("ghl", "contact.create") => {
            let input = json!({
                "name": data.get("name").and_then(Value::as_str).unwrap_or_default(),
                "phone": data.get("phone").and_then(Value::as_str).unwrap_or_default(),
                "suburb": data.get("suburb").and_then(Value::as_str).unwrap_or_default(),
                "source": data.get("source").and_then(Value::as_str).unwrap_or("ghl"),
            });
            Some(("leads.create", input))
        }
        ("ghl", "invoice.paid") => {
            let input = json!({
                "invoice_id": data.get("invoice_id").and_then(Value::as_str).unwrap_or_default(),
            });
            Some(("invoices.mark_paid", input))
        }
        _ => None,
    }
}

/// Verify an HMAC-SHA256 hex signature over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Compute the hex signature for a body (used by tests and docs).
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// `POST /webhooks/{source}`
pub async fn ingress(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Only sources in the mapping table exist
    if source != "ghl" {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err(format!("unknown webhook source {source:?}"))),
        )
            .into_response();
    }

    // Signature check is mandatory whenever a secret is configured
    if let Some(secret) = state.secrets.ghl_webhook.as_deref() {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        let verified = provided
            .map(|signature| verify_signature(secret, &body, signature))
            .unwrap_or(false);
        if !verified {
            tracing::warn!(source = %source, "webhook signature missing or invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::err("invalid webhook signature")),
            )
                .into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::err(format!("body is not valid JSON: {e}"))),
            )
                .into_response();
        }
    };

    let event = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let external_id = payload
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let data = payload.get("data").cloned().unwrap_or_else(|| json!({}));

    let Some((tool_name, input)) = map_event(&source, &event, &data) else {
        tracing::debug!(source = %source, event = %event, "ignoring unmapped webhook event");
        return Json(WebhookAck {
            status: "ignored".to_string(),
            call_id: None,
        })
        .into_response();
    };

    // The ingress validates like the Router does: bad payloads never reach
    // the queue.
    if let Some(tool) = state.registry.get(tool_name)
        && let Err(ve) = validator::validate(&tool.input_schema, &input)
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err(format!("{tool_name}: {ve}"))),
        )
            .into_response();
    }

    let idempotency_key = format!("{source}-{event}-{external_id}");
    let call_id = format!("call-{}", Uuid::new_v4());
    let input_json = input.to_string();

    let insert = {
        let call_id = call_id.clone();
        let idempotency_key = idempotency_key.clone();
        state
            .pool
            .interact(move |conn| {
                match db::enqueue_sync(conn, &call_id, tool_name, &input_json, Some(&idempotency_key))
                {
                    Ok(()) => Ok(true),
                    Err(e) if db::is_unique_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    };

    match insert {
        Ok(true) => Json(WebhookAck {
            status: "queued".to_string(),
            call_id: Some(call_id),
        })
        .into_response(),
        Ok(false) => {
            tracing::debug!(key = %idempotency_key, "duplicate webhook delivery collapsed");
            // Surface the call the first delivery created
            let existing = {
                let idempotency_key = idempotency_key.clone();
                state
                    .pool
                    .try_interact("duplicate webhook lookup", move |conn| {
                        Ok(db::get_by_idempotency_key_sync(conn, &idempotency_key)?)
                    })
                    .await
                    .flatten()
            };
            Json(WebhookAck {
                status: "duplicate".to_string(),
                call_id: existing.map(|invocation| invocation.call_id),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("webhook enqueue failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::err("enqueue failed")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let secret = "shared-secret";
        let body = br#"{"event":"contact.create","id":"42"}"#;
        let signature = sign_body(secret, body);
        assert!(verify_signature(secret, body, &signature));
        assert!(!verify_signature(secret, b"tampered", &signature));
        assert!(!verify_signature("other-secret", body, &signature));
        assert!(!verify_signature(secret, body, "not-hex"));
    }

    #[test]
    fn test_map_event_table() {
        let data = json!({"name": "John", "phone": "0412345678", "suburb": "Clayton"});
        let (tool, input) = map_event("ghl", "contact.create", &data).unwrap();
        assert_eq!(tool, "leads.create");
        assert_eq!(input["source"], "ghl");

        assert!(map_event("ghl", "contact.delete", &data).is_none());
        assert!(map_event("stripe", "contact.create", &data).is_none());
    }
}
