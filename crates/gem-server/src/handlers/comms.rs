// handlers/comms.rs
// Outbound communications

use gem_types::{Effects, ExternalCall, MessageSent};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, opt_str, req_str};
use crate::db;
use crate::error::{GemError, Result};

/// Fallback provider endpoint when SMS_API_URL is not set.
const DEFAULT_SMS_API_URL: &str = "https://api.sms-provider.example/v1/messages";

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("comms.send_sms", |input, ctx| Box::pin(send_sms(input, ctx)));
}

async fn send_sms(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    if !ctx.secrets.has_sms() {
        return Ok(HandlerOutcome::NotConfigured {
            reason: "SMS provider credentials are not configured".to_string(),
            required_env: vec!["SMS_API_KEY".to_string(), "SMS_FROM_NUMBER".to_string()],
            next_steps: vec![
                "Set SMS_API_KEY to your provider API key".to_string(),
                "Set SMS_FROM_NUMBER to the sender number".to_string(),
                "Restart the worker".to_string(),
            ],
        });
    }

    let to = req_str(&input, "to")?.to_string();
    let body = req_str(&input, "body")?.to_string();
    let lead_id = opt_str(&input, "lead_id").map(str::to_string);

    let api_key = ctx.secrets.sms_api_key.clone().unwrap_or_default();
    let from = ctx.secrets.sms_from_number.clone().unwrap_or_default();
    let api_url = ctx
        .secrets
        .sms_api_url
        .clone()
        .unwrap_or_else(|| DEFAULT_SMS_API_URL.to_string());

    let client = reqwest::Client::new();
    let response = client
        .post(&api_url)
        .bearer_auth(&api_key)
        .json(&json!({"from": from, "to": to, "body": body}))
        .send()
        .await
        .map_err(|e| GemError::Handler(format!("SMS provider unreachable: {e}")))?;

    let provider_ok = response.status().is_success();
    if !provider_ok {
        let status = response.status();
        return Err(GemError::Handler(format!(
            "SMS provider rejected the message ({status})"
        )));
    }

    let provider_id = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("sms-{}", Uuid::new_v4()));

    let log_id = format!("comm-{}", Uuid::new_v4());
    {
        let log_id = log_id.clone();
        let lead_id = lead_id.clone();
        let to = to.clone();
        let body = body.clone();
        let provider_id = provider_id.clone();
        ctx.pool
            .interact(move |conn| {
                db::insert_comms_log_sync(
                    conn,
                    &log_id,
                    lead_id.as_deref(),
                    "sms",
                    "outbound",
                    Some(&to),
                    &body,
                    Some(&provider_id),
                )?;
                Ok(())
            })
            .await?;
    }

    let effects = Effects {
        db_writes: vec![gem_types::DbWrite {
            table: "comms_log".to_string(),
            op: "insert".to_string(),
            id: log_id,
        }],
        messages_sent: vec![MessageSent {
            channel: "sms".to_string(),
            to: to.clone(),
            provider_id: Some(provider_id.clone()),
        }],
        external_calls: vec![ExternalCall {
            service: "sms".to_string(),
            endpoint: api_url,
            ok: provider_ok,
        }],
        ..Default::default()
    };
    let result = json!({"message_id": provider_id, "to": to});
    Ok(HandlerOutcome::success(result, effects))
}
