// handlers/quotes.rs
// Quote tools

use gem_types::Effects;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, req_i64, req_str};
use crate::db;
use crate::error::{GemError, Result};

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("quotes.create", |input, ctx| Box::pin(create(input, ctx)));
    registry.insert("quotes.accept", |input, ctx| Box::pin(accept(input, ctx)));
}

async fn create(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let lead_id = req_str(&input, "lead_id")?.to_string();
    let amount_cents = req_i64(&input, "amount_cents")?;
    let description = req_str(&input, "description")?.to_string();

    let quote_id = format!("quote-{}", Uuid::new_v4());

    {
        let lead_id = lead_id.clone();
        let quote_id = quote_id.clone();
        ctx.pool
            .interact(move |conn| {
                if db::get_lead_sync(conn, &lead_id)?.is_none() {
                    return Err(GemError::Handler(format!("lead {lead_id} not found")).into());
                }
                db::insert_quote_sync(conn, &quote_id, &lead_id, amount_cents, &description)?;
                Ok(())
            })
            .await?;
    }

    let effects = Effects::db_write("quotes", "insert", &quote_id);
    let result = json!({
        "quote_id": quote_id,
        "lead_id": lead_id,
        "amount_cents": amount_cents,
    });
    Ok(HandlerOutcome::success(result, effects))
}

async fn accept(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let quote_id = req_str(&input, "quote_id")?.to_string();

    {
        let quote_id = quote_id.clone();
        ctx.pool
            .interact(move |conn| {
                let updated = db::accept_quote_sync(conn, &quote_id)?;
                if updated == 1 {
                    return Ok(());
                }
                match db::get_quote_status_sync(conn, &quote_id)? {
                    // Accepting twice is a no-op, not a failure
                    Some(status) if status == "accepted" => Ok(()),
                    Some(status) => Err(GemError::Handler(format!(
                        "quote {quote_id} is {status}, cannot accept"
                    ))
                    .into()),
                    None => Err(GemError::Handler(format!("quote {quote_id} not found")).into()),
                }
            })
            .await?;
    }

    let effects = Effects::db_write("quotes", "update", &quote_id);
    let result = json!({"quote_id": quote_id, "status": "accepted"});
    Ok(HandlerOutcome::success(result, effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSecrets;
    use crate::db::DatabasePool;
    use std::sync::Arc;

    async fn ctx_with_lead() -> HandlerContext {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            db::insert_lead_sync(conn, "l1", "John", "0412345678", "Clayton", "test")?;
            Ok(())
        })
        .await
        .unwrap();
        HandlerContext {
            pool,
            secrets: ProviderSecrets::default(),
            call_id: "call-test".to_string(),
            tool_name: "quotes.create".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_accept() {
        let ctx = ctx_with_lead().await;

        let HandlerOutcome::Success { result, .. } = create(
            json!({"lead_id": "l1", "amount_cents": 420000, "description": "Full reroof"}),
            ctx.clone(),
        )
        .await
        .unwrap() else {
            panic!("expected success");
        };
        let quote_id = result["quote_id"].as_str().unwrap().to_string();

        let outcome = accept(json!({"quote_id": quote_id}), ctx.clone()).await.unwrap();
        let HandlerOutcome::Success { result, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(result["status"], "accepted");
    }

    #[tokio::test]
    async fn test_accept_twice_is_ok() {
        let ctx = ctx_with_lead().await;
        let HandlerOutcome::Success { result, .. } = create(
            json!({"lead_id": "l1", "amount_cents": 420000, "description": "Full reroof"}),
            ctx.clone(),
        )
        .await
        .unwrap() else {
            panic!("expected success");
        };
        let quote_id = result["quote_id"].as_str().unwrap().to_string();

        accept(json!({"quote_id": quote_id.clone()}), ctx.clone()).await.unwrap();
        accept(json!({"quote_id": quote_id}), ctx.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_missing_quote_fails() {
        let ctx = ctx_with_lead().await;
        let err = accept(json!({"quote_id": "ghost"}), ctx.clone()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
