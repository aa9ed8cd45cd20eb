// handlers/os.rs
// Operational tools

use gem_types::Effects;
use serde_json::{Value, json};

use super::{HandlerContext, HandlerOutcome, HandlerRegistry};
use crate::db;
use crate::error::Result;

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("os.health_check", |input, ctx| {
        Box::pin(health_check(input, ctx))
    });
}

/// Probe store connectivity and report queue depth.
async fn health_check(_input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let probe = ctx
        .pool
        .interact(|conn| {
            let (queued, running) = db::queue_counts_sync(conn)?;
            let receipts = db::receipt_count_sync(conn)?;
            Ok((queued, running, receipts))
        })
        .await;

    let result = match probe {
        Ok((queued, running, receipts)) => json!({
            "database": "ok",
            "queued": queued,
            "running": running,
            "receipts": receipts,
        }),
        Err(e) => {
            tracing::warn!("health check could not reach the store: {}", e);
            json!({"database": "unreachable"})
        }
    };

    Ok(HandlerOutcome::success(result, Effects::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSecrets;
    use crate::db::DatabasePool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_check_reports_counts() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            db::enqueue_sync(conn, "c1", "t", "{}", None)?;
            Ok(())
        })
        .await
        .unwrap();

        let ctx = HandlerContext {
            pool,
            secrets: ProviderSecrets::default(),
            call_id: "call-hc".to_string(),
            tool_name: "os.health_check".to_string(),
        };

        let outcome = health_check(json!({}), ctx.clone()).await.unwrap();
        let HandlerOutcome::Success { result, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(result["database"], "ok");
        assert_eq!(result["queued"], 1);
        assert_eq!(result["receipts"], 0);
    }
}
