//! End-to-end scenarios for the execution engine: enqueue → claim →
//! execute → receipt, including the dedup, timeout, and failure paths.
//!
//! Everything runs against a shared-cache in-memory pool; the worker
//! pipeline is driven directly (no HTTP, no sleeping poll loops) except
//! where the webhook ingress is the thing under test.

use gem::config::ProviderSecrets;
use gem::db::{self, DatabasePool, InvocationStatus};
use gem::handlers::{HandlerOutcome, HandlerRegistry};
use gem::registry::Registry;
use gem::web::{create_router, state::AppState, webhooks};
use gem::worker::Executor;
use gem_types::Effects;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct Harness {
    pool: Arc<DatabasePool>,
    executor: Executor,
}

impl Harness {
    async fn new() -> Self {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let registry = Arc::new(Registry::load().unwrap());
        let handlers = Arc::new(HandlerRegistry::with_all_domains());
        let executor = Executor::new(
            pool.clone(),
            registry,
            handlers,
            ProviderSecrets::default(),
        );
        Self { pool, executor }
    }

    async fn enqueue(&self, tool: &str, input: Value) -> String {
        let call_id = format!("call-{}", Uuid::new_v4());
        let input_json = input.to_string();
        let tool = tool.to_string();
        let id = call_id.clone();
        self.pool
            .interact(move |conn| {
                db::enqueue_sync(conn, &id, &tool, &input_json, None)?;
                Ok(())
            })
            .await
            .unwrap();
        call_id
    }

    /// Claim the oldest queued row and run the pipeline on it.
    async fn work_one(&self) -> Option<String> {
        let claimed = self
            .pool
            .interact_with_retry(|conn| Ok(db::claim_next_sync(conn, "test-worker")?))
            .await
            .unwrap()?;
        let call_id = claimed.call_id.clone();
        self.executor.execute(&claimed).await.unwrap();
        Some(call_id)
    }

    async fn receipt(&self, call_id: &str) -> Option<db::ReceiptRow> {
        let call_id = call_id.to_string();
        self.pool
            .interact(move |conn| Ok(db::get_receipt_sync(conn, &call_id)?))
            .await
            .unwrap()
    }

    async fn row_status(&self, call_id: &str) -> InvocationStatus {
        let call_id = call_id.to_string();
        self.pool
            .interact(move |conn| Ok(db::get_invocation_sync(conn, &call_id)?))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    /// Invariant 1: exactly one receipt per terminal invocation.
    async fn assert_receipt_invariant(&self) {
        let (terminal, receipts, orphans) = self
            .pool
            .interact(|conn| {
                let terminal: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM invocations WHERE status IN ('succeeded','failed')",
                    [],
                    |row| row.get(0),
                )?;
                let receipts: i64 =
                    conn.query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))?;
                let orphans: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM receipts r
                     LEFT JOIN invocations i ON i.call_id = r.call_id
                     WHERE i.call_id IS NULL OR i.status NOT IN ('succeeded','failed')",
                    [],
                    |row| row.get(0),
                )?;
                Ok((terminal, receipts, orphans))
            })
            .await
            .unwrap();
        assert_eq!(terminal, receipts, "one receipt per terminal invocation");
        assert_eq!(orphans, 0, "no receipt without a terminal invocation");
    }
}

fn result_of(receipt: &db::ReceiptRow) -> Value {
    serde_json::from_str(&receipt.result).unwrap()
}

// ════════════════════════════════════════════════════════════════════════════
// S1: health check
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn s1_health_check_succeeds() {
    let harness = Harness::new().await;
    let call_id = harness.enqueue("os.health_check", json!({})).await;

    harness.work_one().await.unwrap();

    let receipt = harness.receipt(&call_id).await.unwrap();
    assert_eq!(receipt.status, "succeeded");
    assert_eq!(result_of(&receipt)["database"], "ok");
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Succeeded);
    harness.assert_receipt_invariant().await;
}

// ════════════════════════════════════════════════════════════════════════════
// S2: keyed lead dedup
// ════════════════════════════════════════════════════════════════════════════

fn john() -> Value {
    json!({"name": "John", "phone": "0412345678", "suburb": "Clayton", "source": "test"})
}

#[tokio::test]
async fn s2_keyed_dedup_concurrent_creates() {
    let harness = Arc::new(Harness::new().await);
    let c1 = harness.enqueue("leads.create", john()).await;
    let c2 = harness.enqueue("leads.create", john()).await;

    // Two workers race the same key
    let (a, b) = tokio::join!(
        {
            let h = harness.clone();
            async move { h.work_one().await }
        },
        {
            let h = harness.clone();
            async move { h.work_one().await }
        }
    );
    assert!(a.is_some() && b.is_some());

    let r1 = harness.receipt(&c1).await.unwrap();
    let r2 = harness.receipt(&c2).await.unwrap();
    assert_eq!(r1.status, "succeeded");
    assert_eq!(r2.status, "succeeded");
    assert_eq!(
        result_of(&r1)["lead_id"], result_of(&r2)["lead_id"],
        "both receipts carry the same lead"
    );

    let lead_count: i64 = harness
        .pool
        .interact(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM leads WHERE phone = '0412345678'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(lead_count, 1, "exactly one lead row for the phone");
    harness.assert_receipt_invariant().await;
}

#[tokio::test]
async fn s2b_sequential_keyed_hit_marks_receipt() {
    let harness = Harness::new().await;
    let c1 = harness.enqueue("leads.create", john()).await;
    harness.work_one().await.unwrap();

    // Second call after the first sealed: the keyed check reuses the verdict
    let c2 = harness.enqueue("leads.create", john()).await;
    harness.work_one().await.unwrap();

    let r1 = harness.receipt(&c1).await.unwrap();
    let r2 = harness.receipt(&c2).await.unwrap();
    assert_eq!(result_of(&r1)["lead_id"], result_of(&r2)["lead_id"]);

    let effects: Effects = serde_json::from_str(&r2.effects).unwrap();
    assert!(effects.idempotency_hit, "reused verdict is marked");
    harness.assert_receipt_invariant().await;
}

// ════════════════════════════════════════════════════════════════════════════
// S3: unknown tool
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn s3_unknown_tool_fails_terminally() {
    let harness = Harness::new().await;
    let call_id = harness.enqueue("does.not_exist", json!({})).await;

    harness.work_one().await.unwrap();

    let receipt = harness.receipt(&call_id).await.unwrap();
    assert_eq!(receipt.status, "failed");
    assert_eq!(result_of(&receipt)["error"]["error_code"], "unknown_tool");
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Failed);
    harness.assert_receipt_invariant().await;
}

// ════════════════════════════════════════════════════════════════════════════
// S4: validation error
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn s4_validation_error_names_missing_field() {
    let harness = Harness::new().await;
    let call_id = harness.enqueue("leads.create", json!({"name": "x"})).await;

    harness.work_one().await.unwrap();

    let receipt = harness.receipt(&call_id).await.unwrap();
    assert_eq!(receipt.status, "failed");
    let error = result_of(&receipt)["error"].clone();
    assert_eq!(error["error_code"], "validation_error");
    // The missing key field (phone) is named in the error detail
    let rendered = error.to_string();
    assert!(rendered.contains("phone"), "error should name the field: {rendered}");
    harness.assert_receipt_invariant().await;
}

// ════════════════════════════════════════════════════════════════════════════
// S5: timeout enforcement
// ════════════════════════════════════════════════════════════════════════════

const SLEEPY_CATALOG: &str = r#"[
    {"name": "test.sleep", "description": "sleeps well past its deadline",
     "input_schema": {"type": "object"}, "output_schema": {"type": "object"},
     "idempotency": {"mode": "none"}, "timeout_ms": 500}
]"#;

#[tokio::test]
async fn s5_timeout_is_enforced_by_the_engine() {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    let registry = Arc::new(Registry::from_document(SLEEPY_CATALOG).unwrap());
    let mut handlers = HandlerRegistry::default();
    handlers.insert("test.sleep", |_input, _ctx| {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(HandlerOutcome::success(json!({}), Effects::default()))
        })
    });
    let executor = Executor::new(
        pool.clone(),
        registry,
        Arc::new(handlers),
        ProviderSecrets::default(),
    );

    pool.interact(|conn| {
        db::enqueue_sync(conn, "c-sleep", "test.sleep", "{}", None)?;
        Ok(())
    })
    .await
    .unwrap();

    let claimed = pool
        .interact(|conn| Ok(db::claim_next_sync(conn, "w1")?))
        .await
        .unwrap()
        .unwrap();

    let started = std::time::Instant::now();
    executor.execute(&claimed).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= std::time::Duration::from_millis(500));
    assert!(
        elapsed < std::time::Duration::from_millis(1500),
        "engine must cut the handler off near the deadline, took {elapsed:?}"
    );

    let receipt = pool
        .interact(|conn| Ok(db::get_receipt_sync(conn, "c-sleep")?))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.status, "failed");
    let result: Value = serde_json::from_str(&receipt.result).unwrap();
    assert_eq!(result["error"]["error_code"], "timeout");
}

// ════════════════════════════════════════════════════════════════════════════
// S6: not configured
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn s6_send_sms_without_credentials_is_not_configured() {
    let harness = Harness::new().await;
    let call_id = harness
        .enqueue("comms.send_sms", json!({"to": "0412345678", "body": "hi"}))
        .await;

    harness.work_one().await.unwrap();

    let receipt = harness.receipt(&call_id).await.unwrap();
    assert_eq!(receipt.status, "not_configured");
    let result = result_of(&receipt);
    assert!(!result["required_env"].as_array().unwrap().is_empty());
    assert!(!result["next_steps"].as_array().unwrap().is_empty());
    assert!(result["reason"].is_string());
    harness.assert_receipt_invariant().await;
}

// ════════════════════════════════════════════════════════════════════════════
// S7: webhook dedup, end to end
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn s7_signed_webhook_delivered_twice_executes_once() {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    let registry = Arc::new(Registry::load().unwrap());
    let secrets = ProviderSecrets {
        ghl_webhook: Some("hook-secret".to_string()),
        ..Default::default()
    };
    let app = create_router(AppState::new(pool.clone(), registry.clone(), secrets.clone()));

    let body = json!({
        "event": "contact.create",
        "id": "ext-99",
        "data": {"name": "John", "phone": "0412345678", "suburb": "Clayton"}
    })
    .to_string();
    let signature = webhooks::sign_body("hook-secret", body.as_bytes());

    let deliver = |app: axum::Router, body: String, signature: String| async move {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/webhooks/ghl")
            .header("content-type", "application/json")
            .header("x-signature", signature)
            .body(axum::body::Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice::<Value>(&bytes).unwrap()
    };

    let first = deliver(app.clone(), body.clone(), signature.clone()).await;
    assert_eq!(first["status"], "queued");
    let second = deliver(app, body, signature).await;
    assert_eq!(second["status"], "duplicate");

    // Exactly one queue row made it through
    let (queued, _) = pool
        .interact(|conn| Ok(db::queue_counts_sync(conn)?))
        .await
        .unwrap();
    assert_eq!(queued, 1);

    // And the worker seals it into exactly one receipt
    let executor = Executor::new(
        pool.clone(),
        registry,
        Arc::new(HandlerRegistry::with_all_domains()),
        secrets,
    );
    let claimed = pool
        .interact(|conn| Ok(db::claim_next_sync(conn, "w1")?))
        .await
        .unwrap()
        .unwrap();
    executor.execute(&claimed).await.unwrap();

    let receipts: i64 = pool
        .interact(|conn| Ok(db::receipt_count_sync(conn)?))
        .await
        .unwrap();
    assert_eq!(receipts, 1);
}

// ════════════════════════════════════════════════════════════════════════════
// Invariant 3: no duplicate claim across racing workers
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn no_duplicate_claim_under_contention() {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    pool.interact(|conn| {
        for i in 0..20 {
            db::enqueue_sync(conn, &format!("c{i}"), "os.health_check", "{}", None)?;
        }
        Ok(())
    })
    .await
    .unwrap();

    let mut tasks = Vec::new();
    for w in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let worker_id = format!("w{w}");
            let mut claimed = Vec::new();
            loop {
                let worker_id = worker_id.clone();
                let row = pool
                    .interact_with_retry(move |conn| Ok(db::claim_next_sync(conn, &worker_id)?))
                    .await
                    .unwrap();
                match row {
                    Some(invocation) => claimed.push(invocation.call_id),
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut all: Vec<String> = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }

    assert_eq!(all.len(), 20, "every row claimed exactly once");
    let unique: std::collections::HashSet<&String> = all.iter().collect();
    assert_eq!(unique.len(), 20, "no call_id claimed by two workers");
}

// ════════════════════════════════════════════════════════════════════════════
// Invariant 2: status monotonicity through the pipeline
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn status_walks_queued_running_terminal() {
    let harness = Harness::new().await;
    let call_id = harness.enqueue("os.health_check", json!({})).await;
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Queued);

    // No receipt may exist before the row reaches running
    assert!(harness.receipt(&call_id).await.is_none());

    let claimed = harness
        .pool
        .interact(|conn| Ok(db::claim_next_sync(conn, "w1")?))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("w1"));

    harness.executor.execute(&claimed).await.unwrap();
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Succeeded);

    // Terminal state cannot regress
    let stuck = harness
        .pool
        .interact(move |conn| {
            Ok(db::finish_sync(conn, &claimed.call_id, InvocationStatus::Failed, None)?)
        })
        .await
        .unwrap();
    assert!(!stuck);
    assert_eq!(harness.row_status(&call_id).await, InvocationStatus::Succeeded);
}

// ════════════════════════════════════════════════════════════════════════════
// Full pipeline: lead → inspection → quote → job → invoice
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn full_crm_pipeline_runs_through_the_queue() {
    let harness = Harness::new().await;

    let create = harness.enqueue("leads.create", john()).await;
    harness.work_one().await.unwrap();
    let lead_id = result_of(&harness.receipt(&create).await.unwrap())["lead_id"]
        .as_str()
        .unwrap()
        .to_string();

    let book = harness
        .enqueue(
            "inspections.book",
            json!({"lead_id": lead_id, "scheduled_for": "2026-08-03T09:00:00Z"}),
        )
        .await;
    harness.work_one().await.unwrap();
    assert_eq!(harness.receipt(&book).await.unwrap().status, "succeeded");

    let quote = harness
        .enqueue(
            "quotes.create",
            json!({"lead_id": lead_id, "amount_cents": 420000, "description": "Full reroof"}),
        )
        .await;
    harness.work_one().await.unwrap();
    let quote_id = result_of(&harness.receipt(&quote).await.unwrap())["quote_id"]
        .as_str()
        .unwrap()
        .to_string();

    let accept = harness
        .enqueue("quotes.accept", json!({"quote_id": quote_id}))
        .await;
    harness.work_one().await.unwrap();
    assert_eq!(harness.receipt(&accept).await.unwrap().status, "succeeded");

    let schedule = harness
        .enqueue("jobs.schedule", json!({"quote_id": quote_id}))
        .await;
    harness.work_one().await.unwrap();
    let job_id = result_of(&harness.receipt(&schedule).await.unwrap())["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let complete = harness
        .enqueue("jobs.complete", json!({"job_id": job_id}))
        .await;
    harness.work_one().await.unwrap();
    assert_eq!(harness.receipt(&complete).await.unwrap().status, "succeeded");

    let invoice = harness
        .enqueue(
            "invoices.create",
            json!({"job_id": job_id, "amount_cents": 420000}),
        )
        .await;
    harness.work_one().await.unwrap();
    let invoice_id = result_of(&harness.receipt(&invoice).await.unwrap())["invoice_id"]
        .as_str()
        .unwrap()
        .to_string();

    let paid = harness
        .enqueue("invoices.mark_paid", json!({"invoice_id": invoice_id}))
        .await;
    harness.work_one().await.unwrap();
    assert_eq!(harness.receipt(&paid).await.unwrap().status, "succeeded");

    harness.assert_receipt_invariant().await;
}
